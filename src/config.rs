use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::autoplay::AutoplaySettings;
use crate::audio::player::{SessionSettings, MAX_VOLUME};
use crate::sources::ProviderKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // Nodo de audio
    pub lavalink_host: String,
    pub lavalink_port: u16,
    pub lavalink_password: String,
    pub lavalink_secure: bool,
    pub lavalink_session_id: Option<String>,

    // Catálogo (opcional)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,

    // Reproducción
    pub default_volume: u16,
    pub default_provider: ProviderKind,
    pub max_queue_size: usize,
    pub history_cap: usize,
    pub search_limit: usize,

    // Autoplay
    pub autoplay_cutoff: usize,
    pub max_population: usize,
    pub seed_history_cap: usize,
    pub cache_lookahead: usize,
    pub max_consecutive_failures: u32,

    // Inactividad
    pub inactivity_timeout_minutes: u64,
    pub idle_check_interval_secs: u64,

    // Caché de equivalentes
    pub fulfillment_cache_size: usize,
    pub fulfillment_cache_ttl_secs: u64,
}

impl Config {
    /// Carga `.env` y luego las variables de entorno sobre los valores por defecto
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config: Self = ::config::Config::builder()
            .add_source(::config::Environment::default().try_parsing(true))
            .build()
            .context("No se pudo leer la configuración del entorno")?
            .try_deserialize()
            .context("Configuración inválida")?;

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 1000
    /// - Queue, history and cache sizes must be greater than 0
    /// - Spotify credentials come in pairs
    /// - The idle check interval must be shorter than the inactivity timeout
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > MAX_VOLUME {
            anyhow::bail!("Default volume must be between 0 and {}, got: {}", MAX_VOLUME, self.default_volume);
        }

        if self.lavalink_host.trim().is_empty() {
            anyhow::bail!("Lavalink host cannot be empty");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.history_cap == 0 {
            anyhow::bail!("History cap must be greater than 0");
        }

        if self.fulfillment_cache_size == 0 {
            anyhow::bail!("Fulfillment cache size must be greater than 0");
        }

        if self.search_limit == 0 || self.search_limit > 30 {
            anyhow::bail!("Search limit must be between 1 and 30, got: {}", self.search_limit);
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together");
        }

        if self.idle_check_interval() >= self.inactivity_timeout() {
            anyhow::bail!(
                "Idle check interval ({}s) must be shorter than the inactivity timeout ({}min)",
                self.idle_check_interval_secs,
                self.inactivity_timeout_minutes
            );
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Secrets (node password, catalog credentials) are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Lavalink: {}\n  \
            Playback: {}% vol, provider {}, queue {}, history {}\n  \
            Autoplay: cutoff {}, population {}, seed memory {}, lookahead {}\n  \
            Catalog: {}\n  \
            Inactivity: disconnect after {} (check every {})",
            self.lavalink_base_url(),
            self.default_volume,
            self.default_provider,
            self.max_queue_size,
            self.history_cap,
            self.autoplay_cutoff,
            self.max_population,
            self.seed_history_cap,
            self.cache_lookahead,
            if self.spotify_client_id.is_some() { "spotify" } else { "disabled" },
            humantime::format_duration(self.inactivity_timeout()),
            humantime::format_duration(self.idle_check_interval()),
        )
    }

    pub fn lavalink_base_url(&self) -> String {
        let scheme = if self.lavalink_secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.lavalink_host, self.lavalink_port)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_minutes * 60)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    pub fn fulfillment_cache_ttl(&self) -> Option<Duration> {
        (self.fulfillment_cache_ttl_secs > 0).then(|| Duration::from_secs(self.fulfillment_cache_ttl_secs))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            history_cap: self.history_cap,
            seed_history_cap: self.seed_history_cap,
            cache_lookahead: self.cache_lookahead,
            max_consecutive_failures: self.max_consecutive_failures,
            default_volume: self.default_volume,
        }
    }

    pub fn autoplay_settings(&self) -> AutoplaySettings {
        AutoplaySettings {
            cutoff: self.autoplay_cutoff,
            max_population: self.max_population,
            ..AutoplaySettings::default()
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        let session = SessionSettings::default();
        let autoplay = AutoplaySettings::default();

        Self {
            lavalink_host: "localhost".to_string(),
            lavalink_port: 2333,
            lavalink_password: "youshallnotpass".to_string(),
            lavalink_secure: false,
            lavalink_session_id: None,

            spotify_client_id: None,
            spotify_client_secret: None,

            default_volume: session.default_volume,
            default_provider: ProviderKind::YouTube,
            max_queue_size: 1000,
            history_cap: session.history_cap,
            search_limit: 30,

            autoplay_cutoff: autoplay.cutoff,
            max_population: autoplay.max_population,
            seed_history_cap: session.seed_history_cap,
            cache_lookahead: session.cache_lookahead,
            max_consecutive_failures: session.max_consecutive_failures,

            inactivity_timeout_minutes: 30,
            idle_check_interval_secs: 10,

            fulfillment_cache_size: 500,
            fulfillment_cache_ttl_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lavalink_base_url(), "http://localhost:2333");
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.fulfillment_cache_ttl(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = Config {
            default_volume: 1500,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            spotify_client_id: Some("id".into()),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            idle_check_interval_secs: 3600,
            inactivity_timeout_minutes: 1,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_hides_secrets() {
        let config = Config {
            lavalink_password: "super-secret".into(),
            spotify_client_id: Some("client".into()),
            spotify_client_secret: Some("hidden".into()),
            ..Config::default()
        };

        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(!summary.contains("hidden"));
        assert!(summary.contains("spotify"));
    }

    #[test]
    fn test_projections() {
        let config = Config {
            history_cap: 10,
            autoplay_cutoff: 7,
            ..Config::default()
        };

        assert_eq!(config.session_settings().history_cap, 10);
        assert_eq!(config.autoplay_settings().cutoff, 7);
        assert_eq!(config.autoplay_settings().recommendation_limit, 20);
    }
}
