use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AlbumRef, CatalogClient, ProviderKind, Track};
use crate::config::Config;
use crate::error::{PlayerError, PlayerResult};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Page,
}

#[derive(Debug, Deserialize)]
struct Page {
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct RecommendationsResponse {
    tracks: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    name: String,
    duration_ms: u64,
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
    #[serde(default)]
    external_ids: ExternalIds,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
    #[serde(default)]
    images: Vec<SpotifyImage>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

impl SpotifyTrack {
    fn into_track(self) -> Option<Track> {
        let id = self.id?;
        let author = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut track = Track::new(id.clone(), self.name, author, ProviderKind::Spotify)
            .with_length(self.duration_ms)
            .with_uri(format!("https://open.spotify.com/track/{id}"));

        if let Some(isrc) = self.external_ids.isrc {
            track = track.with_isrc(isrc);
        }
        if let Some(album) = self.album {
            if let Some(image) = album.images.into_iter().next() {
                track = track.with_artwork(image.url);
            }
            track = track.with_album(AlbumRef {
                name: album.name,
                uri: album.external_urls.spotify,
            });
        }
        Some(track)
    }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Cliente del catálogo de Spotify (client credentials)
pub struct SpotifyClient {
    client: Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> PlayerResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        })
    }

    /// `None` cuando no hay credenciales configuradas
    pub fn from_config(config: &Config) -> PlayerResult<Option<Self>> {
        match (&config.spotify_client_id, &config.spotify_client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                info!("🟢 Catálogo de Spotify habilitado");
                Self::new(id.clone(), secret.clone()).map(Some)
            }
            _ => {
                info!("⚪ Sin credenciales de Spotify, catálogo deshabilitado");
                Ok(None)
            }
        }
    }

    async fn access_token(&self) -> PlayerResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("🔑 Renovando token de Spotify");
        let credentials = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response: TokenResponse = self
            .client
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {credentials}"))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // margen de un minuto antes de que expire
        let ttl = Duration::from_secs(response.expires_in.saturating_sub(60));
        *cached = Some(AccessToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(response.access_token)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> PlayerResult<Option<T>> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{API_URL}{path}"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                warn!("⚠️ Spotify respondió {} para {}", response.status(), path);
                Ok(None)
            }
            status if !status.is_success() => Err(PlayerError::provider("spotify", status.to_string())),
            _ => Ok(Some(response.json().await?)),
        }
    }
}

#[async_trait]
impl CatalogClient for SpotifyClient {
    async fn search_tracks(&self, query: &str, limit: usize) -> PlayerResult<Vec<Track>> {
        let params = [
            ("q", query.to_string()),
            ("type", "track".to_string()),
            ("limit", limit.clamp(1, 50).to_string()),
        ];
        let response: Option<SearchResponse> = self.get("/search", &params).await?;

        Ok(response
            .map(|r| r.tracks.items.into_iter().filter_map(SpotifyTrack::into_track).collect())
            .unwrap_or_default())
    }

    async fn recommendations(&self, seeds: &[String], limit: usize) -> PlayerResult<Vec<Track>> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }
        let params = [
            ("seed_tracks", seeds.iter().take(5).cloned().collect::<Vec<_>>().join(",")),
            ("limit", limit.clamp(1, 100).to_string()),
        ];
        let response: Option<RecommendationsResponse> = self.get("/recommendations", &params).await?;

        let tracks: Vec<Track> = response
            .map(|r| r.tracks.into_iter().filter_map(SpotifyTrack::into_track).collect())
            .unwrap_or_default();
        debug!("🎲 Spotify recomendó {} tracks a partir de {} semillas", tracks.len(), seeds.len());
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_track_mapping() {
        let body = r#"{
            "id": "4uLU6hMCjMI75M1A2tKUQC",
            "name": "Never Gonna Give You Up",
            "duration_ms": 213573,
            "artists": [{"name": "Rick Astley"}, {"name": "Someone"}],
            "album": {
                "name": "Whenever You Need Somebody",
                "images": [{"url": "https://i.scdn.co/image/abc"}],
                "external_urls": {"spotify": "https://open.spotify.com/album/xyz"}
            },
            "external_ids": {"isrc": "GBARL9300135"}
        }"#;
        let raw: SpotifyTrack = serde_json::from_str(body).unwrap();

        let track = raw.into_track().unwrap();

        assert_eq!(track.author(), "Rick Astley, Someone");
        assert_eq!(track.primary_artist(), "Rick Astley");
        assert_eq!(track.isrc().as_deref(), Some("GBARL9300135"));
        assert_eq!(track.artwork_url().as_deref(), Some("https://i.scdn.co/image/abc"));
        assert_eq!(track.uri(), "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC");
        assert!(!track.is_playable());
    }

    #[test]
    fn test_local_tracks_without_id_are_skipped() {
        let raw: SpotifyTrack =
            serde_json::from_str(r#"{"id": null, "name": "local", "duration_ms": 1, "artists": [], "album": null}"#)
                .unwrap();
        assert!(raw.into_track().is_none());
    }
}
