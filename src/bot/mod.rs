//! # Bot Module
//!
//! Session controller for Open Music.
//!
//! This module maps Discord guilds to playback sessions:
//! - Voice channel bookkeeping and the voice rule for commands
//! - Command intents (`handlers`), independent of any gateway library
//! - Dispatch of events coming back from the audio node (`events`)
//! - Background inactivity monitor
//!
//! ## Architecture
//!
//! [`SessionController`] keeps one [`GuildEntry`] per connected guild in a
//! [`DashMap`]. Entries are cloned out of the map before any `.await`, so no
//! shard lock is ever held while a session talks to the node.
//!
//! ## Example
//!
//! ```rust,no_run
//! use open_music_session::bot::{CommandContext, SessionController};
//! use std::sync::Arc;
//!
//! # async fn example(controller: Arc<SessionController>, ctx: CommandContext) -> anyhow::Result<()> {
//! controller.join(&ctx)?;
//! controller.pause(&ctx).await?;
//! controller.leave(ctx.guild_id).await;
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod events;
pub mod handlers;

pub use handlers::{PlayOutcome, PlayRequest};

use crate::audio::player::{PlayerSession, SessionDeps, SessionSettings};
use crate::config::Config;
use crate::error::{PlayerError, PlayerResult};
use crate::sources::{Track, TrackSourceResolver};
use crate::ui::InteractionContext;

/// Quién pide el comando y desde dónde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandContext {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub text_channel: ChannelId,
    /// Canal de voz del usuario, si está en uno
    pub user_voice_channel: Option<ChannelId>,
}

impl CommandContext {
    fn interaction(&self) -> InteractionContext {
        InteractionContext {
            channel_id: self.text_channel,
            user_id: self.user_id,
            message_id: None,
        }
    }
}

/// Sesión viva de un servidor
#[derive(Clone)]
pub struct GuildEntry {
    pub session: Arc<PlayerSession>,
    pub voice_channel: ChannelId,
    pub last_activity: Instant,
    /// Resultados del último `search`, para `select`
    pub search_results: Vec<Track>,
}

pub struct SessionController {
    guilds: DashMap<GuildId, GuildEntry>,
    resolver: TrackSourceResolver,
    deps: SessionDeps,
    settings: SessionSettings,
    max_queue_size: usize,
    inactivity_timeout: Duration,
    idle_check_interval: Duration,
}

impl SessionController {
    pub fn new(config: &Config, resolver: TrackSourceResolver, deps: SessionDeps) -> Self {
        Self {
            guilds: DashMap::new(),
            resolver,
            deps,
            settings: config.session_settings(),
            max_queue_size: config.max_queue_size,
            inactivity_timeout: config.inactivity_timeout(),
            idle_check_interval: config.idle_check_interval(),
        }
    }

    pub fn resolver(&self) -> &TrackSourceResolver {
        &self.resolver
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    pub fn session(&self, guild_id: GuildId) -> Option<Arc<PlayerSession>> {
        self.guilds.get(&guild_id).map(|entry| Arc::clone(&entry.session))
    }

    pub fn voice_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.guilds.get(&guild_id).map(|entry| entry.voice_channel)
    }

    pub fn active_sessions(&self) -> usize {
        self.guilds.len()
    }

    /// Conecta al canal de voz del usuario (o reutiliza la sesión si ya está ahí)
    pub fn join(&self, ctx: &CommandContext) -> PlayerResult<Arc<PlayerSession>> {
        let channel = ctx.user_voice_channel.ok_or(PlayerError::NotInVoiceChannel)?;

        let entry = self.guilds.entry(ctx.guild_id).or_insert_with(|| {
            info!("🔊 Conectado al canal de voz {} en guild {}", channel, ctx.guild_id);
            GuildEntry {
                session: PlayerSession::new(ctx.guild_id, self.deps.clone(), self.settings.clone()),
                voice_channel: channel,
                last_activity: Instant::now(),
                search_results: Vec::new(),
            }
        });

        if entry.voice_channel != channel {
            return Err(PlayerError::DifferentVoiceChannel);
        }
        let session = Arc::clone(&entry.session);
        drop(entry);

        session.set_interaction(ctx.interaction());
        Ok(session)
    }

    /// Desconecta y libera la sesión. Devuelve `false` si no había ninguna.
    pub async fn leave(&self, guild_id: GuildId) -> bool {
        let Some((_, entry)) = self.guilds.remove(&guild_id) else {
            return false;
        };
        let session = entry.session;

        if let Err(e) = session.stop().await {
            warn!("⚠️ Error al detener la reproducción en {}: {}", guild_id, e);
        }
        session.teardown().await;
        if let Err(e) = self.deps.transport.destroy(guild_id).await {
            warn!("⚠️ No se pudo destruir el reproductor en {}: {}", guild_id, e);
        }

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        true
    }

    /// Sesión para un comando que afecta la reproducción (regla de voz)
    pub fn session_for(&self, ctx: &CommandContext) -> PlayerResult<Arc<PlayerSession>> {
        let session = {
            let mut entry = self
                .guilds
                .get_mut(&ctx.guild_id)
                .ok_or(PlayerError::NotConnected(ctx.guild_id))?;

            match ctx.user_voice_channel {
                None => return Err(PlayerError::NotInVoiceChannel),
                Some(channel) if channel != entry.voice_channel => {
                    return Err(PlayerError::DifferentVoiceChannel)
                }
                Some(_) => {}
            }
            entry.last_activity = Instant::now();
            Arc::clone(&entry.session)
        };

        session.set_interaction(ctx.interaction());
        Ok(session)
    }

    /// Como `session_for`, pero conecta si todavía no hay sesión
    pub fn session_or_join(&self, ctx: &CommandContext) -> PlayerResult<Arc<PlayerSession>> {
        match self.session_for(ctx) {
            Err(PlayerError::NotConnected(_)) => self.join(ctx),
            other => other,
        }
    }

    pub(crate) fn store_search(&self, guild_id: GuildId, results: Vec<Track>) {
        if let Some(mut entry) = self.guilds.get_mut(&guild_id) {
            entry.search_results = results;
        }
    }

    pub(crate) fn search_result(&self, guild_id: GuildId, index: usize) -> Option<Track> {
        self.guilds
            .get(&guild_id)
            .and_then(|entry| entry.search_results.get(index).cloned())
    }

    /// Pide al sink borrar un mensaje de reproducción viejo
    pub(crate) async fn clear_now_playing(&self, guild_id: GuildId, interaction: InteractionContext) {
        if let Err(e) = self.deps.sink.clear(guild_id, Some(interaction)).await {
            debug!("🧹 No se pudo borrar el mensaje en {}: {}", guild_id, e);
        }
    }

    /// Desconecta las sesiones sin reproducción por más de `inactivity_timeout`
    pub async fn check_inactivity_at(&self, now: Instant) -> Vec<GuildId> {
        let mut expired = Vec::new();

        for mut entry in self.guilds.iter_mut() {
            if entry.session.is_active() {
                entry.last_activity = now;
                continue;
            }

            let last = match entry.session.idle_since() {
                Some(idle) => idle.max(entry.last_activity),
                None => entry.last_activity,
            };
            if now.saturating_duration_since(last) >= self.inactivity_timeout {
                expired.push(*entry.key());
            }
        }

        for guild_id in &expired {
            info!("⏰ Desconectando guild {} por inactividad", guild_id);
            self.leave(*guild_id).await;
        }
        expired
    }

    pub fn spawn_inactivity_monitor(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.idle_check_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("🛑 Monitor de inactividad detenido");
                        break;
                    }
                    _ = interval.tick() => {
                        controller.check_inactivity_at(Instant::now()).await;
                        controller.sweep_fulfillment_cache();
                    }
                }
            }
        })
    }

    /// Purga coincidencias expiradas del caché compartido
    pub fn sweep_fulfillment_cache(&self) -> usize {
        let cache = self.deps.fulfillment.cache();
        let removed = cache.cleanup_expired();
        if removed > 0 {
            let metrics = cache.metrics();
            debug!(
                "🧹 {} coincidencias expiradas eliminadas (hit rate {:.1}%)",
                removed,
                metrics.hit_rate() * 100.0
            );
        }
        removed
    }

    /// Cierra todas las sesiones
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.guilds.iter().map(|entry| *entry.key()).collect();
        join_all(guilds.into_iter().map(|guild_id| self.leave(guild_id))).await;
        info!("🧹 Todas las sesiones cerradas");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::autoplay::{AutoplaySettings, RecommendationEngine};
    use crate::audio::fulfillment::FulfillmentService;
    use crate::audio::player::PlayOptions;
    use crate::cache::FulfillmentCache;
    use crate::sources::ProviderKind;
    use crate::testing::{video, video_ref, FakeBackend, RecordingSink, RecordingTransport, TransportCall};

    pub(crate) const VOICE: u64 = 10;

    pub(crate) struct Fixture {
        pub backend: Arc<FakeBackend>,
        pub transport: Arc<RecordingTransport>,
        pub sink: Arc<RecordingSink>,
        pub controller: Arc<SessionController>,
    }

    pub(crate) fn fixture() -> Fixture {
        let backend = Arc::new(FakeBackend::default());
        let transport = Arc::new(RecordingTransport::default());
        let sink = Arc::new(RecordingSink::default());
        let deps = SessionDeps {
            transport: transport.clone(),
            fulfillment: Arc::new(FulfillmentService::new(
                backend.clone(),
                None,
                FulfillmentCache::new(10, None),
            )),
            engine: Arc::new(RecommendationEngine::new(backend.clone(), None, AutoplaySettings::default())),
            sink: sink.clone(),
        };
        let config = Config {
            max_queue_size: 5,
            ..Config::default()
        };
        let resolver = TrackSourceResolver::new(backend.clone(), ProviderKind::YouTube, config.search_limit);

        Fixture {
            backend,
            transport,
            sink,
            controller: Arc::new(SessionController::new(&config, resolver, deps)),
        }
    }

    pub(crate) fn user_in(voice: Option<u64>) -> CommandContext {
        CommandContext {
            guild_id: GuildId::new(1),
            user_id: UserId::new(2),
            text_channel: ChannelId::new(3),
            user_voice_channel: voice.map(ChannelId::new),
        }
    }

    #[test]
    fn test_join_requires_voice_channel() {
        let fixture = fixture();
        assert!(matches!(
            fixture.controller.join(&user_in(None)),
            Err(PlayerError::NotInVoiceChannel)
        ));

        let first = fixture.controller.join(&user_in(Some(VOICE))).unwrap();
        let again = fixture.controller.join(&user_in(Some(VOICE))).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        assert!(matches!(
            fixture.controller.join(&user_in(Some(99))),
            Err(PlayerError::DifferentVoiceChannel)
        ));
    }

    #[test]
    fn test_voice_rule_for_commands() {
        let fixture = fixture();
        assert!(matches!(
            fixture.controller.session_for(&user_in(Some(VOICE))),
            Err(PlayerError::NotConnected(_))
        ));

        fixture.controller.join(&user_in(Some(VOICE))).unwrap();

        assert!(fixture.controller.session_for(&user_in(Some(VOICE))).is_ok());
        assert!(matches!(
            fixture.controller.session_for(&user_in(None)),
            Err(PlayerError::NotInVoiceChannel)
        ));
        assert!(matches!(
            fixture.controller.session_for(&user_in(Some(99))),
            Err(PlayerError::DifferentVoiceChannel)
        ));
    }

    #[tokio::test]
    async fn test_leave_tears_down_session() {
        let fixture = fixture();
        let session = fixture.controller.join(&user_in(Some(VOICE))).unwrap();

        assert!(fixture.controller.leave(GuildId::new(1)).await);

        assert!(session.is_closed());
        assert_eq!(fixture.controller.active_sessions(), 0);
        assert_eq!(fixture.transport.calls().last(), Some(&TransportCall::Destroy));
        assert!(!fixture.controller.leave(GuildId::new(1)).await);
    }

    #[tokio::test]
    async fn test_inactivity_disconnects_idle_sessions_only() {
        let fixture = fixture();
        let session = fixture.controller.join(&user_in(Some(VOICE))).unwrap();
        let later = Instant::now() + Duration::from_secs(31 * 60);

        session.play(video_ref("a"), PlayOptions::manual()).await.unwrap();
        assert!(fixture.controller.check_inactivity_at(later).await.is_empty());
        assert_eq!(fixture.controller.active_sessions(), 1);

        session.stop().await.unwrap();
        let expired = fixture
            .controller
            .check_inactivity_at(later + Duration::from_secs(31 * 60))
            .await;

        assert_eq!(expired, vec![GuildId::new(1)]);
        assert_eq!(fixture.controller.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_cancel() {
        let fixture = fixture();
        let token = CancellationToken::new();
        let handle = fixture.controller.spawn_inactivity_monitor(token.clone());

        token.cancel();

        assert!(handle.await.is_ok());
    }

    #[test]
    fn test_sweep_drops_expired_matches() {
        let fixture = fixture();
        let cache = fixture.controller.deps.fulfillment.cache();
        cache.insert_with_ttl("old".into(), video("a"), Some(Duration::ZERO));
        cache.insert("fresh".into(), video("b"));

        assert_eq!(fixture.controller.sweep_fulfillment_cache(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let fixture = fixture();
        fixture.controller.join(&user_in(Some(VOICE))).unwrap();

        fixture.controller.shutdown().await;

        assert_eq!(fixture.controller.active_sessions(), 0);
        assert_eq!(fixture.sink.clears(), 1);
        assert!(fixture.backend.calls().is_empty());
    }
}
