//! Now-playing seam.
//!
//! The session never formats messages itself. After each state change it
//! hands a [`NowPlayingView`] snapshot to a [`NowPlayingSink`]; the gateway
//! layer decides how to draw it. [`LoggingSink`] is the headless sink used by
//! the bundled binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::time::Duration;
use tracing::info;

use crate::audio::autoplay::AutoplayMode;
use crate::audio::effects::FilterState;
use crate::audio::player::PlaybackStatus;
use crate::audio::queue::LoopMode;
use crate::error::PlayerResult;
use crate::sources::TrackRef;

/// Canal y usuario dueños del mensaje de "reproduciendo ahora"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionContext {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub message_id: Option<MessageId>,
}

/// Foto del estado de reproducción para la interfaz
#[derive(Debug, Clone)]
pub struct NowPlayingView {
    pub guild_id: GuildId,
    /// Track tal como lo pidió el usuario
    pub track: TrackRef,
    /// Track que realmente suena (puede ser el equivalente resuelto)
    pub playable: TrackRef,
    pub position_ms: u64,
    pub status: PlaybackStatus,
    pub loop_mode: LoopMode,
    pub autoplay: AutoplayMode,
    pub volume: u16,
    pub filters: FilterState,
    pub queued: usize,
    pub auto_queued: usize,
    pub up_next: Option<TrackRef>,
    pub can_go_back: bool,
    /// Cuándo se pidió el track
    pub requested_at: DateTime<Utc>,
    pub interaction: Option<InteractionContext>,
}

impl NowPlayingView {
    pub fn requested_ago(&self, now: DateTime<Utc>) -> Duration {
        (now - self.requested_at).to_std().unwrap_or_default()
    }

    pub fn remaining(&self) -> Option<Duration> {
        if self.playable.is_stream() {
            return None;
        }
        Some(Duration::from_millis(
            self.playable.length_ms().saturating_sub(self.position_ms),
        ))
    }
}

#[async_trait]
pub trait NowPlayingSink: Send + Sync {
    /// Dibuja el estado; devuelve el mensaje creado o editado
    async fn render(&self, view: &NowPlayingView) -> PlayerResult<Option<MessageId>>;

    /// Borra el mensaje anterior, si lo hay
    async fn clear(&self, guild_id: GuildId, interaction: Option<InteractionContext>) -> PlayerResult<()>;
}

/// Sink sin interfaz: solo registra en el log
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl NowPlayingSink for LoggingSink {
    async fn render(&self, view: &NowPlayingView) -> PlayerResult<Option<MessageId>> {
        let waited = Duration::from_secs(view.requested_ago(Utc::now()).as_secs());
        info!(
            "🎵 [{}] {} ({}/{}) {:?} loop={:?} autoplay={:?} cola={}+{} pedido hace {}",
            view.guild_id,
            view.track,
            format_duration(Duration::from_millis(view.position_ms)),
            format_duration(view.playable.duration()),
            view.status,
            view.loop_mode,
            view.autoplay,
            view.queued,
            view.auto_queued,
            humantime::format_duration(waited),
        );
        Ok(None)
    }

    async fn clear(&self, guild_id: GuildId, _interaction: Option<InteractionContext>) -> PlayerResult<()> {
        info!("🧹 [{}] Mensaje de reproducción limpiado", guild_id);
        Ok(())
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
