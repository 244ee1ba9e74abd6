use async_trait::async_trait;
use serenity::model::id::GuildId;

use super::effects::FilterState;
use crate::error::PlayerResult;

/// Orden de reproducción enviada al nodo de audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerUpdate {
    /// Payload opaco del track
    pub encoded: String,
    pub position_ms: u64,
    pub volume: u16,
    pub paused: bool,
    /// No reemplazar si ya hay algo sonando
    pub no_replace: bool,
}

/// Canal de comandos hacia el nodo de audio externo
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn update_player(&self, guild_id: GuildId, update: PlayerUpdate) -> PlayerResult<()>;

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> PlayerResult<()>;

    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> PlayerResult<()>;

    async fn seek(&self, guild_id: GuildId, position_ms: u64) -> PlayerResult<()>;

    async fn stop(&self, guild_id: GuildId) -> PlayerResult<()>;

    async fn set_filters(&self, guild_id: GuildId, filters: FilterState) -> PlayerResult<()>;

    async fn destroy(&self, guild_id: GuildId) -> PlayerResult<()>;
}

/// Motivo con el que terminó un track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Solo los finales naturales y los fallos de carga avanzan la cola
    pub fn may_start_next(&self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }

    pub fn from_wire(reason: &str) -> Option<Self> {
        match reason {
            "finished" => Some(TrackEndReason::Finished),
            "loadFailed" => Some(TrackEndReason::LoadFailed),
            "stopped" => Some(TrackEndReason::Stopped),
            "replaced" => Some(TrackEndReason::Replaced),
            "cleanup" => Some(TrackEndReason::Cleanup),
            _ => None,
        }
    }
}

/// Eventos que llegan desde el nodo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    TrackStart {
        guild_id: GuildId,
        encoded: String,
    },
    TrackEnd {
        guild_id: GuildId,
        encoded: String,
        reason: TrackEndReason,
    },
    PlayerInactive {
        guild_id: GuildId,
    },
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        by_remote: bool,
    },
}

impl TransportEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            TransportEvent::TrackStart { guild_id, .. }
            | TransportEvent::TrackEnd { guild_id, .. }
            | TransportEvent::PlayerInactive { guild_id }
            | TransportEvent::WebSocketClosed { guild_id, .. } => *guild_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_reasons() {
        assert!(TrackEndReason::Finished.may_start_next());
        assert!(TrackEndReason::LoadFailed.may_start_next());
        assert!(!TrackEndReason::Replaced.may_start_next());
        assert_eq!(TrackEndReason::from_wire("loadFailed"), Some(TrackEndReason::LoadFailed));
        assert_eq!(TrackEndReason::from_wire("weird"), None);
    }
}
