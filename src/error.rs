use serenity::model::id::GuildId;
use thiserror::Error;

use crate::audio::queue::QueueError;

/// Errores del núcleo de reproducción.
///
/// Ninguna variante contiene texto pensado para el usuario final; la capa de
/// comandos decide cómo presentar cada caso.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no hay más canciones en la cola")]
    EmptyQueue,

    #[error("no se encontraron resultados para: {0}")]
    NotFound(String),

    #[error("no se encontró un equivalente reproducible para: {0}")]
    Fulfillment(String),

    #[error("el nodo de audio rechazó la operación: {0}")]
    Transport(String),

    #[error("error del proveedor {provider}: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("no hay sesión de voz activa en el guild {0}")]
    NotConnected(GuildId),

    #[error("el usuario no está en un canal de voz")]
    NotInVoiceChannel,

    #[error("el bot está conectado a otro canal de voz")]
    DifferentVoiceChannel,

    #[error("no hay nada reproduciéndose")]
    NothingPlaying,

    #[error("índice fuera de rango: {0}")]
    IndexOutOfRange(usize),

    #[error("la sesión se reinició mientras se preparaba el track")]
    Superseded,

    #[error("la cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("respuesta inválida: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PlayerError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }
}

impl From<QueueError> for PlayerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Empty => PlayerError::EmptyQueue,
        }
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;
