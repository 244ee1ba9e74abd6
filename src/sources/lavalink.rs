use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use serenity::model::id::GuildId;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{Collection, LoadResult, ProviderKind, SearchBackend, Track};
use crate::audio::effects::FilterState;
use crate::audio::transport::{PlayerUpdate, TrackEndReason, Transport, TransportEvent};
use crate::config::Config;
use crate::error::{PlayerError, PlayerResult};

#[derive(Debug, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "lowercase")]
enum LoadResponse {
    Track(RawTrack),
    Playlist(RawPlaylist),
    Search(Vec<RawTrack>),
    Empty(serde::de::IgnoredAny),
    Error(RawException),
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    encoded: String,
    info: RawTrackInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrackInfo {
    identifier: String,
    author: String,
    length: u64,
    is_stream: bool,
    title: String,
    uri: Option<String>,
    artwork_url: Option<String>,
    isrc: Option<String>,
    source_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlaylist {
    info: RawPlaylistInfo,
    #[serde(default)]
    plugin_info: Value,
    tracks: Vec<RawTrack>,
}

#[derive(Debug, Deserialize)]
struct RawPlaylistInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawException {
    message: Option<String>,
    severity: String,
}

impl From<RawTrack> for Track {
    fn from(raw: RawTrack) -> Self {
        let info = raw.info;
        let provider = ProviderKind::from_source_name(&info.source_name).unwrap_or(ProviderKind::YouTube);

        let mut track = Track::new(info.identifier, info.title, info.author, provider)
            .with_length(info.length)
            .with_stream(info.is_stream)
            .with_encoded(raw.encoded);
        if let Some(uri) = info.uri {
            track = track.with_uri(uri);
        }
        if let Some(isrc) = info.isrc {
            track = track.with_isrc(isrc);
        }
        if let Some(artwork) = info.artwork_url {
            track = track.with_artwork(artwork);
        }
        track
    }
}

/// Cliente REST de un nodo Lavalink v4.
///
/// Resuelve búsquedas (`SearchBackend`) y controla los players (`Transport`).
/// El id de sesión lo entrega la conexión websocket del gateway; hasta que se
/// conozca, las operaciones sobre players fallan con `PlayerError::Transport`.
pub struct LavalinkNode {
    client: Client,
    base_url: String,
    password: String,
    session_id: RwLock<Option<String>>,
}

impl LavalinkNode {
    pub fn new(config: &Config) -> PlayerResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        info!("🔗 Nodo Lavalink configurado en {}", config.lavalink_base_url());

        Ok(Self {
            client,
            base_url: config.lavalink_base_url(),
            password: config.lavalink_password.clone(),
            session_id: RwLock::new(config.lavalink_session_id.clone()),
        })
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        info!("🔑 Sesión de Lavalink: {}", session_id);
        *self.session_id.write() = Some(session_id);
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", &self.password)
    }

    fn player_path(&self, guild_id: GuildId) -> PlayerResult<String> {
        let session = self
            .session_id
            .read()
            .clone()
            .ok_or_else(|| PlayerError::Transport("sin sesión de Lavalink".to_string()))?;
        Ok(format!("/v4/sessions/{}/players/{}", session, guild_id.get()))
    }

    async fn patch_player(&self, guild_id: GuildId, body: Value, no_replace: bool) -> PlayerResult<()> {
        let path = self.player_path(guild_id)?;
        let response = self
            .request(Method::PATCH, &path)
            .query(&[("noReplace", no_replace)])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("❌ Lavalink rechazó la actualización ({}): {}", status, text);
            return Err(PlayerError::Transport(format!("{status}: {text}")));
        }
        Ok(())
    }

    /// Decodifica un mensaje `op: event` del websocket del nodo
    pub fn parse_event(payload: &str) -> PlayerResult<Option<TransportEvent>> {
        let value: Value = serde_json::from_str(payload)?;
        if value["op"] != "event" {
            return Ok(None);
        }

        let Some(guild_id) = value["guildId"]
            .as_str()
            .and_then(|id| id.parse::<u64>().ok())
            .filter(|id| *id != 0)
            .map(GuildId::new)
        else {
            return Ok(None);
        };
        let encoded = value["track"]["encoded"].as_str().unwrap_or_default().to_string();

        let event = match value["type"].as_str() {
            Some("TrackStartEvent") => Some(TransportEvent::TrackStart { guild_id, encoded }),
            Some("TrackEndEvent") => value["reason"]
                .as_str()
                .and_then(TrackEndReason::from_wire)
                .map(|reason| TransportEvent::TrackEnd {
                    guild_id,
                    encoded,
                    reason,
                }),
            Some("TrackExceptionEvent") | Some("TrackStuckEvent") => {
                warn!("⚠️ Evento de error del nodo en {}: {}", guild_id, value["type"]);
                None
            }
            Some("WebSocketClosedEvent") => Some(TransportEvent::WebSocketClosed {
                guild_id,
                code: value["code"].as_u64().unwrap_or_default() as u16,
                by_remote: value["byRemote"].as_bool().unwrap_or(false),
            }),
            _ => None,
        };
        Ok(event)
    }
}

#[async_trait]
impl SearchBackend for LavalinkNode {
    async fn load_tracks(&self, identifier: &str) -> PlayerResult<LoadResult> {
        debug!("📡 loadtracks: {}", identifier);

        let response: LoadResponse = self
            .request(Method::GET, "/v4/loadtracks")
            .query(&[("identifier", identifier)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response {
            LoadResponse::Track(raw) => Ok(LoadResult::Track(raw.into())),
            LoadResponse::Playlist(playlist) => Ok(LoadResult::Collection(Collection {
                name: playlist.info.name,
                uri: playlist.plugin_info["url"].as_str().map(str::to_owned),
                tracks: playlist.tracks.into_iter().map(Track::from).collect(),
            })),
            LoadResponse::Search(tracks) => Ok(LoadResult::Search(tracks.into_iter().map(Track::from).collect())),
            LoadResponse::Empty(_) => Ok(LoadResult::Empty),
            LoadResponse::Error(exception) => {
                let message = exception.message.unwrap_or_else(|| "sin detalle".to_string());
                error!("❌ Error al cargar '{}' ({}): {}", identifier, exception.severity, message);
                Err(PlayerError::provider("lavalink", message))
            }
        }
    }
}

#[async_trait]
impl Transport for LavalinkNode {
    async fn update_player(&self, guild_id: GuildId, update: PlayerUpdate) -> PlayerResult<()> {
        let body = json!({
            "track": { "encoded": update.encoded },
            "position": update.position_ms,
            "volume": update.volume,
            "paused": update.paused,
        });
        self.patch_player(guild_id, body, update.no_replace).await
    }

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> PlayerResult<()> {
        self.patch_player(guild_id, json!({ "paused": paused }), false).await
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> PlayerResult<()> {
        self.patch_player(guild_id, json!({ "volume": volume }), false).await
    }

    async fn seek(&self, guild_id: GuildId, position_ms: u64) -> PlayerResult<()> {
        self.patch_player(guild_id, json!({ "position": position_ms }), false).await
    }

    async fn stop(&self, guild_id: GuildId) -> PlayerResult<()> {
        self.patch_player(guild_id, json!({ "track": { "encoded": null } }), false).await
    }

    async fn set_filters(&self, guild_id: GuildId, filters: FilterState) -> PlayerResult<()> {
        self.patch_player(guild_id, json!({ "filters": filters.to_payload() }), false).await
    }

    async fn destroy(&self, guild_id: GuildId) -> PlayerResult<()> {
        let path = self.player_path(guild_id)?;
        let response = self.request(Method::DELETE, &path).send().await?;
        if !response.status().is_success() {
            return Err(PlayerError::Transport(format!("DELETE {}", response.status())));
        }
        info!("🧹 Player destruido en {}", guild_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_search_response() {
        let body = r#"{
            "loadType": "search",
            "data": [{
                "encoded": "QAAA",
                "info": {
                    "identifier": "dQw4w9WgXcQ", "isSeekable": true, "author": "RickAstleyVEVO",
                    "length": 212000, "isStream": false, "position": 0,
                    "title": "Never Gonna Give You Up", "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                    "artworkUrl": null, "isrc": null, "sourceName": "youtube"
                },
                "pluginInfo": {}
            }]
        }"#;

        let LoadResponse::Search(raw) = serde_json::from_str(body).unwrap() else {
            panic!("se esperaba una búsqueda");
        };
        let track = Track::from(raw.into_iter().next().unwrap());

        assert_eq!(track.identifier(), "dQw4w9WgXcQ");
        assert_eq!(track.length_ms(), 212_000);
        assert_eq!(track.encoded(), Some("QAAA"));
        assert!(track.is_playable());
    }

    #[test]
    fn test_decode_empty_response() {
        let response: LoadResponse = serde_json::from_str(r#"{"loadType":"empty","data":{}}"#).unwrap();
        assert!(matches!(response, LoadResponse::Empty(_)));
    }

    #[test]
    fn test_parse_track_end_event() {
        let payload = r#"{"op":"event","type":"TrackEndEvent","guildId":"42","track":{"encoded":"QAAA"},"reason":"loadFailed"}"#;

        let event = LavalinkNode::parse_event(payload).unwrap();

        assert_eq!(
            event,
            Some(TransportEvent::TrackEnd {
                guild_id: GuildId::new(42),
                encoded: "QAAA".to_string(),
                reason: TrackEndReason::LoadFailed,
            })
        );
        assert_eq!(LavalinkNode::parse_event(r#"{"op":"stats"}"#).unwrap(), None);
    }
}
