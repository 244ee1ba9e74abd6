//! Track model and the provider-facing seams.
//!
//! A [`Track`] is created once by a provider lookup and then shared by
//! reference ([`TrackRef`]) between the queues, the history and the session
//! pointers. Identity checks between those places use [`same_track`], never
//! field equality.

pub mod lavalink;
pub mod resolver;
pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PlayerResult;

pub use lavalink::LavalinkNode;
pub use resolver::{Resolved, TrackSourceResolver};
pub use spotify::SpotifyClient;

/// Referencia compartida a un track
pub type TrackRef = Arc<Track>;

/// Compara identidad (misma instancia), no contenido
pub fn same_track(a: &TrackRef, b: &TrackRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// Proveedores soportados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "youtube")]
    YouTube,
    #[serde(rename = "youtube_music", alias = "youtubemusic")]
    YouTubeMusic,
    #[serde(rename = "soundcloud")]
    SoundCloud,
    #[serde(rename = "spotify")]
    Spotify,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::YouTube => "youtube",
            ProviderKind::YouTubeMusic => "youtube_music",
            ProviderKind::SoundCloud => "soundcloud",
            ProviderKind::Spotify => "spotify",
        }
    }

    /// Prefijo de búsqueda que entiende el nodo de audio
    pub fn search_prefix(&self) -> &'static str {
        match self {
            ProviderKind::YouTube => "ytsearch:",
            ProviderKind::YouTubeMusic => "ytmsearch:",
            ProviderKind::SoundCloud => "scsearch:",
            ProviderKind::Spotify => "spsearch:",
        }
    }

    /// Spotify solo entrega metadatos; el audio sale de otro proveedor
    pub fn is_streamable(&self) -> bool {
        !matches!(self, ProviderKind::Spotify)
    }

    pub fn supports_recommendations(&self) -> bool {
        !matches!(self, ProviderKind::SoundCloud)
    }

    pub fn is_youtube(&self) -> bool {
        matches!(self, ProviderKind::YouTube | ProviderKind::YouTubeMusic)
    }

    /// Traduce el `sourceName` que reporta el nodo
    pub fn from_source_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "youtube" => Some(ProviderKind::YouTube),
            "youtubemusic" | "youtube_music" => Some(ProviderKind::YouTubeMusic),
            "soundcloud" => Some(ProviderKind::SoundCloud),
            "spotify" => Some(ProviderKind::Spotify),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRef {
    pub name: String,
    pub uri: Option<String>,
}

/// Playlist o álbum del que salió un track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    pub name: String,
    pub uri: Option<String>,
}

/// Metadatos que se completan después de crear el track
#[derive(Debug, Clone, Default)]
pub struct TrackExtras {
    pub isrc: Option<String>,
    pub artwork_url: Option<String>,
    pub album: Option<AlbumRef>,
    /// Equivalente reproducible ya resuelto
    pub fulfilled: Option<TrackRef>,
}

/// Representa un track de música
#[derive(Debug)]
pub struct Track {
    identifier: String,
    title: String,
    author: String,
    length_ms: u64,
    uri: String,
    provider: ProviderKind,
    encoded: Option<String>,
    is_stream: bool,
    recommended: bool,
    requested_by: Option<UserId>,
    collection: Option<CollectionRef>,
    added_at: DateTime<Utc>,
    extras: RwLock<TrackExtras>,
}

impl Track {
    pub fn new(
        identifier: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        provider: ProviderKind,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            author: author.into(),
            length_ms: 0,
            uri: String::new(),
            provider,
            encoded: None,
            is_stream: false,
            recommended: false,
            requested_by: None,
            collection: None,
            added_at: Utc::now(),
            extras: RwLock::new(TrackExtras::default()),
        }
    }

    pub fn into_ref(self) -> TrackRef {
        Arc::new(self)
    }

    // Getters
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    /// Primer artista cuando el autor es una lista separada por comas
    pub fn primary_artist(&self) -> &str {
        self.author.split(", ").next().unwrap_or(&self.author)
    }
    pub fn length_ms(&self) -> u64 {
        self.length_ms
    }
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.length_ms)
    }
    pub fn uri(&self) -> &str {
        &self.uri
    }
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }
    pub fn encoded(&self) -> Option<&str> {
        self.encoded.as_deref()
    }
    pub fn is_stream(&self) -> bool {
        self.is_stream
    }
    pub fn is_recommended(&self) -> bool {
        self.recommended
    }
    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }
    pub fn collection(&self) -> Option<&CollectionRef> {
        self.collection.as_ref()
    }
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    /// Se puede enviar al nodo tal cual
    pub fn is_playable(&self) -> bool {
        self.provider.is_streamable() && self.encoded.is_some()
    }

    pub fn isrc(&self) -> Option<String> {
        self.extras.read().isrc.clone()
    }
    pub fn artwork_url(&self) -> Option<String> {
        self.extras.read().artwork_url.clone()
    }
    pub fn album(&self) -> Option<AlbumRef> {
        self.extras.read().album.clone()
    }
    pub fn fulfilled(&self) -> Option<TrackRef> {
        self.extras.read().fulfilled.clone()
    }
    pub fn is_fulfilled(&self) -> bool {
        self.extras.read().fulfilled.is_some()
    }
    pub fn extras(&self) -> TrackExtras {
        self.extras.read().clone()
    }

    /// Le faltan datos de catálogo (ISRC o portada)
    pub fn needs_enrichment(&self) -> bool {
        let extras = self.extras.read();
        extras.isrc.is_none() || extras.artwork_url.is_none()
    }

    pub(crate) fn update_extras(&self, update: impl FnOnce(&mut TrackExtras)) {
        update(&mut self.extras.write());
    }

    /// Clave para detectar el mismo tema con distinto identificador
    pub fn dedupe_key(&self) -> String {
        let normalize = |s: &str| {
            s.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        };
        format!("{}|{}", normalize(&self.title), normalize(self.primary_artist()))
    }

    // Setters
    pub fn with_length(mut self, length_ms: u64) -> Self {
        self.length_ms = length_ms;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_encoded(mut self, encoded: impl Into<String>) -> Self {
        self.encoded = Some(encoded.into());
        self
    }

    pub fn with_stream(mut self, is_stream: bool) -> Self {
        self.is_stream = is_stream;
        self
    }

    pub fn with_requested_by(mut self, user_id: Option<UserId>) -> Self {
        self.requested_by = user_id;
        self
    }

    pub fn with_collection(mut self, collection: Option<CollectionRef>) -> Self {
        self.collection = collection;
        self
    }

    pub fn with_isrc(self, isrc: impl Into<String>) -> Self {
        self.extras.write().isrc = Some(isrc.into());
        self
    }

    pub fn with_artwork(self, artwork_url: impl Into<String>) -> Self {
        self.extras.write().artwork_url = Some(artwork_url.into());
        self
    }

    pub fn with_album(self, album: AlbumRef) -> Self {
        self.extras.write().album = Some(album);
        self
    }

    /// Marca el track como agregado por el autoplay
    pub fn mark_recommended(mut self) -> Self {
        self.recommended = true;
        self
    }
}

impl Clone for Track {
    fn clone(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            length_ms: self.length_ms,
            uri: self.uri.clone(),
            provider: self.provider,
            encoded: self.encoded.clone(),
            is_stream: self.is_stream,
            recommended: self.recommended,
            requested_by: self.requested_by,
            collection: self.collection.clone(),
            added_at: self.added_at,
            extras: RwLock::new(self.extras()),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.title, self.author)
    }
}

/// Playlist o álbum completo devuelto por un proveedor
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub uri: Option<String>,
    pub tracks: Vec<Track>,
}

impl Collection {
    pub fn reference(&self) -> CollectionRef {
        CollectionRef {
            name: self.name.clone(),
            uri: self.uri.clone(),
        }
    }
}

/// Resultado de una carga en el backend de búsqueda
#[derive(Debug, Clone)]
pub enum LoadResult {
    Track(Track),
    Collection(Collection),
    Search(Vec<Track>),
    Empty,
}

impl LoadResult {
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            LoadResult::Track(track) => vec![track],
            LoadResult::Collection(collection) => collection.tracks,
            LoadResult::Search(tracks) => tracks,
            LoadResult::Empty => Vec::new(),
        }
    }
}

/// Backend que convierte URLs o búsquedas con prefijo en tracks
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn load_tracks(&self, identifier: &str) -> PlayerResult<LoadResult>;
}

/// Catálogo de metadatos (búsqueda y recomendaciones)
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn search_tracks(&self, query: &str, limit: usize) -> PlayerResult<Vec<Track>>;

    /// `seeds` son identificadores del propio catálogo
    async fn recommendations(&self, seeds: &[String], limit: usize) -> PlayerResult<Vec<Track>>;
}
