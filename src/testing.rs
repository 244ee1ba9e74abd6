//! Dobles de prueba compartidos por los tests de cada módulo.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{GuildId, MessageId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::autoplay::{AutoplaySettings, RecommendationEngine};
use crate::audio::effects::FilterState;
use crate::audio::fulfillment::FulfillmentService;
use crate::audio::player::{PlayerSession, SessionDeps, SessionSettings};
use crate::audio::transport::{PlayerUpdate, Transport};
use crate::cache::FulfillmentCache;
use crate::error::{PlayerError, PlayerResult};
use crate::sources::{CatalogClient, LoadResult, ProviderKind, SearchBackend, Track, TrackRef};
use crate::ui::{InteractionContext, NowPlayingSink, NowPlayingView};

pub const TEST_GUILD: u64 = 1;

pub fn video(id: &str) -> Track {
    video_by(id, &format!("Title {id}"), "Artist")
}

pub fn video_ref(id: &str) -> TrackRef {
    video(id).into_ref()
}

pub fn video_by(id: &str, title: &str, author: &str) -> Track {
    Track::new(id, title, author, ProviderKind::YouTube)
        .with_uri(format!("https://www.youtube.com/watch?v={id}"))
        .with_encoded(format!("enc:{id}"))
        .with_length(180_000)
}

pub fn catalog_track(id: &str, title: &str, author: &str) -> Track {
    Track::new(id, title, author, ProviderKind::Spotify)
        .with_uri(format!("https://open.spotify.com/track/{id}"))
        .with_length(200_000)
}

/// Backend con respuestas fijas por identificador
#[derive(Default)]
pub struct FakeBackend {
    responses: Mutex<HashMap<String, LoadResult>>,
    failures: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeBackend {
    pub fn respond(&self, identifier: &str, result: LoadResult) {
        self.responses.lock().insert(identifier.to_string(), result);
    }

    pub fn fail(&self, identifier: &str) {
        self.failures.lock().insert(identifier.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Cada búsqueda tarda `delay` antes de responder
    pub fn slow(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

#[async_trait]
impl SearchBackend for FakeBackend {
    async fn load_tracks(&self, identifier: &str) -> PlayerResult<LoadResult> {
        self.calls.lock().push(identifier.to_string());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().contains(identifier) {
            return Err(PlayerError::Transport(format!("sin respuesta para {identifier}")));
        }
        Ok(self
            .responses
            .lock()
            .get(identifier)
            .cloned()
            .unwrap_or(LoadResult::Empty))
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    search: Mutex<Vec<Track>>,
    recommendations: Mutex<Vec<Track>>,
    failing: Mutex<bool>,
    recommendation_calls: Mutex<usize>,
}

impl FakeCatalog {
    pub fn set_search(&self, tracks: Vec<Track>) {
        *self.search.lock() = tracks;
    }

    pub fn set_recommendations(&self, tracks: Vec<Track>) {
        *self.recommendations.lock() = tracks;
    }

    pub fn fail_recommendations(&self) {
        *self.failing.lock() = true;
    }

    pub fn recommendation_calls(&self) -> usize {
        *self.recommendation_calls.lock()
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn search_tracks(&self, _query: &str, limit: usize) -> PlayerResult<Vec<Track>> {
        Ok(self.search.lock().iter().take(limit).cloned().collect())
    }

    async fn recommendations(&self, _seeds: &[String], limit: usize) -> PlayerResult<Vec<Track>> {
        *self.recommendation_calls.lock() += 1;
        if *self.failing.lock() {
            return Err(PlayerError::provider("spotify", "429 Too Many Requests"));
        }
        Ok(self.recommendations.lock().iter().take(limit).cloned().collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Play(String),
    Pause(bool),
    Volume(u16),
    Seek(u64),
    Stop,
    Filters(FilterState),
    Destroy,
}

/// Transporte que registra cada orden; puede rechazar tracks concretos
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn reject(&self, encoded: &str) {
        self.rejected.lock().insert(encoded.to_string());
    }

    /// Payloads aceptados, en orden
    pub fn played(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Play(encoded) => Some(encoded.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) -> PlayerResult<()> {
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn update_player(&self, _guild_id: GuildId, update: PlayerUpdate) -> PlayerResult<()> {
        if self.rejected.lock().contains(&update.encoded) {
            return Err(PlayerError::Transport(format!("rechazado {}", update.encoded)));
        }
        self.record(TransportCall::Play(update.encoded))
    }

    async fn set_paused(&self, _guild_id: GuildId, paused: bool) -> PlayerResult<()> {
        self.record(TransportCall::Pause(paused))
    }

    async fn set_volume(&self, _guild_id: GuildId, volume: u16) -> PlayerResult<()> {
        self.record(TransportCall::Volume(volume))
    }

    async fn seek(&self, _guild_id: GuildId, position_ms: u64) -> PlayerResult<()> {
        self.record(TransportCall::Seek(position_ms))
    }

    async fn stop(&self, _guild_id: GuildId) -> PlayerResult<()> {
        self.record(TransportCall::Stop)
    }

    async fn set_filters(&self, _guild_id: GuildId, filters: FilterState) -> PlayerResult<()> {
        self.record(TransportCall::Filters(filters))
    }

    async fn destroy(&self, _guild_id: GuildId) -> PlayerResult<()> {
        self.record(TransportCall::Destroy)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    renders: Mutex<Vec<NowPlayingView>>,
    clears: Mutex<usize>,
}

impl RecordingSink {
    pub fn renders(&self) -> Vec<NowPlayingView> {
        self.renders.lock().clone()
    }

    pub fn last_render(&self) -> Option<NowPlayingView> {
        self.renders.lock().last().cloned()
    }

    pub fn clears(&self) -> usize {
        *self.clears.lock()
    }
}

#[async_trait]
impl NowPlayingSink for RecordingSink {
    async fn render(&self, view: &NowPlayingView) -> PlayerResult<Option<MessageId>> {
        self.renders.lock().push(view.clone());
        Ok(Some(MessageId::new(99)))
    }

    async fn clear(&self, _guild_id: GuildId, _interaction: Option<InteractionContext>) -> PlayerResult<()> {
        *self.clears.lock() += 1;
        Ok(())
    }
}

/// Sesión completa con todos los colaboradores falsos
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub catalog: Arc<FakeCatalog>,
    pub transport: Arc<RecordingTransport>,
    pub sink: Arc<RecordingSink>,
    pub fulfillment: Arc<FulfillmentService>,
    pub engine: Arc<RecommendationEngine>,
    pub session: Arc<PlayerSession>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(false, None)
    }

    pub fn with_catalog() -> Self {
        Self::build(true, None)
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::build(false, Some(transport))
    }

    fn build(use_catalog: bool, transport: Option<Arc<dyn Transport>>) -> Self {
        let backend = Arc::new(FakeBackend::default());
        let catalog = Arc::new(FakeCatalog::default());
        let recording = Arc::new(RecordingTransport::default());
        let sink = Arc::new(RecordingSink::default());

        let catalog_client = use_catalog.then(|| Arc::clone(&catalog) as Arc<dyn CatalogClient>);
        let fulfillment = Arc::new(FulfillmentService::new(
            backend.clone(),
            catalog_client.clone(),
            FulfillmentCache::new(100, None),
        ));
        let engine = Arc::new(RecommendationEngine::new(
            backend.clone(),
            catalog_client,
            AutoplaySettings::default(),
        ));

        let deps = SessionDeps {
            transport: transport.unwrap_or_else(|| recording.clone() as Arc<dyn Transport>),
            fulfillment: Arc::clone(&fulfillment),
            engine: Arc::clone(&engine),
            sink: sink.clone(),
        };
        let session = PlayerSession::new(GuildId::new(TEST_GUILD), deps, SessionSettings::default());

        Self {
            backend,
            catalog,
            transport: recording,
            sink,
            fulfillment,
            engine,
            session,
        }
    }
}
