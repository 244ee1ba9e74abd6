use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::player::PlayerSession;
use crate::sources::{youtube, CatalogClient, ProviderKind, SearchBackend, Track, TrackRef};

pub const DEFAULT_SEED_HISTORY_CAP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayMode {
    #[default]
    Disabled,
    /// Termina lo que queda en la cola de autoplay sin buscar más
    Partial,
    Enabled,
}

impl AutoplayMode {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            AutoplayMode::Enabled
        } else {
            AutoplayMode::Disabled
        }
    }
}

/// Semillas usadas recientemente (FIFO acotado)
#[derive(Debug, Clone)]
pub struct SeedHistory {
    ids: VecDeque<String>,
    cap: usize,
}

impl SeedHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            ids: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn record(&mut self, id: impl Into<String>) {
        let id = id.into();
        if let Some(pos) = self.ids.iter().position(|seen| *seen == id) {
            self.ids.remove(pos);
        }
        if self.ids.len() >= self.cap {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|seen| seen == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Estado de la sesión del que salen las semillas
#[derive(Debug, Clone, Default)]
pub struct SeedSnapshot {
    pub current: Option<TrackRef>,
    pub previous: Option<TrackRef>,
    /// Historial reciente, del más nuevo al más viejo
    pub history: Vec<TrackRef>,
    /// Primeros pendientes de la cola de autoplay
    pub upcoming: Vec<TrackRef>,
}

#[derive(Debug, Clone)]
pub struct AutoplaySettings {
    /// Con más pendientes que esto no se busca
    pub cutoff: usize,
    pub max_population: usize,
    pub pending_lookback: usize,
    pub history_lookback: usize,
    pub catalog_seeds: usize,
    pub history_seeds: usize,
    pub upcoming_seeds: usize,
    pub recommendation_limit: usize,
}

impl Default for AutoplaySettings {
    fn default() -> Self {
        Self {
            cutoff: 20,
            max_population: 5,
            pending_lookback: 40,
            history_lookback: 60,
            catalog_seeds: 3,
            history_seeds: 5,
            upcoming_seeds: 3,
            recommendation_limit: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RefillOutcome {
    /// Se empezó a reproducir un track de la cola de autoplay
    Played(TrackRef),
    /// Se agregaron n tracks sin tocar la reproducción
    Populated(usize),
    Idle,
}

/// Elige semillas ponderadas: lo actual pesa más, el historial decrece con la
/// antigüedad y los próximos de autoplay pesan poco.
pub fn select_seeds(snapshot: &SeedSnapshot, used: &SeedHistory) -> Vec<TrackRef> {
    let mut weights: HashMap<String, (TrackRef, u32)> = HashMap::new();
    let mut consider = |track: &TrackRef, weight: u32| {
        weights
            .entry(track.identifier().to_string())
            .and_modify(|entry| entry.1 = entry.1.max(weight))
            .or_insert_with(|| (Arc::clone(track), weight));
    };

    if let Some(current) = &snapshot.current {
        consider(current, 6);
    }
    for (age, track) in snapshot.history.iter().enumerate() {
        consider(track, 5u32.saturating_sub(age as u32).max(1));
    }
    if let Some(previous) = &snapshot.previous {
        consider(previous, 3);
    }
    for track in &snapshot.upcoming {
        consider(track, 1);
    }

    let mut candidates: Vec<(TrackRef, u32)> = weights.into_values().collect();
    // orden estable antes de sortear
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.identifier().cmp(b.0.identifier())));

    let fresh: Vec<(TrackRef, u32)> = candidates
        .iter()
        .filter(|(track, _)| !used.contains(track.identifier()))
        .cloned()
        .collect();

    // si ya se usaron todas, se repite la más pesada
    let pool = if fresh.is_empty() {
        candidates.into_iter().take(1).collect()
    } else {
        fresh
    };

    let chosen: Option<Vec<TrackRef>> = pool
        .choose_multiple_weighted(&mut rand::thread_rng(), pool.len(), |(_, weight)| f64::from(*weight))
        .ok()
        .map(|chosen| chosen.map(|(track, _)| Arc::clone(track)).collect());

    chosen.unwrap_or_else(|| pool.into_iter().map(|(track, _)| track).collect())
}

/// Descarta candidatos ya vistos (por id o por título/artista) y repetidos entre sí
pub fn dedupe(candidates: Vec<Track>, mut seen: HashSet<String>) -> Vec<Track> {
    candidates
        .into_iter()
        .filter(|track| {
            let key = track.dedupe_key();
            if seen.contains(track.identifier()) || seen.contains(&key) {
                return false;
            }
            seen.insert(track.identifier().to_string());
            seen.insert(key);
            true
        })
        .collect()
}

struct SeedPlan {
    catalog_ids: Vec<String>,
    radio: Option<(String, bool)>,
}

/// Motor de recomendaciones para la cola de autoplay
pub struct RecommendationEngine {
    backend: Arc<dyn SearchBackend>,
    catalog: Option<Arc<dyn CatalogClient>>,
    settings: AutoplaySettings,
}

impl RecommendationEngine {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        catalog: Option<Arc<dyn CatalogClient>>,
        settings: AutoplaySettings,
    ) -> Self {
        Self {
            backend,
            catalog,
            settings,
        }
    }

    pub fn settings(&self) -> &AutoplaySettings {
        &self.settings
    }

    /// Rellena la cola de autoplay y, si no es `populate` y no suena nada,
    /// reproduce el siguiente.
    pub async fn do_recommendation(&self, session: &Arc<PlayerSession>, populate: bool) -> RefillOutcome {
        if session.is_closed() {
            return RefillOutcome::Idle;
        }
        let epoch = session.epoch();

        let pending = session.auto_queue().count().await;
        if pending > self.settings.cutoff && !populate {
            debug!("🎲 {} pendientes en autoplay, no se buscan más", pending);
            return self.play_next(session, 0).await;
        }

        let snapshot = session
            .seed_snapshot(self.settings.history_seeds, self.settings.upcoming_seeds)
            .await;
        let seeds = session.with_seeds(|used| select_seeds(&snapshot, used));
        if seeds.is_empty() {
            debug!("🎲 Sin semillas para recomendar en {}", session.guild_id());
            return self.finish(session, populate, 0).await;
        }

        let plan = self.plan(&seeds);
        session.with_seeds(|used| {
            for id in &plan.catalog_ids {
                used.record(id.clone());
            }
            if let Some((id, _)) = &plan.radio {
                used.record(id.clone());
            }
        });

        let (from_catalog, from_radio) = tokio::join!(
            self.catalog_recommendations(&plan.catalog_ids),
            self.radio_recommendations(plan.radio.as_ref())
        );
        let mut candidates = from_catalog;
        candidates.extend(from_radio);

        let seen = session
            .lookback_keys(self.settings.pending_lookback, self.settings.history_lookback)
            .await;
        let mut fresh = dedupe(candidates, seen);
        fresh.shuffle(&mut rand::thread_rng());
        fresh.truncate(self.settings.max_population);

        if !session.is_epoch(epoch) || session.is_closed() || session.autoplay_mode() == AutoplayMode::Disabled {
            debug!("🎲 Sesión cambió mientras se buscaba, se descartan recomendaciones");
            return RefillOutcome::Idle;
        }

        let added = session
            .auto_queue()
            .lock()
            .await
            .extend(fresh.into_iter().map(|t| t.mark_recommended().into_ref()));
        info!("🎲 Autoplay agregó {} tracks en {}", added, session.guild_id());

        self.finish(session, populate, added).await
    }

    async fn finish(&self, session: &Arc<PlayerSession>, populate: bool, added: usize) -> RefillOutcome {
        if populate {
            return RefillOutcome::Populated(added);
        }
        self.play_next(session, added).await
    }

    async fn play_next(&self, session: &Arc<PlayerSession>, added: usize) -> RefillOutcome {
        if session.is_active() {
            return RefillOutcome::Populated(added);
        }
        match session.play_next_auto().await {
            Some(track) => RefillOutcome::Played(track),
            None => RefillOutcome::Idle,
        }
    }

    fn plan(&self, seeds: &[TrackRef]) -> SeedPlan {
        let catalog_enabled = self.catalog.is_some();
        let mut plan = SeedPlan {
            catalog_ids: Vec::new(),
            radio: None,
        };

        for seed in seeds {
            match seed.provider() {
                ProviderKind::Spotify if catalog_enabled && plan.catalog_ids.len() < self.settings.catalog_seeds => {
                    plan.catalog_ids.push(seed.identifier().to_string());
                }
                ProviderKind::Spotify => {
                    if plan.radio.is_none() {
                        plan.radio = seed
                            .fulfilled()
                            .filter(|f| f.provider().is_youtube())
                            .map(|f| (f.identifier().to_string(), f.provider() == ProviderKind::YouTubeMusic));
                    }
                }
                ProviderKind::YouTube | ProviderKind::YouTubeMusic if plan.radio.is_none() => {
                    plan.radio = Some((
                        seed.identifier().to_string(),
                        seed.provider() == ProviderKind::YouTubeMusic,
                    ));
                }
                _ => {}
            }
        }
        plan
    }

    async fn catalog_recommendations(&self, ids: &[String]) -> Vec<Track> {
        let Some(catalog) = &self.catalog else {
            return Vec::new();
        };
        if ids.is_empty() {
            return Vec::new();
        }
        match catalog.recommendations(ids, self.settings.recommendation_limit).await {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("⚠️ Recomendaciones del catálogo fallaron: {}", e);
                Vec::new()
            }
        }
    }

    async fn radio_recommendations(&self, seed: Option<&(String, bool)>) -> Vec<Track> {
        let Some((video_id, music)) = seed else {
            return Vec::new();
        };
        let url = youtube::radio_url(video_id, *music);

        match self.backend.load_tracks(&url).await {
            Ok(result) => result
                .into_tracks()
                .into_iter()
                .filter(|t| t.identifier() != video_id)
                .map(|t| {
                    if *music && t.provider() == ProviderKind::YouTube {
                        let uri = youtube::to_music_uri(t.uri());
                        t.with_provider(ProviderKind::YouTubeMusic).with_uri(uri)
                    } else {
                        t
                    }
                })
                .collect(),
            Err(e) => {
                warn!("⚠️ Radio de {} falló: {}", video_id, e);
                Vec::new()
            }
        }
    }
}
