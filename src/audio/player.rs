//! Per-guild playback session.
//!
//! A [`PlayerSession`] owns the user queue, the autoplay queue and the
//! pointers to what is playing. Short synchronous state lives behind a
//! `parking_lot` mutex that is never held across an `.await`; each queue sits
//! behind its own async mutex (always locked user queue first, autoplay queue
//! second). Background work (lookahead fulfillment, autoplay refill) runs in a
//! per-session `JoinSet` and checks the session epoch before mutating
//! anything, so results that arrive after a `stop` are dropped.

use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::autoplay::{AutoplayMode, RecommendationEngine, RefillOutcome, SeedHistory, SeedSnapshot};
use super::effects::FilterState;
use super::fulfillment::FulfillmentService;
use super::queue::{LoopMode, MusicQueue, QueueError};
use super::transport::{PlayerUpdate, TrackEndReason, Transport};
use crate::error::{PlayerError, PlayerResult};
use crate::sources::{same_track, Track, TrackRef};
use crate::ui::{InteractionContext, NowPlayingSink, NowPlayingView};

/// Intentos seguidos al avanzar antes de rendirse
pub const MAX_ADVANCE_ATTEMPTS: usize = 10;

pub const MAX_VOLUME: u16 = 1000;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub history_cap: usize,
    pub seed_history_cap: usize,
    pub cache_lookahead: usize,
    pub max_consecutive_failures: u32,
    pub default_volume: u16,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_cap: super::queue::DEFAULT_HISTORY_CAP,
            seed_history_cap: super::autoplay::DEFAULT_SEED_HISTORY_CAP,
            cache_lookahead: 3,
            max_consecutive_failures: 3,
            default_volume: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Cola de la que salió el track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackOrigin {
    #[default]
    Queue,
    AutoQueue,
}

#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    /// Reemplazar lo que esté sonando
    pub replace: bool,
    pub add_history: bool,
    /// Rellenar la cola de autoplay en segundo plano
    pub populate: bool,
    /// Pedido explícito del usuario; reactiva el autoplay suspendido
    pub manual: bool,
    pub origin: TrackOrigin,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            replace: true,
            add_history: true,
            populate: false,
            manual: false,
            origin: TrackOrigin::Queue,
        }
    }
}

impl PlayOptions {
    pub fn manual() -> Self {
        Self {
            manual: true,
            ..Default::default()
        }
    }

    pub fn from_auto_queue() -> Self {
        Self {
            origin: TrackOrigin::AutoQueue,
            ..Default::default()
        }
    }

    pub fn with_populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }
}

/// Cola protegida más el candado de enriquecimiento
pub struct SharedQueue {
    inner: AsyncMutex<MusicQueue>,
    enrichment: AsyncMutex<()>,
}

impl SharedQueue {
    fn new(history_cap: usize) -> Self {
        Self {
            inner: AsyncMutex::new(MusicQueue::new(history_cap)),
            enrichment: AsyncMutex::new(()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, MusicQueue> {
        self.inner.lock().await
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.count()
    }

    /// Los primeros `limit` pendientes
    pub async fn snapshot(&self, limit: usize) -> Vec<TrackRef> {
        self.inner.lock().await.iter().take(limit).cloned().collect()
    }
}

/// Posición estimada a partir del último punto conocido
#[derive(Debug, Clone, Copy, Default)]
struct PlaybackClock {
    base_ms: u64,
    anchor: Option<Instant>,
}

impl PlaybackClock {
    fn start(&mut self, position_ms: u64, running: bool) {
        self.base_ms = position_ms;
        self.anchor = running.then(Instant::now);
    }

    fn pause(&mut self) {
        self.base_ms = self.position_ms();
        self.anchor = None;
    }

    fn resume(&mut self) {
        self.anchor = Some(Instant::now());
    }

    fn position_ms(&self) -> u64 {
        let running = self.anchor.map(|a| a.elapsed().as_millis() as u64).unwrap_or(0);
        self.base_ms + running
    }
}

struct PlayerState {
    current: Option<TrackRef>,
    original: Option<TrackRef>,
    previous: Option<TrackRef>,
    loaded: Option<TrackRef>,
    status: PlaybackStatus,
    volume: u16,
    autoplay: AutoplayMode,
    seeds: SeedHistory,
    filters: FilterState,
    clock: PlaybackClock,
    interaction: Option<InteractionContext>,
    consecutive_failures: u32,
    refill_suspended: bool,
    /// El próximo final no respeta la repetición del track
    skip_pending: bool,
    epoch: u64,
    idle_since: Option<Instant>,
}

/// Punteros previos a un `play`, para deshacer si el nodo lo rechaza
struct Rollback {
    current: Option<TrackRef>,
    original: Option<TrackRef>,
    previous: Option<TrackRef>,
    volume: u16,
}

impl Rollback {
    fn capture(state: &PlayerState) -> Self {
        Self {
            current: state.current.clone(),
            original: state.original.clone(),
            previous: state.previous.clone(),
            volume: state.volume,
        }
    }

    fn restore(self, state: &mut PlayerState) {
        state.current = self.current;
        state.original = self.original;
        state.previous = self.previous;
        state.volume = self.volume;
    }
}

/// Colaboradores compartidos que recibe cada sesión
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub fulfillment: Arc<FulfillmentService>,
    pub engine: Arc<RecommendationEngine>,
    pub sink: Arc<dyn NowPlayingSink>,
}

pub struct PlayerSession {
    guild_id: GuildId,
    settings: SessionSettings,
    transport: Arc<dyn Transport>,
    fulfillment: Arc<FulfillmentService>,
    engine: Arc<RecommendationEngine>,
    sink: Arc<dyn NowPlayingSink>,
    queue: SharedQueue,
    auto_queue: SharedQueue,
    state: Mutex<PlayerState>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl PlayerSession {
    pub fn new(guild_id: GuildId, deps: SessionDeps, settings: SessionSettings) -> Arc<Self> {
        let state = PlayerState {
            current: None,
            original: None,
            previous: None,
            loaded: None,
            status: PlaybackStatus::Idle,
            volume: settings.default_volume.min(MAX_VOLUME),
            autoplay: AutoplayMode::Disabled,
            seeds: SeedHistory::new(settings.seed_history_cap),
            filters: FilterState::default(),
            clock: PlaybackClock::default(),
            interaction: None,
            consecutive_failures: 0,
            refill_suspended: false,
            skip_pending: false,
            epoch: 0,
            idle_since: Some(Instant::now()),
        };

        Arc::new(Self {
            guild_id,
            queue: SharedQueue::new(settings.history_cap),
            auto_queue: SharedQueue::new(settings.history_cap),
            settings,
            transport: deps.transport,
            fulfillment: deps.fulfillment,
            engine: deps.engine,
            sink: deps.sink,
            state: Mutex::new(state),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    // Getters
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }
    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }
    pub fn auto_queue(&self) -> &SharedQueue {
        &self.auto_queue
    }
    pub fn status(&self) -> PlaybackStatus {
        self.state.lock().status
    }
    /// Sonando o en pausa
    pub fn is_active(&self) -> bool {
        self.status() != PlaybackStatus::Idle
    }
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
    pub fn current(&self) -> Option<TrackRef> {
        self.state.lock().current.clone()
    }
    pub fn original(&self) -> Option<TrackRef> {
        self.state.lock().original.clone()
    }
    pub fn previous_track(&self) -> Option<TrackRef> {
        self.state.lock().previous.clone()
    }
    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }
    pub fn filters(&self) -> FilterState {
        self.state.lock().filters.clone()
    }
    pub fn autoplay_mode(&self) -> AutoplayMode {
        self.state.lock().autoplay
    }
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }
    pub fn is_refill_suspended(&self) -> bool {
        self.state.lock().refill_suspended
    }
    pub fn idle_since(&self) -> Option<Instant> {
        self.state.lock().idle_since
    }
    pub fn interaction(&self) -> Option<InteractionContext> {
        self.state.lock().interaction
    }
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }
    pub fn is_epoch(&self, epoch: u64) -> bool {
        !self.is_closed() && self.state.lock().epoch == epoch
    }

    /// Registra el canal/usuario del último comando; conserva el mensaje si es el mismo canal
    pub fn set_interaction(&self, context: InteractionContext) {
        let mut state = self.state.lock();
        let message_id = state
            .interaction
            .filter(|old| old.channel_id == context.channel_id)
            .and_then(|old| old.message_id);
        state.interaction = Some(InteractionContext {
            message_id: context.message_id.or(message_id),
            ..context
        });
    }

    /// Quita el id del mensaje de reproducción y devuelve el contexto anterior
    pub fn take_now_playing_message(&self) -> Option<InteractionContext> {
        let mut state = self.state.lock();
        let previous = state.interaction?;
        if let Some(interaction) = state.interaction.as_mut() {
            interaction.message_id = None;
        }
        Some(previous)
    }

    pub fn with_seeds<R>(&self, f: impl FnOnce(&mut SeedHistory) -> R) -> R {
        f(&mut self.state.lock().seeds)
    }

    /// Reproduce `track`, resolviendo antes un equivalente si hace falta
    pub async fn play(self: &Arc<Self>, track: TrackRef, options: PlayOptions) -> PlayerResult<TrackRef> {
        if self.is_closed() {
            return Err(PlayerError::NotConnected(self.guild_id));
        }
        let epoch = self.epoch();

        let playable = match self.fulfillment.fulfill(&track).await {
            Ok(playable) => playable,
            Err(e) => {
                self.register_failure();
                return Err(e);
            }
        };
        let Some(encoded) = playable.encoded().map(str::to_owned) else {
            self.register_failure();
            return Err(PlayerError::Fulfillment(track.to_string()));
        };

        let (rollback, volume, replaying) = {
            let mut state = self.state.lock();
            if state.epoch != epoch || self.is_closed() {
                debug!("🧊 Sesión reiniciada mientras se preparaba {} en {}", track, self.guild_id);
                return Err(PlayerError::Superseded);
            }
            let rollback = Rollback::capture(&state);
            let replaying = state.loaded.as_ref().is_some_and(|loaded| same_track(loaded, &track));
            state.previous = state.original.take();
            state.current = Some(Arc::clone(&playable));
            state.original = Some(Arc::clone(&track));
            (rollback, state.volume, replaying)
        };

        let update = PlayerUpdate {
            encoded,
            position_ms: 0,
            volume,
            paused: false,
            no_replace: !options.replace,
        };
        if let Err(e) = self.transport.update_player(self.guild_id, update).await {
            warn!("❌ El nodo rechazó {} en {}: {}", track, self.guild_id, e);
            {
                let mut state = self.state.lock();
                if state.epoch == epoch {
                    rollback.restore(&mut state);
                }
            }
            self.register_failure();
            return Err(e);
        }

        let populate = {
            let mut state = self.state.lock();
            if state.epoch != epoch || self.is_closed() {
                None
            } else {
                state.loaded = Some(Arc::clone(&track));
                state.status = PlaybackStatus::Playing;
                state.clock.start(0, true);
                state.idle_since = None;
                state.skip_pending = false;
                if options.manual {
                    state.consecutive_failures = 0;
                    if state.refill_suspended {
                        info!("🎲 Autoplay reactivado por reproducción manual");
                        state.refill_suspended = false;
                    }
                }
                Some(options.populate && state.autoplay == AutoplayMode::Enabled && !state.refill_suspended)
            }
        };
        let Some(populate) = populate else {
            warn!("🧊 {} llegó al nodo después de un stop en {}, se corta", track, self.guild_id);
            if let Err(e) = self.transport.stop(self.guild_id).await {
                warn!("⚠️ No se pudo cortar {} en {}: {}", track, self.guild_id, e);
            }
            return Err(PlayerError::Superseded);
        };

        if options.add_history {
            let mut queue = self.queue.lock().await;
            if !self.is_epoch(epoch) {
                return Err(PlayerError::Superseded);
            }
            let looping = replaying && queue.loop_mode() == LoopMode::Track;
            let repeated = queue.history().last().is_some_and(|last| same_track(last, &track));
            if !looping && !repeated {
                queue.history_mut().push(Arc::clone(&track));
            }
        }
        if options.origin == TrackOrigin::AutoQueue {
            self.auto_queue.lock().await.history_mut().push(Arc::clone(&track));
        }

        info!("▶️ Reproduciendo en {}: {}", self.guild_id, track);

        if populate {
            self.spawn_refill();
        }
        self.spawn_caching(epoch);
        self.refresh_ui().await;
        Ok(playable)
    }

    /// Maneja el final de un track reportado por el nodo
    pub async fn handle_track_end(self: &Arc<Self>, reason: TrackEndReason) -> Option<TrackRef> {
        if !reason.may_start_next() {
            debug!("⏹️ Final ignorado en {}: {:?}", self.guild_id, reason);
            return None;
        }
        if self.is_closed() {
            return None;
        }

        {
            let mut state = self.state.lock();
            state.status = PlaybackStatus::Idle;
            state.clock = PlaybackClock::default();
            if reason == TrackEndReason::Finished {
                state.consecutive_failures = 0;
            }
        }

        if reason == TrackEndReason::LoadFailed {
            self.register_failure();
            let mut queue = self.queue.lock().await;
            if queue.loop_mode() == LoopMode::Track {
                warn!("🔂 El track repetido no carga, se desactiva la repetición");
                queue.set_loop_mode(LoopMode::Off, None);
            }
        }

        self.advance().await
    }

    /// Siguiente de la cola; si está vacía, decide el autoplay
    pub async fn advance(self: &Arc<Self>) -> Option<TrackRef> {
        let epoch = self.epoch();
        for _ in 0..MAX_ADVANCE_ATTEMPTS {
            if !self.is_epoch(epoch) {
                return None;
            }

            let skipping = std::mem::take(&mut self.state.lock().skip_pending);
            let original = self.original();
            let next = {
                let mut queue = self.queue.lock().await;
                if queue.loop_mode() == LoopMode::Track {
                    if skipping {
                        queue.drop_loop_entry();
                    } else if let Some(original) = &original {
                        queue.requeue_looped(original);
                    }
                }
                queue.pop()
            };

            let track = match next {
                Ok(track) => track,
                Err(QueueError::Empty) => return self.autoplay_handoff().await,
            };

            match self.play(Arc::clone(&track), PlayOptions::default()).await {
                Ok(_) => return Some(track),
                Err(PlayerError::Superseded) => return None,
                Err(e) => {
                    warn!("⏭️ No se pudo reproducir {}: {}", track, e);
                    let mut queue = self.queue.lock().await;
                    if queue.loop_mode() == LoopMode::Track {
                        queue.set_loop_mode(LoopMode::Off, None);
                    }
                }
            }
        }

        error!("❌ Demasiados fallos seguidos en {}, se detiene el avance", self.guild_id);
        self.mark_idle();
        None
    }

    async fn autoplay_handoff(self: &Arc<Self>) -> Option<TrackRef> {
        let (mode, suspended) = {
            let state = self.state.lock();
            (state.autoplay, state.refill_suspended)
        };

        match mode {
            AutoplayMode::Disabled => {
                debug!("📭 Cola vacía en {}, autoplay desactivado", self.guild_id);
                self.mark_idle();
                None
            }
            AutoplayMode::Partial => self.play_next_auto().await,
            AutoplayMode::Enabled if suspended => {
                warn!("🎲 Autoplay suspendido por fallos en {}, solo se consume lo pendiente", self.guild_id);
                self.play_next_auto().await
            }
            AutoplayMode::Enabled => {
                let engine = Arc::clone(&self.engine);
                match engine.do_recommendation(self, false).await {
                    RefillOutcome::Played(track) => Some(track),
                    RefillOutcome::Populated(_) | RefillOutcome::Idle => None,
                }
            }
        }
    }

    /// Reproduce el siguiente de la cola de autoplay
    pub async fn play_next_auto(self: &Arc<Self>) -> Option<TrackRef> {
        let epoch = self.epoch();
        for _ in 0..MAX_ADVANCE_ATTEMPTS {
            if !self.is_epoch(epoch) {
                return None;
            }
            let next = self.auto_queue.lock().await.pop();
            let Ok(track) = next else {
                self.mark_idle();
                return None;
            };

            match self.play(Arc::clone(&track), PlayOptions::from_auto_queue()).await {
                Ok(_) => return Some(track),
                Err(PlayerError::Superseded) => return None,
                Err(e) => warn!("⏭️ Recomendación descartada {}: {}", track, e),
            }
        }
        self.mark_idle();
        None
    }

    /// Termina el track actual. Con `index`, antes trae ese pendiente al frente
    /// (primero la cola del usuario, después la de autoplay).
    pub async fn skip(self: &Arc<Self>, index: Option<usize>) -> PlayerResult<Option<TrackRef>> {
        let (current, paused) = {
            let state = self.state.lock();
            (state.current.clone(), state.status == PlaybackStatus::Paused)
        };
        let current = current.ok_or(PlayerError::NothingPlaying)?;

        let target = match index {
            Some(index) => Some(self.pull_to_front(index).await?),
            None => None,
        };

        self.end_current(&current).await?;
        if paused {
            self.resume().await?;
        }
        info!("⏭️ Saltado en {}: {}", self.guild_id, current);
        Ok(target)
    }

    async fn pull_to_front(&self, index: usize) -> PlayerResult<TrackRef> {
        let mut queue = self.queue.lock().await;
        let queued = queue.count();
        let track = if index < queued {
            queue.remove_at(index)
        } else {
            self.auto_queue.lock().await.remove_at(index - queued)
        }
        .ok_or(PlayerError::IndexOutOfRange(index))?;

        queue.push_front(Arc::clone(&track));
        Ok(track)
    }

    async fn end_current(self: &Arc<Self>, current: &Track) -> PlayerResult<()> {
        self.state.lock().skip_pending = true;
        if current.is_stream() || current.length_ms() == 0 {
            // un stream no se puede adelantar hasta el final
            self.transport.stop(self.guild_id).await?;
            self.advance().await;
        } else {
            self.transport.seek(self.guild_id, current.length_ms()).await?;
        }
        Ok(())
    }

    /// Vuelve al track anterior. Devuelve `(permitido, repetición_de_track_activa)`.
    pub async fn previous(self: &Arc<Self>) -> PlayerResult<(bool, bool)> {
        let (original, current, paused) = {
            let state = self.state.lock();
            (
                state.original.clone(),
                state.current.clone(),
                state.status == PlaybackStatus::Paused,
            )
        };

        let (allowed, was_loop) = {
            let mut queue = self.queue.lock().await;
            let was_loop = queue.loop_mode() == LoopMode::Track;
            let allowed = !was_loop
                && queue.history().len() >= 2
                && match (&original, queue.history().last()) {
                    (Some(original), Some(last)) => same_track(original, last),
                    _ => false,
                };

            if allowed {
                let history = queue.history_mut();
                if let (Some(now), Some(before)) = (history.pop(), history.pop()) {
                    queue.push_front(now);
                    queue.push_front(before);
                }
            }
            (allowed, was_loop)
        };

        if allowed {
            if let Some(current) = current {
                self.end_current(&current).await?;
            }
            if paused {
                self.resume().await?;
            }
            info!("⏮️ Volviendo al track anterior en {}", self.guild_id);
        }
        Ok((allowed, was_loop))
    }

    /// Alterna entre normal y repetir track (o cola completa con `queue_wide`)
    pub async fn toggle_loop(&self, queue_wide: bool) -> LoopMode {
        let playing = {
            let state = self.state.lock();
            if state.status == PlaybackStatus::Idle {
                None
            } else {
                state.original.clone()
            }
        };

        let mode = {
            let mut queue = self.queue.lock().await;
            let target = if queue_wide { LoopMode::Queue } else { LoopMode::Track };
            let next = if queue.loop_mode() == target { LoopMode::Off } else { target };
            queue.set_loop_mode(next, playing.as_ref());
            next
        };
        self.refresh_ui().await;
        mode
    }

    /// Detiene todo y vuelve al estado inicial
    pub async fn stop(&self) -> PlayerResult<()> {
        let interaction = {
            let mut state = self.state.lock();
            state.autoplay = AutoplayMode::Disabled;
            state.filters.reset();
            state.epoch += 1;
            state.current = None;
            state.original = None;
            state.previous = None;
            state.loaded = None;
            state.status = PlaybackStatus::Idle;
            state.clock = PlaybackClock::default();
            state.skip_pending = false;
            state.idle_since = Some(Instant::now());
            state.interaction
        };
        self.take_now_playing_message();
        self.tasks.lock().abort_all();

        self.queue.lock().await.reset();
        self.auto_queue.lock().await.reset();

        if let Err(e) = self.transport.set_filters(self.guild_id, FilterState::default()).await {
            warn!("⚠️ No se pudieron limpiar los filtros en {}: {}", self.guild_id, e);
        }
        self.transport.stop(self.guild_id).await?;

        if let Err(e) = self.sink.clear(self.guild_id, interaction).await {
            debug!("🧹 No se pudo limpiar el mensaje en {}: {}", self.guild_id, e);
        }
        info!("⏹️ Reproducción detenida en {}", self.guild_id);
        Ok(())
    }

    pub async fn pause(&self) -> PlayerResult<bool> {
        match self.status() {
            PlaybackStatus::Idle => Err(PlayerError::NothingPlaying),
            PlaybackStatus::Paused => Ok(false),
            PlaybackStatus::Playing => {
                self.transport.set_paused(self.guild_id, true).await?;
                {
                    let mut state = self.state.lock();
                    state.status = PlaybackStatus::Paused;
                    state.clock.pause();
                }
                info!("⏸️ Pausado en {}", self.guild_id);
                self.refresh_ui().await;
                Ok(true)
            }
        }
    }

    pub async fn resume(&self) -> PlayerResult<bool> {
        if self.status() != PlaybackStatus::Paused {
            return Ok(false);
        }
        self.transport.set_paused(self.guild_id, false).await?;
        {
            let mut state = self.state.lock();
            state.status = PlaybackStatus::Playing;
            state.clock.resume();
        }
        info!("▶️ Reanudado en {}", self.guild_id);
        self.refresh_ui().await;
        Ok(true)
    }

    pub async fn seek(&self, position_ms: u64) -> PlayerResult<u64> {
        let current = self.current().ok_or(PlayerError::NothingPlaying)?;
        let position_ms = if current.is_stream() {
            0
        } else {
            position_ms.min(current.length_ms())
        };

        self.transport.seek(self.guild_id, position_ms).await?;
        {
            let mut state = self.state.lock();
            let running = state.status == PlaybackStatus::Playing;
            state.clock.start(position_ms, running);
        }
        Ok(position_ms)
    }

    pub async fn set_volume(&self, volume: u16) -> PlayerResult<u16> {
        let volume = volume.min(MAX_VOLUME);
        self.transport.set_volume(self.guild_id, volume).await?;
        self.state.lock().volume = volume;
        info!("🔊 Volumen en {}: {}", self.guild_id, volume);
        Ok(volume)
    }

    pub async fn set_filters(&self, filters: FilterState) -> PlayerResult<()> {
        self.transport.set_filters(self.guild_id, filters.clone()).await?;
        info!("🎛️ Filtros en {}: {}", self.guild_id, filters.describe());
        self.state.lock().filters = filters;
        self.refresh_ui().await;
        Ok(())
    }

    pub async fn set_autoplay(&self, mode: AutoplayMode) {
        let previous = std::mem::replace(&mut self.state.lock().autoplay, mode);
        if mode == AutoplayMode::Disabled {
            self.auto_queue.lock().await.clear();
        }
        if previous != mode {
            info!("🎲 Autoplay en {}: {:?}", self.guild_id, mode);
        }
    }

    pub async fn shuffle(&self) {
        self.queue.lock().await.shuffle();
    }

    pub fn mark_idle(&self) {
        let mut state = self.state.lock();
        state.status = PlaybackStatus::Idle;
        state.clock = PlaybackClock::default();
        if state.idle_since.is_none() {
            state.idle_since = Some(Instant::now());
        }
        debug!("💤 Sesión inactiva en {}", self.guild_id);
    }

    pub fn handle_track_start(&self) {
        let mut state = self.state.lock();
        if state.status == PlaybackStatus::Idle && state.current.is_some() {
            state.status = PlaybackStatus::Playing;
        }
        state.idle_since = None;
    }

    fn register_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.settings.max_consecutive_failures && !state.refill_suspended {
            warn!(
                "🚫 {} fallos seguidos en {}, autoplay suspendido hasta una reproducción manual",
                state.consecutive_failures, self.guild_id
            );
            state.refill_suspended = true;
        }
    }

    /// Foto para la interfaz; `None` si no hay nada cargado
    pub async fn now_playing(&self) -> Option<NowPlayingView> {
        let (track, playable, position_ms, status, autoplay, volume, filters, interaction) = {
            let state = self.state.lock();
            (
                state.original.clone()?,
                state.current.clone()?,
                state.clock.position_ms(),
                state.status,
                state.autoplay,
                state.volume,
                state.filters.clone(),
                state.interaction,
            )
        };

        let (queued, loop_mode, next_queued, can_go_back) = {
            let queue = self.queue.lock().await;
            let history = queue.history();
            let can_go_back = queue.loop_mode() != LoopMode::Track
                && history.len() >= 2
                && history.last().is_some_and(|last| same_track(last, &track));
            (queue.count(), queue.loop_mode(), queue.peek_at(0).cloned(), can_go_back)
        };
        let (auto_queued, next_auto) = {
            let auto = self.auto_queue.lock().await;
            (auto.count(), auto.peek_at(0).cloned())
        };
        let up_next = next_queued.or(if autoplay == AutoplayMode::Disabled { None } else { next_auto });
        let requested_at = track.added_at();

        Some(NowPlayingView {
            guild_id: self.guild_id,
            track,
            playable,
            position_ms,
            status,
            loop_mode,
            autoplay,
            volume,
            filters,
            queued,
            auto_queued,
            up_next,
            can_go_back,
            interaction,
            requested_at,
        })
    }

    async fn refresh_ui(&self) {
        let Some(view) = self.now_playing().await else {
            return;
        };
        match self.sink.render(&view).await {
            Ok(Some(message_id)) => {
                if let Some(interaction) = self.state.lock().interaction.as_mut() {
                    interaction.message_id = Some(message_id);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("🖼️ No se pudo dibujar el estado en {}: {}", self.guild_id, e),
        }
    }

    /// Estado del que salen las semillas de recomendación
    pub async fn seed_snapshot(&self, history_seeds: usize, upcoming_seeds: usize) -> SeedSnapshot {
        let (current, previous) = {
            let state = self.state.lock();
            (state.original.clone(), state.previous.clone())
        };
        let history = self
            .queue
            .lock()
            .await
            .history()
            .recent(history_seeds)
            .cloned()
            .collect();
        let upcoming = self.auto_queue.snapshot(upcoming_seeds).await;

        SeedSnapshot {
            current,
            previous,
            history,
            upcoming,
        }
    }

    /// Ids y claves título/artista de lo pendiente, lo reciente y lo actual
    pub async fn lookback_keys(&self, pending: usize, history: usize) -> HashSet<String> {
        let mut keys = HashSet::new();

        for shared in [&self.queue, &self.auto_queue] {
            let queue = shared.lock().await;
            for track in queue.iter().take(pending).chain(queue.history().recent(history)) {
                remember_keys(&mut keys, track);
            }
        }

        let (current, original) = {
            let state = self.state.lock();
            (state.current.clone(), state.original.clone())
        };
        for track in current.iter().chain(original.iter()) {
            remember_keys(&mut keys, track);
        }
        keys
    }

    fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return;
        }
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    fn spawn_refill(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let engine = Arc::clone(&self.engine);
        self.spawn_task(async move {
            engine.do_recommendation(&session, true).await;
        });
    }

    fn spawn_caching(self: &Arc<Self>, epoch: u64) {
        let session = Arc::clone(self);
        self.spawn_task(async move {
            session.cache_upcoming(epoch).await;
        });
    }

    async fn cache_upcoming(&self, epoch: u64) {
        if let Some(current) = self.original() {
            if current.is_playable() && current.needs_enrichment() {
                if let Ok(Some(found)) = self.fulfillment.lookup_catalog(&current).await {
                    let still_current = self.original().is_some_and(|o| same_track(&o, &current));
                    if self.is_epoch(epoch) && still_current && found.apply_to(&current) {
                        self.refresh_ui().await;
                    }
                }
            }
        }

        let lookahead = self.settings.cache_lookahead;
        self.cache_queue(&self.queue, lookahead, epoch).await;
        if self.queue.count().await <= lookahead {
            self.cache_queue(&self.auto_queue, lookahead, epoch).await;
        }
    }

    async fn cache_queue(&self, queue: &SharedQueue, lookahead: usize, epoch: u64) {
        let _guard = queue.enrichment.lock().await;

        for track in queue.snapshot(lookahead).await {
            if !self.is_epoch(epoch) {
                debug!("🧊 Sesión cambió, se corta el precacheo en {}", self.guild_id);
                return;
            }

            if !track.provider().is_streamable() {
                if track.is_fulfilled() {
                    continue;
                }
                match self.fulfillment.lookup(&track).await {
                    Ok(result) if self.is_epoch(epoch) => {
                        result.apply();
                    }
                    Ok(_) => return,
                    Err(e) => debug!("🔍 Precacheo falló para {}: {}", track, e),
                }
            } else if track.needs_enrichment() {
                match self.fulfillment.lookup_catalog(&track).await {
                    Ok(Some(found)) if self.is_epoch(epoch) => {
                        found.apply_to(&track);
                    }
                    Ok(_) => {}
                    Err(e) => debug!("🔍 Sin metadatos de catálogo para {}: {}", track, e),
                }
            }
        }
    }

    /// Cancela y espera las tareas de fondo; la sesión no acepta más trabajo
    pub async fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        self.queue.lock().await.reset();
        self.auto_queue.lock().await.reset();
        {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.current = None;
            state.original = None;
            state.previous = None;
            state.loaded = None;
            state.status = PlaybackStatus::Idle;
        }
        info!("👋 Sesión cerrada en {}", self.guild_id);
    }
}

fn remember_keys(keys: &mut HashSet<String>, track: &Track) {
    keys.insert(track.identifier().to_string());
    keys.insert(track.dedupe_key());
    if let Some(fulfilled) = track.fulfilled() {
        keys.insert(fulfilled.identifier().to_string());
    }
}
