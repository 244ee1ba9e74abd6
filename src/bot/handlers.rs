//! Intents de comandos sobre una sesión.
//!
//! Cada intent aplica la regla de voz, marca actividad y traduce el pedido a
//! operaciones de [`PlayerSession`]. El formato de las respuestas queda del
//! lado del gateway.

use std::sync::Arc;
use tracing::{info, warn};

use super::{CommandContext, SessionController};
use crate::audio::autoplay::AutoplayMode;
use crate::audio::effects::FilterState;
use crate::audio::player::{PlayOptions, PlayerSession};
use crate::audio::queue::{paginate, LoopMode, QueuePage};
use crate::error::{PlayerError, PlayerResult};
use crate::sources::{same_track, ProviderKind, Resolved, Track, TrackRef};
use crate::ui::NowPlayingView;

pub const QUEUE_PAGE_SIZE: usize = 10;
pub const MAX_JUMP_ENTRIES: usize = 25;

#[derive(Debug, Clone, Default)]
pub struct PlayRequest {
    pub query: String,
    /// Proveedor preferido para búsquedas por texto
    pub source: Option<ProviderKind>,
    pub autoplay: Option<AutoplayMode>,
    /// Reproducir ya, cortando lo que suena
    pub force_play: bool,
    /// Poner al frente de la cola
    pub put_front: bool,
}

impl PlayRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum PlayOutcome {
    /// Empezó a sonar `track`; `queued` quedaron en cola
    Started { track: TrackRef, queued: usize },
    /// Se agregaron a la cola a partir de `position` (base 0)
    Queued {
        first: TrackRef,
        count: usize,
        position: usize,
    },
}

impl SessionController {
    pub async fn play(&self, ctx: &CommandContext, request: PlayRequest) -> PlayerResult<PlayOutcome> {
        let session = self.session_or_join(ctx)?;
        if let Some(mode) = request.autoplay {
            session.set_autoplay(mode).await;
        }

        let provider = self.resolver().provider_for(&request.query, request.source);
        let tracks = match self.resolver().resolve(&request.query, request.source, false).await? {
            Resolved::Single(track) => vec![track],
            Resolved::Collection(collection) => collection.tracks,
            Resolved::Results(results) => results.into_iter().take(1).collect(),
        };

        info!(
            "🎵 {} pidió '{}' en guild {} ({} tracks)",
            ctx.user_id,
            request.query,
            ctx.guild_id,
            tracks.len()
        );
        self.enqueue(ctx, &session, tracks, &request, provider).await
    }

    /// Búsqueda para que el usuario elija (se guarda para `select`)
    pub async fn search(
        &self,
        ctx: &CommandContext,
        query: &str,
        source: Option<ProviderKind>,
    ) -> PlayerResult<Vec<Track>> {
        self.session_or_join(ctx)?;
        let results = match self.resolver().resolve(query, source, true).await? {
            Resolved::Results(results) => results,
            Resolved::Single(track) => vec![track],
            Resolved::Collection(collection) => collection.tracks,
        };

        self.store_search(ctx.guild_id, results.clone());
        Ok(results)
    }

    /// Reproduce el resultado `index` (base 0) de la última búsqueda
    pub async fn select(&self, ctx: &CommandContext, index: usize) -> PlayerResult<PlayOutcome> {
        let session = self.session_for(ctx)?;
        let track = self
            .search_result(ctx.guild_id, index)
            .ok_or(PlayerError::IndexOutOfRange(index))?;
        let provider = track.provider();

        self.enqueue(ctx, &session, vec![track], &PlayRequest::default(), provider)
            .await
    }

    async fn enqueue(
        &self,
        ctx: &CommandContext,
        session: &Arc<PlayerSession>,
        tracks: Vec<Track>,
        request: &PlayRequest,
        provider: ProviderKind,
    ) -> PlayerResult<PlayOutcome> {
        let tracks: Vec<TrackRef> = tracks
            .into_iter()
            .map(|t| t.with_requested_by(Some(ctx.user_id)).into_ref())
            .collect();
        let first = tracks
            .first()
            .cloned()
            .ok_or_else(|| PlayerError::NotFound(request.query.clone()))?;
        let count = tracks.len();
        let interrupted = if request.force_play && session.is_active() {
            session.original()
        } else {
            None
        };

        let position = {
            let mut queue = session.queue().lock().await;
            if queue.count() + count > self.max_queue_size() {
                return Err(PlayerError::QueueFull(self.max_queue_size()));
            }
            // lo que sonaba vuelve a la cola detrás de lo nuevo
            if let Some(playing) = interrupted {
                let history = queue.history_mut();
                if history.last().is_some_and(|last| same_track(last, &playing)) {
                    history.pop();
                }
                queue.push_front(playing);
            }
            if request.force_play || request.put_front {
                queue.extend_front(tracks);
                0
            } else {
                let position = queue.count();
                queue.extend(tracks);
                position
            }
        };

        if session.is_active() {
            if request.force_play {
                session.skip(None).await?;
                return Ok(PlayOutcome::Started {
                    track: first,
                    queued: count - 1,
                });
            }
            return Ok(PlayOutcome::Queued { first, count, position });
        }

        let populate = session.autoplay_mode() == AutoplayMode::Enabled && provider.supports_recommendations();
        let next = session.queue().lock().await.pop()?;
        match session.play(Arc::clone(&next), PlayOptions::manual().with_populate(populate)).await {
            Ok(_) => Ok(PlayOutcome::Started {
                track: next,
                queued: count - 1,
            }),
            Err(e) => {
                warn!("⏭️ No se pudo reproducir {}: {}", next, e);
                match session.advance().await {
                    Some(track) => Ok(PlayOutcome::Started {
                        track,
                        queued: session.queue().count().await,
                    }),
                    None => Err(e),
                }
            }
        }
    }

    /// Pendientes (cola del usuario y luego autoplay) o historial reciente
    pub async fn queue_view(&self, ctx: &CommandContext, page: usize, history: bool) -> PlayerResult<QueuePage> {
        let session = self.session_for(ctx)?;

        let items = if history {
            session.queue().lock().await.history().iter().rev().cloned().collect()
        } else {
            pending(&session).await
        };
        Ok(paginate(items, page, QUEUE_PAGE_SIZE))
    }

    pub async fn skip(&self, ctx: &CommandContext, index: Option<usize>) -> PlayerResult<Option<TrackRef>> {
        self.session_for(ctx)?.skip(index).await
    }

    /// Tracks a los que se puede saltar con `skip(index)`
    pub async fn jump(&self, ctx: &CommandContext) -> PlayerResult<Vec<TrackRef>> {
        let session = self.session_for(ctx)?;
        let mut items = pending(&session).await;
        items.truncate(MAX_JUMP_ENTRIES);
        Ok(items)
    }

    pub async fn previous(&self, ctx: &CommandContext) -> PlayerResult<(bool, bool)> {
        self.session_for(ctx)?.previous().await
    }

    pub async fn stop(&self, ctx: &CommandContext) -> PlayerResult<()> {
        self.session_for(ctx)?.stop().await
    }

    /// Vacía la cola del usuario; devuelve cuántos se quitaron
    pub async fn clear(&self, ctx: &CommandContext) -> PlayerResult<usize> {
        let session = self.session_for(ctx)?;
        let mut queue = session.queue().lock().await;
        let removed = queue.count();
        queue.clear();
        Ok(removed)
    }

    pub async fn shuffle(&self, ctx: &CommandContext) -> PlayerResult<usize> {
        let session = self.session_for(ctx)?;
        session.shuffle().await;
        Ok(session.queue().count().await)
    }

    pub async fn toggle_loop(&self, ctx: &CommandContext, queue_wide: bool) -> PlayerResult<LoopMode> {
        Ok(self.session_for(ctx)?.toggle_loop(queue_wide).await)
    }

    pub async fn pause(&self, ctx: &CommandContext) -> PlayerResult<bool> {
        self.session_for(ctx)?.pause().await
    }

    pub async fn resume(&self, ctx: &CommandContext) -> PlayerResult<bool> {
        self.session_for(ctx)?.resume().await
    }

    pub async fn now_playing(&self, ctx: &CommandContext) -> PlayerResult<NowPlayingView> {
        let session = self.session(ctx.guild_id).ok_or(PlayerError::NotConnected(ctx.guild_id))?;
        session.now_playing().await.ok_or(PlayerError::NothingPlaying)
    }

    pub async fn volume(&self, ctx: &CommandContext, volume: u16) -> PlayerResult<u16> {
        self.session_for(ctx)?.set_volume(volume).await
    }

    /// Aplica un filtro por nombre (`nightcore`, `vaporwave`, `bass`, `reset`...)
    pub async fn filter(&self, ctx: &CommandContext, name: &str) -> PlayerResult<FilterState> {
        let session = self.session_for(ctx)?;
        let filters = FilterState::from_name(name).ok_or_else(|| PlayerError::NotFound(name.to_string()))?;
        session.set_filters(filters.clone()).await?;
        Ok(filters)
    }
}

async fn pending(session: &PlayerSession) -> Vec<TrackRef> {
    let mut items: Vec<TrackRef> = session.queue().lock().await.iter().cloned().collect();
    if session.autoplay_mode() != AutoplayMode::Disabled {
        items.extend(session.auto_queue().lock().await.iter().cloned());
    }
    items
}
