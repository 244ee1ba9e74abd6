use serenity::model::id::GuildId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SessionController;
use crate::audio::transport::TransportEvent;

/// Aplica un evento del nodo a la sesión de su guild
pub async fn handle_event(controller: &SessionController, event: TransportEvent) {
    let guild_id = event.guild_id();
    let Some(session) = controller.session(guild_id) else {
        debug!("📭 Evento para guild {} sin sesión: {:?}", guild_id, event);
        return;
    };

    match event {
        TransportEvent::TrackStart { encoded, .. } => {
            debug!("▶️ Track iniciado en guild {} ({} bytes)", guild_id, encoded.len());
            session.handle_track_start();
        }
        TransportEvent::TrackEnd { reason, .. } => {
            info!("🎵 Track terminó en guild {}: {:?}", guild_id, reason);
            if reason.may_start_next() {
                if let Some(interaction) = session.take_now_playing_message() {
                    if interaction.message_id.is_some() {
                        controller.clear_now_playing(guild_id, interaction).await;
                    }
                }
            }
            session.handle_track_end(reason).await;
        }
        TransportEvent::PlayerInactive { .. } => {
            warn!("💤 El nodo reporta el reproductor inactivo en guild {}", guild_id);
            session.mark_idle();
        }
        TransportEvent::WebSocketClosed { code, by_remote, .. } => {
            if by_remote {
                warn!("🔌 Conexión de voz cerrada por Discord en guild {} (código {})", guild_id, code);
                controller.leave(guild_id).await;
            } else {
                debug!("🔌 Conexión de voz cerrada localmente en guild {} (código {})", guild_id, code);
            }
        }
    }
}

/// Recibe eventos del nodo y los reparte a un worker por guild, en orden
pub fn start_event_loop(
    controller: Arc<SessionController>,
    buffer: usize,
) -> (mpsc::Sender<TransportEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<TransportEvent>(buffer);

    let handle = tokio::spawn(async move {
        let mut workers: HashMap<GuildId, mpsc::UnboundedSender<TransportEvent>> = HashMap::new();

        while let Some(event) = rx.recv().await {
            let guild_id = event.guild_id();
            workers.retain(|_, worker| !worker.is_closed());

            let worker = workers
                .entry(guild_id)
                .or_insert_with(|| spawn_worker(Arc::clone(&controller), guild_id));
            if let Err(e) = worker.send(event) {
                warn!("⚠️ Worker de eventos de guild {} no disponible", guild_id);
                workers.remove(&guild_id);
                let worker = spawn_worker(Arc::clone(&controller), guild_id);
                if worker.send(e.0).is_ok() {
                    workers.insert(guild_id, worker);
                }
            }
        }
        debug!("🛑 Bucle de eventos terminado");
    });

    (tx, handle)
}

fn spawn_worker(controller: Arc<SessionController>, guild_id: GuildId) -> mpsc::UnboundedSender<TransportEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handle_event(&controller, event).await;
        }
        debug!("🧹 Worker de eventos de guild {} terminado", guild_id);
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::player::{PlayOptions, PlaybackStatus};
    use crate::audio::transport::TrackEndReason;
    use crate::bot::tests::{fixture, user_in, VOICE};
    use crate::testing::video_ref;
    use pretty_assertions::assert_eq;

    fn end(reason: TrackEndReason) -> TransportEvent {
        TransportEvent::TrackEnd {
            guild_id: GuildId::new(1),
            encoded: "enc:a".into(),
            reason,
        }
    }

    #[tokio::test]
    async fn test_track_end_advances_and_clears_message() {
        let fixture = fixture();
        let session = fixture.controller.join(&user_in(Some(VOICE))).unwrap();
        session.queue().lock().await.push_back(video_ref("b"));
        session.play(video_ref("a"), PlayOptions::manual()).await.unwrap();

        handle_event(&fixture.controller, end(TrackEndReason::Finished)).await;

        assert_eq!(session.original().unwrap().identifier(), "b");
        assert_eq!(fixture.sink.clears(), 1);
    }

    #[tokio::test]
    async fn test_replaced_end_keeps_message() {
        let fixture = fixture();
        let session = fixture.controller.join(&user_in(Some(VOICE))).unwrap();
        session.play(video_ref("a"), PlayOptions::manual()).await.unwrap();

        handle_event(&fixture.controller, end(TrackEndReason::Replaced)).await;

        assert_eq!(session.status(), PlaybackStatus::Playing);
        assert_eq!(fixture.sink.clears(), 0);
    }

    #[tokio::test]
    async fn test_remote_close_leaves() {
        let fixture = fixture();
        let session = fixture.controller.join(&user_in(Some(VOICE))).unwrap();

        handle_event(
            &fixture.controller,
            TransportEvent::WebSocketClosed {
                guild_id: GuildId::new(1),
                code: 4014,
                by_remote: false,
            },
        )
        .await;
        assert!(!session.is_closed());

        handle_event(
            &fixture.controller,
            TransportEvent::WebSocketClosed {
                guild_id: GuildId::new(1),
                code: 4014,
                by_remote: true,
            },
        )
        .await;
        assert!(session.is_closed());
        assert_eq!(fixture.controller.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_event_loop_dispatches_in_order() {
        let fixture = fixture();
        let session = fixture.controller.join(&user_in(Some(VOICE))).unwrap();
        {
            let mut queue = session.queue().lock().await;
            queue.push_back(video_ref("b"));
            queue.push_back(video_ref("c"));
        }
        session.play(video_ref("a"), PlayOptions::manual()).await.unwrap();

        let (tx, handle) = start_event_loop(Arc::clone(&fixture.controller), 8);
        tx.send(end(TrackEndReason::Finished)).await.unwrap();
        tx.send(end(TrackEndReason::Finished)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        // el worker sigue procesando después de que termina el bucle
        for _ in 0..50 {
            if fixture.transport.played().len() == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(fixture.transport.played(), vec!["enc:a", "enc:b", "enc:c"]);
    }
}
