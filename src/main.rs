use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use open_music_session::audio::autoplay::RecommendationEngine;
use open_music_session::audio::fulfillment::FulfillmentService;
use open_music_session::audio::player::SessionDeps;
use open_music_session::audio::transport::TransportEvent;
use open_music_session::bot::events::start_event_loop;
use open_music_session::bot::SessionController;
use open_music_session::cache::FulfillmentCache;
use open_music_session::config::Config;
use open_music_session::sources::{CatalogClient, LavalinkNode, SpotifyClient, TrackSourceResolver};
use open_music_session::ui::LoggingSink;

const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("open_music_session=debug")),
        )
        .init();

    info!("🎵 Iniciando Open Music Session v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Nodo de audio: búsqueda y transporte
    let node = Arc::new(LavalinkNode::new(&config).context("No se pudo crear el cliente de Lavalink")?);

    // Catálogo opcional
    let catalog: Option<Arc<dyn CatalogClient>> = match SpotifyClient::from_config(&config) {
        Ok(Some(client)) => {
            info!("🎧 Catálogo de Spotify activado");
            Some(Arc::new(client))
        }
        Ok(None) => {
            info!("🎧 Sin credenciales de Spotify, recomendaciones solo por radio");
            None
        }
        Err(e) => {
            error!("❌ Error al inicializar Spotify: {}", e);
            None
        }
    };

    let cache = FulfillmentCache::new(config.fulfillment_cache_size, config.fulfillment_cache_ttl());
    let deps = SessionDeps {
        transport: node.clone(),
        fulfillment: Arc::new(FulfillmentService::new(node.clone(), catalog.clone(), cache)),
        engine: Arc::new(RecommendationEngine::new(
            node.clone(),
            catalog,
            config.autoplay_settings(),
        )),
        sink: Arc::new(LoggingSink),
    };
    let resolver = TrackSourceResolver::new(node.clone(), config.default_provider, config.search_limit);
    let controller = Arc::new(SessionController::new(&config, resolver, deps));

    // Tareas de fondo
    let shutdown = CancellationToken::new();
    let monitor = controller.spawn_inactivity_monitor(shutdown.clone());
    let (events, event_loop) = start_event_loop(Arc::clone(&controller), EVENT_BUFFER);

    // Puente de eventos: un mensaje JSON del websocket del nodo por línea
    let bridge_token = shutdown.clone();
    let bridge = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = bridge_token.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(payload)) => forward_event(&events, &payload).await,
                Ok(None) => {
                    debug!("📭 Entrada de eventos cerrada");
                    break;
                }
                Err(e) => {
                    warn!("⚠️ Error leyendo eventos: {}", e);
                    break;
                }
            }
        }
    });

    info!("🚀 Sesiones listas");
    tokio::signal::ctrl_c()
        .await
        .context("Error al registrar Ctrl+C")?;
    info!("⚠️ Señal de shutdown recibida, cerrando...");

    shutdown.cancel();
    if let Err(e) = monitor.await {
        warn!("⚠️ Monitor de inactividad terminó con error: {}", e);
    }
    if let Err(e) = bridge.await {
        warn!("⚠️ Puente de eventos terminó con error: {}", e);
    }
    controller.shutdown().await;
    event_loop.abort();

    info!("👋 Open Music Session detenido");
    // la lectura de stdin no se puede cancelar y retendría el runtime
    std::process::exit(0)
}

async fn forward_event(events: &tokio::sync::mpsc::Sender<TransportEvent>, payload: &str) {
    match LavalinkNode::parse_event(payload) {
        Ok(Some(event)) => {
            if events.send(event).await.is_err() {
                warn!("⚠️ Bucle de eventos cerrado, evento descartado");
            }
        }
        Ok(None) => {}
        Err(e) => debug!("🔍 Mensaje del nodo ignorado: {}", e),
    }
}
