use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{stream, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use vigil_core::detection::domain::detector::DetectorFactory;
use vigil_core::overlay::overlay_renderer::OverlayRenderer;
use vigil_core::pipeline::pipeline_logger::SummaryPipelineLogger;
use vigil_core::pipeline::region_filter::RegionFilter;
use vigil_core::pipeline::relay_hub::RelayHub;
use vigil_core::pipeline::stream_consumer::{ConsumerConfig, EmittedFrame, StreamConsumer};
use vigil_core::shared::constants::MULTIPART_CONTENT_TYPE;
use vigil_core::shared::frame_packet::FramePacket;
use vigil_core::streaming::push_codec::{decode_push, encode_push};
use vigil_core::streaming::stream_emitter::{multipart_chunk, StreamEmitter};

/// Chunks buffered between a consumer thread and its HTTP/websocket writer.
const SEND_BUFFER: usize = 2;

/// Frames between progress lines in a consumer's log.
const LOG_EVERY_FRAMES: u64 = 300;

const SOURCE_POLL: Duration = Duration::from_millis(200);

/// Everything needed to build a consumer for a new client.
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub consumer: ConsumerConfig,
    pub renderer: Arc<OverlayRenderer>,
    pub region: Option<Arc<RegionFilter>>,
    pub jpeg_quality: u8,
    pub detector_factory: DetectorFactory,
}

impl StreamSettings {
    fn build_consumer(&self, label: &str) -> Result<StreamConsumer, Box<dyn std::error::Error>> {
        let detector = (self.detector_factory)()?;
        Ok(StreamConsumer::new(
            self.consumer.clone(),
            detector,
            self.renderer.clone(),
            self.region.clone(),
            StreamEmitter::new(self.jpeg_quality),
            Box::new(SummaryPipelineLogger::new(label, LOG_EVERY_FRAMES)),
        )?)
    }
}

#[derive(Clone)]
pub struct AppState {
    hub: Arc<RelayHub<FramePacket>>,
    settings: Arc<StreamSettings>,
    cancelled: Arc<AtomicBool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    ingest_sequence: Arc<AtomicU64>,
    clients: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(hub: Arc<RelayHub<FramePacket>>, settings: StreamSettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            hub,
            settings: Arc::new(settings),
            cancelled: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            ingest_sequence: Arc::new(AtomicU64::new(0)),
            clients: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancels every consumer and closes the hub.
    fn begin_shutdown(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(true);
        self.hub.close();
    }

    /// Subscribes a new client and runs its consumer on a dedicated thread.
    ///
    /// The consumer ends when `sink` returns `false`, the hub closes, or the
    /// server shuts down.
    fn spawn_consumer<F>(&self, label: &'static str, sink: F)
    where
        F: FnMut(EmittedFrame) -> bool + Send + 'static,
    {
        let relay = self.hub.subscribe();
        let settings = self.settings.clone();
        let cancelled = self.cancelled.clone();
        let clients = self.clients.clone();
        let id = clients.fetch_add(1, Ordering::Relaxed) + 1;

        let spawned = std::thread::Builder::new()
            .name(format!("{label}-{id}"))
            .spawn(move || match settings.build_consumer(label) {
                Ok(consumer) => {
                    log::info!("{label} client {id} connected");
                    let exit = consumer.run(relay, &cancelled, sink);
                    log::info!("{label} client {id} finished: {exit:?}");
                }
                Err(e) => log::error!("Cannot start {label} consumer: {e}"),
            });
        if let Err(e) = spawned {
            log::error!("Cannot spawn {label} consumer thread: {e}");
        }
    }
}

pub fn router(state: AppState, ingest: bool) -> Router {
    let router = Router::new()
        .route("/video", get(video))
        .route("/ws/stream", get(ws_stream))
        .route("/health", get(health));
    let router = if ingest {
        router.route("/ingest", get(ws_ingest))
    } else {
        router
    };
    router.with_state(state)
}

/// Serves until Ctrl-C or until the hub closes because the source ended.
pub async fn serve(bind: SocketAddr, state: AppState, ingest: bool) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("Streaming on http://{bind}/video");
    if ingest {
        log::info!("Accepting pushed frames on ws://{bind}/ingest");
    }

    axum::serve(listener, router(state.clone(), ingest))
        .with_graceful_shutdown(shutdown_signal(state))
        .await
}

async fn shutdown_signal(state: AppState) {
    let hub = state.hub.clone();
    let source_finished = async move {
        while !hub.is_closed() {
            tokio::time::sleep(SOURCE_POLL).await;
        }
    };
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => log::info!("Received shutdown signal"),
        _ = source_finished => log::info!("Video source finished"),
    }
    state.begin_shutdown();
}

async fn health(State(state): State<AppState>) -> String {
    format!(
        "ok\nsubscribers: {}\nsource_closed: {}\n",
        state.hub.subscriber_count(),
        state.hub.is_closed()
    )
}

/// `multipart/x-mixed-replace` stream of annotated JPEGs.
async fn video(State(state): State<AppState>) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(SEND_BUFFER);
    state.spawn_consumer("viewer", move |frame| {
        tx.blocking_send(Bytes::from(multipart_chunk(&frame.jpeg)))
            .is_ok()
    });

    let body = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, std::convert::Infallible>(chunk), rx))
    });

    (
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, private"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Websocket relay: one binary push-format message per annotated frame.
async fn ws_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| relay_socket(socket, state))
}

async fn relay_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(SEND_BUFFER);

    state.spawn_consumer("ws-relay", move |frame| {
        match encode_push(&frame.jpeg, Some(&frame.detections)) {
            Ok(message) => tx.blocking_send(message).is_ok(),
            Err(e) => {
                log::warn!("Cannot encode detections for frame {}: {e}", frame.sequence);
                true
            }
        }
    });

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    if sender.send(Message::Binary(message)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = sender.close().await;
}

/// Websocket push endpoint feeding decoded frames into the hub.
async fn ws_ingest(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| ingest_socket(socket, state))
}

async fn ingest_socket(mut socket: WebSocket, state: AppState) {
    log::info!("Ingest client connected");
    let mut shutdown = state.shutdown_rx.clone();
    let (width, height) = (state.settings.width, state.settings.height);

    loop {
        let incoming = tokio::select! {
            incoming = socket.recv() => incoming,
            _ = shutdown.changed() => break,
        };
        match incoming {
            Some(Ok(Message::Binary(bytes))) => {
                let sequence = state.ingest_sequence.fetch_add(1, Ordering::Relaxed);
                let decoded =
                    tokio::task::spawn_blocking(move || decode_push(&bytes, width, height, sequence))
                        .await;
                match decoded {
                    Ok(Ok(packet)) => {
                        state.hub.publish(&packet);
                    }
                    Ok(Err(e)) => log::warn!("Dropping pushed frame {sequence}: {e}"),
                    Err(e) => log::error!("Push decode task failed: {e}"),
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => log::debug!("Ignoring non-binary ingest message"),
            Some(Err(e)) => {
                log::warn!("Ingest connection error: {e}");
                break;
            }
        }
    }
    log::info!("Ingest client disconnected");
}
