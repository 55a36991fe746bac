//! Simulated streaming engine serving synthetic bytes on loopback.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use bytes::Bytes;
use peerplay_core::engine::{
    EngineHandle, EngineOptions, EngineStart, StreamEngine, TransferStats, bind_listener,
};
use peerplay_core::error::EngineError;
use peerplay_core::resolver::TorrentDescriptor;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinHandle;

use crate::SimulationConfig;

const CHUNK_SIZE: usize = 64 * 1024;
/// Upload is modelled as a fraction of download.
const UPLOAD_RATIO: f64 = 0.1;

/// Engine that pretends to download and serves deterministic filler data.
pub struct SimulatedEngine {
    config: SimulationConfig,
}

impl SimulatedEngine {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StreamEngine for SimulatedEngine {
    async fn start(
        &self,
        descriptor: &TorrentDescriptor,
        options: EngineOptions,
    ) -> Result<EngineStart, EngineError> {
        tokio::fs::create_dir_all(&options.scratch_path)
            .await
            .map_err(|source| EngineError::Scratch {
                path: options.scratch_path.clone(),
                source,
            })?;

        let handle = Arc::new(SimulatedHandle {
            stats: Arc::new(parking_lot::RwLock::new(TransferStats::default())),
            stopped: AtomicBool::new(false),
            tasks: parking_lot::Mutex::new(Vec::new()),
            scratch_path: options.scratch_path.clone(),
        });
        let (start, listening) = EngineStart::channel(handle.clone());

        let total_length = descriptor.total_length;
        let name = descriptor.name.clone();
        let startup_delay = self.config.startup_delay;
        let preferred_port = options.preferred_port;

        let server = tokio::spawn(async move {
            tokio::time::sleep(startup_delay).await;
            let listener = match bind_listener(preferred_port).await {
                Ok(listener) => listener,
                Err(e) => {
                    let _ = listening.send(Err(e));
                    return;
                }
            };
            let port = match listener.local_addr() {
                Ok(addr) => addr.port(),
                Err(e) => {
                    let _ = listening.send(Err(EngineError::BindFailed {
                        preferred: preferred_port,
                        reason: e.to_string(),
                    }));
                    return;
                }
            };

            tracing::info!("Simulated engine serving {name} on port {port}");
            let _ = listening.send(Ok(port));

            let app = Router::new().route("/", get(move || stream_body(total_length)));
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!("Simulated stream server stopped: {e}");
            }
        });

        let seed = self.config.seed ^ u64::from_le_bytes(head_bytes(descriptor));
        let ticker = tokio::spawn(run_transfer(
            Arc::clone(&handle.stats),
            total_length,
            self.config.download_rate,
            self.config.tick,
            seed,
        ));

        handle.tasks.lock().extend([server, ticker]);
        Ok(start)
    }
}

fn head_bytes(descriptor: &TorrentDescriptor) -> [u8; 8] {
    let mut head = [0u8; 8];
    head.copy_from_slice(&descriptor.info_hash.as_bytes()[..8]);
    head
}

/// Streams `length` bytes of a repeating pattern.
async fn stream_body(length: u64) -> impl IntoResponse {
    let chunk = Bytes::from(
        (0..CHUNK_SIZE)
            .map(|i| (i % 251) as u8)
            .collect::<Vec<u8>>(),
    );
    let full_chunks = length / CHUNK_SIZE as u64;
    let tail = (length % CHUNK_SIZE as u64) as usize;

    let chunks = (0..full_chunks)
        .map(move |_| chunk.clone())
        .chain((tail > 0).then(|| Bytes::from(vec![0u8; tail])))
        .map(Ok::<_, std::io::Error>);

    (
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(futures::stream::iter(chunks)),
    )
}

/// Grows transfer counters each tick until the torrent is complete.
async fn run_transfer(
    stats: Arc<parking_lot::RwLock<TransferStats>>,
    total_length: u64,
    mean_rate: u64,
    tick: Duration,
    seed: u64,
) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut interval = tokio::time::interval(tick);
    interval.tick().await;

    loop {
        interval.tick().await;
        let mut current = stats.write();
        if current.bytes_downloaded >= total_length {
            current.download_rate = 0.0;
            current.upload_rate = 0.0;
            continue;
        }

        let rate = mean_rate as f64 * rng.random_range(0.75..1.25);
        let step = (rate * tick.as_secs_f64()) as u64;
        current.bytes_downloaded = (current.bytes_downloaded + step).min(total_length);
        current.bytes_uploaded += (step as f64 * UPLOAD_RATIO) as u64;
        current.download_rate = rate;
        current.upload_rate = rate * UPLOAD_RATIO;
    }
}

/// Live simulated transfer.
pub struct SimulatedHandle {
    stats: Arc<parking_lot::RwLock<TransferStats>>,
    stopped: AtomicBool,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    scratch_path: PathBuf,
}

#[async_trait]
impl EngineHandle for SimulatedHandle {
    fn stats(&self) -> TransferStats {
        *self.stats.read()
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.scratch_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove {}: {e}", self.scratch_path.display());
        }
        tracing::info!("Simulated engine stopped");
    }
}
