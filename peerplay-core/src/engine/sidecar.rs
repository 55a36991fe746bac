//! Production engine adapter driving an external streaming engine process.
//!
//! The engine binary is launched per session as
//! `<program> <locator> --connections N --buffer BYTES --path DIR --port P`
//! and reports progress as newline-delimited JSON on stdout:
//!
//! ```text
//! {"event":"listening","port":8888}
//! {"event":"bind_error","message":"EADDRINUSE"}
//! {"event":"stats","download_speed":1048576.0,"upload_speed":0.0,"downloaded":4096,"uploaded":0,"paused":false}
//! ```
//!
//! A `bind_error` (or an exit before `listening`) counts as a failed bind and
//! triggers the single relaunch on port 0.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::bind::{BindError, bind_with_fallback};
use super::{EngineHandle, EngineOptions, EngineStart, ListenSender, StreamEngine, TransferStats};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::resolver::TorrentDescriptor;

type EventLines = Lines<BufReader<ChildStdout>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SidecarEvent {
    Listening {
        port: u16,
    },
    BindError {
        #[serde(default)]
        message: String,
    },
    Stats {
        download_speed: f64,
        upload_speed: f64,
        downloaded: u64,
        uploaded: u64,
        #[serde(default)]
        paused: bool,
    },
}

/// Launches the external engine executable for each session.
#[derive(Debug, Clone)]
pub struct SidecarEngine {
    program: String,
}

impl SidecarEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.command.clone())
    }
}

#[async_trait]
impl StreamEngine for SidecarEngine {
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

        let shared = Arc::new(Shared {
            child: tokio::sync::Mutex::new(None),
            stats: parking_lot::RwLock::new(TransferStats::default()),
            stopped: AtomicBool::new(false),
            supervisor: parking_lot::Mutex::new(None),
            scratch_path: options.scratch_path.clone(),
        });

        let (start, listen_tx) = EngineStart::channel(Arc::new(SidecarHandle {
            shared: Arc::clone(&shared),
        }));

        tracing::info!(
            "Starting engine `{}` for {} in {}",
            self.program,
            descriptor.name,
            options.scratch_path.display()
        );

        let launch = Launch {
            program: self.program.clone(),
            locator: descriptor.source.clone(),
            options,
            shared: Arc::clone(&shared),
        };
        let task = tokio::spawn(launch.supervise(listen_tx));
        *shared.supervisor.lock() = Some(task);

        Ok(start)
    }
}

struct Shared {
    child: tokio::sync::Mutex<Option<Child>>,
    stats: parking_lot::RwLock<TransferStats>,
    stopped: AtomicBool,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
    scratch_path: PathBuf,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn reap(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!("Engine process already gone: {e}");
            }
        }
    }

    fn apply(&self, event: SidecarEvent) {
        if let SidecarEvent::Stats {
            download_speed,
            upload_speed,
            downloaded,
            uploaded,
            paused,
        } = event
        {
            *self.stats.write() = TransferStats {
                download_rate: download_speed,
                upload_rate: upload_speed,
                bytes_downloaded: downloaded,
                bytes_uploaded: uploaded,
                paused,
            };
        }
    }
}

struct Launch {
    program: String,
    locator: String,
    options: EngineOptions,
    shared: Arc<Shared>,
}

impl Launch {
    async fn supervise(self, listen_tx: ListenSender) {
        let bound = bind_with_fallback(self.options.preferred_port, |port| self.spawn_on(port)).await;

        match bound {
            Ok((port, events)) => {
                tracing::info!("Engine listening on port {port}");
                let _ = listen_tx.send(Ok(port));
                self.pump(events).await;
            }
            Err(e) => {
                let _ = listen_tx.send(Err(e));
            }
        }
    }

    /// Launches the engine on `port` and waits for its verdict.
    async fn spawn_on(&self, port: u16) -> Result<(u16, EventLines), BindError> {
        if self.shared.is_stopped() {
            return Err(BindError::new(port, "engine stopped"));
        }

        let mut child = Command::new(&self.program)
            .arg(&self.locator)
            .arg("--connections")
            .arg(self.options.max_connections.to_string())
            .arg("--buffer")
            .arg(self.options.buffer_size.to_string())
            .arg("--path")
            .arg(&self.options.scratch_path)
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BindError::new(port, format!("failed to launch `{}`: {e}", self.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BindError::new(port, "engine stdout unavailable"))?;

        {
            let mut slot = self.shared.child.lock().await;
            if self.shared.is_stopped() {
                let _ = child.kill().await;
                return Err(BindError::new(port, "engine stopped"));
            }
            *slot = Some(child);
        }

        let mut events = BufReader::new(stdout).lines();
        loop {
            let line = match events.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => {
                    self.shared.reap().await;
                    return Err(BindError::new(port, "engine exited before listening"));
                }
            };
            match serde_json::from_str::<SidecarEvent>(&line) {
                Ok(SidecarEvent::Listening { port: bound }) => return Ok((bound, events)),
                Ok(SidecarEvent::BindError { message }) => {
                    self.shared.reap().await;
                    return Err(BindError::new(port, message));
                }
                Ok(event) => self.shared.apply(event),
                Err(_) => tracing::trace!("engine: {line}"),
            }
        }
    }

    async fn pump(&self, mut events: EventLines) {
        while let Ok(Some(line)) = events.next_line().await {
            match serde_json::from_str::<SidecarEvent>(&line) {
                Ok(event) => self.shared.apply(event),
                Err(_) => tracing::trace!("engine: {line}"),
            }
        }
        if !self.shared.is_stopped() {
            tracing::warn!("Streaming engine exited while serving");
        }
    }
}

/// Handle to one engine process.
pub struct SidecarHandle {
    shared: Arc<Shared>,
}

#[async_trait]
impl EngineHandle for SidecarHandle {
    fn stats(&self) -> TransferStats {
        *self.shared.stats.read()
    }

    async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.shared.supervisor.lock().take() {
            task.abort();
        }
        self.shared.reap().await;

        match tokio::fs::remove_dir_all(&self.shared.scratch_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to release {}: {e}",
                self.shared.scratch_path.display()
            ),
        }
        tracing::debug!("Engine stopped");
    }
}
