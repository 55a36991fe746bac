//! Streaming engine adapter.
//!
//! The piece-transfer engine is an external collaborator. This module fixes
//! the interface the session controller needs from it: start a transfer
//! into a scratch directory, learn the local port once the stream is being
//! served, read transfer statistics, and stop.

pub mod bind;
pub mod sidecar;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

pub use self::bind::{BindError, EPHEMERAL_PORT, bind_listener, bind_with_fallback};
pub use self::sidecar::SidecarEngine;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::resolver::TorrentDescriptor;

/// Point-in-time transfer counters of one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransferStats {
    /// Bytes per second
    pub download_rate: f64,
    /// Bytes per second
    pub upload_rate: f64,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
    pub paused: bool,
}

/// Parameters for a single engine start.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_connections: usize,
    pub buffer_size: u64,
    pub scratch_path: PathBuf,
    pub preferred_port: u16,
}

impl EngineOptions {
    pub fn from_config(config: &EngineConfig, scratch_path: PathBuf) -> Self {
        Self {
            max_connections: config.max_connections,
            buffer_size: config.buffer_size,
            scratch_path,
            preferred_port: config.preferred_port,
        }
    }
}

/// Sender half of the listening notification.
pub type ListenSender = oneshot::Sender<Result<u16, EngineError>>;

/// A started engine: its handle plus the one-shot listening notification.
///
/// The receiver resolves with the bound port, with the bind failure, or is
/// dropped when the engine is stopped before it ever listened.
pub struct EngineStart {
    pub handle: Arc<dyn EngineHandle>,
    pub listening: oneshot::Receiver<Result<u16, EngineError>>,
}

impl EngineStart {
    /// Pairs a handle with a fresh listening channel.
    pub fn channel(handle: Arc<dyn EngineHandle>) -> (Self, ListenSender) {
        let (sender, listening) = oneshot::channel();
        (Self { handle, listening }, sender)
    }
}

/// Starts transfers for resolved torrents.
#[async_trait]
pub trait StreamEngine: Send + Sync {
    /// Starts a transfer storing pieces under `options.scratch_path`.
    ///
    /// Returns as soon as the transfer is underway; binding happens in the
    /// background and is reported through [`EngineStart::listening`].
    ///
    /// # Errors
    /// - `EngineError::Scratch` - Scratch directory could not be created
    async fn start(
        &self,
        descriptor: &TorrentDescriptor,
        options: EngineOptions,
    ) -> Result<EngineStart, EngineError>;
}

/// A live transfer owned by exactly one session.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Latest counters; zero before any data arrives.
    fn stats(&self) -> TransferStats;

    /// Closes the local listener, drops peers and releases on-disk buffers.
    ///
    /// Idempotent, and safe on a handle that never finished binding.
    async fn stop(&self);
}
