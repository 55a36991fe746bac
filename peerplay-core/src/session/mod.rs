//! Stream session lifecycle.
//!
//! A session is one torrent-to-player pipeline. At most one exists at a
//! time; [`SessionController`] owns it and serializes every transition.

pub mod controller;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use self::controller::{SessionController, SessionSettings};
use crate::engine::{EngineHandle, TransferStats};
use crate::player::PlaybackState;
use crate::resolver::TorrentDescriptor;

/// Random session token, also used to name the scratch directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    #[default]
    Idle,
    /// Engine started, waiting for it to listen
    Starting,
    /// Engine listening and player launched
    Active,
}

/// The single live pipeline.
pub(crate) struct Session {
    pub(crate) id: SessionId,
    pub(crate) descriptor: Arc<TorrentDescriptor>,
    pub(crate) handle: Arc<dyn EngineHandle>,
    pub(crate) scratch_path: PathBuf,
    pub(crate) serving_port: Option<u16>,
    pub(crate) created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        descriptor: Arc<TorrentDescriptor>,
        handle: Arc<dyn EngineHandle>,
        scratch_path: PathBuf,
    ) -> Self {
        Self {
            id,
            descriptor,
            handle,
            scratch_path,
            serving_port: None,
            created_at: Utc::now(),
        }
    }
}

/// Transfer and torrent fields of `/status`, present only with a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    pub download_speed: f64,
    pub upload_speed: f64,
    pub paused: bool,
    pub downloaded: u64,
    pub uploaded: u64,
    pub name: String,
    pub size: u64,
}

impl TransferStatus {
    pub fn new(stats: TransferStats, descriptor: &TorrentDescriptor) -> Self {
        Self {
            download_speed: stats.download_rate,
            upload_speed: stats.upload_rate,
            paused: stats.paused,
            downloaded: stats.bytes_downloaded,
            uploaded: stats.bytes_uploaded,
            name: descriptor.name.clone(),
            size: descriptor.total_length,
        }
    }
}

/// Read-only projection of player state plus live transfer data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub status: PlaybackState,
    #[serde(flatten)]
    pub transfer: Option<TransferStatus>,
}

impl PlaybackStatus {
    pub fn idle(status: PlaybackState) -> Self {
        Self {
            status,
            transfer: None,
        }
    }
}
