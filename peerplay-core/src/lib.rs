//! Peerplay Core - stream session control for torrent-backed playback
//!
//! Owns the lifecycle of the single active playback session: resolving a
//! torrent locator, starting the streaming engine, handing its local URL to
//! the media player, and tearing everything down again. External
//! collaborators (resolver, streaming engine, player) sit behind traits so
//! the controller can run against production processes or simulations.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod mode;
pub mod player;
pub mod resolver;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use cache::{SCRATCH_PREFIX, TempCache};
pub use config::PeerplayConfig;
pub use engine::{
    EngineHandle, EngineOptions, EngineStart, SidecarEngine, StreamEngine, TransferStats,
    bind_with_fallback,
};
pub use error::{CacheError, EngineError, PlayerError, ResolveError, SessionError};
pub use mode::RuntimeMode;
pub use player::{OmxPlayer, PlayOptions, PlaybackState, PlayerCommand, PlayerDriver};
pub use resolver::{InfoHash, MetainfoResolver, TorrentDescriptor, TorrentFile, TorrentResolver};
pub use session::{
    PlaybackStatus, SessionController, SessionId, SessionSettings, SessionState, TransferStatus,
};
