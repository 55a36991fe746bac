//! Scripted collaborators for exercising the session controller.
//!
//! The mocks record every call and let tests hold the asynchronous steps
//! (resolution, the engine's listening notification) open so races can be
//! driven deterministically.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::engine::{
    BindError, EngineHandle, EngineOptions, EngineStart, ListenSender, StreamEngine,
    TransferStats, bind_with_fallback,
};
use crate::error::{EngineError, PlayerError, ResolveError};
use crate::player::{PlayOptions, PlaybackState, PlayerCommand, PlayerDriver};
use crate::resolver::{InfoHash, TorrentDescriptor, TorrentFile, TorrentResolver};

/// Port every mock engine reports once listening.
pub const MOCK_STREAM_PORT: u16 = 5555;

const MOCK_PIECE_COUNT: usize = 2;
const POLL_INTERVAL_MS: u64 = 5;
const POLL_ATTEMPTS: usize = 1000;

/// Builds a two-piece single-file descriptor.
pub fn mock_descriptor(name: &str, size: u64) -> TorrentDescriptor {
    let piece_length = size.div_ceil(MOCK_PIECE_COUNT as u64).max(1) as u32;
    TorrentDescriptor {
        info_hash: InfoHash::new([0xaa; 20]),
        name: name.to_string(),
        total_length: size,
        piece_length,
        piece_hashes: vec![[0u8; 20]; MOCK_PIECE_COUNT],
        files: vec![TorrentFile {
            path: vec![name.to_string()],
            length: size,
        }],
        announce_urls: Vec::new(),
        source: "mock".to_string(),
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..POLL_ATTEMPTS {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
    panic!("condition not reached in time");
}

/// Resolver returning a fixed descriptor.
pub struct MockResolver {
    descriptor: TorrentDescriptor,
    calls: Mutex<Vec<String>>,
    next_failure: Mutex<Option<ResolveError>>,
    gate: Option<Notify>,
}

impl MockResolver {
    pub fn new(descriptor: TorrentDescriptor) -> Self {
        Self {
            descriptor,
            calls: Mutex::new(Vec::new()),
            next_failure: Mutex::new(None),
            gate: None,
        }
    }

    /// Blocks each resolution until [`MockResolver::release`].
    pub fn holding(mut self) -> Self {
        self.gate = Some(Notify::new());
        self
    }

    /// Makes the next resolution fail with `error`.
    pub fn fail_next(&self, error: ResolveError) {
        *self.next_failure.lock() = Some(error);
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub async fn wait_for_calls(&self, count: usize) {
        wait_until(|| self.calls.lock().len() >= count).await;
    }
}

#[async_trait]
impl TorrentResolver for MockResolver {
    async fn resolve(&self, locator: &str) -> Result<TorrentDescriptor, ResolveError> {
        self.calls.lock().push(locator.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.next_failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(self.descriptor.clone()),
        }
    }
}

/// Handle of one mock transfer.
pub struct MockHandle {
    stats: Mutex<TransferStats>,
    stop_calls: AtomicUsize,
    options: EngineOptions,
}

impl MockHandle {
    pub fn is_stopped(&self) -> bool {
        self.stop_calls.load(Ordering::SeqCst) > 0
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn set_stats(&self, stats: TransferStats) {
        *self.stats.lock() = stats;
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

#[async_trait]
impl EngineHandle for MockHandle {
    fn stats(&self) -> TransferStats {
        *self.stats.lock()
    }

    async fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = std::fs::remove_dir_all(&self.options.scratch_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!("Mock scratch cleanup failed: {e}");
        }
    }
}

/// Engine that binds through the real fallback policy against scripted
/// bind failures, creating the scratch directory like a real engine.
pub struct MockEngine {
    failing_binds: usize,
    hold_listening: bool,
    handles: Mutex<Vec<Arc<MockHandle>>>,
    bind_attempts: Mutex<Vec<u16>>,
    pending: Mutex<Vec<(ListenSender, Result<u16, EngineError>)>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            failing_binds: 0,
            hold_listening: false,
            handles: Mutex::new(Vec::new()),
            bind_attempts: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Fails the first `count` bind attempts of every start.
    pub fn failing_binds(mut self, count: usize) -> Self {
        self.failing_binds = count;
        self
    }

    /// Withholds listening notifications until released.
    pub fn holding_listening(mut self) -> Self {
        self.hold_listening = true;
        self
    }

    /// Delivers every withheld listening notification.
    pub fn release_listening(&self) {
        for (sender, result) in self.pending.lock().drain(..) {
            let _ = sender.send(result);
        }
    }

    /// Replaces every withheld notification with `error`.
    pub fn fail_listening(&self, error: EngineError) {
        let mut pending = self.pending.lock();
        let Some((sender, _)) = pending.pop() else {
            return;
        };
        let _ = sender.send(Err(error));
        for (sender, _) in pending.drain(..) {
            let _ = sender.send(Err(EngineError::Stopped));
        }
    }

    pub fn start_count(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles.lock().clone()
    }

    pub fn bind_attempts(&self) -> Vec<u16> {
        self.bind_attempts.lock().clone()
    }

    pub async fn wait_for_starts(&self, count: usize) {
        wait_until(|| self.start_count() >= count).await;
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamEngine for MockEngine {
    async fn start(
        &self,
        _descriptor: &TorrentDescriptor,
        options: EngineOptions,
    ) -> Result<EngineStart, EngineError> {
        std::fs::create_dir_all(&options.scratch_path).map_err(|source| {
            EngineError::Scratch {
                path: options.scratch_path.clone(),
                source,
            }
        })?;

        let attempts = AtomicUsize::new(0);
        let bound = bind_with_fallback(options.preferred_port, |port| {
            self.bind_attempts.lock().push(port);
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let fails = attempt < self.failing_binds;
            async move {
                if fails {
                    Err(BindError::new(port, "address in use"))
                } else {
                    Ok(MOCK_STREAM_PORT)
                }
            }
        })
        .await;

        let handle = Arc::new(MockHandle {
            stats: Mutex::new(TransferStats::default()),
            stop_calls: AtomicUsize::new(0),
            options,
        });
        let (start, sender) = EngineStart::channel(handle.clone());

        if self.hold_listening {
            self.pending.lock().push((sender, bound));
        } else {
            let _ = sender.send(bound);
        }
        self.handles.lock().push(handle);
        Ok(start)
    }
}

/// Player recording plays and commands.
pub struct MockPlayer {
    state: Mutex<PlaybackState>,
    plays: Mutex<Vec<String>>,
    commands: Mutex<Vec<PlayerCommand>>,
    stops: AtomicUsize,
    fail_launch: AtomicBool,
}

impl MockPlayer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlaybackState::Idle),
            plays: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            fail_launch: AtomicBool::new(false),
        }
    }

    /// Player whose executable is missing.
    pub fn failing_launch() -> Self {
        let player = Self::new();
        player.set_launch_failure(true);
        player
    }

    pub fn set_launch_failure(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn plays(&self) -> Vec<String> {
        self.plays.lock().clone()
    }

    pub fn commands(&self) -> Vec<PlayerCommand> {
        self.commands.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Default for MockPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlayerDriver for MockPlayer {
    async fn play(&self, url: &str, _options: &PlayOptions) -> Result<(), PlayerError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(PlayerError::Launch {
                program: "mock-player".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such player"),
            });
        }
        self.plays.lock().push(url.to_string());
        *self.state.lock() = PlaybackState::Playing;
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = PlaybackState::Idle;
    }

    async fn command(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        self.commands.lock().push(command);
        if command == PlayerCommand::Pause {
            let mut state = self.state.lock();
            *state = match *state {
                PlaybackState::Playing => PlaybackState::Paused,
                PlaybackState::Paused => PlaybackState::Playing,
                PlaybackState::Idle => PlaybackState::Idle,
            };
        }
        Ok(())
    }

    fn state(&self) -> PlaybackState {
        *self.state.lock()
    }
}
