//! Session controller: the single-session state machine.
//!
//! Start and stop are serialized by one async mutex. The mutex is released
//! while waiting for the engine to listen, so a stop or a superseding start
//! can run in that window; the waiting start then re-locks and only proceeds
//! if its session id is still the current one. Status reads go through a
//! separate snapshot lock and never wait on start/stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::{PlaybackStatus, Session, SessionId, SessionState, TransferStatus};
use crate::cache::TempCache;
use crate::config::{EngineConfig, PeerplayConfig};
use crate::engine::{EngineHandle, EngineOptions, StreamEngine};
use crate::error::SessionError;
use crate::player::{PlayOptions, PlayerCommand, PlayerDriver};
use crate::resolver::{TorrentDescriptor, TorrentResolver};

/// Host the player uses to reach the engine's local stream.
const STREAM_HOST: &str = "127.0.0.1";

/// Controller tunables taken from [`PeerplayConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub engine: EngineConfig,
    pub play: PlayOptions,
    /// Upper bound on waiting for the engine to listen
    pub listen_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &PeerplayConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            play: PlayOptions::from_config(&config.player),
            listen_timeout: config.engine.listen_timeout,
        }
    }
}

/// Lock-free view of the live session for status queries.
#[derive(Clone)]
struct LiveView {
    id: SessionId,
    state: SessionState,
    descriptor: Arc<TorrentDescriptor>,
    handle: Arc<dyn EngineHandle>,
}

/// Owns at most one session and orchestrates resolver, engine and player.
pub struct SessionController {
    resolver: Arc<dyn TorrentResolver>,
    engine: Arc<dyn StreamEngine>,
    player: Arc<dyn PlayerDriver>,
    cache: TempCache,
    settings: SessionSettings,
    current: Mutex<Option<Session>>,
    view: RwLock<Option<LiveView>>,
    /// Bumped by every stop; a start begun under an older value is stale
    stop_epoch: AtomicU64,
}

impl SessionController {
    pub fn new(
        resolver: Arc<dyn TorrentResolver>,
        engine: Arc<dyn StreamEngine>,
        player: Arc<dyn PlayerDriver>,
        cache: TempCache,
        settings: SessionSettings,
    ) -> Self {
        Self {
            resolver,
            engine,
            player,
            cache,
            settings,
            current: Mutex::new(None),
            view: RwLock::new(None),
            stop_epoch: AtomicU64::new(0),
        }
    }

    /// Starts streaming `locator` to the player, replacing any live session.
    ///
    /// Returns the local port the engine serves the stream on.
    ///
    /// # Errors
    /// - `SessionError::InvalidRequest` - Empty locator
    /// - `SessionError::ResolutionFailed` - Locator could not be resolved
    /// - `SessionError::BindFailed` - Engine could not bind after one retry
    /// - `SessionError::Timeout` - Engine did not listen in time
    /// - `SessionError::StreamInterrupted` - Session was stopped or superseded
    /// - `SessionError::PlayerLaunchFailed` - Player could not be started
    pub async fn start_session(&self, locator: &str) -> Result<u16, SessionError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(SessionError::invalid("Torrent URL Required"));
        }

        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        let descriptor = self
            .resolver
            .resolve(locator)
            .await
            .map_err(SessionError::ResolutionFailed)?;
        let descriptor = Arc::new(descriptor);

        let (id, handle, listening) = {
            let mut current = self.current.lock().await;
            if self.stop_epoch.load(Ordering::SeqCst) != epoch {
                tracing::info!("Start of {locator} superseded by stop during resolution");
                return Err(SessionError::StreamInterrupted);
            }

            if let Some(previous) = current.take() {
                tracing::info!("Session {} superseded by new start", previous.id);
                self.teardown(Some(previous)).await;
            }

            let id = SessionId::new();
            let scratch_path = self.cache.allocate(id);
            let options = EngineOptions::from_config(&self.settings.engine, scratch_path.clone());

            let started = match self.engine.start(&descriptor, options).await {
                Ok(started) => started,
                Err(e) => {
                    tracing::warn!("Engine start failed for {}: {e}", descriptor.name);
                    self.teardown(None).await;
                    return Err(e.into());
                }
            };

            let session = Session::new(
                id,
                Arc::clone(&descriptor),
                Arc::clone(&started.handle),
                scratch_path,
            );
            tracing::info!(
                "Session {id} starting for {} ({} bytes) in {}",
                descriptor.name,
                descriptor.total_length,
                session.scratch_path.display()
            );
            self.publish(Some(LiveView {
                id,
                state: SessionState::Starting,
                descriptor: Arc::clone(&descriptor),
                handle: Arc::clone(&started.handle),
            }));
            *current = Some(session);

            (id, started.handle, started.listening)
        };

        let bound = match tokio::time::timeout(self.settings.listen_timeout, listening).await {
            Ok(Ok(Ok(port))) => Ok(port),
            Ok(Ok(Err(e))) => Err(SessionError::from(e)),
            Ok(Err(_)) => Err(SessionError::StreamInterrupted),
            Err(_) => Err(SessionError::Timeout {
                stage: "stream to listen",
                seconds: self.settings.listen_timeout.as_secs(),
            }),
        };

        let mut current = self.current.lock().await;
        let still_current = current.as_ref().is_some_and(|session| session.id == id);
        if !still_current {
            tracing::info!("Session {id} was superseded before playback; discarding engine");
            handle.stop().await;
            return Err(SessionError::StreamInterrupted);
        }

        let port = match bound {
            Ok(port) => port,
            Err(e) => {
                tracing::warn!("Session {id} failed to start: {e}");
                self.teardown(current.take()).await;
                return Err(e);
            }
        };

        let url = format!("http://{STREAM_HOST}:{port}/");
        if let Err(e) = self.player.play(&url, &self.settings.play).await {
            tracing::error!("Player launch failed for session {id}: {e}");
            self.teardown(current.take()).await;
            return Err(SessionError::PlayerLaunchFailed(e));
        }

        if let Some(session) = current.as_mut() {
            session.serving_port = Some(port);
        }
        if let Some(view) = self.view.write().as_mut() {
            view.state = SessionState::Active;
        }
        tracing::info!("Session {id} active on {url}");
        Ok(port)
    }

    /// Tears down the live session, if any. Never fails.
    pub async fn stop_session(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().await;
        self.teardown(current.take()).await;
    }

    /// Player state plus transfer data when a session is live.
    pub fn status(&self) -> PlaybackStatus {
        let status = self.player.state();
        let transfer = self
            .view
            .read()
            .as_ref()
            .map(|view| TransferStatus::new(view.handle.stats(), &view.descriptor));

        PlaybackStatus { status, transfer }
    }

    /// Sends a named transport command to the player.
    ///
    /// Commands are player-level and need no session. A player that is not
    /// running ignores them; that is logged, not reported.
    ///
    /// # Errors
    /// - `SessionError::InvalidRequest` - Name is not a known command
    pub async fn send_command(&self, name: &str) -> Result<(), SessionError> {
        let command: PlayerCommand = name
            .parse()
            .map_err(|_| SessionError::invalid("Invalid player command"))?;

        if let Err(e) = self.player.command(command).await {
            tracing::warn!("Player command {command} ignored: {e}");
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.view
            .read()
            .as_ref()
            .map_or(SessionState::Idle, |view| view.state)
    }

    /// Id of the live session, if any.
    pub fn current_session(&self) -> Option<SessionId> {
        self.view.read().as_ref().map(|view| view.id)
    }

    /// Stops everything on process exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down session controller");
        self.stop_session().await;
    }

    /// Removes every reserved scratch entry from the temp root.
    pub async fn purge_scratch(&self) -> usize {
        let cache = self.cache.clone();
        match tokio::task::spawn_blocking(move || cache.purge_orphans()).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("Scratch purge task failed: {e}");
                0
            }
        }
    }

    /// Stops `session`'s engine, the player and purges scratch storage.
    ///
    /// Callers hold the `current` lock.
    async fn teardown(&self, session: Option<Session>) {
        self.publish(None);

        if let Some(session) = session {
            let lifetime = chrono::Utc::now() - session.created_at;
            tracing::info!(
                "Tearing down session {} (port {:?}, alive {}s)",
                session.id,
                session.serving_port,
                lifetime.num_seconds()
            );
            session.handle.stop().await;
        }

        self.player.stop().await;
        self.purge_scratch().await;
    }

    fn publish(&self, view: Option<LiveView>) {
        *self.view.write() = view;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::PeerplayConfig;
    use crate::error::{EngineError, ResolveError};
    use crate::player::PlaybackState;
    use crate::test_mocks::{MockEngine, MockPlayer, MockResolver, mock_descriptor};

    struct Harness {
        controller: Arc<SessionController>,
        resolver: Arc<MockResolver>,
        engine: Arc<MockEngine>,
        player: Arc<MockPlayer>,
        temp: tempfile::TempDir,
    }

    fn harness_with(resolver: MockResolver, engine: MockEngine, player: MockPlayer) -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let mut config = PeerplayConfig::for_testing();
        config.engine.listen_timeout = Duration::from_secs(5);

        let resolver = Arc::new(resolver);
        let engine = Arc::new(engine);
        let player = Arc::new(player);
        let controller = Arc::new(SessionController::new(
            resolver.clone(),
            engine.clone(),
            player.clone(),
            TempCache::new(temp.path()),
            SessionSettings::from_config(&config),
        ));

        Harness {
            controller,
            resolver,
            engine,
            player,
            temp,
        }
    }

    fn harness(engine: MockEngine) -> Harness {
        harness_with(
            MockResolver::new(mock_descriptor("clip.mp4", 1000)),
            engine,
            MockPlayer::new(),
        )
    }

    fn scratch_dirs(temp: &tempfile::TempDir) -> usize {
        std::fs::read_dir(temp.path())
            .unwrap()
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("peerflix-"))
            .count()
    }

    #[tokio::test]
    async fn test_start_returns_port_and_plays_local_url() {
        let h = harness(MockEngine::new());

        let port = h
            .controller
            .start_session("magnet:?xt=urn:btih:AAA")
            .await
            .unwrap();

        assert_eq!(port, 5555);
        assert_eq!(h.controller.state(), SessionState::Active);
        assert_eq!(h.player.plays(), vec!["http://127.0.0.1:5555/".to_string()]);
        assert_eq!(h.resolver.calls(), vec!["magnet:?xt=urn:btih:AAA".to_string()]);
        assert_eq!(scratch_dirs(&h.temp), 1);
    }

    #[tokio::test]
    async fn test_empty_locator_is_invalid_request() {
        let h = harness(MockEngine::new());

        let result = h.controller.start_session("   ").await;

        assert!(matches!(result, Err(SessionError::InvalidRequest { .. })));
        assert!(h.resolver.calls().is_empty());
        assert_eq!(h.engine.start_count(), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_leaves_active_session_untouched() {
        let h = harness_with(
            MockResolver::new(mock_descriptor("clip.mp4", 1000)),
            MockEngine::new(),
            MockPlayer::new(),
        );
        h.controller.start_session("good").await.unwrap();

        h.resolver.fail_next(ResolveError::UnsupportedLocator {
            locator: "bad".to_string(),
        });
        let result = h.controller.start_session("bad").await;

        assert!(matches!(result, Err(SessionError::ResolutionFailed(_))));
        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(!h.engine.handles()[0].is_stopped());
    }

    #[tokio::test]
    async fn test_single_session_invariant_across_restarts() {
        let h = harness(MockEngine::new());

        for _ in 0..5 {
            h.controller.start_session("magnet:?xt=urn:btih:AAA").await.unwrap();
            let live = h.engine.handles().iter().filter(|h| !h.is_stopped()).count();
            assert_eq!(live, 1);
            assert_eq!(scratch_dirs(&h.temp), 1);
        }

        h.controller.stop_session().await;
        assert!(h.engine.handles().iter().all(|handle| handle.is_stopped()));
        assert_eq!(scratch_dirs(&h.temp), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness(MockEngine::new());

        h.controller.stop_session().await;
        assert_eq!(h.controller.state(), SessionState::Idle);

        h.controller.start_session("magnet:?xt=urn:btih:AAA").await.unwrap();
        h.controller.stop_session().await;
        h.controller.stop_session().await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.player.state(), PlaybackState::Idle);
        assert_eq!(h.engine.handles()[0].stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_supersession_while_starting() {
        let h = harness(MockEngine::new().holding_listening());

        let first = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start_session("first").await })
        };
        h.engine.wait_for_starts(1).await;
        assert_eq!(h.controller.state(), SessionState::Starting);

        let second = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start_session("second").await })
        };
        h.engine.wait_for_starts(2).await;
        h.engine.release_listening();

        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert!(matches!(first, Err(SessionError::StreamInterrupted)));
        assert_eq!(second.unwrap(), 5555);

        let handles = h.engine.handles();
        assert!(handles[0].is_stopped());
        assert!(!handles[1].is_stopped());
        assert_eq!(h.player.plays().len(), 1);
        assert_eq!(h.controller.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_stop_during_bind_never_plays() {
        let h = harness(MockEngine::new().holding_listening());

        let start = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start_session("magnet:?xt=urn:btih:AAA").await })
        };
        h.engine.wait_for_starts(1).await;

        h.controller.stop_session().await;
        h.engine.release_listening();

        let result = start.await.unwrap();
        assert!(matches!(result, Err(SessionError::StreamInterrupted)));
        assert!(h.player.plays().is_empty());
        assert!(h.engine.handles()[0].is_stopped());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(h.controller.status().transfer.is_none());
    }

    #[tokio::test]
    async fn test_stop_during_resolution_wins() {
        let h = harness_with(
            MockResolver::new(mock_descriptor("clip.mp4", 1000)).holding(),
            MockEngine::new(),
            MockPlayer::new(),
        );

        let start = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start_session("magnet:?xt=urn:btih:AAA").await })
        };
        h.resolver.wait_for_calls(1).await;

        h.controller.stop_session().await;
        h.resolver.release();

        let result = start.await.unwrap();
        assert!(matches!(result, Err(SessionError::StreamInterrupted)));
        assert_eq!(h.engine.start_count(), 0);
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_bind_retries_exactly_once_then_fails() {
        let h = harness(MockEngine::new().failing_binds(usize::MAX));

        let result = h.controller.start_session("magnet:?xt=urn:btih:AAA").await;

        assert!(matches!(result, Err(SessionError::BindFailed { .. })));
        assert_eq!(h.engine.bind_attempts(), vec![0, 0]);
        assert!(h.player.plays().is_empty());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(scratch_dirs(&h.temp), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_falls_back_to_ephemeral_port() {
        let h = harness(MockEngine::new().failing_binds(1));

        let port = h.controller.start_session("magnet:?xt=urn:btih:AAA").await.unwrap();

        assert_eq!(port, 5555);
        assert_eq!(h.engine.bind_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_player_launch_failure_tears_down_engine() {
        let h = harness_with(
            MockResolver::new(mock_descriptor("clip.mp4", 1000)),
            MockEngine::new(),
            MockPlayer::failing_launch(),
        );

        let result = h.controller.start_session("magnet:?xt=urn:btih:AAA").await;

        assert!(matches!(result, Err(SessionError::PlayerLaunchFailed(_))));
        assert!(h.engine.handles()[0].is_stopped());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(scratch_dirs(&h.temp), 0);
    }

    #[tokio::test]
    async fn test_listen_timeout_returns_to_idle() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = PeerplayConfig::for_testing();
        config.engine.listen_timeout = Duration::from_millis(50);
        let engine = Arc::new(MockEngine::new().holding_listening());
        let controller = SessionController::new(
            Arc::new(MockResolver::new(mock_descriptor("clip.mp4", 1000))),
            engine.clone(),
            Arc::new(MockPlayer::new()),
            TempCache::new(temp.path()),
            SessionSettings::from_config(&config),
        );

        let result = controller.start_session("magnet:?xt=urn:btih:AAA").await;

        assert!(matches!(result, Err(SessionError::Timeout { .. })));
        assert!(engine.handles()[0].is_stopped());
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_engine_dying_before_listen_is_interruption() {
        let h = harness(MockEngine::new().holding_listening());

        let start = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start_session("magnet:?xt=urn:btih:AAA").await })
        };
        h.engine.wait_for_starts(1).await;
        h.engine.fail_listening(EngineError::Stopped);

        let result = start.await.unwrap();
        assert!(matches!(result, Err(SessionError::StreamInterrupted)));
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_commands_never_reach_player() {
        let h = harness(MockEngine::new());

        for name in ["", "Pause", "play", "stop", "status", "seek", "volume"] {
            let result = h.controller.send_command(name).await;
            assert!(matches!(result, Err(SessionError::InvalidRequest { .. })));
        }
        assert!(h.player.commands().is_empty());

        for command in PlayerCommand::ALL {
            h.controller.send_command(command.name()).await.unwrap();
        }
        assert_eq!(h.player.commands(), PlayerCommand::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_status_reflects_live_stats() {
        let h = harness(MockEngine::new());
        assert!(h.controller.status().transfer.is_none());

        h.controller.start_session("magnet:?xt=urn:btih:AAA").await.unwrap();
        let status = h.controller.status();
        assert_eq!(status.status, PlaybackState::Playing);
        let transfer = status.transfer.unwrap();
        assert_eq!(transfer.name, "clip.mp4");
        assert_eq!(transfer.size, 1000);
        assert_eq!(transfer.downloaded, 0);

        h.engine.handles()[0].set_stats(crate::engine::TransferStats {
            download_rate: 512.0,
            upload_rate: 64.0,
            bytes_downloaded: 700,
            bytes_uploaded: 20,
            paused: false,
        });
        let transfer = h.controller.status().transfer.unwrap();
        assert_eq!(transfer.downloaded, 700);
        assert_eq!(transfer.download_speed, 512.0);

        h.controller.stop_session().await;
        let status = h.controller.status();
        assert_eq!(status.status, PlaybackState::Idle);
        assert!(status.transfer.is_none());
    }

    #[tokio::test]
    async fn test_failed_start_can_be_retried_without_stop() {
        let h = harness_with(
            MockResolver::new(mock_descriptor("clip.mp4", 1000)),
            MockEngine::new(),
            MockPlayer::failing_launch(),
        );
        assert!(h.controller.start_session("magnet:?xt=urn:btih:AAA").await.is_err());

        h.player.set_launch_failure(false);
        let port = h.controller.start_session("magnet:?xt=urn:btih:AAA").await.unwrap();

        assert_eq!(port, 5555);
        assert_eq!(h.controller.state(), SessionState::Active);
    }
}
