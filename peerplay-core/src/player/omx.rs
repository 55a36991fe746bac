//! Production player driver for omxplayer-style command line players.
//!
//! The player is launched as `<program> -o <audio> [--blank] <url>` and
//! controlled by writing its keyboard shortcuts to stdin. State follows the
//! commands we sent and flips to IDLE when the process exits.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use super::{PlayOptions, PlaybackState, PlayerCommand, PlayerDriver};
use crate::config::PlayerConfig;
use crate::error::PlayerError;

const QUIT_KEY: &[u8] = b"q";

fn keystroke(command: PlayerCommand) -> &'static [u8] {
    match command {
        PlayerCommand::Pause => b"p",
        PlayerCommand::SpeedUp => b"2",
        PlayerCommand::SpeedDown => b"1",
        PlayerCommand::NextAudio => b"k",
        PlayerCommand::PrevAudio => b"j",
        PlayerCommand::NextSubtitle => b"m",
        PlayerCommand::PrevSubtitle => b"n",
        PlayerCommand::ToggleSubtitle => b"s",
        PlayerCommand::VolumeUp => b"+",
        PlayerCommand::VolumeDown => b"-",
        PlayerCommand::Forward => b"\x1b[C",
        PlayerCommand::Backward => b"\x1b[D",
        PlayerCommand::FastForward => b"\x1b[A",
        PlayerCommand::FastBackward => b"\x1b[B",
    }
}

struct Running {
    stdin: ChildStdin,
    kill: oneshot::Sender<()>,
}

/// Keyboard-driven external player process.
pub struct OmxPlayer {
    program: String,
    leading_args: Vec<String>,
    state: Arc<parking_lot::Mutex<PlaybackState>>,
    /// Bumped on every play/stop so a stale exit watcher cannot reset state
    generation: Arc<AtomicU64>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl OmxPlayer {
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_leading_args(program, Vec::new())
    }

    /// Runs `program` with fixed arguments placed before the player options.
    pub fn with_leading_args(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
            state: Arc::new(parking_lot::Mutex::new(PlaybackState::Idle)),
            generation: Arc::new(AtomicU64::new(0)),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_config(config: &PlayerConfig) -> Self {
        Self::new(config.command.clone())
    }

    fn spawn_watcher(&self, mut child: Child, kill: oneshot::Receiver<()>, generation: u64) {
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => tracing::info!("Player exited with {status}"),
                    Err(e) => tracing::warn!("Failed to wait on player: {e}"),
                },
                _ = kill => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!("Player already gone: {e}");
                    }
                }
            }
            if current.load(Ordering::SeqCst) == generation {
                *state.lock() = PlaybackState::Idle;
            }
        });
    }
}

#[async_trait]
impl PlayerDriver for OmxPlayer {
    async fn play(&self, url: &str, options: &PlayOptions) -> Result<(), PlayerError> {
        self.stop().await;

        let mut command = Command::new(&self.program);
        command.args(&self.leading_args);
        if let Some(output) = &options.audio_output {
            command.arg("-o").arg(output);
        }
        if options.blank_screen {
            command.arg("--blank");
        }
        command
            .arg(url)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| PlayerError::Launch {
            program: self.program.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(PlayerError::NotRunning)?;

        let mut running = self.running.lock().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (kill_tx, kill_rx) = oneshot::channel();
        *self.state.lock() = PlaybackState::Playing;
        self.spawn_watcher(child, kill_rx, generation);
        *running = Some(Running {
            stdin,
            kill: kill_tx,
        });

        tracing::info!("Player started for {url}");
        Ok(())
    }

    async fn stop(&self) {
        let mut running = self.running.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = PlaybackState::Idle;

        let Some(mut process) = running.take() else {
            return;
        };
        if let Err(e) = process.stdin.write_all(QUIT_KEY).await {
            tracing::debug!("Player did not take quit key: {e}");
        }
        let _ = process.kill.send(());
        tracing::info!("Player stopped");
    }

    async fn command(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        let mut running = self.running.lock().await;
        let process = match running.as_mut() {
            Some(process) if self.state() != PlaybackState::Idle => process,
            _ => return Err(PlayerError::NotRunning),
        };

        process.stdin.write_all(keystroke(command)).await?;
        process.stdin.flush().await?;

        if command == PlayerCommand::Pause {
            let mut state = self.state.lock();
            *state = match *state {
                PlaybackState::Playing => PlaybackState::Paused,
                PlaybackState::Paused => PlaybackState::Playing,
                PlaybackState::Idle => PlaybackState::Idle,
            };
        }
        tracing::debug!("Player command {command}");
        Ok(())
    }

    fn state(&self) -> PlaybackState {
        *self.state.lock()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;

    fn recording_player(dir: &Path) -> OmxPlayer {
        // `sh -c SCRIPT DIR <player args...>`: $0 is DIR, player args are ignored.
        OmxPlayer::with_leading_args(
            "sh",
            vec![
                "-c".to_string(),
                "cat > \"$0/keys.log\"".to_string(),
                dir.to_string_lossy().into_owned(),
            ],
        )
    }

    fn options() -> PlayOptions {
        PlayOptions {
            audio_output: Some("alsa".to_string()),
            blank_screen: true,
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_commands_are_written_as_keystrokes() {
        let dir = tempfile::tempdir().unwrap();
        let player = recording_player(dir.path());

        player.play("http://127.0.0.1:5555/", &options()).await.unwrap();
        assert_eq!(player.state(), PlaybackState::Playing);

        player.command(PlayerCommand::Pause).await.unwrap();
        assert_eq!(player.state(), PlaybackState::Paused);
        player.command(PlayerCommand::Forward).await.unwrap();

        let log = dir.path().join("keys.log");
        let written = wait_for(|| {
            std::fs::read(&log)
                .map(|bytes| bytes.starts_with(b"p\x1b[C"))
                .unwrap_or(false)
        })
        .await;
        assert!(written);

        player.stop().await;
        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(matches!(
            player.command(PlayerCommand::Pause).await,
            Err(PlayerError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_process_exit_returns_to_idle() {
        let player = OmxPlayer::with_leading_args("sh", vec!["-c".to_string(), "exit 0".to_string()]);
        player.play("http://127.0.0.1:5555/", &options()).await.unwrap();

        assert!(wait_for(|| player.state() == PlaybackState::Idle).await);
    }

    #[tokio::test]
    async fn test_missing_player_is_launch_error() {
        let player = OmxPlayer::new("/nonexistent/omxplayer");
        let result = player.play("http://127.0.0.1:5555/", &options()).await;

        assert!(matches!(result, Err(PlayerError::Launch { .. })));
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let player = OmxPlayer::new("/nonexistent/omxplayer");
        player.stop().await;
        player.stop().await;
        assert_eq!(player.state(), PlaybackState::Idle);
    }
}
