//! Simulated player that only tracks state.

use async_trait::async_trait;
use parking_lot::Mutex;
use peerplay_core::error::PlayerError;
use peerplay_core::player::{PlayOptions, PlaybackState, PlayerCommand, PlayerDriver};

#[derive(Debug, Default)]
struct PlayerModel {
    state: PlaybackState,
    url: Option<String>,
    volume_steps: i32,
    speed_steps: i32,
    subtitles: bool,
    history: Vec<PlayerCommand>,
}

/// Player stand-in for machines without a display.
///
/// Applies commands to an in-memory model and logs them.
#[derive(Debug, Default)]
pub struct SimulatedPlayer {
    model: Mutex<PlayerModel>,
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL of the stream being played, if any.
    pub fn current_url(&self) -> Option<String> {
        self.model.lock().url.clone()
    }

    /// Net volume steps since playback started.
    pub fn volume_steps(&self) -> i32 {
        self.model.lock().volume_steps
    }

    pub fn speed_steps(&self) -> i32 {
        self.model.lock().speed_steps
    }

    pub fn subtitles_visible(&self) -> bool {
        self.model.lock().subtitles
    }

    pub fn history(&self) -> Vec<PlayerCommand> {
        self.model.lock().history.clone()
    }
}

#[async_trait]
impl PlayerDriver for SimulatedPlayer {
    async fn play(&self, url: &str, options: &PlayOptions) -> Result<(), PlayerError> {
        let mut model = self.model.lock();
        *model = PlayerModel {
            state: PlaybackState::Playing,
            url: Some(url.to_string()),
            subtitles: true,
            ..PlayerModel::default()
        };
        tracing::info!(
            "Simulated player playing {url} (audio {:?}, blank {})",
            options.audio_output,
            options.blank_screen
        );
        Ok(())
    }

    async fn stop(&self) {
        let mut model = self.model.lock();
        model.state = PlaybackState::Idle;
        model.url = None;
    }

    async fn command(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        let mut model = self.model.lock();
        if model.state == PlaybackState::Idle {
            return Err(PlayerError::NotRunning);
        }

        match command {
            PlayerCommand::Pause => {
                model.state = match model.state {
                    PlaybackState::Playing => PlaybackState::Paused,
                    _ => PlaybackState::Playing,
                };
            }
            PlayerCommand::VolumeUp => model.volume_steps += 1,
            PlayerCommand::VolumeDown => model.volume_steps -= 1,
            PlayerCommand::SpeedUp => model.speed_steps += 1,
            PlayerCommand::SpeedDown => model.speed_steps -= 1,
            PlayerCommand::ToggleSubtitle => model.subtitles = !model.subtitles,
            _ => {}
        }
        model.history.push(command);
        tracing::debug!("Simulated player: {command} -> {:?}", model.state);
        Ok(())
    }

    fn state(&self) -> PlaybackState {
        self.model.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PlayOptions {
        PlayOptions {
            audio_output: Some("alsa".to_string()),
            blank_screen: true,
        }
    }

    #[tokio::test]
    async fn test_pause_toggles_and_stop_resets() {
        let player = SimulatedPlayer::new();
        player.play("http://127.0.0.1:5555/", &options()).await.unwrap();
        assert_eq!(player.current_url().as_deref(), Some("http://127.0.0.1:5555/"));

        player.command(PlayerCommand::Pause).await.unwrap();
        assert_eq!(player.state(), PlaybackState::Paused);
        player.command(PlayerCommand::Pause).await.unwrap();
        assert_eq!(player.state(), PlaybackState::Playing);

        player.stop().await;
        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(player.current_url().is_none());
    }

    #[tokio::test]
    async fn test_commands_require_playback() {
        let player = SimulatedPlayer::new();
        assert!(matches!(
            player.command(PlayerCommand::VolumeUp).await,
            Err(PlayerError::NotRunning)
        ));

        player.play("http://127.0.0.1:5555/", &options()).await.unwrap();
        player.command(PlayerCommand::VolumeUp).await.unwrap();
        player.command(PlayerCommand::VolumeUp).await.unwrap();
        player.command(PlayerCommand::VolumeDown).await.unwrap();
        assert_eq!(player.volume_steps(), 1);
        assert_eq!(player.history().len(), 3);
    }
}
