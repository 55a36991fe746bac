//! Media player driver adapter.

pub mod omx;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;

pub use self::omx::OmxPlayer;
use crate::config::PlayerConfig;
use crate::error::PlayerError;

/// Player state as reported by `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackState {
    Playing,
    Paused,
    #[default]
    Idle,
}

/// Launch options for a playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayOptions {
    /// Audio output device, e.g. `alsa` or `hdmi`
    pub audio_output: Option<String>,
    /// Blank the framebuffer behind the video
    pub blank_screen: bool,
}

impl PlayOptions {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            audio_output: Some(config.audio_output.clone()).filter(|s| !s.is_empty()),
            blank_screen: config.blank_screen,
        }
    }
}

/// The closed set of transport commands clients may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerCommand {
    Pause,
    SpeedUp,
    SpeedDown,
    NextAudio,
    PrevAudio,
    NextSubtitle,
    PrevSubtitle,
    ToggleSubtitle,
    VolumeUp,
    VolumeDown,
    Forward,
    Backward,
    FastForward,
    FastBackward,
}

impl PlayerCommand {
    pub const ALL: [PlayerCommand; 14] = [
        PlayerCommand::Pause,
        PlayerCommand::SpeedUp,
        PlayerCommand::SpeedDown,
        PlayerCommand::NextAudio,
        PlayerCommand::PrevAudio,
        PlayerCommand::NextSubtitle,
        PlayerCommand::PrevSubtitle,
        PlayerCommand::ToggleSubtitle,
        PlayerCommand::VolumeUp,
        PlayerCommand::VolumeDown,
        PlayerCommand::Forward,
        PlayerCommand::Backward,
        PlayerCommand::FastForward,
        PlayerCommand::FastBackward,
    ];

    /// Route name used by the HTTP API.
    pub fn name(self) -> &'static str {
        match self {
            PlayerCommand::Pause => "pause",
            PlayerCommand::SpeedUp => "speedup",
            PlayerCommand::SpeedDown => "speeddown",
            PlayerCommand::NextAudio => "nextaudio",
            PlayerCommand::PrevAudio => "prevaudio",
            PlayerCommand::NextSubtitle => "nextsubtitle",
            PlayerCommand::PrevSubtitle => "prevsubtitle",
            PlayerCommand::ToggleSubtitle => "togglesubtitle",
            PlayerCommand::VolumeUp => "volumeup",
            PlayerCommand::VolumeDown => "volumedown",
            PlayerCommand::Forward => "forward",
            PlayerCommand::Backward => "backward",
            PlayerCommand::FastForward => "fastforward",
            PlayerCommand::FastBackward => "fastbackward",
        }
    }
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlayerCommand {
    type Err = String;

    /// Exact, case-sensitive match on the route name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlayerCommand::ALL
            .into_iter()
            .find(|command| command.name() == s)
            .ok_or_else(|| format!("Unknown player command: '{s}'"))
    }
}

/// Drives the external media player.
#[async_trait]
pub trait PlayerDriver: Send + Sync {
    /// Starts playing `url`, replacing any current playback.
    ///
    /// # Errors
    /// - `PlayerError::Launch` - Player process could not be started
    async fn play(&self, url: &str, options: &PlayOptions) -> Result<(), PlayerError>;

    /// Stops playback; no-op when idle.
    async fn stop(&self);

    /// Sends one transport command to the running player.
    ///
    /// # Errors
    /// - `PlayerError::NotRunning` - Nothing is playing
    /// - `PlayerError::Io` - Writing to the player failed
    async fn command(&self, command: PlayerCommand) -> Result<(), PlayerError>;

    /// Current state; never blocks.
    fn state(&self) -> PlaybackState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_round_trip() {
        for command in PlayerCommand::ALL {
            assert_eq!(command.name().parse::<PlayerCommand>(), Ok(command));
        }
    }

    #[test]
    fn test_unknown_command_names_rejected() {
        for name in ["", "play", "stop", "status", "Pause", "PAUSE", "volume_up", "seek"] {
            assert!(name.parse::<PlayerCommand>().is_err(), "{name} accepted");
        }
    }

    #[test]
    fn test_state_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&PlaybackState::Playing).unwrap(),
            "\"PLAYING\""
        );
        assert_eq!(serde_json::to_string(&PlaybackState::Idle).unwrap(), "\"IDLE\"");
    }

    #[test]
    fn test_play_options_from_config() {
        let options = PlayOptions::from_config(&PlayerConfig::default());
        assert_eq!(options.audio_output.as_deref(), Some("alsa"));
        assert!(options.blank_screen);
    }
}
