//! Centralized configuration for Peerplay.
//!
//! All tunable parameters are defined here with defaults matching the
//! behavior of earlier deployments, and can be overridden from the
//! environment at startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::SCRATCH_PREFIX;
use crate::mode::RuntimeMode;

/// Listening port used when neither `PORT` nor a CLI argument supplies one.
pub const DEFAULT_PORT: u16 = 8080;

/// Central configuration for all Peerplay components.
#[derive(Debug, Clone, Default)]
pub struct PeerplayConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub player: PlayerConfig,
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub runtime_mode: RuntimeMode,
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface the control API listens on
    pub host: String,
    pub port: u16,
    /// Directory holding `index.html` and the `/assets` tree
    pub assets_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            assets_dir: PathBuf::from("public"),
        }
    }
}

impl ServerConfig {
    /// Picks the listening port: environment value, then process argument,
    /// then the default. Values that do not parse as a port are skipped.
    pub fn port_from_sources(env_value: Option<&str>, arg_value: Option<&str>) -> u16 {
        [env_value, arg_value]
            .into_iter()
            .flatten()
            .find_map(|raw| raw.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT)
    }
}

/// Streaming engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// External engine executable for production mode
    pub command: String,
    /// Concurrent peer connection ceiling
    pub max_connections: usize,
    /// Read-ahead buffer in bytes before the stream is served
    pub buffer_size: u64,
    /// Port requested on the first bind attempt (0 = OS assigned)
    pub preferred_port: u16,
    /// Upper bound on waiting for the engine to start listening
    pub listen_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "peerflix-sidecar".to_string(),
            max_connections: 100,
            buffer_size: 1_572_864, // 1.5 MiB
            preferred_port: 8888,
            listen_timeout: Duration::from_secs(60),
        }
    }
}

/// External media player settings.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub command: String,
    /// Audio output device passed to the player
    pub audio_output: String,
    /// Blank the screen behind the video
    pub blank_screen: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: "omxplayer".to_string(),
            audio_output: "alsa".to_string(),
            blank_screen: true,
        }
    }
}

/// Torrent metadata resolution settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Timeout for fetching remote `.torrent` files and for resolution overall
    pub fetch_timeout: Duration,
    pub user_agent: &'static str,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            user_agent: "peerplay/0.1.0",
        }
    }
}

/// Scratch storage settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub temp_root: PathBuf,
    /// Reserved prefix; changing it breaks cleanup of earlier runs
    pub prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir(),
            prefix: SCRATCH_PREFIX.to_string(),
        }
    }
}

impl PeerplayConfig {
    /// Creates configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let port = std::env::var("PORT").ok();
        config.server.port = ServerConfig::port_from_sources(port.as_deref(), None);

        if let Ok(dir) = std::env::var("PEERPLAY_ASSETS_DIR") {
            config.server.assets_dir = PathBuf::from(dir);
        }

        if let Ok(player) = std::env::var("PEERPLAY_PLAYER") {
            config.player.command = player;
        }

        if let Ok(engine) = std::env::var("PEERPLAY_ENGINE") {
            config.engine.command = engine;
        }

        if let Ok(timeout) = std::env::var("PEERPLAY_LISTEN_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.engine.listen_timeout = Duration::from_secs(seconds);
        }

        if let Ok(max) = std::env::var("PEERPLAY_MAX_CONNECTIONS")
            && let Ok(count) = max.parse::<usize>()
        {
            config.engine.max_connections = count;
        }

        if let Ok(mode) = std::env::var("PEERPLAY_MODE")
            && let Ok(mode) = mode.parse::<RuntimeMode>()
        {
            config.runtime_mode = mode;
        }

        config
    }

    /// Applies the port fallback chain with a process argument.
    pub fn with_port_argument(mut self, arg: Option<&str>) -> Self {
        let env = std::env::var("PORT").ok();
        self.server.port = ServerConfig::port_from_sources(env.as_deref(), arg);
        self
    }

    /// Creates a configuration for tests: simulated collaborators, short
    /// timeouts and an OS-assigned engine port.
    pub fn for_testing() -> Self {
        let mut config = Self {
            runtime_mode: RuntimeMode::Development,
            ..Default::default()
        };
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.engine.preferred_port = 0;
        config.engine.listen_timeout = Duration::from_secs(5);
        config.resolver.fetch_timeout = Duration::from_secs(5);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = PeerplayConfig::default();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.engine.max_connections, 100);
        assert_eq!(config.engine.buffer_size, 1_572_864);
        assert_eq!(config.player.audio_output, "alsa");
        assert!(config.player.blank_screen);
        assert_eq!(config.cache.prefix, "peerflix");
        assert_eq!(config.runtime_mode, RuntimeMode::Production);
    }

    #[test]
    fn test_port_fallback_order() {
        assert_eq!(ServerConfig::port_from_sources(Some("9000"), Some("9100")), 9000);
        assert_eq!(ServerConfig::port_from_sources(None, Some("9100")), 9100);
        assert_eq!(ServerConfig::port_from_sources(None, None), DEFAULT_PORT);
    }

    #[test]
    fn test_port_fallback_skips_garbage() {
        assert_eq!(ServerConfig::port_from_sources(Some("http"), Some("9100")), 9100);
        assert_eq!(ServerConfig::port_from_sources(Some(""), Some("70000")), DEFAULT_PORT);
    }

    #[test]
    fn test_testing_preset() {
        let config = PeerplayConfig::for_testing();
        assert!(config.runtime_mode.is_development());
        assert_eq!(config.engine.preferred_port, 0);
        assert!(config.engine.listen_timeout <= Duration::from_secs(5));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("PEERPLAY_PLAYER", "/usr/local/bin/omxplayer");
            std::env::set_var("PEERPLAY_LISTEN_TIMEOUT", "12");
            std::env::set_var("PEERPLAY_MAX_CONNECTIONS", "40");
        }

        let config = PeerplayConfig::from_env();

        assert_eq!(config.player.command, "/usr/local/bin/omxplayer");
        assert_eq!(config.engine.listen_timeout, Duration::from_secs(12));
        assert_eq!(config.engine.max_connections, 40);

        // Cleanup
        unsafe {
            std::env::remove_var("PEERPLAY_PLAYER");
            std::env::remove_var("PEERPLAY_LISTEN_TIMEOUT");
            std::env::remove_var("PEERPLAY_MAX_CONNECTIONS");
        }
    }
}
