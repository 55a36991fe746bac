//! Peerplay Simulation - offline collaborators for development mode.
//!
//! Stand-ins for the external resolver, streaming engine and media player.
//! The engine binds a real loopback listener with the same port policy as
//! production and serves synthetic bytes, so the full HTTP flow can be
//! exercised on a machine without a swarm or a player.
//!
//! All randomness comes from seeded `ChaCha8Rng` instances: the same seed
//! and torrent always produce the same sizes and transfer curves.

pub mod engine;
pub mod player;
pub mod resolver;

use std::time::Duration;

pub use engine::SimulatedEngine;
pub use player::SimulatedPlayer;
pub use resolver::SimulatedResolver;

/// Default deterministic seed.
pub const DEFAULT_SEED: u64 = 42;

/// Knobs shared by the simulated collaborators.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Seed mixed into every per-torrent RNG
    pub seed: u64,
    /// Mean simulated download rate in bytes per second
    pub download_rate: u64,
    /// Interval between transfer stat updates
    pub tick: Duration,
    /// Delay before the simulated engine starts listening
    pub startup_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            download_rate: 5 * 1024 * 1024,
            tick: Duration::from_millis(250),
            startup_delay: Duration::from_millis(200),
        }
    }
}

impl SimulationConfig {
    /// Fast settings for tests.
    pub fn for_testing() -> Self {
        Self {
            tick: Duration::from_millis(10),
            startup_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
