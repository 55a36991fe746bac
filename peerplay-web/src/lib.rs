//! Peerplay Web - HTTP remote control API
//!
//! Thin transport over the session controller: `/play`, `/stop`,
//! `/status`, the player command routes, and the bundled remote-control
//! page.

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::{ApiError, ServerError};
pub use server::{AppState, build_controller, router, run_server, serve};
