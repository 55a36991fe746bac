//! HTTP request handlers

pub mod api;

// Re-export handler functions
pub use api::{PlayRequest, PlayResponse, command, play, status, stop};
