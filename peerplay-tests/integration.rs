//! Integration tests for Peerplay
//!
//! Exercise the HTTP layer and the session controller together with
//! scripted collaborators.

#[path = "integration/http_api.rs"]
mod http_api;
#[path = "integration/session_lifecycle.rs"]
mod session_lifecycle;
