//! Local port binding with a single ephemeral-port fallback.

use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;

use tokio::net::TcpListener;

use crate::error::EngineError;

/// Port 0: let the OS assign one.
pub const EPHEMERAL_PORT: u16 = 0;

/// One failed bind attempt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bind on port {port} failed: {reason}")]
pub struct BindError {
    pub port: u16,
    pub reason: String,
}

impl BindError {
    pub fn new(port: u16, reason: impl fmt::Display) -> Self {
        Self {
            port,
            reason: reason.to_string(),
        }
    }
}

/// Binds on `preferred`, retrying exactly once on an OS-assigned port.
///
/// `attempt` is called with the port to bind. A second failure is final.
///
/// # Errors
/// - `EngineError::BindFailed` - Both attempts failed
pub async fn bind_with_fallback<T, F, Fut>(preferred: u16, mut attempt: F) -> Result<T, EngineError>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = Result<T, BindError>>,
{
    let first = match attempt(preferred).await {
        Ok(bound) => return Ok(bound),
        Err(e) => e,
    };

    tracing::warn!("{first}; retrying on an ephemeral port");

    attempt(EPHEMERAL_PORT)
        .await
        .map_err(|second| EngineError::BindFailed {
            preferred,
            reason: format!("{first}; {second}"),
        })
}

/// Binds a loopback TCP listener with the fallback policy.
///
/// # Errors
/// - `EngineError::BindFailed` - Preferred and ephemeral binds both failed
pub async fn bind_listener(preferred: u16) -> Result<TcpListener, EngineError> {
    bind_with_fallback(preferred, |port| async move {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| BindError::new(port, e))
    })
    .await
}
