//! Errors surfaced by the realtime client.

use std::time::Duration;

use bms_shared::ProtocolError;

pub type Result<T, E = RealtimeError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    /// No auth token was available; no network attempt was made.
    #[error("missing auth token")]
    MissingToken,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The client was disposed or its driver task has stopped.
    #[error("realtime client is shut down")]
    Closed,
}
