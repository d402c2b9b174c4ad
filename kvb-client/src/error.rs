//! Error types for the store client.

use thiserror::Error;

use kvb_common::BridgeError;

/// Result type for the store client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by sessions and the session pool.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A connect, read or write exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Dial budget exhausted.
    #[error("failed to connect to {addr} after {attempts} attempts: {last_error}")]
    Connect {
        addr: String,
        attempts: u32,
        last_error: String,
    },

    /// The pool was closed; no further sessions are handed out.
    #[error("session pool closed")]
    PoolClosed,
}

impl ClientError {
    /// Returns true when the underlying session can no longer be trusted.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout(_) | ClientError::Protocol(_)
        )
    }
}

impl From<ClientError> for BridgeError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Protocol(message) => {
                BridgeError::Connection(format!("protocol error: {}", message))
            }
            other => BridgeError::Connection(other.to_string()),
        }
    }
}
