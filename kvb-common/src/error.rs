//! # Error Taxonomy
//!
//! Purpose: Name every failure class the bridge can surface, independent of
//! the transport that eventually reports it.
//!
//! ## Classes
//! - `Config`: invalid startup configuration, fatal before serving.
//! - `Connection`: store unreachable after the retry budget.
//! - `Auth`: missing or wrong bearer token.
//! - `Command`: the store rejected a specific command.
//! - `Protocol`: malformed request body, no store interaction.

use thiserror::Error;

/// Result type alias using `BridgeError`.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Unified error type for bridge operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store unavailable: {0}")]
    Connection(String),

    #[error("Unauthorized")]
    Auth,

    #[error("{0}")]
    Command(String),

    #[error("{0}")]
    Protocol(String),
}
