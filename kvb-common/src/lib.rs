// kvb-common - Shared types for the kvbridge REST-to-RESP bridge
//
// This crate defines the command model, the startup configuration record and
// the error taxonomy used by both the client and the server crates.

pub mod command;
pub mod config;
pub mod error;

// Re-export for convenience
pub use command::*;
pub use config::*;
pub use error::*;
