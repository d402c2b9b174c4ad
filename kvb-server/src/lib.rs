//! # kvbridge Server
//!
//! Purpose: Serve an Upstash-compatible REST API and forward each request to
//! the backing store through the session pool.
//!
//! ## Request Flow
//!
//! ```text
//! HTTP request
//!   -> auth gate (bearer header or _token query)
//!   -> translator: body/path -> CommandBatch
//!   -> pooled session: pipelined RESP round trip (MULTI/EXEC for transactions)
//!   -> translator: replies -> {"result": ..} / {"error": ..}
//! ```

pub mod auth;
pub mod cli;
pub mod error;
pub mod routes;
pub mod server;
pub mod translator;

pub use auth::AuthGate;
pub use error::{ApiError, ApiResult};
pub use server::{build_router, BridgeServer};
pub use translator::ResultEncoding;
