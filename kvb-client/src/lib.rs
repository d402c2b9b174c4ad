//! # kvbridge Store Client
//!
//! Purpose: Talk RESP2 to the backing store through a bounded pool of
//! resilient sessions.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP sessions to avoid repeated connects.
//! 2. **Bounded Everything**: Active sessions, idle sessions, dial attempts and
//!    every I/O step have explicit limits.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod error;
pub mod pool;
pub mod resp;
pub mod retry;
pub mod session;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{ClientError, ClientResult};
pub use pool::{health_check, PoolConfig, PoolStats, PooledSession, SessionPool};
pub use resp::RespValue;
pub use retry::{dial_with_retry, DialState, RetryPolicy, MAX_BACKOFF};
pub use session::{Session, SessionTimeouts, DEFAULT_IO_TIMEOUT};
