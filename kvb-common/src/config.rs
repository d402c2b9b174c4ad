//! # Bridge Configuration
//!
//! Purpose: Hold the validated, immutable startup record the bridge runs with.
//!
//! ## Usage Notes
//! - Build with `BridgeConfig::builder()`; `build()` validates and normalises.
//! - Addresses in the short `:PORT` form are expanded: the store side to
//!   loopback, the listener side to all interfaces.
//! - `AuthToken` never prints its value.

use std::fmt;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};

/// Default backing store address.
pub const DEFAULT_STORE_ADDR: &str = ":6379";

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDR: &str = ":8000";

/// Default bearer token accepted by the bridge.
pub const DEFAULT_AUTH_TOKEN: &str = "upstash";

/// Default number of dial attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default base delay between dial attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

// ============================================================================
// AUTH TOKEN
// ============================================================================

/// Shared secret clients present as a bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        AuthToken(token.into())
    }

    /// Raw token bytes, for comparison only.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Redacted form: at most the first two characters followed by `***`.
    pub fn redacted(&self) -> String {
        let prefix: String = if self.0.chars().count() > 4 {
            self.0.chars().take(2).collect()
        } else {
            String::new()
        };
        format!("{}***", prefix)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({})", self.redacted())
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Immutable startup configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Backing store address (host:port).
    pub store_addr: String,
    /// HTTP listen address (host:port).
    pub listen_addr: String,
    /// Token every request must present.
    pub auth_token: AuthToken,
    /// Dial attempts before a connection error is terminal.
    pub max_retries: u32,
    /// Base delay for exponential dial backoff (milliseconds).
    pub retry_delay_base_ms: u64,
}

impl BridgeConfig {
    /// Create a new config builder
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Base backoff delay as a `Duration`.
    pub fn retry_delay_base(&self) -> Duration {
        Duration::from_millis(self.retry_delay_base_ms)
    }
}

/// Builder for `BridgeConfig`
#[derive(Debug, Clone)]
pub struct BridgeConfigBuilder {
    store_addr: String,
    listen_addr: String,
    auth_token: String,
    max_retries: u32,
    retry_delay_base_ms: u64,
}

impl Default for BridgeConfigBuilder {
    fn default() -> Self {
        Self {
            store_addr: DEFAULT_STORE_ADDR.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            auth_token: DEFAULT_AUTH_TOKEN.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_base_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl BridgeConfigBuilder {
    /// Set the backing store address
    pub fn store_addr(mut self, addr: impl Into<String>) -> Self {
        self.store_addr = addr.into();
        self
    }

    /// Set the HTTP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the accepted bearer token
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    /// Set the number of dial attempts
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base retry delay (in milliseconds)
    pub fn retry_delay_base_ms(mut self, ms: u64) -> Self {
        self.retry_delay_base_ms = ms;
        self
    }

    /// Validates the collected values and produces the final record.
    ///
    /// # Errors
    /// Returns `BridgeError::Config` when the token or an address is empty, or
    /// when `max_retries` is zero.
    pub fn build(self) -> BridgeResult<BridgeConfig> {
        if self.auth_token.is_empty() {
            return Err(BridgeError::Config("API token empty".to_string()));
        }
        if self.store_addr.trim().is_empty() {
            return Err(BridgeError::Config("store address empty".to_string()));
        }
        if self.listen_addr.trim().is_empty() {
            return Err(BridgeError::Config("listen address empty".to_string()));
        }
        if self.max_retries == 0 {
            return Err(BridgeError::Config(
                "max retries must be at least 1".to_string(),
            ));
        }

        Ok(BridgeConfig {
            store_addr: normalize_addr(&self.store_addr, "127.0.0.1"),
            listen_addr: normalize_addr(&self.listen_addr, "0.0.0.0"),
            auth_token: AuthToken::new(self.auth_token),
            max_retries: self.max_retries,
            retry_delay_base_ms: self.retry_delay_base_ms,
        })
    }
}

/// Expands `:PORT` into `host:PORT`; other forms pass through trimmed.
pub fn normalize_addr(addr: &str, default_host: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("{}{}", default_host, addr)
    } else {
        addr.to_string()
    }
}
