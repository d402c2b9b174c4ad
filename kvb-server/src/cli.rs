//! Command-line and environment configuration.

use clap::Parser;

use kvb_client::{PoolConfig, RetryPolicy};
use kvb_common::{
    BridgeConfig, BridgeResult, DEFAULT_AUTH_TOKEN, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_STORE_ADDR,
};

/// Local REST bridge for a RESP2 key-value store
#[derive(Parser, Debug, Clone)]
#[command(name = "kvbridge")]
#[command(about = "Serve an Upstash-style REST API in front of a local Redis-compatible store")]
#[command(version)]
pub struct Args {
    /// Address of the backing store (host:port or :port)
    #[arg(long = "redis", env = "REDIS_ADDR", default_value = DEFAULT_STORE_ADDR)]
    pub store_addr: String,

    /// HTTP listen address (host:port or :port)
    #[arg(long = "addr", env = "UPSTASH_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: String,

    /// Token clients must present
    #[arg(
        long = "token",
        env = "UPSTASH_TOKEN",
        default_value = DEFAULT_AUTH_TOKEN,
        hide_env_values = true
    )]
    pub token: String,

    /// Dial attempts before giving up on the store
    #[arg(long, env = "MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Base backoff delay between dial attempts, in milliseconds
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = DEFAULT_RETRY_DELAY_MS)]
    pub retry_delay: u64,
}

impl Args {
    /// Validates the arguments into a `BridgeConfig`.
    pub fn into_config(self) -> BridgeResult<BridgeConfig> {
        BridgeConfig::builder()
            .store_addr(self.store_addr)
            .listen_addr(self.listen_addr)
            .auth_token(self.token)
            .max_retries(self.max_retries)
            .retry_delay_base_ms(self.retry_delay)
            .build()
    }
}

/// Pool settings derived from a validated config.
pub fn pool_config(config: &BridgeConfig) -> PoolConfig {
    PoolConfig {
        addr: config.store_addr.clone(),
        retry: RetryPolicy::new(config.max_retries, config.retry_delay_base()),
        ..PoolConfig::default()
    }
}
