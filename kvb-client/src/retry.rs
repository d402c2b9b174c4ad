//! # Dial With Retry
//!
//! Purpose: Establish a session against a store that may be transiently
//! unreachable, with capped exponential backoff between attempts.
//!
//! ## Usage Notes
//! - Attempts are numbered from 0. After failed attempt `n` the dialer waits
//!   `min(base * 2^n, max_delay)` before trying again.
//! - No delay follows the final attempt; the terminal error is returned at once.
//! - The loop is an explicit state machine over `DialState`, suspended with
//!   `tokio::time::sleep` during backoff.
//!
//! ```text
//! Dialing(n) --ok--> Connected
//!     |
//!     +--err, n+1 < max--> Backoff(n+1, delay(n)) --sleep--> Dialing(n+1)
//!     |
//!     +--err, n+1 = max--> Failed
//! ```

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::{Session, SessionTimeouts};

/// Upper bound on any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry budget and backoff growth for dialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total dial attempts before giving up.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap applied to every delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            max_delay: MAX_BACKOFF,
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sum of every delay a fully failing dial sleeps through.
    pub fn worst_case_wait(&self) -> Duration {
        (0..self.max_retries.saturating_sub(1))
            .map(|attempt| self.delay_for(attempt))
            .sum()
    }
}

/// States of a single dial sequence.
#[derive(Debug)]
pub enum DialState {
    /// About to make attempt `attempt`.
    Dialing { attempt: u32 },
    /// Waiting before attempt `attempt`.
    Backoff { attempt: u32, delay: Duration },
    Connected(Session),
    Failed(ClientError),
}

impl DialState {
    /// Transition taken when attempt `attempt` fails with `err`.
    pub fn after_failure(policy: &RetryPolicy, addr: &str, attempt: u32, err: ClientError) -> Self {
        let next = attempt + 1;
        if next >= policy.max_retries {
            return DialState::Failed(ClientError::Connect {
                addr: addr.to_string(),
                attempts: next,
                last_error: err.to_string(),
            });
        }
        DialState::Backoff {
            attempt: next,
            delay: policy.delay_for(attempt),
        }
    }
}

/// Dials `addr` until a session is established or the budget is spent.
pub async fn dial_with_retry(
    addr: &str,
    policy: &RetryPolicy,
    timeouts: SessionTimeouts,
) -> ClientResult<Session> {
    let mut state = DialState::Dialing { attempt: 0 };
    loop {
        state = match state {
            DialState::Dialing { attempt } => match Session::connect(addr, timeouts).await {
                Ok(session) => DialState::Connected(session),
                Err(err) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        addr,
                        error = %err,
                        "failed to connect to store, retrying"
                    );
                    DialState::after_failure(policy, addr, attempt, err)
                }
            },
            DialState::Backoff { attempt, delay } => {
                tokio::time::sleep(delay).await;
                DialState::Dialing { attempt }
            }
            DialState::Connected(session) => {
                debug!(addr, "store session established");
                return Ok(session);
            }
            DialState::Failed(err) => return Err(err),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(1000));
        let delays: Vec<u64> = (0..8).map(|n| policy.delay_for(n).as_millis() as u64).collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let policy = RetryPolicy::new(100, Duration::from_millis(1000));
        assert_eq!(policy.delay_for(31), MAX_BACKOFF);
        assert_eq!(policy.delay_for(64), MAX_BACKOFF);
    }

    #[test]
    fn worst_case_wait_skips_final_sleep() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.worst_case_wait(), Duration::from_millis(300));
        assert_eq!(RetryPolicy::new(1, Duration::from_secs(1)).worst_case_wait(), Duration::ZERO);
    }

    #[test]
    fn failure_moves_to_backoff_until_budget_spent() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let err = || ClientError::Timeout("connect");

        match DialState::after_failure(&policy, "store:6379", 0, err()) {
            DialState::Backoff { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(10));
            }
            other => panic!("unexpected state {:?}", other),
        }

        match DialState::after_failure(&policy, "store:6379", 2, err()) {
            DialState::Failed(ClientError::Connect { addr, attempts, .. }) => {
                assert_eq!(addr, "store:6379");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn dial_succeeds_once_store_starts_accepting() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = reserved.local_addr().expect("addr").to_string();
        drop(reserved);

        let late_addr = addr.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let listener = tokio::net::TcpListener::bind(&late_addr).await.expect("rebind");
            let _store = crate::mock::MockStore::serve(listener);
            std::future::pending::<()>().await;
        });

        let policy = RetryPolicy::new(8, Duration::from_millis(20));
        let started = std::time::Instant::now();
        let session = dial_with_retry(&addr, &policy, SessionTimeouts::default()).await;
        assert!(session.is_ok());
        assert!(started.elapsed() < policy.worst_case_wait());
    }

    #[tokio::test]
    async fn dial_gives_up_after_max_retries() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = reserved.local_addr().expect("addr").to_string();
        drop(reserved);

        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        match dial_with_retry(&addr, &policy, SessionTimeouts::default()).await {
            Err(ClientError::Connect { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome {:?}", other.map(|_| ())),
        }
    }
}
