//! # Session Pool
//!
//! Purpose: Share a bounded set of store sessions between concurrent request
//! tasks, replacing broken ones transparently.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep idle sessions for reuse, up to `max_idle`.
//! 2. **Back-Pressure**: A semaphore of `max_active` permits bounds live
//!    sessions; `acquire` waits instead of dialing without limit.
//! 3. **Minimal Locking**: The mutex guards only the idle deque and is never
//!    held across a store round trip.
//! 4. **Scoped Release**: `PooledSession` returns its session on drop, on
//!    every exit path.
//! 5. **Lazy Health Checks**: Only sessions idle past `test_after_idle` are
//!    checked with `PING` before reuse.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;
use crate::retry::{dial_with_retry, RetryPolicy};
use crate::session::{Session, SessionTimeouts};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Store address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle sessions to keep.
    pub max_idle: usize,
    /// Maximum number of sessions checked out at once.
    pub max_active: usize,
    /// Idle sessions older than this are closed instead of reused.
    pub idle_timeout: Duration,
    /// Idle sessions older than this are health-checked before reuse.
    pub test_after_idle: Duration,
    /// Connect/read/write deadlines.
    pub timeouts: SessionTimeouts,
    /// Dial retry budget and backoff.
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 10,
            max_active: 100,
            idle_timeout: Duration::from_secs(5 * 60),
            test_after_idle: Duration::from_secs(60),
            timeouts: SessionTimeouts::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub max_active: usize,
}

struct PoolState {
    idle: VecDeque<Session>,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    permits: Arc<Semaphore>,
}

impl PoolInner {
    /// Pops the most recently used idle session, closing expired ones.
    fn pop_idle(&self) -> Option<Session> {
        let mut state = self.state.lock();
        let idle_timeout = self.config.idle_timeout;
        state.idle.retain(|session| session.idle_for() < idle_timeout);
        state.idle.pop_back()
    }

    fn return_session(&self, session: Session) {
        let mut state = self.state.lock();
        if state.closed || state.idle.len() >= self.config.max_idle {
            return;
        }
        state.idle.push_back(session);
    }
}

/// Connection pool handle.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    /// Creates a pool without touching the store; sessions are dialed lazily.
    pub fn new(config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            closed: false,
        };
        let permits = Arc::new(Semaphore::new(config.max_active));
        SessionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                permits,
            }),
        }
    }

    /// Creates a pool and verifies the store answers `PING`.
    ///
    /// Used at startup to fail fast when the store stays unreachable for the
    /// whole retry budget.
    pub async fn connect(config: PoolConfig) -> ClientResult<Self> {
        let pool = SessionPool::new(config);
        let mut session = pool.acquire().await?;
        match session.exec(&[b"PING"]).await? {
            RespValue::Error(message) => {
                return Err(ClientError::Protocol(format!(
                    "PING failed: {}",
                    String::from_utf8_lossy(&message)
                )));
            }
            _ => info!(addr = %pool.inner.config.addr, "successfully connected to store"),
        }
        session.release();
        Ok(pool)
    }

    /// Checks out a session, waiting while `max_active` sessions are in use.
    ///
    /// # Errors
    /// `ClientError::Connect` when no session can be dialed within the retry
    /// budget, `ClientError::PoolClosed` after `close`.
    pub async fn acquire(&self) -> ClientResult<PooledSession> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClientError::PoolClosed)?;

        let config = &self.inner.config;
        while let Some(mut session) = self.inner.pop_idle() {
            if session.idle_for() < config.test_after_idle || health_check(&mut session).await {
                return Ok(PooledSession::new(self.inner.clone(), session, permit));
            }
            debug!(addr = %config.addr, "discarding unhealthy idle session");
        }

        let session = dial_with_retry(&config.addr, &config.retry, config.timeouts).await?;
        Ok(PooledSession::new(self.inner.clone(), session, permit))
    }

    /// Closes every idle session and refuses further checkouts.
    ///
    /// Checked-out sessions complete their work and are closed on release.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.idle.clear();
        self.inner.permits.close();
    }

    /// Returns current idle and active counts.
    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.state.lock().idle.len();
        let max_active = self.inner.config.max_active;
        PoolStats {
            idle,
            active: max_active.saturating_sub(self.inner.permits.available_permits()),
            max_active,
        }
    }

    /// Store address this pool dials.
    pub fn addr(&self) -> &str {
        &self.inner.config.addr
    }
}

/// Liveness check: `PING` must answer `PONG`.
pub async fn health_check(session: &mut Session) -> bool {
    match session.exec(&[b"PING"]).await {
        Ok(RespValue::Simple(reply)) => reply == b"PONG",
        _ => false,
    }
}

/// RAII wrapper returning a session to the pool on drop.
pub struct PooledSession {
    pool: Arc<PoolInner>,
    session: Option<Session>,
    valid: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    fn new(pool: Arc<PoolInner>, session: Session, permit: OwnedSemaphorePermit) -> Self {
        PooledSession {
            pool,
            session: Some(session),
            valid: true,
            _permit: permit,
        }
    }

    /// Executes a RESP command and returns the parsed response.
    pub async fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let response = self.session_mut()?.exec(args).await;
        self.track(response)
    }

    /// Pipelines `commands` and returns one reply per command.
    pub async fn exec_pipeline(&mut self, commands: &[Vec<&[u8]>]) -> ClientResult<Vec<RespValue>> {
        let response = self.session_mut()?.exec_pipeline(commands).await;
        self.track(response)
    }

    /// Returns the session to the pool now.
    pub fn release(self) {
        drop(self);
    }

    /// Marks the session as unusable so it is closed instead of returned.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn session_mut(&mut self) -> ClientResult<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| ClientError::Protocol("session already released".to_string()))
    }

    fn track<T>(&mut self, response: ClientResult<T>) -> ClientResult<T> {
        if let Err(err) = &response {
            // If IO/protocol fails, do not return this session to the pool.
            if err.poisons_session() {
                self.valid = false;
            }
        }
        response
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        if self.valid {
            self.pool.return_session(session);
        }
        // The permit field drops after this body, once the session is back.
    }
}
