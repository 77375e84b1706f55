//! Pool configuration options
//!
//! Tunables for queue depth and for how the write pools treat failing
//! connections.

use std::time::Duration;

/// Default depth of the shared fan-in and load-balance queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Retry behaviour of the load-balanced write pool.
///
/// The defaults retry forever and never evict: a message whose every
/// connection keeps failing is retried indefinitely rather than dropped.
///
/// # Examples
///
/// ```
/// use zmux_core::options::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_attempts(5)
///     .with_evict_after(3)
///     .with_backoff(Duration::from_millis(10));
/// assert_eq!(policy.max_attempts, Some(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delivery attempts per message before it is dropped.
    /// - `None`: Retry indefinitely (default)
    pub max_attempts: Option<u32>,

    /// Consecutive write failures after which a worker evicts its connection.
    /// - `None`: Never evict (default)
    pub evict_after: Option<u32>,

    /// Pause taken by a worker after a failed write.
    /// - Default: 1ms
    /// - `Duration::ZERO`: only yield to other tasks
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            evict_after: None,
            backoff: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy {
    /// Drop a message after `attempts` failed deliveries.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Evict a connection after `failures` consecutive failed writes.
    pub fn with_evict_after(mut self, failures: u32) -> Self {
        self.evict_after = Some(failures.max(1));
        self
    }

    /// Set the pause after a failed write.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether a message that failed `attempts` times should be dropped.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Whether a worker with `failures` consecutive failures should evict.
    #[must_use]
    pub fn should_evict(&self, failures: u32) -> bool {
        self.evict_after.is_some_and(|limit| failures >= limit)
    }
}

/// Pool configuration options.
///
/// # Examples
///
/// ```
/// use zmux_core::options::{PoolOptions, RetryPolicy};
///
/// let opts = PoolOptions::default()
///     .with_queue_capacity(64)
///     .with_retry(RetryPolicy::default().with_evict_after(3));
/// ```
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Shared queue depth for fan-in reads and load-balanced writes.
    /// - Default: 10 messages
    pub queue_capacity: usize,

    /// Remove and close fan-out connections whose write failed.
    /// - `true` (default): isolate failing peers
    /// - `false`: keep them registered
    pub evict_failed_writers: bool,

    /// Load-balance retry behaviour.
    pub retry: RetryPolicy,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            evict_failed_writers: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolOptions {
    /// Create new pool options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared queue depth (at least 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Enable or disable eviction of failing fan-out connections.
    pub fn with_evict_failed_writers(mut self, enabled: bool) -> Self {
        self.evict_failed_writers = enabled;
        self
    }

    /// Set the load-balance retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
