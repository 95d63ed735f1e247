//! Bounded retry with exponential backoff
//!
//! The RetryManager executes caller-supplied async operations and keeps retry
//! bookkeeping isolated per operation id. Ids are chosen by the caller: a
//! stable key for idempotent operations (`connect_<route>`) or a fresh UUID
//! for one-shot sends so concurrent calls never share a budget.

use omnichat_core::{RetryError, RetryPolicy, TimeSource, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Retry Manager
// ----------------------------------------------------------------------------

/// Bookkeeping for one operation id
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRecord {
    /// Attempts recorded so far (1 after the first recorded attempt)
    pub attempt: u32,
    pub last_attempt: Timestamp,
    pub policy: RetryPolicy,
}

/// Executes operations with bounded retries, keyed by operation id
pub struct RetryManager {
    records: Mutex<HashMap<String, RetryRecord>>,
    time_source: Arc<dyn TimeSource>,
    stats: RetryCounters,
}

impl RetryManager {
    pub fn new(time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            time_source,
            stats: RetryCounters::default(),
        }
    }

    /// True while the operation has budget left under `policy`
    pub fn should_retry(&self, operation_id: &str, policy: &RetryPolicy) -> bool {
        self.attempt_count(operation_id) < policy.max_attempts
    }

    /// Record one more attempt and return the delay to wait before it
    ///
    /// Exceeding `policy.max_attempts` clears the record and fails.
    pub fn record_attempt(
        &self,
        operation_id: &str,
        policy: &RetryPolicy,
    ) -> Result<Duration, RetryError> {
        let now = self.time_source.now();
        let mut records = self.records.lock();
        let record = records
            .entry(operation_id.to_owned())
            .or_insert_with(|| RetryRecord {
                attempt: 0,
                last_attempt: now,
                policy: policy.clone(),
            });
        record.attempt += 1;
        record.last_attempt = now;
        record.policy = policy.clone();

        if record.attempt > policy.max_attempts {
            records.remove(operation_id);
            return Err(RetryError::MaxRetryAttemptsReached {
                operation_id: operation_id.to_owned(),
                max_attempts: policy.max_attempts,
            });
        }

        Ok(policy.delay_for_attempt(record.attempt))
    }

    /// Forget all bookkeeping for an operation
    pub fn reset(&self, operation_id: &str) {
        self.records.lock().remove(operation_id);
    }

    /// Attempts recorded for an operation (0 when unknown)
    pub fn attempt_count(&self, operation_id: &str) -> u32 {
        self.records
            .lock()
            .get(operation_id)
            .map_or(0, |record| record.attempt)
    }

    /// Snapshot of an operation's record
    pub fn record(&self, operation_id: &str) -> Option<RetryRecord> {
        self.records.lock().get(operation_id).cloned()
    }

    /// Number of operation ids currently holding bookkeeping
    pub fn tracked_operations(&self) -> usize {
        self.records.lock().len()
    }

    /// Run `operation`, retrying failures per `policy`
    ///
    /// Once the budget is spent the operation's own error is returned
    /// unchanged. A budget consumed concurrently under the same id surfaces
    /// as [`RetryError::MaxRetryAttemptsReached`] converted into `E`.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        operation_id: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<RetryError> + fmt::Display,
    {
        self.reset(operation_id);
        self.stats.operations.fetch_add(1, Ordering::Relaxed);

        loop {
            let error = match operation().await {
                Ok(value) => {
                    self.reset(operation_id);
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.should_retry(operation_id, policy) {
                warn!(
                    operation_id,
                    attempts = self.attempt_count(operation_id),
                    error = %error,
                    "operation failed with no retries left"
                );
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }

            let delay = match self.record_attempt(operation_id, policy) {
                Ok(delay) => delay,
                Err(exhausted) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(E::from(exhausted));
                }
            };
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            debug!(
                operation_id,
                attempt = self.attempt_count(operation_id),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying operation after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Counters since construction
    pub fn statistics(&self) -> RetryStats {
        RetryStats {
            operations: self.stats.operations.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            successes: self.stats.successes.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryManager")
            .field("tracked_operations", &self.tracked_operations())
            .field("stats", &self.statistics())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Retry Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RetryCounters {
    operations: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Statistics about retried operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    /// Calls to `execute_with_retry`
    pub operations: u64,
    /// Backoff waits scheduled
    pub retries: u64,
    pub successes: u64,
    pub failures: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
