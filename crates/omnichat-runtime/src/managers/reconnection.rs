//! Reconnection scheduling
//!
//! The ReconnectionManager decides whether a route may try to reconnect and
//! how long to wait first. It does not perform the attempt itself: the
//! coordinator spawns a task for that and attaches the task's `AbortHandle`
//! to the route's record so the attempt can be cancelled.

use omnichat_core::{ReconnectionConfig, ReconnectionError, RouteId, TimeSource, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Attempt Records
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct AttemptRecord {
    attempt: u32,
    last_attempt: Timestamp,
    is_reconnecting: bool,
    task: Option<AbortHandle>,
}

/// Read-only view of a route's reconnection bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconnectionStatus {
    pub attempt: u32,
    pub last_attempt: Timestamp,
    pub is_reconnecting: bool,
}

#[derive(Default)]
struct ReconnectionTable {
    records: HashMap<RouteId, AttemptRecord>,
    configs: HashMap<RouteId, ReconnectionConfig>,
}

// ----------------------------------------------------------------------------
// Reconnection Manager
// ----------------------------------------------------------------------------

/// Per-route reconnection eligibility and backoff
pub struct ReconnectionManager {
    table: Mutex<ReconnectionTable>,
    default_config: ReconnectionConfig,
    time_source: Arc<dyn TimeSource>,
}

impl ReconnectionManager {
    /// Create a manager; `default_config` applies to routes never configured
    pub fn new(default_config: ReconnectionConfig, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            table: Mutex::new(ReconnectionTable::default()),
            default_config,
            time_source,
        }
    }

    /// Store or overwrite a route's reconnection config
    pub fn configure(&self, route_id: &RouteId, config: ReconnectionConfig) {
        self.table.lock().configs.insert(route_id.clone(), config);
    }

    /// Effective config for a route
    pub fn config_for(&self, route_id: &RouteId) -> ReconnectionConfig {
        self.table
            .lock()
            .configs
            .get(route_id)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Start a reconnection cycle and return the delay before it
    pub fn trigger_reconnection(&self, route_id: &RouteId) -> Result<Duration, ReconnectionError> {
        let now = self.time_source.now();
        let mut table = self.table.lock();
        let config = table
            .configs
            .get(route_id)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());

        if !config.enabled {
            return Err(ReconnectionError::ReconnectionDisabled {
                route_id: route_id.clone(),
            });
        }

        let record = table
            .records
            .entry(route_id.clone())
            .or_insert_with(|| AttemptRecord {
                attempt: 0,
                last_attempt: now,
                is_reconnecting: false,
                task: None,
            });

        if record.is_reconnecting {
            return Err(ReconnectionError::ReconnectionInProgress {
                route_id: route_id.clone(),
            });
        }

        record.attempt += 1;
        if record.attempt > config.max_attempts {
            if let Some(task) = table.records.remove(route_id).and_then(|r| r.task) {
                task.abort();
            }
            warn!(
                route_id = %route_id,
                max_attempts = config.max_attempts,
                "reconnection attempts exhausted"
            );
            return Err(ReconnectionError::MaxReconnectionAttemptsReached {
                route_id: route_id.clone(),
                max_attempts: config.max_attempts,
            });
        }

        let delay = config.delay_for_attempt(record.attempt);
        record.is_reconnecting = true;
        record.last_attempt = now;
        debug!(
            route_id = %route_id,
            attempt = record.attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnection triggered"
        );
        Ok(delay)
    }

    /// Attach the task carrying out the current cycle
    ///
    /// Ignored when no cycle is in progress for the route, and the task is
    /// aborted so it cannot run unaccounted for.
    pub fn attach_task(&self, route_id: &RouteId, task: AbortHandle) {
        let mut table = self.table.lock();
        match table.records.get_mut(route_id) {
            Some(record) if record.is_reconnecting => {
                record.task = Some(task);
            }
            _ => {
                debug!(route_id = %route_id, "no reconnection in progress, dropping task");
                task.abort();
            }
        }
    }

    /// Report a cycle's outcome
    ///
    /// Success clears the record. Failure only clears the in-progress flag so
    /// the attempt count keeps growing the backoff.
    pub fn complete_reconnection(&self, route_id: &RouteId, success: bool) {
        let mut table = self.table.lock();
        if success {
            table.records.remove(route_id);
            info!(route_id = %route_id, "reconnection succeeded");
        } else if let Some(record) = table.records.get_mut(route_id) {
            record.is_reconnecting = false;
        }
    }

    /// Clear a route's bookkeeping without touching any running task
    pub fn reset(&self, route_id: &RouteId) {
        self.table.lock().records.remove(route_id);
    }

    /// Abort any scheduled attempt and clear the route's bookkeeping
    ///
    /// Returns true if a task was aborted.
    pub fn cancel(&self, route_id: &RouteId) -> bool {
        let task = self
            .table
            .lock()
            .records
            .remove(route_id)
            .and_then(|record| record.task);
        match task {
            Some(task) => {
                task.abort();
                debug!(route_id = %route_id, "reconnection cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel the route's reconnection and drop its config override
    pub fn forget(&self, route_id: &RouteId) {
        self.cancel(route_id);
        self.table.lock().configs.remove(route_id);
    }

    /// Enabled and below the route's attempt budget
    pub fn can_reconnect(&self, route_id: &RouteId) -> bool {
        let config = self.config_for(route_id);
        config.enabled && self.attempt_count(route_id) < config.max_attempts
    }

    /// Delay the next trigger would return, without mutating anything
    pub fn get_next_delay(&self, route_id: &RouteId) -> Duration {
        let config = self.config_for(route_id);
        config.delay_for_attempt(self.attempt_count(route_id) + 1)
    }

    pub fn is_reconnecting(&self, route_id: &RouteId) -> bool {
        self.table
            .lock()
            .records
            .get(route_id)
            .map_or(false, |record| record.is_reconnecting)
    }

    pub fn attempt_count(&self, route_id: &RouteId) -> u32 {
        self.table
            .lock()
            .records
            .get(route_id)
            .map_or(0, |record| record.attempt)
    }

    pub fn status(&self, route_id: &RouteId) -> Option<ReconnectionStatus> {
        self.table
            .lock()
            .records
            .get(route_id)
            .map(|record| ReconnectionStatus {
                attempt: record.attempt,
                last_attempt: record.last_attempt,
                is_reconnecting: record.is_reconnecting,
            })
    }

    /// Abort every scheduled attempt
    pub fn cancel_all(&self) -> usize {
        let records: Vec<AttemptRecord> = self
            .table
            .lock()
            .records
            .drain()
            .map(|(_, record)| record)
            .collect();
        records
            .into_iter()
            .filter_map(|record| record.task)
            .map(|task| task.abort())
            .count()
    }
}

impl fmt::Debug for ReconnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock();
        f.debug_struct("ReconnectionManager")
            .field("default_config", &self.default_config)
            .field("tracked_routes", &table.records.len())
            .field("configured_routes", &table.configs.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
