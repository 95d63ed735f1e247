//! Route state management
//!
//! The RouteStateManager records the lifecycle state of every route and
//! broadcasts changes. It enforces no transition table: the last write wins
//! and callers sequence their own transitions.
//!
//! Changes are delivered two ways:
//! - registered callbacks, invoked synchronously in registration order
//! - per-route subscriptions that yield the current state first and then
//!   every later change, and unsubscribe when dropped

use omnichat_core::{RouteId, RouteState, StateError, TimeSource, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Buffered changes per subscription before a slow subscriber lags
const SUBSCRIPTION_BUFFER: usize = 64;

// ----------------------------------------------------------------------------
// Records and Callbacks
// ----------------------------------------------------------------------------

/// Current state of one route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteStateRecord {
    pub state: RouteState,
    pub last_state_change: Timestamp,
    /// Present only while `state == RouteState::Error`
    pub error: Option<String>,
    pub error_timestamp: Option<Timestamp>,
}

/// Callback invoked for every state change of any route
pub type StateChangeCallback = Arc<dyn Fn(&RouteId, RouteState) + Send + Sync>;

/// Handle returned when registering a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Default)]
struct StateTable {
    records: HashMap<RouteId, RouteStateRecord>,
    channels: HashMap<RouteId, broadcast::Sender<RouteState>>,
}

// ----------------------------------------------------------------------------
// Route State Manager
// ----------------------------------------------------------------------------

/// Per-route connection state machine with change notification
pub struct RouteStateManager {
    table: Mutex<StateTable>,
    callbacks: Mutex<Vec<(CallbackId, StateChangeCallback)>>,
    /// Per-route write-then-notify ordering; routes never wait on each other
    gates: Mutex<HashMap<RouteId, Arc<Mutex<()>>>>,
    next_callback_id: AtomicU64,
    time_source: Arc<dyn TimeSource>,
}

impl RouteStateManager {
    pub fn new(time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            table: Mutex::new(StateTable::default()),
            callbacks: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            next_callback_id: AtomicU64::new(1),
            time_source,
        }
    }

    /// Record a new state, clearing any previous error
    ///
    /// Callbacks run synchronously before this returns. They must not call
    /// `set_state`/`set_error` for the same route themselves.
    pub fn set_state(&self, route_id: &RouteId, state: RouteState) {
        self.write(route_id, state, None);
    }

    /// Move a route into `Error` with a message
    pub fn set_error(&self, route_id: &RouteId, message: impl Into<String>) {
        self.write(route_id, RouteState::Error, Some(message.into()));
    }

    fn gate(&self, route_id: &RouteId) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.lock().entry(route_id.clone()).or_default())
    }

    fn write(&self, route_id: &RouteId, state: RouteState, error: Option<String>) {
        let gate = self.gate(route_id);
        let _ordering = gate.lock();
        let now = self.time_source.now();

        {
            let mut table = self.table.lock();
            let error_timestamp = error.as_ref().map(|_| now);
            table.records.insert(
                route_id.clone(),
                RouteStateRecord {
                    state,
                    last_state_change: now,
                    error,
                    error_timestamp,
                },
            );

            let abandoned = match table.channels.get(route_id) {
                Some(sender) => sender.send(state).is_err(),
                None => false,
            };
            if abandoned {
                table.channels.remove(route_id);
            }
        }

        debug!(route_id = %route_id, state = %state, "route state changed");

        let callbacks: Vec<StateChangeCallback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(route_id, state);
        }
    }

    /// Current state; `Disconnected` for unknown routes
    pub fn get_state(&self, route_id: &RouteId) -> RouteState {
        self.table
            .lock()
            .records
            .get(route_id)
            .map_or(RouteState::Disconnected, |record| record.state)
    }

    /// Current error message, if the route is in `Error`
    pub fn get_error(&self, route_id: &RouteId) -> Option<String> {
        self.table
            .lock()
            .records
            .get(route_id)
            .and_then(|record| record.error.clone())
    }

    pub fn is_connected(&self, route_id: &RouteId) -> bool {
        self.get_state(route_id) == RouteState::Connected
    }

    /// Connecting or reconnecting
    pub fn is_connecting(&self, route_id: &RouteId) -> bool {
        self.get_state(route_id).is_transitional()
    }

    pub fn has_error(&self, route_id: &RouteId) -> bool {
        self.get_error(route_id).is_some()
    }

    /// Fail with `InvalidState` unless the route is in `required`
    pub fn validate_state(
        &self,
        route_id: &RouteId,
        required: RouteState,
    ) -> Result<(), StateError> {
        let current = self.get_state(route_id);
        if current == required {
            Ok(())
        } else {
            Err(StateError::InvalidState {
                route_id: route_id.clone(),
                current,
                required,
            })
        }
    }

    /// Full record for diagnostics
    pub fn snapshot(&self, route_id: &RouteId) -> Option<RouteStateRecord> {
        self.table.lock().records.get(route_id).cloned()
    }

    /// Routes currently in `state`, sorted by id
    pub fn routes_in_state(&self, state: RouteState) -> Vec<RouteId> {
        let mut routes: Vec<RouteId> = self
            .table
            .lock()
            .records
            .iter()
            .filter(|(_, record)| record.state == state)
            .map(|(route_id, _)| route_id.clone())
            .collect();
        routes.sort();
        routes
    }

    /// Forget a route's record; live subscriptions stay open
    pub fn clear_state(&self, route_id: &RouteId) {
        self.table.lock().records.remove(route_id);

        let mut gates = self.gates.lock();
        if gates
            .get(route_id)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(route_id);
        }
    }

    /// Register a callback for every route's changes
    ///
    /// Changes of one route reach callbacks in the order they were issued;
    /// changes of different routes may be delivered concurrently.
    pub fn register_state_change_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&RouteId, RouteState) + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback; returns false if it was already gone
    pub fn unregister_state_change_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    /// Subscribe to one route's state changes
    pub fn subscribe(&self, route_id: &RouteId) -> RouteStateSubscription {
        let mut table = self.table.lock();
        let current = table
            .records
            .get(route_id)
            .map_or(RouteState::Disconnected, |record| record.state);
        let receiver = table
            .channels
            .entry(route_id.clone())
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_BUFFER).0)
            .subscribe();

        RouteStateSubscription {
            route_id: route_id.clone(),
            pending_initial: Some(current),
            receiver,
        }
    }
}

impl fmt::Debug for RouteStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock();
        f.debug_struct("RouteStateManager")
            .field("routes", &table.records.len())
            .field("subscribed_routes", &table.channels.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Subscriptions
// ----------------------------------------------------------------------------

/// Live view of one route's state; dropping it unsubscribes
#[derive(Debug)]
pub struct RouteStateSubscription {
    route_id: RouteId,
    pending_initial: Option<RouteState>,
    receiver: broadcast::Receiver<RouteState>,
}

impl RouteStateSubscription {
    pub fn route_id(&self) -> &RouteId {
        &self.route_id
    }

    /// Next state: the state at subscribe time first, then each change
    ///
    /// Returns `None` once the state manager is gone.
    pub async fn next(&mut self) -> Option<RouteState> {
        if let Some(initial) = self.pending_initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(route_id = %self.route_id, skipped, "state subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next)
    pub fn try_next(&mut self) -> Option<RouteState> {
        if let Some(initial) = self.pending_initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(state) => return Some(state),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
