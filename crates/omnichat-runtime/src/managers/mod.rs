//! Stateful managers for the SDK runtime
//!
//! Each manager exclusively owns its record map behind its own lock. The
//! coordinator only talks to them through their public operations.

pub mod event_queue;
pub mod reconnection;
pub mod retry;
pub mod state;

pub use event_queue::{EventProcessor, EventQueueManager, FnProcessor, QueueStats};
pub use reconnection::{ReconnectionManager, ReconnectionStatus};
pub use retry::{RetryManager, RetryRecord, RetryStats};
pub use state::{
    CallbackId, RouteStateManager, RouteStateRecord, RouteStateSubscription, StateChangeCallback,
};
