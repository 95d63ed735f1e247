//! Error types for the OmniChat SDK
//!
//! One error enum per concern (state, queue, reconnection, retry, plugin,
//! storage, capability) plus the [`SdkError`] type that unifies them for
//! callers of the top-level operations.

use crate::route::RouteState;
use crate::types::RouteId;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Route lifecycle and registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Route {route_id} is in state {current}, operation requires {required}")]
    InvalidState {
        route_id: RouteId,
        current: RouteState,
        required: RouteState,
    },
    #[error("Route not found: {route_id}")]
    RouteNotFound { route_id: RouteId },
    #[error("Route not connected: {route_id}")]
    RouteNotConnected { route_id: RouteId },
    #[error("Route already registered: {route_id}")]
    RouteAlreadyRegistered { route_id: RouteId },
}

/// Event queue admission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Event queue is full (capacity: {capacity})")]
    EventQueueFull { capacity: usize },
    #[error("Route {route_id} exceeded its queue quota ({quota})")]
    RouteQuotaExceeded { route_id: RouteId, quota: usize },
}

/// Reconnection scheduling errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectionError {
    #[error("Reconnection disabled for route {route_id}")]
    ReconnectionDisabled { route_id: RouteId },
    #[error("Reconnection already in progress for route {route_id}")]
    ReconnectionInProgress { route_id: RouteId },
    #[error("Route {route_id} reached the maximum of {max_attempts} reconnection attempts")]
    MaxReconnectionAttemptsReached { route_id: RouteId, max_attempts: u32 },
}

/// Retry budget errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    #[error("Operation {operation_id} exhausted {max_attempts} retry attempts")]
    MaxRetryAttemptsReached {
        operation_id: String,
        max_attempts: u32,
    },
}

/// Opaque failure reported by a route plugin
///
/// The SDK never inspects the message; it is surfaced to callers unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Route {route_id} failed: {message}")]
pub struct PluginError {
    pub route_id: RouteId,
    pub message: String,
}

impl PluginError {
    pub fn new(route_id: RouteId, message: impl Into<String>) -> Self {
        Self {
            route_id,
            message: message.into(),
        }
    }
}

/// Failures of the persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {message}")]
    Backend { message: String },
    #[error("Record not found: {what}")]
    NotFound { what: String },
    #[error("Storage serialization error: {message}")]
    Serialization { message: String },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend {
            message: message.into(),
        }
    }
}

/// Optional plugin capability was requested but the plugin lacks it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("Route {route_id} does not support {capability}")]
    Unsupported {
        route_id: RouteId,
        capability: &'static str,
    },
}

/// Failure returned by an event processing callback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Event processing failed: {message}")]
pub struct ProcessingError {
    pub message: String,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Error type returned by every public SDK operation
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Reconnection error: {0}")]
    Reconnection(#[from] ReconnectionError),

    #[error("Retry error: {0}")]
    Retry(#[from] RetryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

pub type SdkResult<T> = core::result::Result<T, SdkError>;

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl SdkError {
    /// Create a plugin error for a route
    pub fn plugin<M: Into<String>>(route_id: RouteId, message: M) -> Self {
        SdkError::Plugin(PluginError::new(route_id, message))
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        SdkError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a route-not-found error
    pub fn route_not_found(route_id: RouteId) -> Self {
        SdkError::State(StateError::RouteNotFound { route_id })
    }

    /// Create a route-not-connected error
    pub fn route_not_connected(route_id: RouteId) -> Self {
        SdkError::State(StateError::RouteNotConnected { route_id })
    }

    /// Create a storage backend error
    pub fn storage<M: Into<String>>(message: M) -> Self {
        SdkError::Storage(StorageError::backend(message))
    }

    /// True when the retry budget for an operation ran out
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, SdkError::Retry(RetryError::MaxRetryAttemptsReached { .. }))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
