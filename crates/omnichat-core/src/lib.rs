//! OmniChat Core
//!
//! Stable API definitions for the OmniChat multi-route chat SDK:
//! - Identifiers, timestamps and the [`TimeSource`] abstraction
//! - The error taxonomy unified under [`SdkError`]
//! - Configuration for retry, reconnection, queueing and maintenance
//! - The durable [`Event`] model
//! - The [`RoutePlugin`] contract implemented per platform
//! - Storage and credential collaborator contracts
//!
//! The runtime engine lives in `omnichat-runtime`; this crate has no async
//! runtime dependency.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod backoff;
pub mod config;
pub mod errors;
pub mod event;
pub mod route;
pub mod storage;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use backoff::exponential_delay;
pub use config::{
    EventQueueConfig, LogLevel, MaintenanceConfig, ReconnectionConfig, RetryPolicy, SdkConfig,
};
pub use errors::{
    CapabilityError, PluginError, ProcessingError, QueueError, ReconnectionError, RetryError,
    SdkError, SdkResult, StateError, StorageError,
};
pub use event::{Event, EventType};
pub use route::{Message, OutgoingMedia, Platform, RouteInteractions, RoutePlugin, RouteState};
pub use storage::{CredentialStore, EventStore, MessageStore, RouteRecord, RouteStore, Storage};
pub use types::{ConversationId, EventId, RouteId, SystemTimeSource, TimeSource, Timestamp};
