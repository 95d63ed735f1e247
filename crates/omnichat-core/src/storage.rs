//! Persistence and credential collaborator contracts
//!
//! The SDK never owns a database. It talks to whatever record store the host
//! application provides through these traits. Implementations are expected to
//! make each call transactional (read-isolated, write-serialized).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::event::Event;
use crate::route::{Message, Platform};
use crate::types::{ConversationId, EventId, RouteId, Timestamp};

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

/// Persisted description of a registered route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub route_id: RouteId,
    pub platform: Platform,
    pub display_name: String,
    pub registered_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Store Traits
// ----------------------------------------------------------------------------

/// Keyed, ordered event log
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event; must be durable when this returns `Ok`
    async fn append_event(&self, event: &Event) -> Result<(), StorageError>;

    /// Flip the `processed` flag of one event
    async fn mark_processed(&self, event_id: &EventId) -> Result<(), StorageError>;

    /// All events with `processed == false`, ordered by timestamp ascending
    async fn query_unprocessed(&self) -> Result<Vec<Event>, StorageError>;

    /// Delete every event of a route, returning how many were removed
    async fn delete_events(&self, route_id: &RouteId) -> Result<usize, StorageError>;

    /// Delete processed events with a timestamp strictly older than `cutoff`
    async fn delete_processed_older_than(&self, cutoff: Timestamp) -> Result<usize, StorageError>;
}

/// Route registry persistence
#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn save_route(&self, record: &RouteRecord) -> Result<(), StorageError>;

    async fn delete_route(&self, route_id: &RouteId) -> Result<(), StorageError>;

    async fn load_routes(&self) -> Result<Vec<RouteRecord>, StorageError>;
}

/// Message cache used by history pagination
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Upsert messages keyed by `(route_id, id)`
    async fn save_messages(&self, messages: &[Message]) -> Result<(), StorageError>;

    /// Up to `limit` cached messages older than `before`, newest first
    async fn query_messages(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;
}

/// Full storage collaborator consumed by the SDK
#[async_trait]
pub trait Storage: EventStore + RouteStore + MessageStore {
    /// Reclaim space after purges
    async fn compact(&self) -> Result<(), StorageError>;
}

/// Opaque credential storage keyed by route
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, route_id: &RouteId) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set(&self, route_id: &RouteId, secret: Vec<u8>) -> Result<(), StorageError>;

    async fn delete(&self, route_id: &RouteId) -> Result<(), StorageError>;
}
