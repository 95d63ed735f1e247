//! In-memory storage collaborators
//!
//! [`MemoryStorage`] behaves like a transactional record store: every call
//! takes one lock, so each operation is atomic and writes are serialized.
//! Share it behind an `Arc` across SDK instances to simulate a restart that
//! keeps the database.

use async_trait::async_trait;
use omnichat_core::{
    ConversationId, CredentialStore, Event, EventId, EventStore, Message, MessageStore,
    RouteId, RouteRecord, RouteStore, Storage, StorageError, Timestamp,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

// ----------------------------------------------------------------------------
// Memory Storage
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    /// Event log in append order
    events: Vec<Event>,
    routes: HashMap<RouteId, RouteRecord>,
    messages: Vec<Message>,
}

/// In-memory [`Storage`] with fault injection for tests
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    fail_appends: AtomicBool,
    fail_mark_processed: AtomicBool,
    compactions: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `append_event` calls fail
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `mark_processed` calls fail
    pub fn set_fail_mark_processed(&self, fail: bool) {
        self.fail_mark_processed.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every persisted event, processed or not
    pub fn all_events(&self) -> Vec<Event> {
        self.tables.lock().events.clone()
    }

    /// Persisted events for one route
    pub fn events_for(&self, route_id: &RouteId) -> Vec<Event> {
        self.tables
            .lock()
            .events
            .iter()
            .filter(|event| &event.route_id == route_id)
            .cloned()
            .collect()
    }

    pub fn route_record(&self, route_id: &RouteId) -> Option<RouteRecord> {
        self.tables.lock().routes.get(route_id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.tables.lock().messages.len()
    }

    pub fn compaction_count(&self) -> usize {
        self.compactions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for MemoryStorage {
    async fn append_event(&self, event: &Event) -> Result<(), StorageError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::backend("append rejected"));
        }
        self.tables.lock().events.push(event.clone());
        Ok(())
    }

    async fn mark_processed(&self, event_id: &EventId) -> Result<(), StorageError> {
        if self.fail_mark_processed.load(Ordering::SeqCst) {
            return Err(StorageError::backend("mark_processed rejected"));
        }
        let mut tables = self.tables.lock();
        match tables.events.iter_mut().find(|event| &event.id == event_id) {
            Some(event) => {
                event.processed = true;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                what: format!("event {event_id}"),
            }),
        }
    }

    async fn query_unprocessed(&self) -> Result<Vec<Event>, StorageError> {
        let mut pending: Vec<Event> = self
            .tables
            .lock()
            .events
            .iter()
            .filter(|event| !event.processed)
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps
        pending.sort_by_key(|event| event.timestamp);
        Ok(pending)
    }

    async fn delete_events(&self, route_id: &RouteId) -> Result<usize, StorageError> {
        let mut tables = self.tables.lock();
        let before = tables.events.len();
        tables.events.retain(|event| &event.route_id != route_id);
        Ok(before - tables.events.len())
    }

    async fn delete_processed_older_than(&self, cutoff: Timestamp) -> Result<usize, StorageError> {
        let mut tables = self.tables.lock();
        let before = tables.events.len();
        tables
            .events
            .retain(|event| !(event.processed && event.timestamp < cutoff));
        Ok(before - tables.events.len())
    }
}

#[async_trait]
impl RouteStore for MemoryStorage {
    async fn save_route(&self, record: &RouteRecord) -> Result<(), StorageError> {
        self.tables
            .lock()
            .routes
            .insert(record.route_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_route(&self, route_id: &RouteId) -> Result<(), StorageError> {
        self.tables.lock().routes.remove(route_id);
        Ok(())
    }

    async fn load_routes(&self) -> Result<Vec<RouteRecord>, StorageError> {
        let mut routes: Vec<RouteRecord> = self.tables.lock().routes.values().cloned().collect();
        routes.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        Ok(routes)
    }
}

#[async_trait]
impl MessageStore for MemoryStorage {
    async fn save_messages(&self, messages: &[Message]) -> Result<(), StorageError> {
        let mut tables = self.tables.lock();
        for message in messages {
            match tables
                .messages
                .iter_mut()
                .find(|m| m.route_id == message.route_id && m.id == message.id)
            {
                Some(existing) => *existing = message.clone(),
                None => tables.messages.push(message.clone()),
            }
        }
        Ok(())
    }

    async fn query_messages(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let mut page: Vec<Message> = self
            .tables
            .lock()
            .messages
            .iter()
            .filter(|m| &m.route_id == route_id && &m.conversation_id == conversation_id)
            .filter(|m| before.map_or(true, |cutoff| m.timestamp < cutoff))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        page.truncate(limit);
        Ok(page)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn compact(&self) -> Result<(), StorageError> {
        let mut tables = self.tables.lock();
        tables.events.shrink_to_fit();
        tables.messages.shrink_to_fit();
        let runs = self.compactions.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(runs, "memory storage compacted");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Memory Credential Store
// ----------------------------------------------------------------------------

/// In-memory [`CredentialStore`]
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<RouteId, Vec<u8>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.lock().is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, route_id: &RouteId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.secrets.lock().get(route_id).cloned())
    }

    async fn set(&self, route_id: &RouteId, secret: Vec<u8>) -> Result<(), StorageError> {
        self.secrets.lock().insert(route_id.clone(), secret);
        Ok(())
    }

    async fn delete(&self, route_id: &RouteId) -> Result<(), StorageError> {
        self.secrets.lock().remove(route_id);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
