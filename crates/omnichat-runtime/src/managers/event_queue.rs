//! Durable offline event queue
//!
//! Events are persisted through the [`EventStore`] before `enqueue` returns
//! and mirrored in memory per route in timestamp order. Draining runs every
//! registered [`EventProcessor`] over each event; an event leaves the queue
//! only after every processor accepted it and the store marked it processed.
//! Failures are logged and skipped so one bad event never blocks a batch.

use async_trait::async_trait;
use omnichat_core::{
    Event, EventQueueConfig, EventStore, ProcessingError, QueueError, RouteId, SdkResult,
    TimeSource,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Event Processors
// ----------------------------------------------------------------------------

/// Consumer of drained events
///
/// Delivery is at-least-once: an event may be seen again after a failed
/// processor or a restart, so implementations should be idempotent.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &Event) -> Result<(), ProcessingError>;
}

/// Adapter running a plain closure as an [`EventProcessor`]
pub struct FnProcessor<F> {
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&Event) -> Result<(), ProcessingError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> EventProcessor for FnProcessor<F>
where
    F: Fn(&Event) -> Result<(), ProcessingError> + Send + Sync,
{
    async fn process(&self, event: &Event) -> Result<(), ProcessingError> {
        (self.func)(event)
    }
}

// ----------------------------------------------------------------------------
// In-Memory Mirror
// ----------------------------------------------------------------------------

#[derive(Default)]
struct QueueMirror {
    by_route: HashMap<RouteId, VecDeque<Event>>,
    total: usize,
    /// Slots held by enqueues whose persistence is still in flight
    reserved_total: usize,
    reserved_by_route: HashMap<RouteId, usize>,
}

impl QueueMirror {
    fn route_len(&self, route_id: &RouteId) -> usize {
        self.by_route.get(route_id).map_or(0, VecDeque::len)
    }

    fn release(&mut self, route_id: &RouteId) {
        self.reserved_total = self.reserved_total.saturating_sub(1);
        if let Some(count) = self.reserved_by_route.get_mut(route_id) {
            *count -= 1;
            if *count == 0 {
                self.reserved_by_route.remove(route_id);
            }
        }
    }

    /// Insert after every event with an equal or earlier timestamp
    fn insert(&mut self, event: Event) {
        let queue = self.by_route.entry(event.route_id.clone()).or_default();
        let position = queue.partition_point(|queued| queued.timestamp <= event.timestamp);
        queue.insert(position, event);
        self.total += 1;
    }

    fn contains(&self, event: &Event) -> bool {
        self.by_route
            .get(&event.route_id)
            .is_some_and(|queue| queue.iter().any(|queued| queued.id == event.id))
    }

    fn remove(&mut self, event: &Event) -> bool {
        let Some(queue) = self.by_route.get_mut(&event.route_id) else {
            return false;
        };
        let Some(position) = queue.iter().position(|queued| queued.id == event.id) else {
            return false;
        };
        queue.remove(position);
        if queue.is_empty() {
            self.by_route.remove(&event.route_id);
        }
        self.total -= 1;
        true
    }
}

/// Capacity held for one in-flight enqueue; released on drop unless committed
struct Reservation<'a> {
    mirror: &'a Mutex<QueueMirror>,
    route_id: RouteId,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, event: Event) {
        let mut mirror = self.mirror.lock();
        mirror.release(&self.route_id);
        mirror.insert(event);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.mirror.lock().release(&self.route_id);
        }
    }
}

// ----------------------------------------------------------------------------
// Event Queue Manager
// ----------------------------------------------------------------------------

/// Persisted FIFO of events awaiting delivery, drained per route
pub struct EventQueueManager {
    storage: Arc<dyn EventStore>,
    config: EventQueueConfig,
    mirror: Mutex<QueueMirror>,
    processors: RwLock<Vec<Arc<dyn EventProcessor>>>,
    /// One drain pass at a time so no event is handed out twice concurrently
    drain_lock: tokio::sync::Mutex<()>,
    time_source: Arc<dyn TimeSource>,
    stats: QueueCounters,
}

impl EventQueueManager {
    pub fn new(
        storage: Arc<dyn EventStore>,
        config: EventQueueConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            storage,
            config,
            mirror: Mutex::new(QueueMirror::default()),
            processors: RwLock::new(Vec::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            time_source,
            stats: QueueCounters::default(),
        }
    }

    pub fn config(&self) -> &EventQueueConfig {
        &self.config
    }

    /// Register a processor; processors run in registration order
    pub fn register_processor(&self, processor: Arc<dyn EventProcessor>) {
        self.processors.write().push(processor);
    }

    /// Register a closure as a processor
    pub fn register_processing_fn<F>(&self, func: F)
    where
        F: Fn(&Event) -> Result<(), ProcessingError> + Send + Sync + 'static,
    {
        self.register_processor(Arc::new(FnProcessor::new(func)));
    }

    /// Queue an event, persisting it before returning
    pub async fn enqueue(&self, event: Event) -> SdkResult<()> {
        let reservation = self.reserve(&event.route_id)?;

        if let Err(error) = self.storage.append_event(&event).await {
            warn!(
                event_id = %event.id,
                route_id = %event.route_id,
                error = %error,
                "failed to persist event"
            );
            return Err(error.into());
        }

        debug!(event_id = %event.id, route_id = %event.route_id, "event queued");
        reservation.commit(event);
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn reserve(&self, route_id: &RouteId) -> Result<Reservation<'_>, QueueError> {
        let mut mirror = self.mirror.lock();

        if mirror.total + mirror.reserved_total >= self.config.max_queue_size {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::EventQueueFull {
                capacity: self.config.max_queue_size,
            });
        }

        if let Some(quota) = self.config.max_events_per_route {
            let reserved = mirror.reserved_by_route.get(route_id).copied().unwrap_or(0);
            if mirror.route_len(route_id) + reserved >= quota {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(QueueError::RouteQuotaExceeded {
                    route_id: route_id.clone(),
                    quota,
                });
            }
        }

        mirror.reserved_total += 1;
        *mirror.reserved_by_route.entry(route_id.clone()).or_insert(0) += 1;

        Ok(Reservation {
            mirror: &self.mirror,
            route_id: route_id.clone(),
            committed: false,
        })
    }

    /// Drain one route's queued events in FIFO order
    ///
    /// Returns the number of events that were fully processed.
    pub async fn process_events(&self, route_id: &RouteId) -> usize {
        let _drain = self.drain_lock.lock().await;

        let batch: Vec<Event> = self
            .mirror
            .lock()
            .by_route
            .get(route_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default();
        if batch.is_empty() {
            return 0;
        }

        let total = batch.len();
        let mut processed = 0;
        for event in batch {
            if !self.still_queued(&event) {
                continue;
            }
            if self.deliver(&event).await {
                self.mirror.lock().remove(&event);
                processed += 1;
            }
        }

        info!(route_id = %route_id, processed, total, "processed queued events");
        processed
    }

    /// Drain every route, then drop the drained events from memory
    ///
    /// Events that failed stay unprocessed in the store and reappear on the
    /// next [`load_from_database`](Self::load_from_database).
    pub async fn process_all_events(&self) -> usize {
        let _drain = self.drain_lock.lock().await;

        let mut batch: Vec<Event> = self
            .mirror
            .lock()
            .by_route
            .values()
            .flat_map(|queue| queue.iter().cloned())
            .collect();
        batch.sort_by_key(|event| event.timestamp);

        let mut processed = 0;
        for event in &batch {
            if !self.still_queued(event) {
                continue;
            }
            if self.deliver(event).await {
                processed += 1;
            }
        }

        let mut mirror = self.mirror.lock();
        let dropped = batch.iter().filter(|event| mirror.remove(event)).count();
        drop(mirror);

        if dropped > processed {
            warn!(
                dropped = dropped - processed,
                "unprocessed events dropped from memory until next load"
            );
        }
        info!(processed, total = batch.len(), "processed all queued events");
        processed
    }

    /// False once the event was cleared mid-drain
    fn still_queued(&self, event: &Event) -> bool {
        self.mirror.lock().contains(event)
    }

    /// Run the processors over one event and mark it processed
    async fn deliver(&self, event: &Event) -> bool {
        let processors: Vec<Arc<dyn EventProcessor>> = self.processors.read().clone();

        for processor in &processors {
            if let Err(error) = processor.process(event).await {
                warn!(
                    event_id = %event.id,
                    route_id = %event.route_id,
                    error = %error,
                    "event processing failed"
                );
                self.stats.processing_failures.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        if let Err(error) = self.storage.mark_processed(&event.id).await {
            warn!(
                event_id = %event.id,
                route_id = %event.route_id,
                error = %error,
                "failed to mark event processed"
            );
            self.stats.processing_failures.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove a route's events from memory and storage
    ///
    /// Returns the number of persisted rows deleted. Waits for a running
    /// drain to finish so none of the route's events is delivered after this
    /// returns; must not be called from inside an [`EventProcessor`].
    pub async fn clear_events(&self, route_id: &RouteId) -> SdkResult<usize> {
        {
            let mut mirror = self.mirror.lock();
            if let Some(queue) = mirror.by_route.remove(route_id) {
                mirror.total -= queue.len();
            }
        }
        let _drain = self.drain_lock.lock().await;
        let deleted = self.storage.delete_events(route_id).await?;
        debug!(route_id = %route_id, deleted, "cleared route events");
        Ok(deleted)
    }

    pub fn get_queue_size(&self, route_id: &RouteId) -> usize {
        self.mirror.lock().route_len(route_id)
    }

    pub fn get_total_queue_size(&self) -> usize {
        self.mirror.lock().total
    }

    /// Ids of routes with queued events, sorted
    pub fn queued_routes(&self) -> Vec<RouteId> {
        let mut routes: Vec<RouteId> = self.mirror.lock().by_route.keys().cloned().collect();
        routes.sort();
        routes
    }

    /// Rebuild the mirror from the store's unprocessed events
    ///
    /// Loads at most `max_queue_size` events, oldest first. Call once at
    /// startup before any enqueue.
    pub async fn load_from_database(&self) -> SdkResult<usize> {
        let mut pending = self.storage.query_unprocessed().await?;

        if pending.len() > self.config.max_queue_size {
            warn!(
                pending = pending.len(),
                capacity = self.config.max_queue_size,
                "more unprocessed events than queue capacity, loading oldest"
            );
            pending.truncate(self.config.max_queue_size);
        }

        let loaded = pending.len();
        let mut mirror = self.mirror.lock();
        mirror.by_route.clear();
        mirror.total = 0;
        for event in pending {
            mirror
                .by_route
                .entry(event.route_id.clone())
                .or_default()
                .push_back(event);
            mirror.total += 1;
        }
        drop(mirror);

        info!(loaded, "loaded queued events from storage");
        Ok(loaded)
    }

    /// Purge processed events older than `retention`
    pub async fn cleanup_old_events(&self, retention: Duration) -> SdkResult<usize> {
        let cutoff = self.time_source.now().saturating_sub(retention);
        let purged = self.storage.delete_processed_older_than(cutoff).await?;
        debug!(purged, cutoff = %cutoff, "purged processed events");
        Ok(purged)
    }

    pub fn statistics(&self) -> QueueStats {
        let mirror = self.mirror.lock();
        QueueStats {
            queued: mirror.total,
            routes: mirror.by_route.len(),
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            processed: self.stats.processed.load(Ordering::Relaxed),
            processing_failures: self.stats.processing_failures.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for EventQueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueueManager")
            .field("config", &self.config)
            .field("processors", &self.processors.read().len())
            .field("stats", &self.statistics())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Queue Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    processed: AtomicU64,
    processing_failures: AtomicU64,
    rejected: AtomicU64,
}

/// Statistics about the event queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Events currently queued in memory
    pub queued: usize,
    /// Routes with at least one queued event
    pub routes: usize,
    pub enqueued: u64,
    pub processed: u64,
    pub processing_failures: u64,
    /// Enqueues refused by a capacity limit
    pub rejected: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
