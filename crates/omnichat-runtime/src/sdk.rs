//! ChatSdk coordinator
//!
//! [`ChatSdk`] owns the route plugin registry and orchestrates the managers
//! for every route lifecycle operation. It never reaches into a manager's
//! records; it only calls their public operations.
//!
//! ## Connection lifecycle
//!
//! `connect_route` runs the plugin's `connect` under the retry manager with a
//! stable `connect_<route>` operation id. On success the route's queued events
//! are drained. On failure the route lands in `Error` and, when eligible, a
//! reconnection task is spawned. The caller always gets the original failure;
//! later attempts are only observable through state changes.
//!
//! Cross-manager steps are not transactional: a route may briefly read
//! `Connected` before its queue has drained.

use crate::maintenance::{self, CleanupReport};
use crate::managers::{
    CallbackId, EventProcessor, EventQueueManager, ReconnectionManager, RetryManager,
    RouteStateManager, RouteStateSubscription,
};
use dashmap::DashMap;
use futures::future::join_all;
use omnichat_core::{
    CapabilityError, ConversationId, CredentialStore, Event, EventStore, Message, OutgoingMedia,
    ProcessingError, ReconnectionConfig, ReconnectionError, RouteId, RouteInteractions,
    RoutePlugin, RouteRecord, RouteState, SdkConfig, SdkError, SdkResult, StateError, Storage,
    TimeSource, Timestamp,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Shared Core
// ----------------------------------------------------------------------------

pub(crate) struct SdkInner {
    config: SdkConfig,
    routes: DashMap<RouteId, Arc<dyn RoutePlugin>>,
    storage: Arc<dyn Storage>,
    credentials: Option<Arc<dyn CredentialStore>>,
    retry: RetryManager,
    state: RouteStateManager,
    reconnection: ReconnectionManager,
    events: EventQueueManager,
    time_source: Arc<dyn TimeSource>,
}

fn connect_operation_id(route_id: &RouteId) -> String {
    format!("connect_{route_id}")
}

fn send_operation_id(route_id: &RouteId) -> String {
    format!("send_{route_id}_{}", Uuid::new_v4())
}

impl SdkInner {
    fn plugin(&self, route_id: &RouteId) -> SdkResult<Arc<dyn RoutePlugin>> {
        self.routes
            .get(route_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SdkError::route_not_found(route_id.clone()))
    }

    fn connected_plugin(&self, route_id: &RouteId) -> SdkResult<Arc<dyn RoutePlugin>> {
        let plugin = self.plugin(route_id)?;
        if !self.state.is_connected(route_id) {
            return Err(SdkError::route_not_connected(route_id.clone()));
        }
        Ok(plugin)
    }

    /// One connect cycle: `Connecting`, retried connect, then drain or error
    async fn attempt_connect(
        &self,
        route_id: &RouteId,
        plugin: &Arc<dyn RoutePlugin>,
    ) -> SdkResult<()> {
        self.state.set_state(route_id, RouteState::Connecting);

        let operation_id = connect_operation_id(route_id);
        let result = self
            .retry
            .execute_with_retry(&operation_id, &self.config.connect_retry, || async move {
                plugin.connect().await.map_err(SdkError::from)
            })
            .await;

        match result {
            Ok(()) => {
                self.state.set_state(route_id, RouteState::Connected);
                let drained = self.events.process_events(route_id).await;
                info!(route_id = %route_id, drained, "route connected");
                Ok(())
            }
            Err(error) => {
                self.retry.reset(&operation_id);
                self.state.set_error(route_id, error.to_string());
                warn!(route_id = %route_id, error = %error, "route connection failed");
                Err(error)
            }
        }
    }

    /// Spawn a reconnection task when the route is eligible
    ///
    /// Returns true if a task was spawned.
    fn schedule_reconnection(inner: &Arc<Self>, route_id: &RouteId) -> bool {
        if !inner.reconnection.can_reconnect(route_id) {
            debug!(route_id = %route_id, "route not eligible for reconnection");
            return false;
        }

        let delay = match inner.reconnection.trigger_reconnection(route_id) {
            Ok(delay) => delay,
            Err(ReconnectionError::ReconnectionInProgress { .. }) => {
                debug!(route_id = %route_id, "reconnection already scheduled");
                return false;
            }
            Err(error) => {
                warn!(route_id = %route_id, error = %error, "reconnection not scheduled");
                return false;
            }
        };

        let task = tokio::spawn(Self::run_reconnection(
            Arc::clone(inner),
            route_id.clone(),
            delay,
        ));
        inner.reconnection.attach_task(route_id, task.abort_handle());
        true
    }

    async fn run_reconnection(inner: Arc<Self>, route_id: RouteId, mut delay: Duration) {
        loop {
            inner.state.set_state(&route_id, RouteState::Reconnecting);
            info!(
                route_id = %route_id,
                attempt = inner.reconnection.attempt_count(&route_id),
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::time::sleep(delay).await;

            let plugin = inner.routes.get(&route_id).map(|entry| Arc::clone(entry.value()));
            let Some(plugin) = plugin else {
                debug!(route_id = %route_id, "route unregistered, abandoning reconnection");
                inner.reconnection.reset(&route_id);
                return;
            };

            if inner.attempt_connect(&route_id, &plugin).await.is_ok() {
                inner.reconnection.complete_reconnection(&route_id, true);
                return;
            }

            inner.reconnection.complete_reconnection(&route_id, false);
            if !inner.reconnection.can_reconnect(&route_id) {
                warn!(
                    route_id = %route_id,
                    attempts = inner.reconnection.attempt_count(&route_id),
                    "giving up on reconnection until the route is connected again"
                );
                return;
            }

            delay = match inner.reconnection.trigger_reconnection(&route_id) {
                Ok(delay) => delay,
                Err(error) => {
                    warn!(route_id = %route_id, error = %error, "reconnection stopped");
                    return;
                }
            };
        }
    }

    fn report_connection_lost(inner: &Arc<Self>, route_id: &RouteId, reason: String) -> bool {
        match inner.state.get_state(route_id) {
            RouteState::Disconnecting | RouteState::Disconnected => {
                debug!(route_id = %route_id, "connection loss ignored for inactive route");
                return false;
            }
            _ => {}
        }
        warn!(route_id = %route_id, reason = %reason, "route connection lost");
        inner.state.set_error(route_id, reason);
        Self::schedule_reconnection(inner, route_id)
    }

    pub(crate) async fn cleanup(&self) -> SdkResult<CleanupReport> {
        let events_purged = self
            .events
            .cleanup_old_events(self.config.maintenance.event_retention)
            .await?;
        self.storage.compact().await?;
        info!(events_purged, "maintenance cleanup finished");
        Ok(CleanupReport { events_purged })
    }
}

// ----------------------------------------------------------------------------
// Chat SDK
// ----------------------------------------------------------------------------

/// Facade over route plugins and the resilience managers
///
/// Cheap to clone; clones share the same routes and managers.
#[derive(Clone)]
pub struct ChatSdk {
    inner: Arc<SdkInner>,
}

impl ChatSdk {
    pub(crate) fn from_parts(
        config: SdkConfig,
        storage: Arc<dyn Storage>,
        event_store: Arc<dyn EventStore>,
        credentials: Option<Arc<dyn CredentialStore>>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let inner = SdkInner {
            retry: RetryManager::new(Arc::clone(&time_source)),
            state: RouteStateManager::new(Arc::clone(&time_source)),
            reconnection: ReconnectionManager::new(
                config.reconnection.clone(),
                Arc::clone(&time_source),
            ),
            events: EventQueueManager::new(
                event_store,
                config.event_queue.clone(),
                Arc::clone(&time_source),
            ),
            routes: DashMap::new(),
            storage,
            credentials,
            time_source,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Route registry
    // ------------------------------------------------------------------------

    /// Register a plugin and persist its route record
    pub async fn register_route(&self, plugin: Arc<dyn RoutePlugin>) -> SdkResult<RouteId> {
        let route_id = plugin.route_id();
        if self.inner.routes.contains_key(&route_id) {
            return Err(StateError::RouteAlreadyRegistered { route_id }.into());
        }
        self.inner.routes.insert(route_id.clone(), Arc::clone(&plugin));
        self.inner.state.set_state(&route_id, RouteState::Disconnected);

        let record = RouteRecord {
            route_id: route_id.clone(),
            platform: plugin.platform(),
            display_name: plugin.display_name(),
            registered_at: self.inner.time_source.now(),
        };
        if let Err(error) = self.inner.storage.save_route(&record).await {
            self.inner.routes.remove(&route_id);
            self.inner.state.clear_state(&route_id);
            return Err(error.into());
        }

        info!(
            route_id = %route_id,
            platform = ?record.platform,
            "route registered"
        );
        Ok(route_id)
    }

    /// Remove a route and everything the SDK keeps for it
    ///
    /// Cancels reconnection and drops its per-route config, disconnects the
    /// plugin if it is connected, and deletes queued events, the route record
    /// and stored credentials.
    pub async fn unregister_route(&self, route_id: &RouteId) -> SdkResult<()> {
        let (_, plugin) = self
            .inner
            .routes
            .remove(route_id)
            .ok_or_else(|| SdkError::route_not_found(route_id.clone()))?;

        self.inner.reconnection.forget(route_id);
        if plugin.is_connected().await {
            if let Err(error) = plugin.disconnect().await {
                warn!(route_id = %route_id, error = %error, "disconnect during unregister failed");
            }
        }
        self.inner.state.set_state(route_id, RouteState::Disconnected);
        self.inner.state.clear_state(route_id);
        self.inner.retry.reset(&connect_operation_id(route_id));

        let purged = self.inner.events.clear_events(route_id).await?;
        self.inner.storage.delete_route(route_id).await?;
        if let Some(credentials) = &self.inner.credentials {
            credentials.delete(route_id).await?;
        }

        info!(route_id = %route_id, purged, "route unregistered");
        Ok(())
    }

    /// Ids of registered plugins, sorted
    pub fn registered_routes(&self) -> Vec<RouteId> {
        let mut routes: Vec<RouteId> = self
            .inner
            .routes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        routes.sort();
        routes
    }

    /// Route records persisted by earlier registrations
    pub async fn persisted_routes(&self) -> SdkResult<Vec<RouteRecord>> {
        Ok(self.inner.storage.load_routes().await?)
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    /// Connect a route, retrying per the connect policy
    ///
    /// A fresh call cancels any pending reconnection and resets the
    /// reconnection budget.
    pub async fn connect_route(&self, route_id: &RouteId) -> SdkResult<()> {
        let plugin = self.inner.plugin(route_id)?;
        self.inner.reconnection.cancel(route_id);

        match self.inner.attempt_connect(route_id, &plugin).await {
            Ok(()) => {
                self.inner.reconnection.cancel(route_id);
                Ok(())
            }
            Err(error) => {
                SdkInner::schedule_reconnection(&self.inner, route_id);
                Err(error)
            }
        }
    }

    pub async fn disconnect_route(&self, route_id: &RouteId) -> SdkResult<()> {
        let plugin = self.inner.plugin(route_id)?;
        self.inner.reconnection.cancel(route_id);
        self.inner.state.set_state(route_id, RouteState::Disconnecting);

        let result = plugin.disconnect().await;
        self.inner.reconnection.reset(route_id);
        match result {
            Ok(()) => {
                self.inner.state.set_state(route_id, RouteState::Disconnected);
                info!(route_id = %route_id, "route disconnected");
                Ok(())
            }
            Err(error) => {
                self.inner.state.set_error(route_id, error.to_string());
                Err(error.into())
            }
        }
    }

    /// Signal that a route's transport dropped
    ///
    /// Moves the route to `Error` and schedules a reconnection if eligible.
    /// Returns true if a reconnection was scheduled. Routes that are
    /// disconnecting or disconnected are left alone.
    pub fn report_connection_lost(
        &self,
        route_id: &RouteId,
        reason: impl Into<String>,
    ) -> SdkResult<bool> {
        self.inner.plugin(route_id)?;
        Ok(SdkInner::report_connection_lost(
            &self.inner,
            route_id,
            reason.into(),
        ))
    }

    /// Disconnect every connected route and stop reconnection tasks
    pub async fn shutdown(&self) {
        let cancelled = self.inner.reconnection.cancel_all();
        let plugins: Vec<(RouteId, Arc<dyn RoutePlugin>)> = self
            .inner
            .routes
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let disconnects = plugins.iter().map(|(route_id, plugin)| async move {
            if plugin.is_connected().await {
                if let Err(error) = plugin.disconnect().await {
                    warn!(route_id = %route_id, error = %error, "disconnect during shutdown failed");
                }
            }
            self.inner.state.set_state(route_id, RouteState::Disconnected);
        });
        join_all(disconnects).await;

        info!(routes = plugins.len(), cancelled, "sdk shut down");
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Send a text message on a connected route
    ///
    /// Each call retries under its own operation id.
    pub async fn send_message(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
        text: &str,
        reply_to: Option<&str>,
    ) -> SdkResult<Message> {
        let plugin = self.inner.connected_plugin(route_id)?;
        let operation_id = send_operation_id(route_id);
        let route = &plugin;

        let result = self
            .inner
            .retry
            .execute_with_retry(&operation_id, &self.inner.config.send_retry, || async move {
                route
                    .send_message(conversation_id, text, reply_to)
                    .await
                    .map_err(SdkError::from)
            })
            .await;
        self.finish_send(route_id, &plugin, &operation_id, result)
            .await
    }

    /// Send a media attachment on a connected route
    pub async fn send_media(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
        media: &OutgoingMedia,
    ) -> SdkResult<Message> {
        let plugin = self.inner.connected_plugin(route_id)?;
        let operation_id = send_operation_id(route_id);
        let route = &plugin;

        let result = self
            .inner
            .retry
            .execute_with_retry(&operation_id, &self.inner.config.send_retry, || async move {
                route
                    .send_media(conversation_id, media)
                    .await
                    .map_err(SdkError::from)
            })
            .await;
        self.finish_send(route_id, &plugin, &operation_id, result)
            .await
    }

    async fn finish_send(
        &self,
        route_id: &RouteId,
        plugin: &Arc<dyn RoutePlugin>,
        operation_id: &str,
        result: SdkResult<Message>,
    ) -> SdkResult<Message> {
        match &result {
            Ok(message) => {
                debug!(route_id = %route_id, message_id = %message.id, "message sent");
            }
            Err(error) => {
                self.inner.retry.reset(operation_id);
                if !plugin.is_connected().await {
                    SdkInner::report_connection_lost(&self.inner, route_id, error.to_string());
                }
            }
        }
        result
    }

    /// Page through history older than `before`, caching what comes back
    pub async fn load_older_messages(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
        before: Option<&str>,
        limit: usize,
    ) -> SdkResult<Vec<Message>> {
        let plugin = self.inner.connected_plugin(route_id)?;
        let page = plugin
            .load_older_messages(conversation_id, before, limit)
            .await?;

        if !page.is_empty() {
            if let Err(error) = self.inner.storage.save_messages(&page).await {
                warn!(route_id = %route_id, error = %error, "failed to cache message page");
            }
        }
        Ok(page)
    }

    /// Messages cached by earlier history loads, newest first
    pub async fn cached_messages(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> SdkResult<Vec<Message>> {
        Ok(self
            .inner
            .storage
            .query_messages(route_id, conversation_id, before, limit)
            .await?)
    }

    // ------------------------------------------------------------------------
    // Optional interactions
    // ------------------------------------------------------------------------

    fn interactions<'a>(
        plugin: &'a Arc<dyn RoutePlugin>,
        route_id: &RouteId,
        capability: &'static str,
    ) -> SdkResult<&'a dyn RouteInteractions> {
        plugin.interactions().ok_or_else(|| {
            CapabilityError::Unsupported {
                route_id: route_id.clone(),
                capability,
            }
            .into()
        })
    }

    pub async fn send_typing(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
    ) -> SdkResult<()> {
        let plugin = self.inner.connected_plugin(route_id)?;
        Self::interactions(&plugin, route_id, "typing")?
            .send_typing(conversation_id)
            .await?;
        Ok(())
    }

    pub async fn mark_read(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> SdkResult<()> {
        let plugin = self.inner.connected_plugin(route_id)?;
        Self::interactions(&plugin, route_id, "read_receipts")?
            .mark_read(conversation_id, message_id)
            .await?;
        Ok(())
    }

    pub async fn add_reaction(
        &self,
        route_id: &RouteId,
        conversation_id: &ConversationId,
        message_id: &str,
        reaction: &str,
    ) -> SdkResult<()> {
        let plugin = self.inner.connected_plugin(route_id)?;
        Self::interactions(&plugin, route_id, "reactions")?
            .add_reaction(conversation_id, message_id, reaction)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Route state
    // ------------------------------------------------------------------------

    pub fn get_route_state(&self, route_id: &RouteId) -> RouteState {
        self.inner.state.get_state(route_id)
    }

    pub fn get_route_error(&self, route_id: &RouteId) -> Option<String> {
        self.inner.state.get_error(route_id)
    }

    pub fn is_route_connected(&self, route_id: &RouteId) -> bool {
        self.inner.state.is_connected(route_id)
    }

    /// Live state changes for one route, starting with its current state
    pub fn subscribe_route_state(&self, route_id: &RouteId) -> RouteStateSubscription {
        self.inner.state.subscribe(route_id)
    }

    /// Callback for every state change; must not change route state itself
    pub fn on_state_change<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&RouteId, RouteState) + Send + Sync + 'static,
    {
        self.inner.state.register_state_change_callback(callback)
    }

    pub fn remove_state_change_callback(&self, id: CallbackId) -> bool {
        self.inner.state.unregister_state_change_callback(id)
    }

    // ------------------------------------------------------------------------
    // Event queue
    // ------------------------------------------------------------------------

    /// Queue an event for later delivery; persisted before returning
    pub async fn queue_event(&self, event: Event) -> SdkResult<()> {
        self.inner.events.enqueue(event).await
    }

    pub fn register_event_processor(&self, processor: Arc<dyn EventProcessor>) {
        self.inner.events.register_processor(processor);
    }

    pub fn register_processing_fn<F>(&self, func: F)
    where
        F: Fn(&Event) -> Result<(), ProcessingError> + Send + Sync + 'static,
    {
        self.inner.events.register_processing_fn(func);
    }

    /// Drain a route's queue now
    pub async fn process_route_events(&self, route_id: &RouteId) -> usize {
        self.inner.events.process_events(route_id).await
    }

    pub fn get_queue_size(&self, route_id: &RouteId) -> usize {
        self.inner.events.get_queue_size(route_id)
    }

    pub fn get_total_queue_size(&self) -> usize {
        self.inner.events.get_total_queue_size()
    }

    // ------------------------------------------------------------------------
    // Reconnection
    // ------------------------------------------------------------------------

    pub fn configure_reconnection(&self, route_id: &RouteId, config: ReconnectionConfig) {
        self.inner.reconnection.configure(route_id, config);
    }

    pub fn can_reconnect(&self, route_id: &RouteId) -> bool {
        self.inner.reconnection.can_reconnect(route_id)
    }

    pub fn next_reconnection_delay(&self, route_id: &RouteId) -> Duration {
        self.inner.reconnection.get_next_delay(route_id)
    }

    // ------------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------------

    fn credential_store(&self) -> SdkResult<&Arc<dyn CredentialStore>> {
        self.inner
            .credentials
            .as_ref()
            .ok_or_else(|| SdkError::config_error("no credential store configured"))
    }

    pub async fn store_credentials(&self, route_id: &RouteId, secret: Vec<u8>) -> SdkResult<()> {
        Ok(self.credential_store()?.set(route_id, secret).await?)
    }

    pub async fn credentials(&self, route_id: &RouteId) -> SdkResult<Option<Vec<u8>>> {
        Ok(self.credential_store()?.get(route_id).await?)
    }

    pub async fn delete_credentials(&self, route_id: &RouteId) -> SdkResult<()> {
        Ok(self.credential_store()?.delete(route_id).await?)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Purge old processed events and compact storage
    pub async fn cleanup(&self) -> SdkResult<CleanupReport> {
        self.inner.cleanup().await
    }

    /// Run [`cleanup`](Self::cleanup) every `maintenance.cleanup_interval`
    ///
    /// The task stops on its own once every `ChatSdk` clone is dropped.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        maintenance::spawn(
            Arc::downgrade(&self.inner),
            self.inner.config.maintenance.cleanup_interval,
        )
    }

    // ------------------------------------------------------------------------
    // Managers
    // ------------------------------------------------------------------------

    pub fn retry_manager(&self) -> &RetryManager {
        &self.inner.retry
    }

    pub fn state_manager(&self) -> &RouteStateManager {
        &self.inner.state
    }

    pub fn reconnection_manager(&self) -> &ReconnectionManager {
        &self.inner.reconnection
    }

    pub fn event_queue(&self) -> &EventQueueManager {
        &self.inner.events
    }
}

impl fmt::Debug for ChatSdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSdk")
            .field("routes", &self.registered_routes())
            .field("retry", &self.inner.retry)
            .field("state", &self.inner.state)
            .field("reconnection", &self.inner.reconnection)
            .field("events", &self.inner.events)
            .finish()
    }
}
