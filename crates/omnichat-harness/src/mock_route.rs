//! Mock Route for Testing
//!
//! A scriptable [`RoutePlugin`] for exercising the runtime without a real
//! platform. Connection and send failures can be queued up front or toggled
//! at runtime, and every call is counted for assertions.

use async_trait::async_trait;
use omnichat_core::{
    ConversationId, Message, OutgoingMedia, Platform, PluginError, RouteId, RouteInteractions,
    RoutePlugin, Timestamp,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

// ----------------------------------------------------------------------------
// Mock Route
// ----------------------------------------------------------------------------

/// Scriptable route plugin
#[derive(Debug)]
pub struct MockRoute {
    route_id: RouteId,
    platform: Platform,
    display_name: String,
    connected: AtomicBool,
    /// Connect calls that fail before one succeeds
    pending_connect_failures: AtomicU32,
    fail_all_connects: AtomicBool,
    pending_send_failures: AtomicU32,
    /// Whether a failed send also drops the connection
    drop_on_send_failure: AtomicBool,
    connect_latency: Mutex<Option<Duration>>,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    send_calls: AtomicU32,
    next_message_id: AtomicU64,
    sent: Mutex<Vec<Message>>,
    history: Mutex<Vec<Message>>,
    interactions: Option<MockInteractions>,
}

impl MockRoute {
    /// A custom-platform route that always connects and sends successfully
    pub fn new(route_id: impl Into<RouteId>) -> Self {
        let route_id = route_id.into();
        Self {
            display_name: format!("Mock {route_id}"),
            route_id,
            platform: Platform::Custom("mock".into()),
            connected: AtomicBool::new(false),
            pending_connect_failures: AtomicU32::new(0),
            fail_all_connects: AtomicBool::new(false),
            pending_send_failures: AtomicU32::new(0),
            drop_on_send_failure: AtomicBool::new(false),
            connect_latency: Mutex::new(None),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            send_calls: AtomicU32::new(0),
            next_message_id: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            interactions: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Fail the next `count` connect calls, then succeed
    pub fn with_connect_failures(self, count: u32) -> Self {
        self.pending_connect_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail every connect call until told otherwise
    pub fn always_failing(self) -> Self {
        self.fail_all_connects.store(true, Ordering::SeqCst);
        self
    }

    /// Seed the history returned by `load_older_messages`
    pub fn with_history(self, messages: Vec<Message>) -> Self {
        *self.history.lock() = messages;
        self
    }

    /// Advertise typing/read/reaction support
    pub fn with_interactions(mut self) -> Self {
        self.interactions = Some(MockInteractions::default());
        self
    }

    pub fn set_fail_all_connects(&self, fail: bool) {
        self.fail_all_connects.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_failures(&self, count: u32) {
        self.pending_connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_connect_latency(&self, latency: Option<Duration>) {
        *self.connect_latency.lock() = latency;
    }

    /// Fail the next `count` sends; optionally drop the connection when they fail
    pub fn fail_next_sends(&self, count: u32, drop_connection: bool) {
        self.pending_send_failures.store(count, Ordering::SeqCst);
        self.drop_on_send_failure
            .store(drop_connection, Ordering::SeqCst);
    }

    /// Simulate the transport dropping underneath the SDK
    pub fn simulate_drop(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn mock_interactions(&self) -> Option<&MockInteractions> {
        self.interactions.as_ref()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn record_send(
        &self,
        conversation_id: &ConversationId,
        text: String,
        reply_to: Option<&str>,
    ) -> Result<Message, PluginError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PluginError::new(self.route_id.clone(), "not connected"));
        }
        if Self::take_failure(&self.pending_send_failures) {
            if self.drop_on_send_failure.load(Ordering::SeqCst) {
                self.connected.store(false, Ordering::SeqCst);
            }
            return Err(PluginError::new(self.route_id.clone(), "send failed"));
        }

        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id: format!("{}-{id}", self.route_id),
            route_id: self.route_id.clone(),
            conversation_id: conversation_id.clone(),
            sender: "me".into(),
            text,
            timestamp: Timestamp::now(),
            reply_to: reply_to.map(str::to_owned),
        };
        self.sent.lock().push(message.clone());
        Ok(message)
    }
}

#[async_trait]
impl RoutePlugin for MockRoute {
    fn route_id(&self) -> RouteId {
        self.route_id.clone()
    }

    fn platform(&self) -> Platform {
        self.platform.clone()
    }

    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    async fn connect(&self) -> Result<(), PluginError> {
        let attempt = self.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *self.connect_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.fail_all_connects.load(Ordering::SeqCst)
            || Self::take_failure(&self.pending_connect_failures)
        {
            debug!(route_id = %self.route_id, attempt, "mock connect failing");
            return Err(PluginError::new(
                self.route_id.clone(),
                format!("connection refused (attempt {attempt})"),
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PluginError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<Message, PluginError> {
        self.record_send(conversation_id, text.to_owned(), reply_to)
    }

    async fn send_media(
        &self,
        conversation_id: &ConversationId,
        media: &OutgoingMedia,
    ) -> Result<Message, PluginError> {
        let text = media
            .caption
            .clone()
            .unwrap_or_else(|| format!("[{}; {} bytes]", media.content_type, media.data.len()));
        self.record_send(conversation_id, text, None)
    }

    async fn load_older_messages(
        &self,
        conversation_id: &ConversationId,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, PluginError> {
        let history = self.history.lock();
        let mut page: Vec<Message> = history
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect();
        page.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(anchor) = before {
            if let Some(pos) = page.iter().position(|m| m.id == anchor) {
                page.drain(..=pos);
            }
        }
        page.truncate(limit);
        Ok(page)
    }

    fn interactions(&self) -> Option<&dyn RouteInteractions> {
        self.interactions
            .as_ref()
            .map(|interactions| interactions as &dyn RouteInteractions)
    }
}

// ----------------------------------------------------------------------------
// Mock Interactions
// ----------------------------------------------------------------------------

/// Records optional-capability calls as readable strings
#[derive(Debug, Default)]
pub struct MockInteractions {
    calls: Mutex<Vec<String>>,
}

impl MockInteractions {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RouteInteractions for MockInteractions {
    async fn send_typing(&self, conversation_id: &ConversationId) -> Result<(), PluginError> {
        self.calls.lock().push(format!("typing:{conversation_id}"));
        Ok(())
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> Result<(), PluginError> {
        self.calls
            .lock()
            .push(format!("read:{conversation_id}:{message_id}"));
        Ok(())
    }

    async fn add_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), PluginError> {
        self.calls
            .lock()
            .push(format!("react:{conversation_id}:{message_id}:{reaction}"));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let route = MockRoute::new("r1").with_connect_failures(2);
        assert!(route.connect().await.is_err());
        assert!(route.connect().await.is_err());
        assert!(route.connect().await.is_ok());
        assert!(route.is_connected().await);
        assert_eq!(route.connect_calls(), 3);
    }

    #[tokio::test]
    async fn test_send_failure_can_drop_connection() {
        let route = MockRoute::new("r1");
        route.connect().await.unwrap();
        route.fail_next_sends(1, true);

        let conversation = ConversationId::new("c1");
        assert!(route.send_message(&conversation, "hi", None).await.is_err());
        assert!(!route.is_connected().await);
    }

    #[tokio::test]
    async fn test_history_paging() {
        let conversation = ConversationId::new("c1");
        let history: Vec<Message> = (1..=5)
            .map(|n| Message {
                id: format!("m{n}"),
                route_id: RouteId::new("r1"),
                conversation_id: conversation.clone(),
                sender: "them".into(),
                text: format!("message {n}"),
                timestamp: Timestamp::new(n),
                reply_to: None,
            })
            .collect();
        let route = MockRoute::new("r1").with_history(history);

        let page = route
            .load_older_messages(&conversation, Some("m4"), 2)
            .await
            .unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2"]);
    }
}
