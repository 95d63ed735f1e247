//! Route abstraction for the OmniChat SDK
//!
//! A route is one logical connection to a chat backend. Each platform ships a
//! plugin implementing [`RoutePlugin`]; the runtime drives it through the
//! lifecycle described by [`RouteState`] without knowing anything about the
//! platform's wire protocol.

use async_trait::async_trait;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::PluginError;
use crate::types::{ConversationId, RouteId, Timestamp};

// ----------------------------------------------------------------------------
// Route State
// ----------------------------------------------------------------------------

/// Connection lifecycle state of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RouteState {
    /// Not connected (initial state)
    #[default]
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Route is reachable
    Connected,
    /// Waiting for or running a scheduled reconnection
    Reconnecting,
    /// Teardown in progress
    Disconnecting,
    /// Last operation failed; superseded only by a later state change
    Error,
}

impl RouteState {
    /// Connecting or reconnecting
    pub fn is_transitional(&self) -> bool {
        matches!(self, RouteState::Connecting | RouteState::Reconnecting)
    }
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteState::Disconnected => "disconnected",
            RouteState::Connecting => "connecting",
            RouteState::Connected => "connected",
            RouteState::Reconnecting => "reconnecting",
            RouteState::Disconnecting => "disconnecting",
            RouteState::Error => "error",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Chat platform a route talks to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Discord,
    WhatsApp,
    Telegram,
    Slack,
    Matrix,
    Signal,
    /// Any other platform, named by the plugin
    Custom(String),
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Discord => write!(f, "discord"),
            Platform::WhatsApp => write!(f, "whatsapp"),
            Platform::Telegram => write!(f, "telegram"),
            Platform::Slack => write!(f, "slack"),
            Platform::Matrix => write!(f, "matrix"),
            Platform::Signal => write!(f, "signal"),
            Platform::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// A chat message as seen by the SDK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Platform-assigned message id
    pub id: String,
    pub route_id: RouteId,
    pub conversation_id: ConversationId,
    pub sender: String,
    pub text: String,
    pub timestamp: Timestamp,
    /// Message this one replies to, if any
    pub reply_to: Option<String>,
}

/// Media attachment handed to `send_media`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMedia {
    /// MIME content type, for example `image/png`
    pub content_type: String,
    pub file_name: Option<String>,
    pub data: Vec<u8>,
    pub caption: Option<String>,
}

// ----------------------------------------------------------------------------
// Route Plugin Contract
// ----------------------------------------------------------------------------

/// Capability contract every per-platform route implements
#[async_trait]
pub trait RoutePlugin: Send + Sync {
    /// Stable identifier of this route
    fn route_id(&self) -> RouteId;

    /// Platform this route talks to
    fn platform(&self) -> Platform;

    /// Human-readable name for UIs
    fn display_name(&self) -> String;

    /// Establish the connection
    async fn connect(&self) -> Result<(), PluginError>;

    /// Tear the connection down
    async fn disconnect(&self) -> Result<(), PluginError>;

    /// Whether the underlying transport currently considers itself connected
    async fn is_connected(&self) -> bool;

    /// Send a text message, optionally replying to another message
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<Message, PluginError>;

    /// Send a media attachment
    async fn send_media(
        &self,
        conversation_id: &ConversationId,
        media: &OutgoingMedia,
    ) -> Result<Message, PluginError>;

    /// Fetch up to `limit` messages older than `before` (newest page when `None`)
    async fn load_older_messages(
        &self,
        conversation_id: &ConversationId,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, PluginError>;

    /// Optional interaction capabilities; `None` when the platform has none
    fn interactions(&self) -> Option<&dyn RouteInteractions> {
        None
    }
}

/// Optional interactions a platform may support
#[async_trait]
pub trait RouteInteractions: Send + Sync {
    /// Show a typing indicator in a conversation
    async fn send_typing(&self, conversation_id: &ConversationId) -> Result<(), PluginError>;

    /// Mark messages up to `message_id` as read
    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> Result<(), PluginError>;

    /// React to a message
    async fn add_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), PluginError>;
}
