//! Durable event model
//!
//! Events are produced by route plugins or the SDK before connectivity is
//! known, persisted on enqueue, and replayed through processing callbacks once
//! their route is reachable.

use serde::{Deserialize, Serialize};

use crate::types::{EventId, RouteId, Timestamp};

/// Closed set of event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    MessageReceived,
    MessageSent,
    MessageEdited,
    MessageDeleted,
    ReactionAdded,
    ReactionRemoved,
    TypingIndicator,
    ReadReceipt,
    ConversationUpdated,
    PresenceChanged,
}

/// A queued event awaiting delivery to in-process consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub route_id: RouteId,
    pub event_type: EventType,
    pub timestamp: Timestamp,
    /// Opaque payload bytes, never interpreted by the SDK
    pub payload: Vec<u8>,
    /// Flips to true once, after every processing callback succeeded
    pub processed: bool,
}

impl Event {
    /// Create an unprocessed event with a fresh id
    pub fn new(
        route_id: RouteId,
        event_type: EventType,
        timestamp: Timestamp,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: EventId::new(),
            route_id,
            event_type,
            timestamp,
            payload,
            processed: false,
        }
    }

    /// Create an event stamped with the current wall-clock time
    pub fn now(route_id: RouteId, event_type: EventType, payload: Vec<u8>) -> Self {
        Self::new(route_id, event_type, Timestamp::now(), payload)
    }

    /// Create an event whose payload is the JSON encoding of `value`
    pub fn with_json<T: Serialize>(
        route_id: RouteId,
        event_type: EventType,
        timestamp: Timestamp,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            route_id,
            event_type,
            timestamp,
            serde_json::to_vec(value)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_unprocessed() {
        let event = Event::new(
            RouteId::new("r1"),
            EventType::MessageReceived,
            Timestamp::new(10),
            b"hi".to_vec(),
        );
        assert!(!event.processed);
        assert_eq!(event.timestamp, Timestamp::new(10));
    }

    #[test]
    fn test_json_payload() {
        let event = Event::with_json(
            RouteId::new("r1"),
            EventType::ReactionAdded,
            Timestamp::new(1),
            &vec!["thumbs_up"],
        )
        .unwrap();
        let decoded: Vec<String> = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(decoded, vec!["thumbs_up".to_string()]);
    }
}
