//! Integration tests for route lifecycle orchestration
//!
//! Drives `ChatSdk` end to end with scripted mock routes: connect retries,
//! offline queue drain on connect, background reconnection and its
//! cancellation, sends and optional capabilities.

use omnichat_core::{
    CapabilityError, ConversationId, Event, EventType, ReconnectionConfig, ReconnectionError,
    RouteId, RouteState, SdkConfig, SdkError, StateError, Timestamp,
};
use omnichat_harness::{MemoryStorage, MockRoute};
use omnichat_runtime::{ChatSdk, SdkBuilder};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn test_sdk() -> ChatSdk {
    SdkBuilder::new(Arc::new(MemoryStorage::new()))
        .with_config(SdkConfig::for_testing())
        .with_no_logging()
        .build()
        .await
        .expect("sdk builds")
}

async fn register(sdk: &ChatSdk, route: MockRoute) -> (RouteId, Arc<MockRoute>) {
    let route = Arc::new(route);
    let route_id = sdk
        .register_route(Arc::clone(&route) as _)
        .await
        .expect("route registers");
    (route_id, route)
}

fn record_states(sdk: &ChatSdk) -> Arc<Mutex<Vec<RouteState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    sdk.on_state_change(move |_, state| sink.lock().push(state));
    states
}

fn event(route_id: &RouteId, millis: u64) -> Event {
    Event::new(
        route_id.clone(),
        EventType::MessageReceived,
        Timestamp::new(millis),
        b"payload".to_vec(),
    )
}

// ----------------------------------------------------------------------------
// Connect
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connect_succeeds_after_transient_failures() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1").with_connect_failures(2)).await;
    let states = record_states(&sdk);

    sdk.connect_route(&r1).await.expect("third attempt connects");

    assert_eq!(*states.lock(), vec![RouteState::Connecting, RouteState::Connected]);
    assert_eq!(sdk.get_route_state(&r1), RouteState::Connected);
    assert_eq!(route.connect_calls(), 3);
    assert!(sdk.retry_manager().record("connect_r1").is_none());
    assert!(sdk.reconnection_manager().status(&r1).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_connect_drains_offline_queue() {
    let sdk = test_sdk().await;
    let (r1, _route) = register(&sdk, MockRoute::new("r1")).await;
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    sdk.register_processing_fn(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    sdk.connect_route(&r1).await.unwrap();
    sdk.disconnect_route(&r1).await.unwrap();
    assert_eq!(sdk.get_route_state(&r1), RouteState::Disconnected);

    for millis in 1..=3 {
        sdk.queue_event(event(&r1, millis)).await.unwrap();
    }
    assert_eq!(sdk.get_queue_size(&r1), 3);

    sdk.connect_route(&r1).await.unwrap();

    assert_eq!(delivered.load(Ordering::SeqCst), 3);
    assert_eq!(sdk.get_queue_size(&r1), 0);
    assert_eq!(sdk.event_queue().statistics().processed, 3);
}

#[tokio::test]
async fn test_unknown_and_duplicate_routes() {
    let sdk = test_sdk().await;
    let missing = RouteId::new("missing");

    let err = sdk.connect_route(&missing).await.unwrap_err();
    assert!(matches!(
        err,
        SdkError::State(StateError::RouteNotFound { .. })
    ));

    register(&sdk, MockRoute::new("r1")).await;
    let err = sdk
        .register_route(Arc::new(MockRoute::new("r1")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SdkError::State(StateError::RouteAlreadyRegistered { .. })
    ));
}

// ----------------------------------------------------------------------------
// Reconnection
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_reconnection_budget_is_exhausted() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1").always_failing()).await;
    sdk.configure_reconnection(&r1, ReconnectionConfig::with_max_attempts(2));

    let err = sdk.connect_route(&r1).await.unwrap_err();
    assert!(matches!(err, SdkError::Plugin(_)));

    // Let both background cycles run out
    tokio::time::sleep(Duration::from_secs(1)).await;

    // One direct connect plus two reconnection cycles, four calls each
    assert_eq!(route.connect_calls(), 12);
    assert_eq!(sdk.get_route_state(&r1), RouteState::Error);
    assert!(sdk.get_route_error(&r1).is_some());
    assert!(!sdk.can_reconnect(&r1));
    assert_eq!(
        sdk.reconnection_manager().trigger_reconnection(&r1),
        Err(ReconnectionError::MaxReconnectionAttemptsReached {
            route_id: r1.clone(),
            max_attempts: 2,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_fresh_connect_resets_exhausted_budget() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1").always_failing()).await;
    sdk.configure_reconnection(&r1, ReconnectionConfig::with_max_attempts(1));

    assert!(sdk.connect_route(&r1).await.is_err());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!sdk.can_reconnect(&r1));

    route.set_fail_all_connects(false);
    sdk.connect_route(&r1).await.unwrap();

    assert!(sdk.is_route_connected(&r1));
    assert!(sdk.can_reconnect(&r1));
    assert_eq!(sdk.get_route_error(&r1), None);
}

#[tokio::test(start_paused = true)]
async fn test_background_reconnection_recovers() {
    let sdk = test_sdk().await;
    // The direct connect spends four calls, the first reconnection cycle succeeds
    let (r1, route) = register(&sdk, MockRoute::new("r1").with_connect_failures(4)).await;
    let states = record_states(&sdk);

    assert!(sdk.connect_route(&r1).await.is_err());
    assert!(sdk.reconnection_manager().is_reconnecting(&r1));

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(sdk.get_route_state(&r1), RouteState::Connected);
    assert_eq!(route.connect_calls(), 5);
    assert!(sdk.reconnection_manager().status(&r1).is_none());
    assert_eq!(
        *states.lock(),
        vec![
            RouteState::Connecting,
            RouteState::Error,
            RouteState::Reconnecting,
            RouteState::Connecting,
            RouteState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnection() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1").always_failing()).await;
    sdk.configure_reconnection(
        &r1,
        ReconnectionConfig {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
            ..ReconnectionConfig::default()
        },
    );

    assert!(sdk.connect_route(&r1).await.is_err());
    let calls_before = route.connect_calls();
    assert!(sdk.reconnection_manager().is_reconnecting(&r1));

    sdk.disconnect_route(&r1).await.unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(route.connect_calls(), calls_before);
    assert_eq!(sdk.get_route_state(&r1), RouteState::Disconnected);
    assert!(!sdk.reconnection_manager().is_reconnecting(&r1));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_reconnection_leaves_route_in_error() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1").always_failing()).await;
    sdk.configure_reconnection(&r1, ReconnectionConfig::disabled());

    assert!(sdk.connect_route(&r1).await.is_err());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(route.connect_calls(), 4);
    assert_eq!(sdk.get_route_state(&r1), RouteState::Error);
}

#[tokio::test(start_paused = true)]
async fn test_reported_connection_loss_reconnects() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1")).await;
    sdk.connect_route(&r1).await.unwrap();

    route.simulate_drop();
    assert!(sdk.report_connection_lost(&r1, "socket closed").unwrap());
    assert_eq!(sdk.get_route_error(&r1).as_deref(), Some("socket closed"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sdk.get_route_state(&r1), RouteState::Connected);
    assert_eq!(route.connect_calls(), 2);

    sdk.disconnect_route(&r1).await.unwrap();
    assert!(!sdk.report_connection_lost(&r1, "late report").unwrap());
    assert_eq!(sdk.get_route_state(&r1), RouteState::Disconnected);
}

// ----------------------------------------------------------------------------
// State subscriptions
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_subscription_follows_connect() {
    let sdk = test_sdk().await;
    let (r1, _route) = register(&sdk, MockRoute::new("r1").with_connect_failures(1)).await;
    let (r2, _other) = register(&sdk, MockRoute::new("r2")).await;

    let mut states = sdk.subscribe_route_state(&r1);
    sdk.connect_route(&r2).await.unwrap();
    sdk.connect_route(&r1).await.unwrap();

    assert_eq!(states.next().await, Some(RouteState::Disconnected));
    assert_eq!(states.next().await, Some(RouteState::Connecting));
    assert_eq!(states.next().await, Some(RouteState::Connected));
    assert_eq!(states.try_next(), None);
}

#[tokio::test]
async fn test_removed_callback_is_not_called() {
    let sdk = test_sdk().await;
    let (r1, _route) = register(&sdk, MockRoute::new("r1")).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let id = sdk.on_state_change(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(sdk.remove_state_change_callback(id));
    sdk.connect_route(&r1).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

// ----------------------------------------------------------------------------
// Messaging
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_send_requires_connected_route() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1")).await;

    let err = sdk
        .send_message(&r1, &ConversationId::new("general"), "hello", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SdkError::State(StateError::RouteNotConnected { .. })
    ));
    assert_eq!(route.send_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_retries_transient_failures() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1")).await;
    sdk.connect_route(&r1).await.unwrap();
    route.fail_next_sends(2, false);

    let message = sdk
        .send_message(&r1, &ConversationId::new("general"), "hello", Some("m-1"))
        .await
        .unwrap();

    assert_eq!(message.text, "hello");
    assert_eq!(message.reply_to.as_deref(), Some("m-1"));
    assert_eq!(route.send_calls(), 3);
    assert_eq!(sdk.retry_manager().tracked_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sends_do_not_share_budget() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1")).await;
    sdk.connect_route(&r1).await.unwrap();
    route.fail_next_sends(3, false);

    let general = ConversationId::new("general");
    let (first, second) = tokio::join!(
        sdk.send_message(&r1, &general, "one", None),
        sdk.send_message(&r1, &general, "two", None),
    );

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(route.sent_messages().len(), 2);
    assert_eq!(sdk.retry_manager().tracked_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_with_dropped_transport_schedules_reconnection() {
    let sdk = test_sdk().await;
    let (r1, route) = register(&sdk, MockRoute::new("r1")).await;
    sdk.connect_route(&r1).await.unwrap();
    route.fail_next_sends(1, true);

    let err = sdk
        .send_message(&r1, &ConversationId::new("general"), "hello", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::Plugin(_)));
    assert!(sdk.reconnection_manager().is_reconnecting(&r1));
    assert_eq!(sdk.retry_manager().tracked_operations(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sdk.is_route_connected(&r1));
}

#[tokio::test]
async fn test_optional_capabilities() {
    let sdk = test_sdk().await;
    let (plain, _) = register(&sdk, MockRoute::new("plain")).await;
    let (rich, rich_route) = register(&sdk, MockRoute::new("rich").with_interactions()).await;
    let general = ConversationId::new("general");

    let err = sdk.send_typing(&rich, &general).await.unwrap_err();
    assert!(matches!(
        err,
        SdkError::State(StateError::RouteNotConnected { .. })
    ));

    sdk.connect_route(&plain).await.unwrap();
    sdk.connect_route(&rich).await.unwrap();

    let err = sdk.add_reaction(&plain, &general, "m-1", "+1").await.unwrap_err();
    assert!(matches!(
        err,
        SdkError::Capability(CapabilityError::Unsupported {
            capability: "reactions",
            ..
        })
    ));

    sdk.send_typing(&rich, &general).await.unwrap();
    sdk.mark_read(&rich, &general, "m-1").await.unwrap();
    sdk.add_reaction(&rich, &general, "m-1", "+1").await.unwrap();

    let calls = rich_route.mock_interactions().unwrap().calls();
    assert_eq!(
        calls,
        vec![
            "typing:general",
            "read:general:m-1",
            "react:general:m-1:+1",
        ]
    );
}

// ----------------------------------------------------------------------------
// Teardown
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_shutdown_disconnects_everything() {
    let sdk = test_sdk().await;
    let (r1, route1) = register(&sdk, MockRoute::new("r1")).await;
    let (r2, route2) = register(&sdk, MockRoute::new("r2")).await;
    let (r3, route3) = register(&sdk, MockRoute::new("r3").always_failing()).await;

    sdk.connect_route(&r1).await.unwrap();
    sdk.connect_route(&r2).await.unwrap();
    assert!(sdk.connect_route(&r3).await.is_err());
    let r3_calls = route3.connect_calls();

    sdk.shutdown().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    for route_id in [&r1, &r2, &r3] {
        assert_eq!(sdk.get_route_state(route_id), RouteState::Disconnected);
    }
    assert_eq!(route1.disconnect_calls(), 1);
    assert_eq!(route2.disconnect_calls(), 1);
    assert_eq!(route3.connect_calls(), r3_calls);
}
