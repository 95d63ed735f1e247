//! Integration tests for durable state
//!
//! Restart round-trips share one `MemoryStorage` between two SDK instances.
//! Also covers queue admission, retention cleanup, the maintenance task, the
//! message cache, credentials and route unregistration.

use omnichat_core::{
    ConversationId, Event, EventId, EventType, Message, ProcessingError, QueueError,
    ReconnectionConfig, RouteId, RouteState, SdkConfig, SdkError, Timestamp,
};
use omnichat_harness::{ManualTimeSource, MemoryCredentialStore, MemoryStorage, MockRoute};
use omnichat_runtime::{ChatSdk, SdkBuilder};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

async fn sdk_on(storage: &Arc<MemoryStorage>, config: SdkConfig) -> ChatSdk {
    SdkBuilder::new(Arc::clone(storage))
        .with_config(config)
        .with_no_logging()
        .build()
        .await
        .expect("sdk builds")
}

fn event(route_id: &RouteId, millis: u64) -> Event {
    Event::new(
        route_id.clone(),
        EventType::MessageReceived,
        Timestamp::new(millis),
        Vec::new(),
    )
}

fn message(id: &str, conversation: &str, millis: u64) -> Message {
    Message {
        id: id.into(),
        route_id: RouteId::new("r1"),
        conversation_id: ConversationId::new(conversation),
        sender: "alice".into(),
        text: format!("message {id}"),
        timestamp: Timestamp::new(millis),
        reply_to: None,
    }
}

// ----------------------------------------------------------------------------
// Restart
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_unprocessed_events_survive_restart_in_order() {
    let storage = Arc::new(MemoryStorage::new());
    let r1 = RouteId::new("r1");
    let r2 = RouteId::new("r2");

    let events: Vec<Event> = (1..=4).map(|millis| event(&r1, millis)).collect();
    let rejected = events[2].id;
    let late = event(&r2, 5);

    {
        let sdk = sdk_on(&storage, SdkConfig::for_testing()).await;
        sdk.register_processing_fn(move |event| {
            if event.id == rejected {
                Err(ProcessingError::new("handler crashed"))
            } else {
                Ok(())
            }
        });
        for event in events.iter().cloned() {
            sdk.queue_event(event).await.unwrap();
        }
        assert_eq!(sdk.process_route_events(&r1).await, 3);
        sdk.queue_event(late.clone()).await.unwrap();
    }

    let restarted = sdk_on(&storage, SdkConfig::for_testing()).await;
    assert_eq!(restarted.get_total_queue_size(), 2);
    assert_eq!(restarted.get_queue_size(&r1), 1);
    assert_eq!(restarted.get_queue_size(&r2), 1);

    let replayed: Arc<Mutex<Vec<EventId>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replayed);
    restarted.register_processing_fn(move |event| {
        sink.lock().push(event.id);
        Ok(())
    });
    assert_eq!(restarted.event_queue().process_all_events().await, 2);
    assert_eq!(*replayed.lock(), vec![rejected, late.id]);
}

#[tokio::test]
async fn test_route_records_are_persisted() {
    let storage = Arc::new(MemoryStorage::new());
    let sdk = sdk_on(&storage, SdkConfig::for_testing()).await;
    sdk.register_route(Arc::new(MockRoute::new("r1")))
        .await
        .unwrap();
    drop(sdk);

    let restarted = sdk_on(&storage, SdkConfig::for_testing()).await;
    let records = restarted.persisted_routes().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].route_id, RouteId::new("r1"));
    assert_eq!(records[0].display_name, "Mock r1");
    assert!(restarted.registered_routes().is_empty());
}

// ----------------------------------------------------------------------------
// Queue admission
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_queue_rejects_past_capacity() {
    let storage = Arc::new(MemoryStorage::new());
    let mut config = SdkConfig::for_testing();
    config.event_queue.max_queue_size = 2;
    let sdk = sdk_on(&storage, config).await;
    let r1 = RouteId::new("r1");

    sdk.queue_event(event(&r1, 1)).await.unwrap();
    sdk.queue_event(event(&r1, 2)).await.unwrap();
    let err = sdk.queue_event(event(&r1, 3)).await.unwrap_err();

    assert!(matches!(
        err,
        SdkError::Queue(QueueError::EventQueueFull { capacity: 2 })
    ));
    assert_eq!(sdk.get_total_queue_size(), 2);
    assert_eq!(storage.all_events().len(), 2);
}

// ----------------------------------------------------------------------------
// Maintenance
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_cleanup_purges_processed_events_past_retention() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualTimeSource::new(Timestamp::new(0)));
    let sdk = SdkBuilder::new(Arc::clone(&storage))
        .with_config(SdkConfig::for_testing())
        .with_time_source(Arc::clone(&clock) as _)
        .build()
        .await
        .unwrap();
    let r1 = RouteId::new("r1");

    sdk.queue_event(event(&r1, 1_000)).await.unwrap();
    assert_eq!(sdk.process_route_events(&r1).await, 1);
    sdk.queue_event(event(&r1, 2_000)).await.unwrap();

    clock.advance(Duration::from_secs(8 * 24 * 60 * 60));
    let report = sdk.cleanup().await.unwrap();

    assert_eq!(report.events_purged, 1);
    assert_eq!(storage.compaction_count(), 1);
    assert_eq!(storage.all_events().len(), 1);
    assert!(!storage.all_events()[0].processed);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_task_runs_on_interval() {
    let storage = Arc::new(MemoryStorage::new());
    let mut config = SdkConfig::for_testing();
    config.maintenance.cleanup_interval = Duration::from_secs(60);
    let sdk = sdk_on(&storage, config).await;

    let task = sdk.spawn_maintenance();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(storage.compaction_count(), 0);

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(storage.compaction_count(), 2);

    drop(sdk);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(task.is_finished());
}

// ----------------------------------------------------------------------------
// Message cache
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_history_pages_are_cached() {
    let storage = Arc::new(MemoryStorage::new());
    let sdk = sdk_on(&storage, SdkConfig::for_testing()).await;
    let route = MockRoute::new("r1").with_history(vec![
        message("m1", "general", 100),
        message("m2", "general", 200),
        message("m3", "general", 300),
        message("x1", "random", 250),
    ]);
    let r1 = sdk.register_route(Arc::new(route)).await.unwrap();
    let general = ConversationId::new("general");

    let err = sdk
        .load_older_messages(&r1, &general, None, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::State(_)));

    sdk.connect_route(&r1).await.unwrap();
    let newest = sdk
        .load_older_messages(&r1, &general, None, 2)
        .await
        .unwrap();
    let ids: Vec<&str> = newest.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m3", "m2"]);

    let older = sdk
        .load_older_messages(&r1, &general, Some("m2"), 2)
        .await
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].id, "m1");
    assert_eq!(storage.message_count(), 3);

    let cached = sdk
        .cached_messages(&r1, &general, Some(Timestamp::new(300)), 10)
        .await
        .unwrap();
    let ids: Vec<&str> = cached.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m1"]);
}

// ----------------------------------------------------------------------------
// Credentials and unregister
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_credentials_pass_through() {
    let storage = Arc::new(MemoryStorage::new());
    let credentials = Arc::new(MemoryCredentialStore::new());
    let sdk = SdkBuilder::new(storage)
        .with_credential_store(Arc::clone(&credentials) as _)
        .build()
        .await
        .unwrap();
    let r1 = RouteId::new("r1");

    sdk.store_credentials(&r1, b"token".to_vec()).await.unwrap();
    assert_eq!(sdk.credentials(&r1).await.unwrap(), Some(b"token".to_vec()));
    assert_eq!(credentials.len(), 1);

    sdk.delete_credentials(&r1).await.unwrap();
    assert_eq!(sdk.credentials(&r1).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_unregister_removes_everything_for_the_route() {
    let storage = Arc::new(MemoryStorage::new());
    let credentials = Arc::new(MemoryCredentialStore::new());
    let sdk = SdkBuilder::new(Arc::clone(&storage))
        .with_config(SdkConfig::for_testing())
        .with_credential_store(Arc::clone(&credentials) as _)
        .build()
        .await
        .unwrap();

    let keep = sdk
        .register_route(Arc::new(MockRoute::new("keep")))
        .await
        .unwrap();
    let route = Arc::new(MockRoute::new("gone"));
    let gone = sdk.register_route(Arc::clone(&route) as _).await.unwrap();

    sdk.connect_route(&gone).await.unwrap();
    sdk.queue_event(event(&gone, 1)).await.unwrap();
    sdk.queue_event(event(&gone, 2)).await.unwrap();
    sdk.queue_event(event(&keep, 3)).await.unwrap();
    sdk.store_credentials(&gone, b"secret".to_vec()).await.unwrap();
    sdk.configure_reconnection(&gone, ReconnectionConfig::disabled());
    assert_eq!(sdk.get_queue_size(&gone), 2);
    assert!(!sdk.can_reconnect(&gone));

    sdk.unregister_route(&gone).await.unwrap();

    assert_eq!(sdk.registered_routes(), vec![keep.clone()]);
    assert_eq!(route.disconnect_calls(), 1);
    assert_eq!(sdk.get_route_state(&gone), RouteState::Disconnected);
    assert!(sdk.state_manager().snapshot(&gone).is_none());
    assert!(storage.events_for(&gone).is_empty());
    assert_eq!(sdk.get_total_queue_size(), 1);
    assert!(storage.route_record(&gone).is_none());
    assert!(storage.route_record(&keep).is_some());
    assert!(credentials.is_empty());
    assert!(sdk.can_reconnect(&gone));

    let err = sdk.connect_route(&gone).await.unwrap_err();
    assert!(matches!(err, SdkError::State(_)));
}
