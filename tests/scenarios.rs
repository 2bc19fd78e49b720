//! End-to-end scenarios over the scripted in-memory endpoint.
//!
//! Every test runs on a paused clock, so backoff and grace windows elapse
//! instantly and deterministically.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use common::{
    FakeTransport, Step, client_with, collector, seqs, sequenced, settle, test_options,
    wait_for_state,
};
use fleet_realtime::{
    ChannelKey, ConnectionState, Error, RealtimeClient, SharedToken, Transport, Unsubscribe,
};

fn tracking() -> ChannelKey {
    ChannelKey::new("task.tracking", [("taskId", "T1")])
}

fn positions() -> ChannelKey {
    ChannelKey::new("fleet.positions", [("fleetId", "F1")])
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_task_tracking_drops_out_of_order_duplicate() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();

    let (callback, seen) = collector();
    let _sub = client
        .subscribe("task.tracking", [("taskId", "T1")], callback)
        .unwrap();

    for seq in [1, 2, 1, 3] {
        transport.push(sequenced(&tracking(), seq));
    }
    settle().await;

    verbose_println!("delivered: {:?}", seqs(&seen));
    assert_eq!(seqs(&seen), vec![1, 2, 3]);
    assert_eq!(client.router_stats().duplicates_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_messages_dropped_across_reconnect() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();

    let (callback, seen) = collector();
    let _sub = client.subscribe_key(tracking(), callback).unwrap();

    transport.push(sequenced(&tracking(), 5));
    settle().await;

    transport.drop_connection();
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    for seq in [4, 5, 6] {
        transport.push(sequenced(&tracking(), seq));
    }
    settle().await;

    assert_eq!(seqs(&seen), vec![5, 6]);
}

// ============================================================================
// Ref-counting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shared_channel_one_subscribe_one_unsubscribe() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();

    let (first_cb, first) = collector();
    let (second_cb, second) = collector();
    let a = client
        .subscribe("fleet.positions", [("fleetId", "F1")], first_cb)
        .unwrap();
    let b = client
        .subscribe("fleet.positions", [("fleetId", "F1")], second_cb)
        .unwrap();

    assert_eq!(transport.subscribes(&positions()), 1);

    transport.push(sequenced(&positions(), 1));
    settle().await;
    assert_eq!(seqs(&first), vec![1]);
    assert_eq!(seqs(&second), vec![1]);

    a.unsubscribe();
    b.unsubscribe();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(transport.unsubscribes(&positions()), 1);
    assert!(client.subscription(&positions()).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_twice_same_as_once() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();

    let (keep_cb, kept) = collector();
    let (drop_cb, dropped) = collector();
    let _keep = client.subscribe_key(positions(), keep_cb).unwrap();
    let leave = client.subscribe_key(positions(), drop_cb).unwrap();

    leave.unsubscribe();
    leave.unsubscribe();
    assert!(!leave.is_active());

    let info = client.subscription(&positions()).unwrap();
    assert_eq!(info.ref_count, 1);

    transport.push(sequenced(&positions(), 1));
    settle().await;
    assert_eq!(seqs(&kept), vec![1]);
    assert!(dropped.lock().is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.unsubscribes(&positions()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_remount_within_grace_window_has_no_round_trip() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();

    let (callback, _) = collector();
    let first = client.subscribe_key(positions(), callback).unwrap();
    drop(first);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let (callback, seen) = collector();
    let _second = client.subscribe_key(positions(), callback).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.subscribes(&positions()), 1);
    assert_eq!(transport.unsubscribes(&positions()), 0);

    transport.push(sequenced(&positions(), 1));
    settle().await;
    assert_eq!(seqs(&seen), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_before_connect_is_flushed() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());

    let (callback, seen) = collector();
    let _sub = client.subscribe_key(tracking(), callback).unwrap();
    assert!(client.subscription(&tracking()).unwrap().pending_send);
    assert_eq!(transport.dials(), 0);

    client.connect("token").await.unwrap();
    assert_eq!(transport.subscribes(&tracking()), 1);

    transport.push(sequenced(&tracking(), 1));
    settle().await;
    assert_eq!(seqs(&seen), vec![1]);
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_restores_every_live_subscription() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();

    let alerts = ChannelKey::bare("alerts");
    let (cb, _) = collector();
    let _a = client.subscribe_key(tracking(), cb).unwrap();
    let (cb, _) = collector();
    let _b = client.subscribe_key(positions(), cb).unwrap();
    let (cb, _) = collector();
    client.subscribe_key(alerts.clone(), cb).unwrap().unsubscribe();

    transport.drop_connection();
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    assert_eq!(transport.subscribes(&tracking()), 2);
    assert_eq!(transport.subscribes(&positions()), 2);
    assert_eq!(transport.subscribes(&alerts), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.unsubscribes(&alerts), 0);
    assert!(client.subscription(&alerts).is_none());
    assert_eq!(client.connection_status().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_retries() {
    let transport = FakeTransport::scripted([Step::Hang], Step::Accept);
    let client = client_with(&transport, test_options());
    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();

    let err = client.connect("token").await.unwrap_err();
    assert!(err.is_timeout());

    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(transport.dials(), 2);
    assert_eq!(transport.subscribes(&tracking()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_reports_failed() {
    let transport = FakeTransport::scripted([], Step::Refuse);
    let client = client_with(&transport, test_options());
    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();

    assert!(client.connect("token").await.is_err());
    wait_for_state(&client, ConnectionState::Failed).await;

    assert_eq!(transport.dials(), 5);
    let status = client.connection_status();
    assert!(status.last_error.unwrap().contains("5 attempts"));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.dials(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_status_observer_sees_reconnecting() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();
    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();

    let observed = Arc::new(Mutex::new(Vec::new()));
    let mut status = client.watch_status();
    let log = Arc::clone(&observed);
    let observer = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = status.borrow_and_update().state;
            let mut log = log.lock();
            if log.last() != Some(&state) {
                log.push(state);
            }
            if state == ConnectionState::Connected {
                break;
            }
        }
    });

    transport.drop_connection();
    observer.await.unwrap();

    assert_eq!(
        observed.lock().as_slice(),
        [ConnectionState::Reconnecting, ConnectionState::Connected]
    );
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_token_is_terminal_until_replaced() {
    let transport = FakeTransport::scripted([Step::Reject("token expired")], Step::Accept);
    let client = client_with(&transport, test_options());
    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();

    let err = client.connect("stale").await.unwrap_err();
    assert!(err.is_auth_failure());

    let status = client.connection_status();
    assert_eq!(status.state, ConnectionState::Failed);
    assert!(status.last_error.unwrap().contains("token expired"));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.dials(), 1);

    client.connect("fresh").await.unwrap();
    assert_eq!(transport.subscribes(&tracking()), 1);
    assert!(transport.last_url().unwrap().as_str().ends_with("token=fresh"));
}

#[tokio::test(start_paused = true)]
async fn test_logout_while_connected_stops_reconnecting() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();
    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();

    client.clear_token().await;

    let status = client.connection_status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!status.has_token);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.dials(), 1);

    client.connect("next").await.unwrap();
    assert_eq!(transport.subscribes(&tracking()), 2);
}

#[tokio::test(start_paused = true)]
async fn test_token_rotation_cycles_connection() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("first").await.unwrap();
    let (cb, _) = collector();
    let _sub = client.subscribe_key(positions(), cb).unwrap();

    client.connect("first").await.unwrap();
    assert_eq!(transport.dials(), 1);

    client.connect("second").await.unwrap();
    assert_eq!(transport.dials(), 2);
    assert_eq!(transport.subscribes(&positions()), 2);
    assert!(transport.last_url().unwrap().as_str().ends_with("token=second"));
}

#[tokio::test(start_paused = true)]
async fn test_token_source_dials_on_first_subscription() {
    let transport = FakeTransport::new();
    let session = SharedToken::new();
    session.set("from-session");

    let client = RealtimeClient::builder()
        .endpoint("wss://realtime.test/socket")
        .shared_transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .token_source(session.clone())
        .options(test_options())
        .build()
        .unwrap();

    settle().await;
    assert_eq!(transport.dials(), 0);
    assert!(client.connection_status().has_token);

    let (cb, _) = collector();
    let sub = client.subscribe_key(tracking(), cb).unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(transport.subscribes(&tracking()), 1);

    // No subscriptions left: grace window, then idle timeout closes the link
    sub.unsubscribe();
    wait_for_state(&client, ConnectionState::Disconnected).await;
    assert_eq!(transport.unsubscribes(&tracking()), 1);
}

fn client_with_session(transport: &Arc<FakeTransport>, session: &SharedToken) -> RealtimeClient {
    RealtimeClient::builder()
        .endpoint("wss://realtime.test/socket")
        .shared_transport(Arc::clone(transport) as Arc<dyn Transport>)
        .token_source(session.clone())
        .options(test_options())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_session_logout_disconnects() {
    let transport = FakeTransport::new();
    let session = SharedToken::new();
    session.set("t1");
    let client = client_with_session(&transport, &session);

    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    session.clear();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(client.connection_status().state, ConnectionState::Disconnected);
    assert!(!client.connection_status().has_token);
    assert_eq!(transport.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_rotation_redials_and_resubscribes() {
    let transport = FakeTransport::new();
    let session = SharedToken::new();
    session.set("t1");
    let client = client_with_session(&transport, &session);

    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    session.set("t2");
    settle().await;

    assert_eq!(client.connection_status().state, ConnectionState::Connected);
    assert_eq!(transport.dials(), 2);
    let url = transport.last_url().unwrap();
    assert!(url.as_str().ends_with("token=t2"), "{url}");
    assert_eq!(transport.subscribes(&tracking()), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_login_dials_waiting_subscription() {
    let transport = FakeTransport::new();
    let session = SharedToken::new();
    let client = client_with_session(&transport, &session);

    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();
    settle().await;
    assert_eq!(transport.dials(), 0);

    session.set("t1");
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(client.connection_status().state, ConnectionState::Connected);
    assert_eq!(transport.dials(), 1);
    assert_eq!(transport.subscribes(&tracking()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_session_token_keeps_connection() {
    let transport = FakeTransport::new();
    let session = SharedToken::new();
    session.set("t1");
    let client = client_with_session(&transport, &session);

    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    client.connect("t1").await.unwrap();
    settle().await;

    assert_eq!(transport.dials(), 1);
    assert_eq!(transport.subscribes(&tracking()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_token_stays_disconnected_silently() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());

    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let status = client.connection_status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.last_error.is_none());
    assert_eq!(transport.dials(), 0);
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failing_consumer_does_not_affect_others() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();

    let _bad = client
        .subscribe_key(tracking(), |_: &str, _: &Value| panic!("view crashed"))
        .unwrap();
    let (cb, seen) = collector();
    let _good = client.subscribe_key(tracking(), cb).unwrap();

    transport.push(sequenced(&tracking(), 1));
    transport.push(sequenced(&tracking(), 2));
    settle().await;

    assert_eq!(seqs(&seen), vec![1, 2]);
    assert_eq!(client.router_stats().callback_failures, 2);
    assert_eq!(client.connection_status().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_and_unknown_messages_dropped() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();
    let (cb, seen) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();

    transport.push_raw("{ definitely not json");
    transport.push(sequenced(&ChannelKey::bare("unrelated"), 1));
    transport.push(sequenced(&tracking(), 1));
    settle().await;

    let stats = client.router_stats();
    assert_eq!(stats.malformed_dropped, 1);
    assert_eq!(stats.unknown_channel_dropped, 1);
    assert_eq!(seqs(&seen), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_from_inside_callback() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();

    let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
    let hits = Arc::new(Mutex::new(0usize));

    let inner_slot = Arc::clone(&slot);
    let inner_hits = Arc::clone(&hits);
    let guard = client
        .subscribe_key(tracking(), move |_: &str, _: &Value| {
            *inner_hits.lock() += 1;
            if let Some(guard) = inner_slot.lock().take() {
                guard.unsubscribe();
            }
        })
        .unwrap();
    *slot.lock() = Some(guard);

    transport.push(sequenced(&tracking(), 1));
    transport.push(sequenced(&tracking(), 2));
    settle().await;

    assert_eq!(*hits.lock(), 1);
    assert_eq!(client.subscription(&tracking()).unwrap().ref_count, 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_keeps_subscriptions() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();
    let (cb, _) = collector();
    let _sub = client.subscribe_key(tracking(), cb).unwrap();

    client.disconnect().await;
    assert_eq!(client.connection_status().state, ConnectionState::Disconnected);
    assert_eq!(client.connection_status().attempt, 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.dials(), 1);
    assert!(client.subscription(&tracking()).is_some());

    client.connect("token").await.unwrap();
    assert_eq!(transport.subscribes(&tracking()), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_is_final_and_idempotent() {
    let transport = FakeTransport::new();
    let client = client_with(&transport, test_options());
    client.connect("token").await.unwrap();
    let (cb, _) = collector();
    let sub = client.subscribe_key(tracking(), cb).unwrap();

    client.dispose().await;
    client.dispose().await;

    assert!(client.is_disposed());
    assert_eq!(client.connection_status().state, ConnectionState::Disconnected);
    assert!(matches!(client.connect("token").await, Err(Error::Disposed)));

    let (cb, _) = collector();
    assert!(matches!(
        client.subscribe_key(positions(), cb),
        Err(Error::Disposed)
    ));

    // Guards outliving the client are harmless
    sub.unsubscribe();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.unsubscribes(&tracking()), 0);
}
