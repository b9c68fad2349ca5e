//! Subscription Lifecycle Tests
//!
//! End-to-end checks over the in-memory transport:
//! - Channel accounting against active subscriptions
//! - Unsubscribe idempotency and delivery cut-off
//! - Connection-status broadcast
//! - Binding rebinds on key change

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pulseboard::realtime::{
    Binding, BindingKey, ChangeEvent, ConnectionState, MemoryTransport, Predicate,
    RealtimeManager,
};
use serde_json::json;

fn setup() -> (Arc<MemoryTransport>, Arc<RealtimeManager>) {
    let connection = ConnectionState::new();
    let transport = Arc::new(MemoryTransport::new(Arc::clone(&connection)));
    transport.connect();
    let manager = RealtimeManager::new(transport.clone(), connection);
    (transport, manager)
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&ChangeEvent) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move |_: &ChangeEvent| {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

// =============================================================================
// Channel Accounting
// =============================================================================

/// Open channels never outnumber active subscriptions and drain to zero.
#[test]
fn test_open_channels_track_active_subscriptions() {
    let (transport, manager) = setup();

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let (_, cb) = counter();
            manager.subscribe("anomalies", Predicate::eq("user_id", format!("u-{i}")), cb)
        })
        .collect();

    assert_eq!(manager.active_subscriptions(), 5);
    assert!(transport.open_count() <= manager.active_subscriptions());

    for (i, handle) in handles.iter().enumerate() {
        handle.unsubscribe();
        assert!(transport.open_count() <= manager.active_subscriptions());
        assert_eq!(manager.active_subscriptions(), 4 - i);
    }
    assert_eq!(transport.open_count(), 0);
}

/// Identical (table, predicate) pairs still get independent channels.
#[test]
fn test_identical_subscriptions_are_independent() {
    let (transport, manager) = setup();
    let (first_count, first_cb) = counter();
    let (second_count, second_cb) = counter();

    let first = manager.subscribe("notifications", Predicate::eq("user_id", "u-1"), first_cb);
    let _second = manager.subscribe("notifications", Predicate::eq("user_id", "u-1"), second_cb);
    assert_eq!(transport.open_count(), 2);

    first.unsubscribe();
    transport.emit(&ChangeEvent::insert(
        "notifications",
        json!({"id": 1, "user_id": "u-1"}),
    ));

    assert_eq!(first_count.load(Ordering::SeqCst), 0);
    assert_eq!(second_count.load(Ordering::SeqCst), 1);
}

/// close_all releases every channel.
#[test]
fn test_close_all_releases_everything() {
    let (transport, manager) = setup();
    let handles: Vec<_> = ["anomalies", "notifications", "activity_log"]
        .iter()
        .map(|table| manager.subscribe(table, Predicate::all(), |_| {}))
        .collect();

    manager.close_all();

    assert_eq!(transport.open_count(), 0);
    assert!(handles.iter().all(|h| !h.is_active()));
}

// =============================================================================
// Unsubscribe
// =============================================================================

/// Unsubscribing twice is harmless and nothing arrives afterwards.
#[test]
fn test_unsubscribe_idempotent_and_final() {
    let (transport, manager) = setup();
    let (count, cb) = counter();
    let handle = manager.subscribe("anomalies", Predicate::all(), cb);

    transport.emit(&ChangeEvent::insert("anomalies", json!({"id": 1})));
    handle.unsubscribe();
    handle.unsubscribe();
    transport.emit(&ChangeEvent::insert("anomalies", json!({"id": 2})));

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!handle.is_active());
}

/// Manager-level unsubscribe of an unknown id reports an error.
#[test]
fn test_unsubscribe_unknown_id() {
    let (_, manager) = setup();
    assert!(manager.unsubscribe("missing").is_err());
}

/// A failed open reports the connection as down and yields an inert handle.
#[test]
fn test_failed_open_marks_disconnected() {
    let (transport, manager) = setup();
    transport.fail_next_opens(1);

    let handle = manager.subscribe("anomalies", Predicate::all(), |_| {});

    assert!(!handle.is_active());
    assert!(!manager.is_connected());
    assert_eq!(manager.active_subscriptions(), 0);
}

// =============================================================================
// Connection Status
// =============================================================================

/// A listener added while connected hears `true` once, immediately.
#[test]
fn test_listener_registered_while_connected() {
    let (transport, manager) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);

    let _listener = manager
        .connection()
        .on_connection_change(move |up| s.lock().unwrap().push(up));
    assert_eq!(*seen.lock().unwrap(), vec![true]);

    transport.disconnect();
    transport.disconnect();
    transport.connect();
    assert_eq!(*seen.lock().unwrap(), vec![true, false, true]);
}

/// Nothing is delivered while the transport is down.
#[test]
fn test_no_delivery_while_disconnected() {
    let (transport, manager) = setup();
    let (count, cb) = counter();
    let _handle = manager.subscribe("anomalies", Predicate::all(), cb);

    transport.disconnect();
    assert_eq!(transport.emit(&ChangeEvent::insert("anomalies", json!({"id": 1}))), 0);
    transport.connect();
    transport.emit(&ChangeEvent::insert("anomalies", json!({"id": 2})));

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Bindings
// =============================================================================

/// Switching subjects moves the stream; the old subject is no longer heard.
#[test]
fn test_binding_follows_subject() {
    let (transport, manager) = setup();
    let (count, cb) = counter();
    let mut binding = Binding::new(Arc::clone(&manager), cb);

    binding.bind(BindingKey::for_subject("anomalies", "user_id", Some("u-1")));
    binding.bind(BindingKey::for_subject("anomalies", "user_id", Some("u-1")));
    assert_eq!(transport.opened_total(), 1);

    binding.bind(BindingKey::for_subject("anomalies", "user_id", Some("u-2")));
    assert_eq!(transport.open_count(), 1);
    assert_eq!(transport.opened_total(), 2);

    transport.emit(&ChangeEvent::insert("anomalies", json!({"id": 1, "user_id": "u-1"})));
    transport.emit(&ChangeEvent::insert("anomalies", json!({"id": 2, "user_id": "u-2"})));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    binding.bind(None);
    assert_eq!(transport.open_count(), 0);
    assert!(!binding.connected());
}

/// Dropping a binding releases its channel.
#[test]
fn test_binding_drop_releases_channel() {
    let (transport, manager) = setup();
    {
        let mut binding = Binding::new(Arc::clone(&manager), |_| {});
        binding.bind(Some(BindingKey::new("activity_log", Predicate::all())));
        assert!(binding.connected());
        assert_eq!(transport.open_count(), 1);
    }
    assert_eq!(transport.open_count(), 0);
    assert_eq!(manager.connection().listener_count(), 0);
}
