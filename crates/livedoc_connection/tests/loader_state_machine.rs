//! State machine tests for the document loader, driven by the scripted
//! transport.

use livedoc_connection::{
    AuthToken, Connection, ConnectionConfig, ConnectionState, DocEvent, DocLoad, DocLoader,
    LoadError, LoaderConfig, ScriptedTransport, TransportCall,
};
use livedoc_protocol::{DocKey, EntityType, OtComponent, OtOp, Path};
use livedoc_reactive::Property;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

struct Harness {
    transport: Arc<ScriptedTransport>,
    connection: Arc<Connection>,
    intent: Property<bool>,
    loader: Arc<DocLoader>,
    key: DocKey,
}

fn harness(intent: bool) -> Harness {
    harness_with_config(intent, LoaderConfig::default())
}

fn harness_with_config(intent: bool, config: LoaderConfig) -> Harness {
    let transport = ScriptedTransport::new();
    let auth = Property::new(AuthToken::new("token"));
    let connection = Connection::new(
        ConnectionConfig::new("wss://collab.example", "space1", "master"),
        transport.clone(),
        &auth,
    );
    let key = connection.doc_key(EntityType::Entry, "E1");
    let intent = Property::new(intent);
    let loader = DocLoader::new(Arc::clone(&connection), key.clone(), &intent, config).unwrap();
    Harness {
        transport,
        connection,
        intent,
        loader,
        key,
    }
}

fn snapshot() -> serde_json::Value {
    json!({
        "sys": {"id": "E1", "type": "Entry", "version": 1},
        "fields": {"title": {"en-US": "hello"}}
    })
}

fn set_title(new: &str, old: &str) -> OtOp {
    OtOp::single(OtComponent::Set {
        path: Path::keys(["fields", "title", "en-US"]),
        old: Some(json!(old)),
        new: json!(new),
    })
}

/// Walks the connection through the full bring-up sequence and resolves the
/// resulting open.
fn bring_up(h: &Harness) {
    h.transport.set_status(ConnectionState::Connecting);
    h.transport.set_status(ConnectionState::Handshaking);
    h.transport.set_status(ConnectionState::Ready);
    let (request, key) = h.transport.open_requests().pop().expect("an open request");
    h.transport.complete_open_ok(request, key, snapshot(), 1);
}

#[test]
fn full_bring_up_ends_open() {
    let h = harness(true);
    assert_eq!(h.loader.state(), DocLoad::Pending);

    h.transport.set_status(ConnectionState::Connecting);
    assert_eq!(h.loader.state(), DocLoad::Pending);
    h.transport.set_status(ConnectionState::Handshaking);
    assert_eq!(h.loader.state(), DocLoad::Pending);

    h.transport.set_status(ConnectionState::Ready);
    // Open issued, still pending until it resolves.
    assert_eq!(h.loader.state(), DocLoad::Pending);
    assert_eq!(h.transport.open_requests().len(), 1);

    let (request, key) = h.transport.open_requests().pop().unwrap();
    h.transport.complete_open_ok(request, key, snapshot(), 1);
    assert!(h.loader.state().is_open());
}

#[test]
fn failed_open_ends_error() {
    let h = harness(true);
    h.transport.set_status(ConnectionState::Ready);
    let (request, key) = h.transport.open_requests().pop().unwrap();
    h.transport.complete_open_err(request, key, "boom");
    assert_eq!(
        h.loader.state(),
        DocLoad::Error(LoadError::open_failed("boom"))
    );
}

#[test]
fn disconnect_while_open_ends_error() {
    let h = harness(true);
    bring_up(&h);
    assert!(h.loader.state().is_open());

    h.transport.set_status(ConnectionState::Disconnected);
    assert_eq!(h.loader.state(), DocLoad::Error(LoadError::Disconnected));
}

#[test]
fn no_open_without_intent() {
    let h = harness(false);
    assert_eq!(h.loader.state(), DocLoad::Closed);
    h.transport.set_status(ConnectionState::Ready);
    assert!(h.transport.open_requests().is_empty());
    assert_eq!(h.loader.state(), DocLoad::Closed);
}

#[test]
fn intent_off_closes_and_waits_for_ack() {
    let h = harness(true);
    bring_up(&h);

    h.intent.set(false);
    assert_eq!(h.loader.state(), DocLoad::Closed);
    let closes = h
        .transport
        .calls()
        .iter()
        .filter(|c| matches!(c, TransportCall::CloseDoc { .. }))
        .count();
    assert_eq!(closes, 1);

    // Flip back before the close ack: no second open yet.
    h.intent.set(true);
    assert_eq!(h.loader.state(), DocLoad::Pending);
    assert_eq!(h.transport.open_requests().len(), 1);

    // The ack releases exactly one new open.
    h.transport.complete_close(h.key.clone());
    assert_eq!(h.transport.open_requests().len(), 2);
}

#[test]
fn rapid_intent_toggle_yields_one_open_after_ack() {
    let h = harness(true);
    bring_up(&h);

    h.intent.set(false);
    h.intent.set(true);
    h.intent.set(false);
    h.intent.set(true);
    assert_eq!(h.transport.open_requests().len(), 1);

    h.transport.complete_close(h.key.clone());
    assert_eq!(h.transport.open_requests().len(), 2);
}

#[test]
fn superseded_open_result_is_discarded_and_closed() {
    let h = harness(true);
    h.transport.set_status(ConnectionState::Ready);
    let (stale_request, key) = h.transport.open_requests().pop().unwrap();

    // Supersede the open by toggling intent; the loader forgets the request.
    h.intent.set(false);
    h.intent.set(true);
    // No new open until... there is no close pending, so a new open fires.
    let requests = h.transport.open_requests();
    assert_eq!(requests.len(), 2);
    let (current_request, _) = requests[1].clone();
    assert_ne!(stale_request, current_request);

    // The stale success is not applied, and the doc it opened is closed.
    h.transport
        .complete_open_ok(stale_request, key.clone(), snapshot(), 1);
    assert_eq!(h.loader.state(), DocLoad::Pending);
    assert!(h
        .transport
        .calls()
        .iter()
        .any(|c| matches!(c, TransportCall::CloseDoc { .. })));

    // The current request still wins.
    h.transport
        .complete_open_ok(current_request, key, snapshot(), 1);
    assert!(h.loader.state().is_open());
}

#[test]
fn reconnect_reapplies_pending_then_inflight() {
    let h = harness(true);
    bring_up(&h);
    let doc = h.loader.current_doc().unwrap();

    let op_b = set_title("b", "hello"); // becomes inflight
    let op_a = set_title("a", "b"); // becomes pending
    doc.submit_op(op_b.clone()).unwrap();
    doc.submit_op(op_a.clone()).unwrap();

    h.transport.set_status(ConnectionState::Disconnected);
    assert_eq!(h.loader.state(), DocLoad::Error(LoadError::Disconnected));

    h.transport.take_calls();
    h.transport.set_status(ConnectionState::Ready);
    let (request, key) = h.transport.open_requests().pop().unwrap();
    h.transport.complete_open_ok(request, key, snapshot(), 1);

    let submits = h.transport.submits();
    assert_eq!(submits.len(), 2);
    assert_eq!(submits[0].2, op_a, "pending op goes first");
    assert_eq!(submits[1].2, op_b, "inflight op follows");

    // And the reapplied edits are visible on the new doc.
    let doc = h.loader.current_doc().unwrap();
    assert_eq!(
        doc.value_at(&Path::keys(["fields", "title", "en-US"])),
        Some(json!("b"))
    );
}

#[test]
fn reconnect_after_error_reopens() {
    let h = harness(true);
    bring_up(&h);
    h.transport.set_status(ConnectionState::Disconnected);
    assert_eq!(h.loader.state(), DocLoad::Error(LoadError::Disconnected));

    h.transport.set_status(ConnectionState::Connecting);
    assert_eq!(h.loader.state(), DocLoad::Pending);
    h.transport.set_status(ConnectionState::Ready);
    assert_eq!(h.transport.open_requests().len(), 2);
}

#[test]
fn reopen_attempts_are_bounded() {
    let h = harness_with_config(true, LoaderConfig::new().with_max_reopen_attempts(2));

    for _ in 0..2 {
        h.transport.set_status(ConnectionState::Ready);
        let (request, key) = h.transport.open_requests().pop().unwrap();
        h.transport.complete_open_err(request, key, "no");
        h.transport.set_status(ConnectionState::Disconnected);
    }
    h.transport.set_status(ConnectionState::Ready);
    assert_eq!(h.transport.open_requests().len(), 2, "budget exhausted");
    assert_eq!(
        h.loader.state(),
        DocLoad::Error(LoadError::TooManyAttempts { attempts: 2 })
    );

    // Toggling intent resets the budget.
    h.intent.set(false);
    h.intent.set(true);
    assert_eq!(h.transport.open_requests().len(), 3);
}

#[test]
fn destroy_is_idempotent_and_silences_late_results() {
    let h = harness(true);
    h.transport.set_status(ConnectionState::Ready);
    let (request, key) = h.transport.open_requests().pop().unwrap();

    h.loader.destroy();
    h.loader.destroy();
    assert_eq!(h.loader.state(), DocLoad::Closed);

    // A late success is closed best-effort, never surfaced.
    h.transport.complete_open_ok(request, key, snapshot(), 1);
    assert_eq!(h.loader.state(), DocLoad::Closed);
    assert!(h
        .transport
        .calls()
        .iter()
        .any(|c| matches!(c, TransportCall::CloseDoc { .. })));
}

#[test]
fn destroy_closes_open_doc() {
    let h = harness(true);
    bring_up(&h);
    let doc = h.loader.current_doc().unwrap();
    h.loader.destroy();
    assert!(doc.is_closed());
}

#[test]
fn destroyed_loader_frees_the_key_for_a_new_loader() {
    let h = harness(true);
    bring_up(&h);

    assert!(matches!(
        DocLoader::new(
            Arc::clone(&h.connection),
            h.key.clone(),
            &Property::new(true),
            LoaderConfig::default(),
        ),
        Err(livedoc_connection::ConnectionError::AlreadyRegistered { .. })
    ));

    h.loader.destroy();
    let intent = Property::new(true);
    let second = DocLoader::new(
        Arc::clone(&h.connection),
        h.key.clone(),
        &intent,
        LoaderConfig::default(),
    );
    assert!(second.is_ok());
}

#[test]
fn state_property_emits_transitions_in_order() {
    let h = harness(true);
    let seen: Arc<Mutex<Vec<DocLoad>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = h
        .loader
        .state_property()
        .subscribe(move |state| sink.lock().push(state.clone()));

    bring_up(&h);
    h.transport.set_status(ConnectionState::Disconnected);

    let states = seen.lock().clone();
    assert_eq!(states[0], DocLoad::Pending);
    assert!(states.iter().any(|s| s.is_open()));
    assert_eq!(
        states.last().unwrap(),
        &DocLoad::Error(LoadError::Disconnected)
    );
}

#[test]
fn doc_events_route_to_the_open_doc() {
    let h = harness(true);
    bring_up(&h);
    let doc = h.loader.current_doc().unwrap();

    h.transport.doc_event(
        h.key.clone(),
        DocEvent::Change {
            version: 2,
            op: set_title("remote", "hello"),
        },
    );
    assert_eq!(doc.version(), 2);
    assert_eq!(
        doc.value_at(&Path::keys(["fields", "title", "en-US"])),
        Some(json!("remote"))
    );
}
