//! End-to-end flows through the loopback server: convergence, presence,
//! and stale-version rejection.

use livedoc_connection::{
    AuthToken, Connection, ConnectionConfig, DocEvent, OtTransport, TransportEvent, TransportSink,
};
use livedoc_core::{AllowAll, CollabDoc, CollabDocConfig, EntityType, SharedEntity};
use livedoc_protocol::{DocKey, OpenRequestId, OtComponent, OtOp, Path};
use livedoc_reactive::Property;
use livedoc_testkit::{
    fresh_entry, init_test_logging, normalized_snapshot_for, post_schema, two_locales, LoopbackServer,
    ManualClock, TEST_ENVIRONMENT, TEST_SPACE,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn key(id: &str) -> DocKey {
    DocKey::new(TEST_SPACE, TEST_ENVIRONMENT, EntityType::Entry, id)
}

fn client_doc(
    server: &Arc<LoopbackServer>,
    entity: SharedEntity,
    user: &str,
) -> (Arc<Connection>, Arc<CollabDoc>) {
    let transport = server.client();
    let auth = Property::new(AuthToken::new("t"));
    let connection = Connection::new(
        ConnectionConfig::new("loopback:", TEST_SPACE, TEST_ENVIRONMENT),
        transport,
        &auth,
    );
    let config = CollabDocConfig::new(two_locales())
        .with_schema(post_schema())
        .with_clock(Arc::new(ManualClock::new()))
        .with_user(user);
    let doc = CollabDoc::new(Arc::clone(&connection), entity, Arc::new(AllowAll), config)
        .expect("entity not yet managed");
    connection.connect().expect("loopback connect");
    (connection, doc)
}

#[test]
fn two_clients_converge_on_each_others_edits() {
    init_test_logging();
    let server = LoopbackServer::new();
    let entry = fresh_entry("E1");
    server.seed_doc(key("E1"), normalized_snapshot_for(&entry), 1);

    let (_conn_a, doc_a) = client_doc(&server, fresh_entry("E1"), "alice");
    let (_conn_b, doc_b) = client_doc(&server, fresh_entry("E1"), "bob");
    assert!(doc_a.state().is_connected.get());
    assert!(doc_b.state().is_connected.get());

    let title = Path::keys(["fields", "title", "en-US"]);
    let slug = Path::keys(["fields", "slug", "en-US"]);
    doc_a.set_value_at(&title, json!("hello")).unwrap();
    doc_b.set_value_at(&slug, json!("hello-post")).unwrap();

    for doc in [&doc_a, &doc_b] {
        assert_eq!(doc.get_value_at(&title), Some(json!("hello")));
        assert_eq!(doc.get_value_at(&slug), Some(json!("hello-post")));
        assert!(!doc.state().is_saving.get());
    }
    assert_eq!(
        doc_a.current_doc().unwrap().snapshot(),
        doc_b.current_doc().unwrap().snapshot()
    );
    assert_eq!(server.doc_version(&key("E1")), Some(3));
}

#[test]
fn acknowledgments_advance_both_entities() {
    init_test_logging();
    let server = LoopbackServer::new();
    let entry = fresh_entry("E1");
    server.seed_doc(key("E1"), normalized_snapshot_for(&entry), 1);

    let shared_a = fresh_entry("E1");
    let shared_b = fresh_entry("E1");
    let (_conn_a, doc_a) = client_doc(&server, shared_a.clone(), "alice");
    let (_conn_b, _doc_b) = client_doc(&server, shared_b.clone(), "bob");

    doc_a
        .set_value_at(&Path::keys(["fields", "title", "en-US"]), json!("x"))
        .unwrap();

    // A advanced through its ack, B through the broadcast change.
    assert_eq!(shared_a.sys().version, 2);
    assert_eq!(shared_b.sys().version, 2);
}

#[test]
fn presence_focus_and_departure_are_visible_to_peers() {
    init_test_logging();
    let server = LoopbackServer::new();
    let entry = fresh_entry("E1");
    server.seed_doc(key("E1"), normalized_snapshot_for(&entry), 1);

    let (_conn_a, doc_a) = client_doc(&server, fresh_entry("E1"), "alice");
    let (_conn_b, doc_b) = client_doc(&server, fresh_entry("E1"), "bob");

    let title = Path::keys(["fields", "title", "en-US"]);
    doc_a.presence().focus(title.clone()).unwrap();

    assert_eq!(
        doc_b.presence().collaborators().get(),
        vec!["alice".to_string()]
    );
    assert_eq!(
        doc_b
            .presence()
            .collaborators_for(&Path::keys(["fields", "title"]))
            .get(),
        vec!["alice".to_string()]
    );
    // Alice sees nobody; her own broadcasts are ignored.
    assert!(doc_a.presence().collaborators().get().is_empty());

    // Closing the document broadcasts a departure before the wire close.
    doc_a.set_read_only(true);
    assert!(doc_b.presence().collaborators().get().is_empty());
}

#[test]
fn stale_version_submission_is_rejected() {
    init_test_logging();

    #[derive(Default)]
    struct Recording(Mutex<Vec<TransportEvent>>);
    impl TransportSink for Recording {
        fn on_transport_event(&self, event: TransportEvent) {
            self.0.lock().push(event);
        }
    }

    let server = LoopbackServer::new();
    let doc_key = key("E1");
    server.seed_doc(
        doc_key.clone(),
        json!({"sys": {"id": "E1", "version": 1}, "fields": {"title": {"en-US": "a"}}}),
        1,
    );

    let a = server.client();
    let b = server.client();
    let sink_a = Arc::new(Recording::default());
    let sink_b = Arc::new(Recording::default());
    a.attach(sink_a.clone());
    b.attach(sink_b.clone());
    a.connect().unwrap();
    b.connect().unwrap();
    a.open(OpenRequestId::generate(), &doc_key).unwrap();
    b.open(OpenRequestId::generate(), &doc_key).unwrap();

    let set = |value: &str, old: &str| {
        OtOp::single(OtComponent::Set {
            path: Path::keys(["fields", "title", "en-US"]),
            old: Some(json!(old)),
            new: json!(value),
        })
    };

    a.submit(&doc_key, 1, &set("from-a", "a")).unwrap();
    // B still believes version 1; the server is at 2.
    b.submit(&doc_key, 1, &set("from-b", "a")).unwrap();

    let rejected = sink_b
        .0
        .lock()
        .iter()
        .filter_map(|event| match event {
            TransportEvent::Doc {
                event: DocEvent::Rejected { expected_version },
                ..
            } => Some(*expected_version),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(rejected, vec![2]);
    // The stale op never reached the authoritative snapshot.
    assert_eq!(
        server.doc_snapshot(&doc_key).unwrap()["fields"]["title"]["en-US"],
        json!("from-a")
    );
}

#[test]
fn disconnected_client_stops_receiving_broadcasts() {
    init_test_logging();
    let server = LoopbackServer::new();
    let entry = fresh_entry("E1");
    server.seed_doc(key("E1"), normalized_snapshot_for(&entry), 1);

    let (conn_a, _doc_a) = client_doc(&server, fresh_entry("E1"), "alice");
    let (_conn_b, doc_b) = client_doc(&server, fresh_entry("E1"), "bob");
    assert_eq!(server.subscriber_count(&key("E1")), 2);

    conn_a.close();
    assert_eq!(server.subscriber_count(&key("E1")), 1);

    doc_b
        .set_value_at(&Path::keys(["fields", "title", "en-US"]), json!("solo"))
        .unwrap();
    assert!(!doc_b.state().is_saving.get());
}
