//! Two clients editing one entry through the in-memory loopback server.
//!
//! Demonstrates convergence, presence, dirty tracking, and revert. Run with
//! `RUST_LOG=livedoc_connection=debug` to watch the state machines.

use livedoc_connection::{AuthToken, Connection, ConnectionConfig};
use livedoc_core::{AllowAll, CollabDoc, CollabDocConfig, EntityType, SharedEntity};
use livedoc_protocol::{DocKey, Path};
use livedoc_reactive::Property;
use livedoc_testkit::{
    fresh_entry, normalized_snapshot_for, post_schema, two_locales, LoopbackServer,
    TEST_ENVIRONMENT, TEST_SPACE,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn client(
    server: &Arc<LoopbackServer>,
    entity: SharedEntity,
    user: &str,
) -> Result<Arc<CollabDoc>, Box<dyn std::error::Error>> {
    let transport = server.client();
    let auth = Property::new(AuthToken::new("demo-token"));
    let connection = Connection::new(
        ConnectionConfig::new("loopback:", TEST_SPACE, TEST_ENVIRONMENT),
        transport,
        &auth,
    );
    let config = CollabDocConfig::new(two_locales())
        .with_schema(post_schema())
        .with_user(user);
    let doc = CollabDoc::new(Arc::clone(&connection), entity, Arc::new(AllowAll), config)?;
    connection.connect()?;
    Ok(doc)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let server = LoopbackServer::new();
    let entry = fresh_entry("demo-entry");
    let key = DocKey::new(TEST_SPACE, TEST_ENVIRONMENT, EntityType::Entry, "demo-entry");
    server.seed_doc(key.clone(), normalized_snapshot_for(&entry), 1);
    info!(%key, "seeded loopback document");

    let alice_entity = fresh_entry("demo-entry");
    let bob_entity = fresh_entry("demo-entry");
    let alice = client(&server, alice_entity.clone(), "alice")?;
    let bob = client(&server, bob_entity.clone(), "bob")?;

    let title = Path::keys(["fields", "title", "en-US"]);
    let slug = Path::keys(["fields", "slug", "en-US"]);

    // Presence: both focus the title field.
    alice.presence().focus(title.clone())?;
    bob.presence().focus(title.clone())?;
    println!(
        "alice sees editing title: {:?}",
        alice.presence().collaborators_for(&title).get()
    );
    println!(
        "bob sees editing title:   {:?}",
        bob.presence().collaborators_for(&title).get()
    );

    // Concurrent-ish edits: each lands on the other side synchronously.
    alice.set_value_at(&title, json!("Pair editing in livedoc"))?;
    bob.set_value_at(&slug, json!("pair-editing"))?;

    println!(
        "alice: title={:?} slug={:?} dirty={}",
        alice.get_value_at(&title),
        alice.get_value_at(&slug),
        alice.state().is_dirty.get(),
    );
    println!(
        "bob:   title={:?} slug={:?} version={}",
        bob.get_value_at(&title),
        bob.get_value_at(&slug),
        bob_entity.sys().version,
    );
    assert_eq!(
        alice.current_doc().map(|d| d.snapshot()),
        bob.current_doc().map(|d| d.snapshot()),
    );
    info!(version = ?server.doc_version(&key), "snapshots converged");
    println!("snapshots converged at server version {:?}", server.doc_version(&key));

    // Revert alice's local fields back to the opening checkpoint; bob sees it.
    println!("reverter has changes: {}", alice.reverter().has_changes());
    alice.reverter().revert()?;
    println!(
        "after revert, bob's title: {:?}",
        bob.get_value_at(&title)
    );

    // Alice leaves; bob's presence view empties.
    alice.set_read_only(true);
    println!("bob now sees: {:?}", bob.presence().collaborators().get());

    alice.destroy();
    bob.destroy();
    Ok(())
}
