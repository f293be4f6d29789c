//! Runs against a live Neo4j server when `OGM_TEST_BOLT_URI` is set, e.g.
//! `OGM_TEST_BOLT_URI=bolt://localhost:7687 OGM_TEST_BOLT_USER=neo4j
//! OGM_TEST_BOLT_PASSWORD=secret cargo test --features bolt --test bolt`.
#![cfg(feature = "bolt")]

mod common;

use common::{post, user, Post, User};
use cypher_ogm::bolt::BoltConnector;
use cypher_ogm::{ClientSettings, Entity, OgmClient, Relationship};
use std::sync::Arc;

fn live_client() -> Option<OgmClient> {
    let uri = std::env::var("OGM_TEST_BOLT_URI").ok()?;
    let user_name = std::env::var("OGM_TEST_BOLT_USER").unwrap_or_default();
    let password = std::env::var("OGM_TEST_BOLT_PASSWORD").unwrap_or_default();

    let mut client = OgmClient::new(
        ClientSettings::new(uri).with_credentials(&user_name, &password),
        Arc::new(BoltConnector::new()),
    );
    client.connect().unwrap();
    Some(client)
}

#[test]
fn test_bolt_round_trip() {
    let Some(client) = live_client() else {
        eprintln!("OGM_TEST_BOLT_URI not set; skipping");
        return;
    };
    assert!(client.ping().unwrap());

    let author = client.add(&user("Ada", "Lovelace", "ada@example.com")).unwrap();
    let written = client.add(&post("Notes")).unwrap();
    assert!(client
        .create_relationship(author.uuid(), written.uuid(), &Relationship::outgoing("WROTE"), None)
        .unwrap());

    let fetched = client
        .get_by_uuid_with_related_nodes::<User>(author.uuid())
        .unwrap()
        .unwrap();
    assert_eq!(fetched.posts.len(), 1);
    assert_eq!(fetched.posts[0].uuid(), written.uuid());

    assert!(client.drop_by_uuid::<User>(author.uuid()).unwrap());
    assert!(client.drop_by_uuid::<Post>(written.uuid()).unwrap());
}

#[test]
fn test_bolt_rollback_discards_writes() {
    let Some(client) = live_client() else {
        return;
    };
    let tx = client.begin_transaction().unwrap();
    let added = client.add(&user("Rolled", "Back", "rb@example.com")).unwrap();
    tx.rollback().unwrap();

    assert!(client
        .get_by_uuid_with_related_nodes::<User>(added.uuid())
        .unwrap()
        .is_none());
}
