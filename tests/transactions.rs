mod common;

use common::{connected_client, user, User};
use cypher_ogm::driver::PropertyMap;
use cypher_ogm::{Entity, OgmError};

#[test]
fn test_commit_persists_statements() {
    let (_dir, client) = connected_client();

    let tx = client.begin_transaction().unwrap();
    assert!(tx.is_active());
    let added = client.add(&user("Ada", "Lovelace", "ada@example.com")).unwrap();
    client.add(&user("Alan", "Turing", "alan@example.com")).unwrap();
    tx.commit().unwrap();

    assert_eq!(client.get_all::<User>().unwrap().len(), 2);
    assert!(client
        .get_by_uuid_with_related_nodes::<User>(added.uuid())
        .unwrap()
        .is_some());
}

#[test]
fn test_rollback_discards_statements() {
    let (_dir, client) = connected_client();
    client.add(&user("Kept", "User", "kept@example.com")).unwrap();

    let tx = client.begin_transaction().unwrap();
    client.add(&user("Ada", "Lovelace", "ada@example.com")).unwrap();
    // reads inside the transaction see its writes
    assert_eq!(client.get_all::<User>().unwrap().len(), 2);
    tx.rollback().unwrap();

    let users = client.get_all::<User>().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].first_name, "Kept");
}

#[test]
fn test_dropped_transaction_persists_nothing() {
    let (_dir, client) = connected_client();
    {
        let _tx = client.begin_transaction().unwrap();
        client.add(&user("Ada", "Lovelace", "ada@example.com")).unwrap();
    }
    assert!(client.get_all::<User>().unwrap().is_empty());

    // the client is usable in auto-commit mode afterwards
    client.add(&user("Alan", "Turing", "alan@example.com")).unwrap();
    assert_eq!(client.get_all::<User>().unwrap().len(), 1);
}

#[test]
fn test_second_begin_replaces_first() {
    let (_dir, client) = connected_client();

    let first = client.begin_transaction().unwrap();
    client.add(&user("Ada", "Lovelace", "ada@example.com")).unwrap();

    let second = client.begin_transaction().unwrap();
    assert!(!first.is_active());
    assert!(second.is_active());
    assert_ne!(first.id(), second.id());

    client.add(&user("Alan", "Turing", "alan@example.com")).unwrap();

    assert!(matches!(first.commit(), Err(OgmError::TransactionClosed)));
    second.commit().unwrap();

    let users = client.get_all::<User>().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].first_name, "Alan");
}

#[test]
fn test_transaction_run_raw_statement() {
    let (_dir, client) = connected_client();
    let tx = client.begin_transaction().unwrap();
    let rows = tx.run("RETURN 1", PropertyMap::new()).unwrap();
    assert_eq!(rows.len(), 1);
    tx.commit().unwrap();
}

#[test]
fn test_failed_statement_does_not_end_transaction() {
    let (_dir, client) = connected_client();
    let tx = client.begin_transaction().unwrap();
    client.add(&user("Ada", "Lovelace", "ada@example.com")).unwrap();
    assert!(tx.run("Invalid Cypher", PropertyMap::new()).is_err());
    assert!(tx.is_active());
    tx.commit().unwrap();

    assert_eq!(client.get_all::<User>().unwrap().len(), 1);
}

#[test]
fn test_dropping_client_rolls_back() {
    let (dir, client) = connected_client();
    let uri = common::embedded_uri(&dir);
    {
        let tx = client.begin_transaction().unwrap();
        client.add(&user("Ada", "Lovelace", "ada@example.com")).unwrap();
        std::mem::forget(tx);
    }
    drop(client);

    let mut reopened = cypher_ogm::OgmClient::new(
        cypher_ogm::ClientSettings::new(uri),
        std::sync::Arc::new(cypher_ogm::embedded::EmbeddedConnector::new()),
    );
    reopened.connect().unwrap();
    assert!(reopened.get_all::<User>().unwrap().is_empty());
}
