use super::{Connection, random_client_id};
use crate::broker::{InMemoryStreamingServer, SubscriptionOptions};
use crate::utils::BrokerError;

#[test]
fn test_random_client_id_shape() {
    let id = random_client_id();
    assert_eq!(id.len(), 8);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(id, random_client_id());
}

#[test]
fn test_connect_in_memory_generates_client_id() {
    let server = InMemoryStreamingServer::new("ticketing");
    let conn = Connection::connect_in_memory(&server, None).unwrap();
    assert_eq!(conn.cluster_id(), "ticketing");
    assert_eq!(conn.client_id().len(), 8);
    assert!(server.is_connected(conn.client_id()));
    assert!(!conn.is_closed());
}

#[test]
fn test_connect_in_memory_rejects_duplicate_id() {
    let server = InMemoryStreamingServer::new("ticketing");
    let _first = Connection::connect_in_memory(&server, Some("fixed".to_string())).unwrap();
    let err = Connection::connect_in_memory(&server, Some("fixed".to_string())).unwrap_err();
    assert_eq!(err, BrokerError::DuplicateClientId("fixed".to_string()));
}

#[tokio::test]
async fn test_close_is_idempotent_and_resolves_closed() {
    let server = InMemoryStreamingServer::new("ticketing");
    let conn = Connection::connect_in_memory(&server, None).unwrap();

    let waiter = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.closed().await })
    };

    conn.close().await.unwrap();
    conn.close().await.unwrap();
    waiter.await.unwrap();

    assert!(conn.is_closed());
    assert!(!server.is_connected(conn.client_id()));
}

#[tokio::test]
async fn test_server_side_disconnect_is_observed() {
    let server = InMemoryStreamingServer::new("ticketing");
    let conn = Connection::connect_in_memory(&server, Some("gone".to_string())).unwrap();

    server.disconnect("gone");
    conn.closed().await;
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_publish_and_subscribe_through_connection() {
    let server = InMemoryStreamingServer::new("ticketing");
    let conn = Connection::connect_in_memory(&server, None).unwrap();
    let mut sub = conn
        .subscribe("ticket:created", Some("q"), &SubscriptionOptions::new())
        .await
        .unwrap();

    conn.publish("ticket:created", r#"{"id":"1"}"#).await.unwrap();
    let msg = sub.next_message().await.unwrap();
    assert_eq!(msg.sequence(), 1);
    assert_eq!(server.last_sequence("ticket:created"), 1);
}
