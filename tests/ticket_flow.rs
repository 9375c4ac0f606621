use std::sync::Arc;
use std::time::Duration;

use stanlisten::broker::InMemoryStreamingServer;
use stanlisten::client::Connection;
use stanlisten::events::TicketCreatedData;
use stanlisten::listener::{Listener, ListenerExt, TicketCreatedListener};
use stanlisten::publisher::{Publisher, TicketCreatedPublisher};

const SUBJECT: &str = "ticket:created";
const GROUP: &str = "payments-service";

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn integration_ticket_created_end_to_end() {
    let server = InMemoryStreamingServer::new("ticketing");
    let listener_conn = Connection::connect_in_memory(&server, Some("payments-1".into()))
        .expect("listener connect");
    let publisher_conn = Connection::connect_in_memory(&server, Some("tickets-1".into()))
        .expect("publisher connect");

    let handle = Arc::new(TicketCreatedListener::new())
        .listen(&listener_conn)
        .await
        .expect("listen");
    assert!(server.has_group(SUBJECT, GROUP));

    let ticket = TicketCreatedData {
        id: "123".to_string(),
        title: "concert".to_string(),
        price: 20.0,
    };
    TicketCreatedPublisher
        .publish(&publisher_conn, &ticket)
        .await
        .expect("publish");

    assert_eq!(server.last_sequence(SUBJECT), 1);
    // the listener acks, so nothing stays pending
    assert!(wait_until(|| server.pending_count(SUBJECT, GROUP) == 0).await);
    assert_eq!(server.redeliver_expired_at(tokio::time::Instant::now() + Duration::from_secs(10)), 0);

    listener_conn.close().await.expect("close");
    tokio::time::timeout(Duration::from_secs(1), handle.finished())
        .await
        .expect("listener task ends after close");
    assert!(server.has_group(SUBJECT, GROUP), "durable group survives close");
}

#[tokio::test]
async fn integration_durable_group_resumes_after_restart() {
    let server = InMemoryStreamingServer::new("ticketing");
    let first = Connection::connect_in_memory(&server, None).expect("connect");
    Arc::new(TicketCreatedListener::new())
        .listen(&first)
        .await
        .expect("listen");

    server.publish(SUBJECT, r#"{"id":"1","title":"a","price":1.0}"#);
    assert!(wait_until(|| server.pending_count(SUBJECT, GROUP) == 0).await);
    first.close().await.expect("close");

    // published while no member is connected
    server.publish(SUBJECT, r#"{"id":"2","title":"b","price":2.0}"#);

    let second = Connection::connect_in_memory(&server, None).expect("reconnect");
    let options = TicketCreatedListener::new().subscription_options();
    let mut subscription = second
        .subscribe(SUBJECT, Some(GROUP), &options)
        .await
        .expect("subscribe");

    let msg = tokio::time::timeout(Duration::from_secs(1), subscription.next_message())
        .await
        .expect("resumed delivery")
        .expect("open subscription");
    assert_eq!(msg.sequence(), 2, "acked history is not replayed");
    assert!(!msg.is_redelivered());
    msg.ack().expect("ack");
}
