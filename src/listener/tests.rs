use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Listener, ListenerExt, TicketCreatedListener, parse_message, parse_payload, start_listening};
use crate::broker::{InMemoryStreamingServer, Message, Payload, StartPosition};
use crate::client::Connection;
use crate::events::{Event, Subjects, TicketCreatedData};
use crate::utils::{DecodeError, ListenerError};

const SUBJECT: &str = "ticket:created";

/// Untyped view of the ticket subject.
struct AnyTicketEvent;

impl Event for AnyTicketEvent {
    const SUBJECT: Subjects = Subjects::TicketCreated;
    type Data = Value;
}

#[derive(Debug)]
struct Seen {
    data: Value,
    sequence: u64,
    redelivered: bool,
    subscription_id: String,
}

struct RecordingListener {
    queue_group: &'static str,
    ack: bool,
    fail: bool,
    seen: mpsc::UnboundedSender<Seen>,
}

impl RecordingListener {
    fn new(queue_group: &'static str) -> (Self, mpsc::UnboundedReceiver<Seen>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (
            Self {
                queue_group,
                ack: true,
                fail: false,
                seen,
            },
            rx,
        )
    }

    fn without_ack(mut self) -> Self {
        self.ack = false;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Listener for RecordingListener {
    type Event = AnyTicketEvent;

    fn queue_group_name(&self) -> &str {
        self.queue_group
    }

    async fn on_message(&self, data: Value, msg: Message) -> Result<(), ListenerError> {
        if self.ack && !self.fail {
            msg.ack()?;
        }
        let _ = self.seen.send(Seen {
            data,
            sequence: msg.sequence(),
            redelivered: msg.is_redelivered(),
            subscription_id: msg.subscription_id().to_string(),
        });
        if self.fail {
            return Err(ListenerError::Handler("boom".to_string()));
        }
        Ok(())
    }
}

async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("handler was not invoked")
        .expect("listener channel closed")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn setup() -> (InMemoryStreamingServer, Connection) {
    crate::utils::logging::init("debug");
    let server = InMemoryStreamingServer::new("ticketing");
    let conn = Connection::connect_in_memory(&server, None).unwrap();
    (server, conn)
}

#[test]
fn test_subscription_options_follow_queue_group() {
    let (listener, _rx) = RecordingListener::new("G");
    let options = listener.subscription_options();

    assert_eq!(options.durable_name.as_deref(), Some("G"));
    assert!(options.manual_ack);
    assert_eq!(options.start_position, StartPosition::AllAvailable);
    assert!(options.delivers_all_available());
    assert_eq!(options.ack_wait, Duration::from_millis(5000));
    assert_eq!(options.max_in_flight, 1024);
}

#[test]
fn test_ticket_created_listener_constants() {
    let listener = TicketCreatedListener::new().with_ack_wait(Duration::from_secs(2));
    assert_eq!(listener.subject(), Subjects::TicketCreated);
    assert_eq!(listener.queue_group_name(), "payments-service");

    let options = listener.subscription_options();
    assert_eq!(options.durable_name.as_deref(), Some("payments-service"));
    assert_eq!(options.ack_wait, Duration::from_secs(2));
}

#[test]
fn test_parse_payload_text_and_binary_agree() {
    let text: Value = parse_payload(&Payload::from(r#"{"id":"123"}"#)).unwrap();
    let binary: Value = parse_payload(&Payload::from(br#"{"id":"123"}"#.to_vec())).unwrap();

    assert_eq!(text, json!({"id": "123"}));
    assert_eq!(text, binary);
}

#[test]
fn test_parse_payload_reports_errors() {
    let bad_utf8 = parse_payload::<Value>(&Payload::Binary(vec![0xff, 0xfe]));
    assert!(matches!(bad_utf8, Err(DecodeError::Utf8(_))));

    let bad_json = parse_payload::<Value>(&Payload::from("{\"id\":"));
    assert!(matches!(bad_json, Err(DecodeError::Json(_))));

    // well-formed JSON of the wrong shape is a decode error too
    let wrong_shape = parse_payload::<TicketCreatedData>(&Payload::from(r#"{"id":"123"}"#));
    assert!(matches!(wrong_shape, Err(DecodeError::Json(_))));
}

#[test]
fn test_decoded_value_is_structurally_equal_not_byte_equal() {
    let raw = r#"{"b":1,"a":{"y":true,"x":null}}"#;
    let decoded: Value = parse_payload(&Payload::from(raw)).unwrap();
    let reparsed: Value = serde_json::from_str(&serde_json::to_string(&decoded).unwrap()).unwrap();
    assert_eq!(decoded, reparsed);
}

#[tokio::test]
async fn test_parse_message_uses_message_payload() {
    let (server, conn) = setup();
    let mut sub = conn
        .subscribe(SUBJECT, Some("raw"), &Default::default())
        .await
        .unwrap();
    server.publish(SUBJECT, r#"{"id":"123"}"#);

    let msg = sub.next_message().await.unwrap();
    let value: Value = parse_message(&msg).unwrap();
    assert_eq!(value["id"], "123");
}

#[tokio::test]
async fn test_text_payload_reaches_handler_and_is_acked() {
    let (server, conn) = setup();
    let (listener, mut rx) = RecordingListener::new("payments-service");
    start_listening(Arc::new(listener), &conn).await.unwrap();

    server.publish(SUBJECT, r#"{"id":"123"}"#);

    let seen = next_seen(&mut rx).await;
    assert_eq!(seen.data, json!({"id": "123"}));
    assert_eq!(seen.sequence, 1);
    assert!(!seen.redelivered);
    assert_eq!(server.pending_count(SUBJECT, "payments-service"), 0);
}

#[tokio::test]
async fn test_binary_payload_decodes_like_text() {
    let (server, conn) = setup();
    let (listener, mut rx) = RecordingListener::new("payments-service");
    start_listening(Arc::new(listener), &conn).await.unwrap();

    server.publish(SUBJECT, br#"{"id":"123"}"#.to_vec());

    let seen = next_seen(&mut rx).await;
    assert_eq!(seen.data, json!({"id": "123"}));
    assert_eq!(server.pending_count(SUBJECT, "payments-service"), 0);
}

#[tokio::test]
async fn test_missing_ack_is_redelivered() {
    let (server, conn) = setup();
    let (listener, mut rx) = RecordingListener::new("payments-service");
    start_listening(Arc::new(listener.without_ack()), &conn)
        .await
        .unwrap();

    server.publish(SUBJECT, r#"{"id":"123"}"#);
    let first = next_seen(&mut rx).await;
    assert!(!first.redelivered);
    assert_eq!(server.pending_count(SUBJECT, "payments-service"), 1);

    let resent = server.redeliver_expired_at(Instant::now() + Duration::from_millis(5000));
    assert_eq!(resent, 1);

    let second = next_seen(&mut rx).await;
    assert_eq!(second.sequence, first.sequence);
    assert_eq!(second.data, first.data);
    assert!(second.redelivered);
}

#[tokio::test]
async fn test_undecodable_payload_is_left_unacked() {
    let (server, conn) = setup();
    let (listener, mut rx) = RecordingListener::new("payments-service");
    start_listening(Arc::new(listener), &conn).await.unwrap();

    server.publish(SUBJECT, "not json");
    server.publish(SUBJECT, r#"{"id":"2"}"#);

    let seen = next_seen(&mut rx).await;
    assert_eq!(seen.sequence, 2);
    assert_eq!(server.pending_count(SUBJECT, "payments-service"), 1);

    // it comes back, and fails again, for as long as nobody fixes it
    assert_eq!(
        server.redeliver_expired_at(Instant::now() + Duration::from_millis(5000)),
        1
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(server.pending_count(SUBJECT, "payments-service"), 1);
}

#[tokio::test]
async fn test_failing_handler_leaves_message_unacked() {
    let (server, conn) = setup();
    let (listener, mut rx) = RecordingListener::new("payments-service");
    start_listening(Arc::new(listener.failing()), &conn)
        .await
        .unwrap();

    server.publish(SUBJECT, r#"{"id":"123"}"#);
    next_seen(&mut rx).await;
    assert_eq!(server.pending_count(SUBJECT, "payments-service"), 1);
}

#[tokio::test]
async fn test_queue_group_instances_share_the_load() {
    let server = InMemoryStreamingServer::new("ticketing");
    let conn_a = Connection::connect_in_memory(&server, None).unwrap();
    let conn_b = Connection::connect_in_memory(&server, None).unwrap();

    let (listener_a, mut rx_a) = RecordingListener::new("payments-service");
    let (listener_b, mut rx_b) = RecordingListener::new("payments-service");
    start_listening(Arc::new(listener_a), &conn_a).await.unwrap();
    start_listening(Arc::new(listener_b), &conn_b).await.unwrap();

    for i in 0..10 {
        server.publish(SUBJECT, json!({ "id": i.to_string() }).to_string());
    }

    let mut got_a = Vec::new();
    let mut got_b = Vec::new();
    for _ in 0..5 {
        got_a.push(next_seen(&mut rx_a).await.sequence);
        got_b.push(next_seen(&mut rx_b).await.sequence);
    }
    got_a.sort_unstable();
    got_b.sort_unstable();

    assert!(got_a.iter().all(|seq| !got_b.contains(seq)));
    let mut all: Vec<u64> = got_a.iter().chain(got_b.iter()).copied().collect();
    all.sort_unstable();
    assert_eq!(all, (1..=10).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_starting_twice_creates_two_subscriptions() {
    let (server, conn) = setup();
    let (listener, mut rx) = RecordingListener::new("payments-service");
    let listener = Arc::new(listener);

    let first = start_listening(listener.clone(), &conn).await.unwrap();
    let second = start_listening(listener.clone(), &conn).await.unwrap();
    assert_ne!(first.subscription_id(), second.subscription_id());
    assert_eq!(server.member_count(SUBJECT, "payments-service"), 2);

    for i in 0..4 {
        server.publish(SUBJECT, json!({ "id": i.to_string() }).to_string());
    }

    let mut by_first = Vec::new();
    let mut by_second = Vec::new();
    for _ in 0..4 {
        let seen = next_seen(&mut rx).await;
        if seen.subscription_id == first.subscription_id() {
            by_first.push(seen.sequence);
        } else {
            assert_eq!(seen.subscription_id, second.subscription_id());
            by_second.push(seen.sequence);
        }
    }

    // each subscription receives on its own, never the same message
    assert!(!by_first.is_empty());
    assert!(!by_second.is_empty());
    assert!(by_first.iter().all(|seq| !by_second.contains(seq)));
    let mut all: Vec<u64> = by_first.iter().chain(by_second.iter()).copied().collect();
    all.sort_unstable();
    assert_eq!(all, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_history_is_delivered_to_a_new_group() {
    let (server, conn) = setup();
    server.publish(SUBJECT, r#"{"id":"early"}"#);

    let (listener, mut rx) = RecordingListener::new("late-service");
    Arc::new(listener).listen(&conn).await.unwrap();

    let seen = next_seen(&mut rx).await;
    assert_eq!(seen.data["id"], "early");
}

#[tokio::test]
async fn test_ticket_created_listener_acks_typed_events() {
    let (server, conn) = setup();
    let handle = Arc::new(TicketCreatedListener::new())
        .listen(&conn)
        .await
        .unwrap();

    server.publish(
        SUBJECT,
        r#"{"id":"abc","title":"concert","price":20}"#,
    );

    wait_until(|| {
        server.last_sequence(SUBJECT) == 1
            && server.pending_count(SUBJECT, TicketCreatedListener::QUEUE_GROUP) == 0
    })
    .await;
    assert!(!handle.is_finished());
}

#[tokio::test]
async fn test_listener_stops_when_connection_closes() {
    let (server, conn) = setup();
    let (listener, _rx) = RecordingListener::new("payments-service");
    let handle = start_listening(Arc::new(listener), &conn).await.unwrap();

    conn.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle.finished())
        .await
        .expect("listener did not stop");

    // the durable group outlives the connection
    assert!(server.has_group(SUBJECT, "payments-service"));
    assert!(start_listening(Arc::new(RecordingListener::new("x").0), &conn).await.is_err());
}

/// Never acks, with its own ack wait.
struct NeverAcks {
    ack_wait: Duration,
    seen: mpsc::UnboundedSender<Seen>,
}

#[async_trait]
impl Listener for NeverAcks {
    type Event = AnyTicketEvent;

    fn queue_group_name(&self) -> &str {
        "payments-service"
    }

    fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    async fn on_message(&self, data: Value, msg: Message) -> Result<(), ListenerError> {
        let _ = self.seen.send(Seen {
            data,
            sequence: msg.sequence(),
            redelivered: msg.is_redelivered(),
            subscription_id: msg.subscription_id().to_string(),
        });
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_redelivery_loop_resends_after_ack_wait() {
    let (server, conn) = setup();
    tokio::spawn(server.clone().run_redelivery_loop(Duration::from_millis(100)));

    let (seen, mut rx) = mpsc::unbounded_channel();
    let listener = NeverAcks {
        ack_wait: Duration::from_millis(500),
        seen,
    };
    start_listening(Arc::new(listener), &conn).await.unwrap();

    server.publish(SUBJECT, r#"{"id":"123"}"#);
    let first = next_seen(&mut rx).await;
    assert!(!first.redelivered);

    tokio::time::advance(Duration::from_millis(600)).await;

    let again = next_seen(&mut rx).await;
    assert_eq!(again.sequence, first.sequence);
    assert_eq!(again.data, first.data);
    assert!(again.redelivered);
    assert_eq!(server.pending_count(SUBJECT, "payments-service"), 1);
}
