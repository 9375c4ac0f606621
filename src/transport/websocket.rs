//! WebSocket transport
//!
//! Client side of a streaming connection carried over a WebSocket.
//! Responsibilities:
//! - Perform the `connect` handshake and fail fast if the server refuses it
//! - Forward outbound frames from an unbounded channel to the socket
//! - Route inbound `message` frames to the matching subscription
//! - Mark the connection closed as soon as the socket ends, which also
//!   ends every subscription

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::{
    Ack, AckSink, Message, Payload, StreamTransport, Subscription, SubscriptionOptions,
};
use crate::transport::message::{ClientFrame, ServerFrame};
use crate::utils::BrokerError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Routes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>>;

fn encode(frame: &ClientFrame) -> Result<WsMessage, BrokerError> {
    serde_json::to_string(frame)
        .map(WsMessage::text)
        .map_err(|e| BrokerError::Protocol(e.to_string()))
}

/// Acks travel back over the same socket as everything else.
struct WsAcker {
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl AckSink for WsAcker {
    fn ack(&self, ack: Ack) -> Result<(), BrokerError> {
        let frame = encode(&ClientFrame::Ack {
            subscription_id: ack.subscription_id,
            subject: ack.subject,
            sequence: ack.sequence,
        })?;
        self.outbound
            .send(frame)
            .map_err(|_| BrokerError::ConnectionClosed)
    }
}

pub struct WebSocketTransport {
    client_id: String,
    outbound: mpsc::UnboundedSender<WsMessage>,
    routes: Routes,
    closed: Arc<watch::Sender<bool>>,
}

impl WebSocketTransport {
    /// Open the socket at `url` and register as `client_id` on `cluster_id`.
    pub async fn connect(url: &str, cluster_id: &str, client_id: &str) -> Result<Self, BrokerError> {
        let failed = |reason: String| BrokerError::ConnectionFailed {
            url: url.to_string(),
            reason,
        };

        let (ws_stream, _response) = connect_async(url).await.map_err(|e| failed(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let hello = encode(&ClientFrame::Connect {
            cluster_id: cluster_id.to_string(),
            client_id: client_id.to_string(),
        })?;
        ws_sender.send(hello).await.map_err(|e| failed(e.to_string()))?;

        match ws_receiver.next().await {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                Ok(ServerFrame::Connected { .. }) => {}
                Ok(ServerFrame::Error { message }) => return Err(failed(message)),
                Ok(other) => {
                    return Err(BrokerError::Protocol(format!(
                        "expected connected frame, got {other:?}"
                    )));
                }
                Err(e) => return Err(BrokerError::Protocol(e.to_string())),
            },
            Some(Ok(other)) => {
                return Err(BrokerError::Protocol(format!(
                    "unexpected handshake message: {other:?}"
                )));
            }
            Some(Err(e)) => return Err(failed(e.to_string())),
            None => return Err(failed("socket closed during handshake".to_string())),
        }

        let (outbound, rx) = mpsc::unbounded_channel::<WsMessage>();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        tokio::spawn(write_loop(
            ws_sender,
            rx,
            client_id.to_string(),
            closed.clone(),
        ));

        let acker: Arc<dyn AckSink> = Arc::new(WsAcker {
            outbound: outbound.clone(),
        });
        tokio::spawn(read_loop(
            ws_receiver,
            routes.clone(),
            acker,
            client_id.to_string(),
            closed.clone(),
        ));

        info!("{client_id} registered on cluster {cluster_id}");
        Ok(Self {
            client_id: client_id.to_string(),
            outbound,
            routes,
            closed,
        })
    }

    fn send(&self, frame: &ClientFrame) -> Result<(), BrokerError> {
        if *self.closed.borrow() {
            return Err(BrokerError::ConnectionClosed);
        }
        self.outbound
            .send(encode(frame)?)
            .map_err(|_| BrokerError::ConnectionClosed)
    }
}

fn shut_down(routes: &Routes, closed: &watch::Sender<bool>) {
    // dropping the senders ends every subscription
    routes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    closed.send_replace(true);
}

async fn write_loop(
    mut ws_sender: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<WsMessage>,
    client_id: String,
    closed: Arc<watch::Sender<bool>>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = msg.is_close();
        if let Err(e) = ws_sender.send(msg).await {
            error!("failed to send frame for {client_id}: {e}");
            break;
        }
        if is_close {
            break;
        }
    }
    closed.send_replace(true);
    debug!("send loop closed for {client_id}");
}

async fn read_loop(
    mut ws_receiver: SplitStream<WsStream>,
    routes: Routes,
    acker: Arc<dyn AckSink>,
    client_id: String,
    closed: Arc<watch::Sender<bool>>,
) {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        match serde_json::from_str::<ServerFrame>(text.as_str()) {
            Ok(ServerFrame::Message {
                subscription_id,
                delivery,
            }) => {
                let mut routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(route) = routes.get(&subscription_id) else {
                    warn!("message for unknown subscription {subscription_id}");
                    continue;
                };
                let message = Message::new(delivery, subscription_id.clone(), acker.clone());
                if route.send(message).is_err() {
                    debug!("subscription {subscription_id} dropped, removing route");
                    routes.remove(&subscription_id);
                }
            }
            Ok(ServerFrame::Error { message }) => {
                error!("server error for {client_id}: {message}");
            }
            Ok(ServerFrame::Connected { .. }) => {
                debug!("ignoring repeated connected frame");
            }
            Err(err) => {
                warn!(
                    "invalid server frame for {client_id}: {err} | {}",
                    text.as_str().chars().take(100).collect::<String>()
                );
            }
        }
    }

    shut_down(&routes, &closed);
    info!("{client_id} disconnected");
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        options: &SubscriptionOptions,
    ) -> Result<Subscription, BrokerError> {
        let subscription_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        // register the route first so no early delivery is lost
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscription_id.clone(), tx);

        let frame = ClientFrame::Subscribe {
            subscription_id: subscription_id.clone(),
            subject: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            options: options.clone(),
        };
        if let Err(e) = self.send(&frame) {
            self.routes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&subscription_id);
            return Err(BrokerError::SubscriptionFailed {
                subject: subject.to_string(),
                reason: e.to_string(),
            });
        }

        debug!("{} subscribed to {subject} as {subscription_id}", self.client_id);
        Ok(Subscription::new(
            subscription_id,
            subject,
            queue_group.map(str::to_string),
            rx,
        ))
    }

    async fn publish(&self, subject: &str, payload: Payload) -> Result<(), BrokerError> {
        self.send(&ClientFrame::Publish {
            subject: subject.to_string(),
            payload,
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if *self.closed.borrow() {
            return Ok(());
        }
        let farewell = self.send(&ClientFrame::Close {
            client_id: self.client_id.clone(),
        });
        // the write loop stops after the close message
        let _ = self.outbound.send(WsMessage::Close(None));
        shut_down(&self.routes, &self.closed);
        farewell
    }

    fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}
