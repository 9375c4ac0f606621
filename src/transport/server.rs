//! WebSocket front end for an [`InMemoryStreamingServer`].
//!
//! Each accepted socket must open with a `connect` frame. After that:
//! - `subscribe` joins the engine and forwards deliveries as `message` frames
//!   under the client's own subscription id
//! - `ack` is matched against the deliveries still waiting on this socket
//! - `publish` appends to the engine's log
//! - `close`, or the socket ending, disconnects the client from the engine

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{InMemoryStreamingServer, Message, MemoryTransport, StreamTransport};
use crate::transport::message::{ClientFrame, ServerFrame};
use crate::utils::BrokerError;

type Outbound = mpsc::UnboundedSender<WsMessage>;
/// Deliveries sent on this socket and not yet acked, by client subscription id and sequence.
type Unacked = Arc<Mutex<HashMap<(String, u64), Message>>>;

/// Bind `addr` and serve WebSocket clients until the listener fails.
pub async fn start_websocket_server(
    addr: &str,
    server: InMemoryStreamingServer,
) -> Result<(), BrokerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| BrokerError::Transport(format!("cannot bind {addr}: {e}")))?;
    info!("WebSocket server listening on ws://{addr}");
    serve(listener, server).await
}

/// Accept connections on an already bound listener.
pub async fn serve(listener: TcpListener, server: InMemoryStreamingServer) -> Result<(), BrokerError> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        tokio::spawn(handle_connection(stream, peer, server.clone()));
    }
}

fn frame(frame: &ServerFrame) -> Option<WsMessage> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(WsMessage::text(text)),
        Err(e) => {
            error!("failed to encode server frame: {e}");
            None
        }
    }
}

fn send(outbound: &Outbound, server_frame: &ServerFrame) -> bool {
    frame(server_frame).is_some_and(|msg| outbound.send(msg).is_ok())
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, server: InMemoryStreamingServer) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {peer} failed: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (outbound, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!("send to {peer} failed: {e}");
                break;
            }
        }
        debug!("send loop closed for {peer}");
    });

    let Some((client_id, transport)) = register(&mut ws_receiver, &server, &outbound).await else {
        let _ = outbound.send(WsMessage::Close(None));
        return;
    };
    info!("{client_id} connected from {peer}");

    let unacked: Unacked = Arc::new(Mutex::new(HashMap::new()));

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(ClientFrame::Subscribe {
                subscription_id,
                subject,
                queue_group,
                options,
            }) => {
                match transport
                    .subscribe(&subject, queue_group.as_deref(), &options)
                    .await
                {
                    Ok(mut subscription) => {
                        debug!("{client_id} subscribed to {subject} as {subscription_id}");
                        let outbound = outbound.clone();
                        let unacked = unacked.clone();
                        let manual_ack = options.manual_ack;
                        tokio::spawn(async move {
                            while let Some(msg) = subscription.next_message().await {
                                let delivery = msg.delivery().clone();
                                if manual_ack {
                                    unacked
                                        .lock()
                                        .unwrap_or_else(PoisonError::into_inner)
                                        .insert((subscription_id.clone(), msg.sequence()), msg);
                                }
                                let forwarded = send(
                                    &outbound,
                                    &ServerFrame::Message {
                                        subscription_id: subscription_id.clone(),
                                        delivery,
                                    },
                                );
                                if !forwarded {
                                    break;
                                }
                            }
                        });
                    }
                    Err(e) => {
                        send(&outbound, &ServerFrame::Error { message: e.to_string() });
                    }
                }
            }
            Ok(ClientFrame::Publish { subject, payload }) => {
                if let Err(e) = transport.publish(&subject, payload).await {
                    send(&outbound, &ServerFrame::Error { message: e.to_string() });
                }
            }
            Ok(ClientFrame::Ack {
                subscription_id,
                sequence,
                ..
            }) => {
                let pending = unacked
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&(subscription_id, sequence));
                match pending {
                    Some(msg) => {
                        if let Err(e) = msg.ack() {
                            warn!("ack from {client_id} for #{sequence} failed: {e}");
                        }
                    }
                    None => debug!("{client_id} acked untracked #{sequence}"),
                }
            }
            Ok(ClientFrame::Close { .. }) => break,
            Ok(ClientFrame::Connect { .. }) => {
                send(
                    &outbound,
                    &ServerFrame::Error {
                        message: format!("{client_id} is already connected"),
                    },
                );
            }
            Err(err) => {
                warn!(
                    "invalid client frame from {client_id}: {err} | {}",
                    text.as_str().chars().take(100).collect::<String>()
                );
            }
        }
    }

    // unacked deliveries stay pending in the engine and are redelivered
    unacked.lock().unwrap_or_else(PoisonError::into_inner).clear();
    if let Err(e) = transport.close().await {
        warn!("disconnecting {client_id} failed: {e}");
    }
    let _ = outbound.send(WsMessage::Close(None));
    info!("{client_id} disconnected");
}

/// Wait for the `connect` frame and register the client with the engine.
async fn register(
    ws_receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
    server: &InMemoryStreamingServer,
    outbound: &Outbound,
) -> Option<(String, Arc<MemoryTransport>)> {
    let text = match ws_receiver.next().await {
        Some(Ok(WsMessage::Text(text))) => text,
        _ => return None,
    };

    let (cluster_id, client_id) = match serde_json::from_str::<ClientFrame>(text.as_str()) {
        Ok(ClientFrame::Connect {
            cluster_id,
            client_id,
        }) => (cluster_id, client_id),
        Ok(other) => {
            send(
                outbound,
                &ServerFrame::Error {
                    message: format!("expected connect frame, got {other:?}"),
                },
            );
            return None;
        }
        Err(e) => {
            send(outbound, &ServerFrame::Error { message: e.to_string() });
            return None;
        }
    };

    match server.connect(&cluster_id, &client_id) {
        Ok(transport) => {
            send(
                outbound,
                &ServerFrame::Connected {
                    client_id: client_id.clone(),
                },
            );
            Some((client_id, transport))
        }
        Err(e) => {
            warn!("rejected {client_id}: {e}");
            send(outbound, &ServerFrame::Error { message: e.to_string() });
            None
        }
    }
}
