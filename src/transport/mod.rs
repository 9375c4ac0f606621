//! The `transport` module carries a streaming connection over a WebSocket.
//!
//! It defines the JSON frames exchanged over the socket, implements
//! `StreamTransport` on top of them for clients, and serves the same frames
//! in front of an `InMemoryStreamingServer`.

pub mod message;
pub mod server;
pub mod websocket;

pub use message::{ClientFrame, ServerFrame};
pub use server::{serve, start_websocket_server};
pub use websocket::WebSocketTransport;
