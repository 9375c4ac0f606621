//! The `error` module defines the error types used within `stanlisten`.
//!
//! Errors are split by the layer that produces them:
//! - `BrokerError`: connecting, subscribing, publishing and acknowledging
//! - `DecodeError`: turning a raw message payload into a typed event
//! - `ListenerError`: anything a listener's message path can fail with
//! - `PublishError`: encoding or sending an outgoing event

use thiserror::Error;

/// Errors raised by a broker connection or transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("unknown cluster id '{0}'")]
    UnknownCluster(String),

    #[error("client id '{0}' is already connected")]
    DuplicateClientId(String),

    #[error("subscription to '{subject}' failed: {reason}")]
    SubscriptionFailed { subject: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors raised while decoding a message payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced from a listener's message path.
///
/// None of these are retried by the listener. The message stays
/// unacknowledged and the broker redelivers it after the ack wait.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("handler failed: {0}")]
    Handler(String),
}

/// Errors raised while publishing an event.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
