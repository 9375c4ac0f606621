//! Wire frames for the WebSocket transport.
//!
//! Every frame is a JSON text message tagged by `type`. The client speaks
//! first with `connect`; everything else may flow in any order afterwards.

use serde::{Deserialize, Serialize};

use crate::broker::{Delivery, Payload, SubscriptionOptions};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Connect {
        cluster_id: String,
        client_id: String,
    },
    Subscribe {
        subscription_id: String,
        subject: String,
        queue_group: Option<String>,
        options: SubscriptionOptions,
    },
    Publish {
        subject: String,
        payload: Payload,
    },
    Ack {
        subscription_id: String,
        subject: String,
        sequence: u64,
    },
    Close {
        client_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        client_id: String,
    },
    Message {
        subscription_id: String,
        delivery: Delivery,
    },
    Error {
        message: String,
    },
}
