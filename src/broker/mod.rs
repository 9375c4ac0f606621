//! The `broker` module holds everything that talks about the streaming
//! server's side of the contract: subscription options, delivered messages
//! and their acknowledgment, the `StreamTransport` seam every connection
//! implements, and an in-memory server that honours the same delivery rules
//! (queue groups, durable positions, redelivery after `ack_wait`).

pub mod channel;
pub mod engine;
pub mod message;
pub mod options;
pub mod transport;

pub use engine::{InMemoryStreamingServer, MemoryTransport};
pub use message::{Ack, AckSink, Delivery, Message, Payload};
pub use options::{DEFAULT_ACK_WAIT, DEFAULT_MAX_IN_FLIGHT, StartPosition, SubscriptionOptions};
pub use transport::{StreamTransport, Subscription};
