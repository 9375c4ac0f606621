//! The `utils` module provides the error types and logging setup shared by
//! every other module of `stanlisten`.

pub mod error;
pub mod logging;

pub use error::{BrokerError, DecodeError, ListenerError, PublishError};
