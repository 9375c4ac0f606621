//! The `client` module owns the process's connection to the streaming
//! server: acquiring it, publishing and subscribing through it, and
//! releasing it deterministically on shutdown.

pub mod connection;
pub use connection::{Connection, random_client_id};

#[cfg(test)]
mod tests;
