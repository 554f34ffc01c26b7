//! The `client` module defines the representation of a connected WebSocket
//! client.
//!
//! A `Client` owns the sending side of its outbound channel and the tasks
//! forwarding its subscriptions into that channel.

pub mod pubsub_client;
pub use pubsub_client::Client;

#[cfg(test)]
mod tests;
