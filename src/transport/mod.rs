//! The `transport` module exposes the broker over WebSocket.
//!
//! Frames are JSON objects tagged by `type` (see [`message`]). Each request
//! gets exactly one reply; subscriptions additionally push `message` frames
//! until the connection closes.

pub mod message;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage, StatusCode};
pub use websocket::{handle_client_message, serve, start_websocket_server};
