//! # SubjectMQ
//!
//! `subjectmq` is a subject-addressed message broker. Publishers append
//! messages to named subjects and get back a per-subject sequential id;
//! subscribers receive live messages for a subject; any message can later be
//! fetched by id until it expires.
//!
//! ## Core Modules
//!
//! - `broker`: the facade tying persistence to live fanout, plus subscriber bookkeeping.
//! - `client`: a connected WebSocket client and its subscription forwarders.
//! - `config`: layered settings from defaults, `config/default.*` and `SUBJECTMQ__*` variables.
//! - `persistence`: message stores (in-memory and sled), the id sequence and the write batcher.
//! - `transport`: the WebSocket server speaking a small JSON protocol.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;
