//! Message definitions for the broker
//!
//! `Message` is the unit handed between the broker, its stores and its
//! subscribers.
//!
//! Notes on fields:
//! - `id`: subject-scoped identifier assigned by the store on save; any
//!   value set by the caller is overwritten
//! - `body`: opaque bytes
//! - `expiration`: time-to-live measured from the moment the store saves the
//!   message. A zero expiration is already expired

use std::time::Duration;

use bytes::Bytes;

/// Identifier of a message within one subject. Ids start at 1.
pub type MessageId = u64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub body: Bytes,
    pub expiration: Duration,
}

impl Message {
    pub fn new(body: impl Into<Bytes>, expiration: Duration) -> Self {
        Self {
            id: 0,
            body: body.into(),
            expiration,
        }
    }
}
