//! Error types for every layer of the broker.
//!
//! Storage backends report [`StoreError`]. The broker translates those once,
//! at its boundary, into the stable [`BrokerError`] taxonomy that the
//! transport maps onto wire status codes.

use crate::broker::message::MessageId;

/// Errors reported by message stores, sequence generators and the batch writer.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No message was ever assigned this id on the subject.
    #[error("no message exists with id {id} on subject `{subject}`")]
    InvalidId { subject: String, id: MessageId },

    /// The message existed but its expiration has elapsed.
    #[error("message {id} on subject `{subject}` is expired")]
    Expired { subject: String, id: MessageId },

    /// Unexpected backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The component stopped accepting work.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    /// Merge a batch-wide write failure with an error already recorded on
    /// a single item.
    pub fn combine(write: &StoreError, item: StoreError) -> Self {
        StoreError::Backend(format!("{write}: {item}"))
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::backend(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::backend(err)
    }
}

/// Domain errors returned by [`crate::broker::MessageBroker`] operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker is closed")]
    Unavailable,

    #[error("invalid id {id} for subject `{subject}`")]
    InvalidId { subject: String, id: MessageId },

    #[error("message {id} on subject `{subject}` is expired")]
    Expired { subject: String, id: MessageId },

    /// Unexpected failure. The context is for logs only.
    #[error("internal error: {context}")]
    Internal { context: String },

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl BrokerError {
    pub fn internal(context: impl std::fmt::Display) -> Self {
        BrokerError::Internal {
            context: context.to_string(),
        }
    }
}

impl From<StoreError> for BrokerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidId { subject, id } => BrokerError::InvalidId { subject, id },
            StoreError::Expired { subject, id } => BrokerError::Expired { subject, id },
            other => BrokerError::internal(other),
        }
    }
}

impl From<tokio::time::error::Elapsed> for BrokerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BrokerError::DeadlineExceeded
    }
}

/// Errors raised by the WebSocket transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}
