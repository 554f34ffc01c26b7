//! JSON frames exchanged with WebSocket clients, and the mapping from broker
//! errors to wire status codes.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::broker::MessageId;
use crate::utils::BrokerError;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "publish")]
    Publish {
        request_id: Option<u64>,
        subject: String,
        body: String,
        expiration_seconds: u64,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        request_id: Option<u64>,
        subject: String,
    },
    #[serde(rename = "fetch")]
    Fetch {
        request_id: Option<u64>,
        subject: String,
        id: MessageId,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "published")]
    Published { request_id: Option<u64>, id: MessageId },
    #[serde(rename = "subscribed")]
    Subscribed {
        request_id: Option<u64>,
        subject: String,
    },
    #[serde(rename = "fetched")]
    Fetched { request_id: Option<u64>, body: String },
    #[serde(rename = "message")]
    Message { subject: String, body: String },
    #[serde(rename = "error")]
    Error {
        request_id: Option<u64>,
        code: StatusCode,
        message: String,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Unavailable,
    InvalidArgument,
    DeadlineExceeded,
    Internal,
}

impl ServerMessage {
    /// Error reply for a failed broker call. Internal details are logged
    /// here and never sent to the client.
    pub fn from_error(request_id: Option<u64>, err: &BrokerError) -> Self {
        let (code, message) = match err {
            BrokerError::Unavailable => (StatusCode::Unavailable, err.to_string()),
            BrokerError::InvalidId { id, .. } | BrokerError::Expired { id, .. } => (
                StatusCode::InvalidArgument,
                format!("invalid argument for id={id}; message expired or not found"),
            ),
            BrokerError::DeadlineExceeded => (StatusCode::DeadlineExceeded, err.to_string()),
            BrokerError::Internal { context } => {
                error!(context = %context, "internal error while serving request");
                (StatusCode::Internal, "internal error".to_string())
            }
        };
        ServerMessage::Error {
            request_id,
            code,
            message,
        }
    }

    pub fn to_json(&self) -> String {
        // Only strings and integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
