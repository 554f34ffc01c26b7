//! Client representation
//!
//! `Client` models a connected client. Every subscription it opens is
//! forwarded by a task that turns broker messages into `message` frames on
//! the client's channel. Dropping the client aborts those tasks, which drops
//! their subscriptions and lets the broker forget them.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::Subscription;
use crate::transport::message::ServerMessage;

#[derive(Debug)]
pub struct Client {
    pub id: String,
    pub sender: UnboundedSender<WsMessage>,
    subscriptions: Vec<JoinHandle<()>>,
}

impl Client {
    /// Create a new client with a sender channel. The `id` is a UUID used
    /// in logs.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            subscriptions: Vec::new(),
        }
    }

    /// Queue a frame for the client. Returns false once the connection is gone.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        self.sender.send(WsMessage::text(msg.to_json())).is_ok()
    }

    /// Forward `subscription` to this client until either side goes away.
    pub fn attach(&mut self, mut subscription: Subscription) {
        let sender = self.sender.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                let frame = ServerMessage::Message {
                    subject: subscription.subject().to_string(),
                    body: String::from_utf8_lossy(&message.body).into_owned(),
                };
                if sender.send(WsMessage::text(frame.to_json())).is_err() {
                    break;
                }
            }
        });
        self.subscriptions.push(handle);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for handle in &self.subscriptions {
            handle.abort();
        }
    }
}
