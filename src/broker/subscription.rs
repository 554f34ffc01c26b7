//! The consumer side of a subscription.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::broker::message::Message;
use crate::broker::subject::{Delivery, OnPublish};

/// Messages published on a subject after the subscription was created.
///
/// Dropping it ends the subscription; the registry forgets the matching
/// callback on the next publish to the subject.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    /// Create a subscription with a delivery buffer of `capacity` messages and
    /// the callback that feeds it.
    ///
    /// When the buffer is full, one delivery waits for room. Messages
    /// published while that delivery is still waiting are dropped for this
    /// subscriber, so a stalled reader holds at most one pending task.
    pub fn channel(subject: &str, capacity: usize) -> (OnPublish, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let parked = Arc::new(AtomicBool::new(false));
        let callback: OnPublish = Arc::new(move |message: Message| -> BoxFuture<'static, Delivery> {
            let tx = tx.clone();
            let parked = parked.clone();
            Box::pin(async move {
                // Checked before try_send so nothing overtakes the parked message.
                if parked.load(Ordering::Acquire) {
                    return Delivery::Dropped;
                }
                let message = match tx.try_send(message) {
                    Ok(()) => return Delivery::Delivered,
                    Err(TrySendError::Closed(_)) => return Delivery::Disconnected,
                    Err(TrySendError::Full(message)) => message,
                };
                if parked.swap(true, Ordering::AcqRel) {
                    return Delivery::Dropped;
                }
                let delivery = match tx.send(message).await {
                    Ok(()) => Delivery::Delivered,
                    Err(_) => Delivery::Disconnected,
                };
                parked.store(false, Ordering::Release);
                delivery
            })
        });

        let subscription = Self {
            subject: subject.to_string(),
            rx,
        };
        (callback, subscription)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
