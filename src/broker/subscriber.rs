//! Live fanout of published messages.
//!
//! [`InMemorySubscribers::publish`] spawns every callback registered on the
//! subject as its own task and waits for all of them, but never longer than
//! the fanout timeout. Callbacks still running at that point are detached:
//! the publisher moves on and delivery to those subscribers may or may not
//! complete later. Subscriptions cap themselves at one such pending delivery
//! and report `Delivery::Dropped` for what they shed meanwhile.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::broker::message::Message;
use crate::broker::subject::{Delivery, OnPublish, SubjectSubscribers};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    /// Register `callback` for messages published on `subject` from now on.
    fn add_subscriber(&self, subject: &str, callback: OnPublish);

    /// Deliver `message` to every subscriber of `subject`, bounded by the
    /// fanout timeout.
    async fn publish(&self, subject: &str, message: &Message);
}

#[derive(Debug)]
pub struct InMemorySubscribers {
    subjects: DashMap<String, Arc<Mutex<SubjectSubscribers>>>,
    publish_timeout: Duration,
}

impl InMemorySubscribers {
    pub fn new(publish_timeout: Duration) -> Self {
        Self {
            subjects: DashMap::new(),
            publish_timeout,
        }
    }

    fn subject(&self, subject: &str) -> Arc<Mutex<SubjectSubscribers>> {
        if let Some(list) = self.subjects.get(subject) {
            return list.clone();
        }
        self.subjects
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SubjectSubscribers::new(subject))))
            .clone()
    }

    /// Number of callbacks currently registered on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subjects
            .get(subject)
            .map(|list| list.lock().map(|l| l.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Default for InMemorySubscribers {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLISH_TIMEOUT)
    }
}

#[async_trait]
impl SubscriberRegistry for InMemorySubscribers {
    fn add_subscriber(&self, subject: &str, callback: OnPublish) {
        let list = self.subject(subject);
        let mut list = list.lock().unwrap_or_else(|e| e.into_inner());
        list.subscribe(callback);
        debug!(subject, subscribers = list.len(), "subscriber added");
    }

    async fn publish(&self, subject: &str, message: &Message) {
        let Some(list) = self.subjects.get(subject).map(|l| l.clone()) else {
            return;
        };
        let callbacks = list.lock().unwrap_or_else(|e| e.into_inner()).snapshot();
        if callbacks.is_empty() {
            return;
        }

        let mut deliveries = JoinSet::new();
        for (key, callback) in callbacks {
            let message = message.clone();
            deliveries.spawn(async move { (key, callback(message).await) });
        }

        let deadline = Instant::now() + self.publish_timeout;
        let mut disconnected = Vec::new();
        let mut dropped = 0usize;
        loop {
            match timeout_at(deadline, deliveries.join_next()).await {
                Ok(Some(Ok((key, Delivery::Disconnected)))) => disconnected.push(key),
                Ok(Some(Ok((_, Delivery::Dropped)))) => dropped += 1,
                Ok(Some(Ok((_, Delivery::Delivered)))) => {}
                Ok(Some(Err(err))) => warn!(subject, error = %err, "subscriber callback panicked"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        subject,
                        pending = deliveries.len(),
                        "fanout timed out; leaving slow subscribers behind"
                    );
                    deliveries.detach_all();
                    break;
                }
            }
        }

        if dropped > 0 {
            debug!(subject, id = message.id, dropped, "message dropped for backed-up subscribers");
        }

        if !disconnected.is_empty() {
            let mut list = list.lock().unwrap_or_else(|e| e.into_inner());
            list.remove(&disconnected);
            debug!(subject, removed = disconnected.len(), "dropped closed subscriptions");
        }
    }
}
