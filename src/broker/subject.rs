//! Subject subscriber lists
//!
//! A `SubjectSubscribers` holds the delivery callbacks registered against one
//! subject, in registration order. Entries are only added by
//! `SubscriberRegistry::add_subscriber` and only removed once their
//! subscription reports it is gone.
//!
//! Concurrency note: callers must synchronize access (the registry keeps
//! each list behind its own mutex).

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::broker::message::Message;

/// What a callback observed when handed a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The subscriber is backed up; this message was not queued for it.
    Dropped,
    /// The receiving side is gone; the callback can be dropped.
    Disconnected,
}

/// Delivery callback invoked once per published message.
pub type OnPublish = Arc<dyn Fn(Message) -> BoxFuture<'static, Delivery> + Send + Sync>;

pub(crate) type SubscriberKey = u64;

#[derive(Default)]
pub struct SubjectSubscribers {
    pub name: String,
    next_key: SubscriberKey,
    callbacks: Vec<(SubscriberKey, OnPublish)>,
}

impl SubjectSubscribers {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Append a callback to the end of the list.
    pub fn subscribe(&mut self, callback: OnPublish) {
        self.next_key += 1;
        self.callbacks.push((self.next_key, callback));
    }

    pub(crate) fn snapshot(&self) -> Vec<(SubscriberKey, OnPublish)> {
        self.callbacks.clone()
    }

    pub(crate) fn remove(&mut self, keys: &[SubscriberKey]) {
        self.callbacks.retain(|(key, _)| !keys.contains(key));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for SubjectSubscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectSubscribers")
            .field("name", &self.name)
            .field("subscribers", &self.callbacks.len())
            .finish()
    }
}
