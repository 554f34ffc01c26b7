//! Broker engine
//!
//! The broker routes the three client operations to the components behind
//! it:
//! - `publish`: the [`MessageStore`] assigns the id and keeps the message,
//!   then the [`SubscriberRegistry`] fans it out to live subscribers
//! - `subscribe`: registers a callback feeding a bounded [`Subscription`]
//! - `fetch`: looks a message up in the store
//!
//! Store failures are translated here, and only here, into [`BrokerError`].
//!
//! Lifecycle: a broker starts `Open` and moves to `Closed` on [`close`];
//! once closed every operation fails with `Unavailable`. Subscriptions that
//! were already handed out keep working.
//!
//! [`close`]: MessageBroker::close

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{error, info};

use crate::broker::message::{Message, MessageId};
use crate::broker::subscriber::SubscriberRegistry;
use crate::broker::subscription::Subscription;
use crate::persistence::MessageStore;
use crate::utils::{BrokerError, StoreError};

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Store `message` under `subject`, deliver it to live subscribers and
    /// return its assigned id.
    async fn publish(&self, subject: &str, message: Message) -> Result<MessageId, BrokerError>;

    /// Receive every message published on `subject` from now on.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BrokerError>;

    async fn fetch(&self, subject: &str, id: MessageId) -> Result<Message, BrokerError>;

    /// Stop accepting operations. Idempotent.
    fn close(&self);
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Open = 0,
    Closed = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerOptions {
    /// Messages buffered per subscription before fanout has to wait.
    pub subscriber_buffer: usize,
    /// Upper bound on a single store call.
    pub operation_timeout: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Broker {
    store: Arc<dyn MessageStore>,
    subscribers: Arc<dyn SubscriberRegistry>,
    state: AtomicU8,
    options: BrokerOptions,
}

impl Broker {
    pub fn new(
        store: Arc<dyn MessageStore>,
        subscribers: Arc<dyn SubscriberRegistry>,
        options: BrokerOptions,
    ) -> Self {
        Self {
            store,
            subscribers,
            state: AtomicU8::new(LifecycleState::Open as u8),
            options,
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            0 => LifecycleState::Open,
            _ => LifecycleState::Closed,
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        match self.state() {
            LifecycleState::Open => Ok(()),
            LifecycleState::Closed => Err(BrokerError::Unavailable),
        }
    }

    fn translate(&self, operation: &str, subject: &str, err: StoreError) -> BrokerError {
        let err = BrokerError::from(err);
        if let BrokerError::Internal { context } = &err {
            error!(operation, subject, context = %context, "unexpected store error");
        }
        err
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl MessageBroker for Broker {
    async fn publish(&self, subject: &str, message: Message) -> Result<MessageId, BrokerError> {
        self.ensure_open()?;

        let mut message = message;
        timeout(
            self.options.operation_timeout,
            self.store.save_message(subject, &mut message),
        )
        .await?
        .map_err(|err| self.translate("publish", subject, err))?;

        // Fanout outcome never fails the publish.
        self.subscribers.publish(subject, &message).await;

        Ok(message.id)
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;

        let (callback, subscription) = Subscription::channel(subject, self.options.subscriber_buffer);
        self.subscribers.add_subscriber(subject, callback);
        Ok(subscription)
    }

    async fn fetch(&self, subject: &str, id: MessageId) -> Result<Message, BrokerError> {
        self.ensure_open()?;

        timeout(
            self.options.operation_timeout,
            self.store.get_message(subject, id),
        )
        .await?
        .map_err(|err| self.translate("fetch", subject, err))
    }

    fn close(&self) {
        let previous = self
            .state
            .swap(LifecycleState::Closed as u8, Ordering::AcqRel);
        if previous == LifecycleState::Open as u8 {
            info!("broker closed");
        }
    }
}
