//! Tracing decorators.
//!
//! `Traced<T>` wraps a store, sequence generator, subscriber registry or
//! broker and implements the same trait, opening a span per call with the
//! subject, the ids involved and the error if there was one. Wrappers are
//! chained when the broker is assembled; the wrapped components carry no
//! span logic of their own.

use async_trait::async_trait;
use tracing::{Instrument, Span, debug_span, field};

use crate::broker::engine::MessageBroker;
use crate::broker::message::{Message, MessageId};
use crate::broker::subject::OnPublish;
use crate::broker::subscriber::SubscriberRegistry;
use crate::broker::subscription::Subscription;
use crate::persistence::{MessageStore, SequenceGenerator};
use crate::utils::{BrokerError, StoreError};

#[derive(Debug)]
pub struct Traced<T> {
    component: &'static str,
    inner: T,
}

impl<T> Traced<T> {
    pub fn new(component: &'static str, inner: T) -> Self {
        Self { component, inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

fn record_error<T, E: std::fmt::Display>(result: &Result<T, E>) {
    if let Err(err) = result {
        Span::current().record("error", field::display(err));
    }
}

#[async_trait]
impl<T: MessageStore> MessageStore for Traced<T> {
    async fn save_message(&self, subject: &str, message: &mut Message) -> Result<(), StoreError> {
        let span = debug_span!(
            "save_message",
            component = self.component,
            subject,
            assigned_id = field::Empty,
            error = field::Empty
        );
        async move {
            let result = self.inner.save_message(subject, message).await;
            Span::current().record("assigned_id", message.id);
            record_error(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn get_message(&self, subject: &str, id: MessageId) -> Result<Message, StoreError> {
        let span = debug_span!(
            "get_message",
            component = self.component,
            subject,
            id,
            error = field::Empty
        );
        async move {
            let result = self.inner.get_message(subject, id).await;
            record_error(&result);
            result
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<T: SequenceGenerator> SequenceGenerator for Traced<T> {
    async fn create_new_id(&self, subject: &str) -> Result<MessageId, StoreError> {
        let span = debug_span!(
            "create_new_id",
            component = self.component,
            subject,
            assigned_id = field::Empty,
            error = field::Empty
        );
        async move {
            let result = self.inner.create_new_id(subject).await;
            if let Ok(id) = &result {
                Span::current().record("assigned_id", *id);
            }
            record_error(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn load(&self, subject: &str, last_id: MessageId) -> Result<(), StoreError> {
        let span = debug_span!(
            "load",
            component = self.component,
            subject,
            last_id,
            error = field::Empty
        );
        async move {
            let result = self.inner.load(subject, last_id).await;
            record_error(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn last_id(&self, subject: &str) -> Result<MessageId, StoreError> {
        self.inner
            .last_id(subject)
            .instrument(debug_span!("last_id", component = self.component, subject))
            .await
    }
}

#[async_trait]
impl<T: SubscriberRegistry> SubscriberRegistry for Traced<T> {
    fn add_subscriber(&self, subject: &str, callback: OnPublish) {
        let _guard = debug_span!("add_subscriber", component = self.component, subject).entered();
        self.inner.add_subscriber(subject, callback);
    }

    async fn publish(&self, subject: &str, message: &Message) {
        self.inner
            .publish(subject, message)
            .instrument(debug_span!(
                "fanout",
                component = self.component,
                subject,
                id = message.id
            ))
            .await
    }
}

#[async_trait]
impl<T: MessageBroker> MessageBroker for Traced<T> {
    async fn publish(&self, subject: &str, message: Message) -> Result<MessageId, BrokerError> {
        let span = debug_span!(
            "publish",
            component = self.component,
            subject,
            assigned_id = field::Empty,
            error = field::Empty
        );
        async move {
            let result = self.inner.publish(subject, message).await;
            if let Ok(id) = &result {
                Span::current().record("assigned_id", *id);
            }
            record_error(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BrokerError> {
        let span = debug_span!(
            "subscribe",
            component = self.component,
            subject,
            error = field::Empty
        );
        async move {
            let result = self.inner.subscribe(subject).await;
            record_error(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn fetch(&self, subject: &str, id: MessageId) -> Result<Message, BrokerError> {
        let span = debug_span!(
            "fetch",
            component = self.component,
            subject,
            id,
            error = field::Empty
        );
        async move {
            let result = self.inner.fetch(subject, id).await;
            record_error(&result);
            result
        }
        .instrument(span)
        .await
    }

    fn close(&self) {
        self.inner.close();
    }
}
