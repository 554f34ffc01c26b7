//! The broker crate module contains the subject-addressed message broker:
//! id assignment and storage (through `persistence`), live fanout to
//! subscribers, and the open/closed lifecycle.
//!
//! Public types:
//! - `Broker`: the orchestrator behind the `MessageBroker` trait
//! - `InMemorySubscribers`: per-subject callback lists with bounded fanout
//! - `Subscription`: the stream handed to subscribers
//! - `Traced`: span-emitting wrapper for any of the component traits

pub mod engine;
pub mod message;
pub mod subject;
pub mod subscriber;
pub mod subscription;
pub mod traced;

use std::sync::Arc;

use tracing::info;

pub use engine::{Broker, BrokerOptions, LifecycleState, MessageBroker};
pub use message::{Message, MessageId};
pub use subject::{Delivery, OnPublish};
pub use subscriber::{InMemorySubscribers, SubscriberRegistry};
pub use subscription::Subscription;
pub use traced::Traced;

use crate::config::{Settings, StoreBackend};
use crate::persistence::{InMemorySequence, InMemoryStore, MessageStore, SledStore, SystemClock};
use crate::utils::StoreError;

/// Assemble a broker from `settings`, choosing the message store once.
///
/// Must run inside a Tokio runtime when the sled backend is selected.
pub async fn build_broker(settings: &Settings) -> Result<Arc<dyn MessageBroker>, StoreError> {
    let clock = Arc::new(SystemClock);

    let store: Arc<dyn MessageStore> = match settings.store.backend {
        StoreBackend::InMemory => Arc::new(Traced::new("memory", InMemoryStore::with_clock(clock))),
        StoreBackend::Sled => {
            let sequence = Arc::new(Traced::new("sequence", InMemorySequence::new()));
            let store = SledStore::open(
                &settings.store.sled.path,
                sequence,
                clock,
                settings.batch_config(),
            )
            .await?;
            Arc::new(Traced::new("sled", store))
        }
    };
    info!(backend = ?settings.store.backend, "message store ready");

    let subscribers = Arc::new(Traced::new(
        "subscribers",
        InMemorySubscribers::new(settings.fanout_timeout()),
    ));

    let broker = Broker::new(store, subscribers, settings.broker_options());
    Ok(Arc::new(Traced::new("broker", broker)))
}
