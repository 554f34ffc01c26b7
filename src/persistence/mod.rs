//! The `persistence` module stores messages and hands out their ids.
//!
//! Two capabilities are defined here:
//! - [`MessageStore`]: saves a message under a subject (assigning its id) and
//!   looks it up again, honouring its expiration
//! - [`SequenceGenerator`]: a per-subject monotonic counter that durable
//!   backends use instead of backend auto-increment
//!
//! Implementations:
//! - [`InMemoryStore`]: per-subject cells behind their own lock
//! - [`SledStore`]: durable store on an embedded `sled` database whose writes
//!   are coalesced through a [`BatchWriter`]
//!
//! Subjects are created lazily and never torn down, so the number of subjects
//! a process holds only grows.

pub mod batch;
pub mod clock;
pub mod memory;
pub mod sequence;
pub mod sled_store;

use async_trait::async_trait;

use crate::broker::message::{Message, MessageId};
use crate::utils::StoreError;

pub use batch::{BatchConfig, BatchItem, BatchSink, BatchWriter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::InMemoryStore;
pub use sequence::InMemorySequence;
pub use sled_store::SledStore;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `message` under `subject` and write the assigned id back into it.
    async fn save_message(&self, subject: &str, message: &mut Message) -> Result<(), StoreError>;

    /// Look up a message, failing with `InvalidId` or `Expired`.
    async fn get_message(&self, subject: &str, id: MessageId) -> Result<Message, StoreError>;
}

#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    /// Next id for `subject`, starting at 1.
    async fn create_new_id(&self, subject: &str) -> Result<MessageId, StoreError>;

    /// Raise the counter of `subject` to at least `last_id`.
    async fn load(&self, subject: &str, last_id: MessageId) -> Result<(), StoreError>;

    /// Highest id issued so far on `subject`, 0 if none.
    async fn last_id(&self, subject: &str) -> Result<MessageId, StoreError>;
}

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for std::sync::Arc<T> {
    async fn save_message(&self, subject: &str, message: &mut Message) -> Result<(), StoreError> {
        (**self).save_message(subject, message).await
    }

    async fn get_message(&self, subject: &str, id: MessageId) -> Result<Message, StoreError> {
        (**self).get_message(subject, id).await
    }
}

#[async_trait]
impl<T: SequenceGenerator + ?Sized> SequenceGenerator for std::sync::Arc<T> {
    async fn create_new_id(&self, subject: &str) -> Result<MessageId, StoreError> {
        (**self).create_new_id(subject).await
    }

    async fn load(&self, subject: &str, last_id: MessageId) -> Result<(), StoreError> {
        (**self).load(subject, last_id).await
    }

    async fn last_id(&self, subject: &str) -> Result<MessageId, StoreError> {
        (**self).last_id(subject).await
    }
}

#[cfg(test)]
mod tests;
