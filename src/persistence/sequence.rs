//! In-memory sequence generator.
//!
//! Each subject has its own counter behind its own mutex, so two callers on
//! the same subject never observe the same id while callers on different
//! subjects never wait on each other.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;

use super::SequenceGenerator;
use crate::broker::message::MessageId;
use crate::utils::StoreError;

#[derive(Debug, Default)]
pub struct InMemorySequence {
    sequences: DashMap<String, Arc<Mutex<MessageId>>>,
}

impl InMemorySequence {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, subject: &str) -> Arc<Mutex<MessageId>> {
        if let Some(counter) = self.sequences.get(subject) {
            return counter.clone();
        }
        self.sequences
            .entry(subject.to_string())
            .or_default()
            .clone()
    }

    fn with_counter<R>(
        &self,
        subject: &str,
        f: impl FnOnce(&mut MessageId) -> R,
    ) -> Result<R, StoreError> {
        let counter = self.counter(subject);
        let mut value = counter
            .lock()
            .map_err(|_| StoreError::backend("sequence lock poisoned"))?;
        Ok(f(&mut value))
    }
}

#[async_trait]
impl SequenceGenerator for InMemorySequence {
    async fn create_new_id(&self, subject: &str) -> Result<MessageId, StoreError> {
        self.with_counter(subject, |value| {
            *value += 1;
            *value
        })
    }

    async fn load(&self, subject: &str, last_id: MessageId) -> Result<(), StoreError> {
        self.with_counter(subject, |value| *value = (*value).max(last_id))
    }

    async fn last_id(&self, subject: &str) -> Result<MessageId, StoreError> {
        self.with_counter(subject, |value| *value)
    }
}
