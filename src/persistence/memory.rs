//! In-memory message store.
//!
//! Every subject owns an independent [`SubjectCell`] holding its id counter
//! and its id -> message map. A cell is guarded by its own mutex, so saves
//! and lookups on different subjects never contend with each other; the
//! outer `DashMap` is only touched to find (or lazily create) the cell.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::clock::{self, Clock, SystemClock};
use super::MessageStore;
use crate::broker::message::{Message, MessageId};
use crate::utils::StoreError;

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SubjectCell {
    last_id: MessageId,
    messages: HashMap<MessageId, StoredMessage>,
}

pub struct InMemoryStore {
    subjects: DashMap<String, Arc<Mutex<SubjectCell>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            subjects: DashMap::new(),
            clock,
        }
    }

    fn cell(&self, subject: &str) -> Arc<Mutex<SubjectCell>> {
        if let Some(cell) = self.subjects.get(subject) {
            return cell.clone();
        }
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("subjects", &self.subjects.len())
            .finish()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save_message(&self, subject: &str, message: &mut Message) -> Result<(), StoreError> {
        let cell = self.cell(subject);
        let deadline = clock::deadline(self.clock.now(), message.expiration);

        let mut cell = cell.lock().map_err(|_| StoreError::backend("subject lock poisoned"))?;
        cell.last_id += 1;
        message.id = cell.last_id;
        cell.messages.insert(
            message.id,
            StoredMessage {
                message: message.clone(),
                deadline,
            },
        );

        debug!(subject, id = message.id, "message saved");
        Ok(())
    }

    async fn get_message(&self, subject: &str, id: MessageId) -> Result<Message, StoreError> {
        let cell = self.cell(subject);
        let now = self.clock.now();

        let cell = cell.lock().map_err(|_| StoreError::backend("subject lock poisoned"))?;
        let Some(stored) = cell.messages.get(&id) else {
            return Err(StoreError::InvalidId {
                subject: subject.to_string(),
                id,
            });
        };

        if now >= stored.deadline {
            return Err(StoreError::Expired {
                subject: subject.to_string(),
                id,
            });
        }

        Ok(stored.message.clone())
    }
}
