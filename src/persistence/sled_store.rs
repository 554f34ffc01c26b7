//! Persistence layer backed by `sled`
//!
//! Everything lives in a single `messages` tree with two key spaces:
//!
//! - `m | len(subject) as u32 BE | subject | id as u64 BE` holds a message record;
//! - `h | subject` holds the highest id ever issued for the subject.
//!
//! Subjects are only ever key bytes, so no subject name can collide with a
//! sled tree. The high-water mark is written in the same `sled::Batch` as the
//! records it covers, including zero-expiration messages that are never
//! stored, and it is what seeds the [`SequenceGenerator`] on startup.
//!
//! Writes go through a [`BatchWriter`]: ids are taken from the sequence
//! generator inside the flush, the whole flush is applied as one atomic batch,
//! and the database is flushed to disk once per batch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::info;

use super::batch::{BatchConfig, BatchItem, BatchSink, BatchWriter};
use super::clock::{self, Clock};
use super::{MessageStore, SequenceGenerator};
use crate::broker::message::{Message, MessageId};
use crate::utils::StoreError;

const MESSAGES_TREE: &[u8] = b"messages";
const MESSAGE_PREFIX: u8 = b'm';
const HIGH_WATER_PREFIX: u8 = b'h';

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredRecord {
    pub body: Vec<u8>,
    pub expiration_ms: u64,
    pub created_at_ms: i64,
}

fn message_key(subject: &str, id: MessageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 4 + subject.len() + 8);
    key.push(MESSAGE_PREFIX);
    key.extend_from_slice(&(subject.len() as u32).to_be_bytes());
    key.extend_from_slice(subject.as_bytes());
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn high_water_key(subject: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + subject.len());
    key.push(HIGH_WATER_PREFIX);
    key.extend_from_slice(subject.as_bytes());
    key
}

fn decode_id(value: &[u8]) -> Result<MessageId, StoreError> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| StoreError::backend(format!("malformed id of {} bytes", value.len())))?;
    Ok(MessageId::from_be_bytes(bytes))
}

struct SledSink {
    db: Db,
    tree: Tree,
    sequence: Arc<dyn SequenceGenerator>,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl BatchSink for SledSink {
    async fn write_batch(&self, items: &mut [BatchItem]) -> Result<(), StoreError> {
        let created_at_ms = self.clock.now().timestamp_millis();
        let mut batch = sled::Batch::default();
        let mut high_water: HashMap<String, MessageId> = HashMap::new();

        for item in items.iter_mut() {
            let expiration_ms = u64::try_from(item.message.expiration.as_millis()).unwrap_or(u64::MAX);

            // Encode before taking an id so a bad record never burns one.
            let record = if expiration_ms == 0 {
                None
            } else {
                let record = StoredRecord {
                    body: item.message.body.to_vec(),
                    expiration_ms,
                    created_at_ms,
                };
                match serde_json::to_vec(&record) {
                    Ok(encoded) => Some(encoded),
                    Err(err) => {
                        item.error = Some(err.into());
                        continue;
                    }
                }
            };

            let id = match self.sequence.create_new_id(&item.subject).await {
                Ok(id) => id,
                Err(err) => {
                    item.error = Some(err);
                    continue;
                }
            };
            item.message.id = id;

            let mark = high_water.entry(item.subject.clone()).or_default();
            *mark = (*mark).max(id);

            if let Some(encoded) = record {
                batch.insert(message_key(&item.subject, id), encoded);
            }
        }

        for (subject, id) in high_water {
            batch.insert(high_water_key(&subject), &id.to_be_bytes()[..]);
        }

        self.tree.apply_batch(batch)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SledStore {
    tree: Tree,
    writer: BatchWriter,
    clock: Arc<dyn Clock>,
}

impl SledStore {
    /// Open or create a sled database at `path` and seed `sequence` from it.
    ///
    /// Spawns the batch flusher, so this must run inside a Tokio runtime.
    pub async fn open(
        path: impl AsRef<Path>,
        sequence: Arc<dyn SequenceGenerator>,
        clock: Arc<dyn Clock>,
        batch: BatchConfig,
    ) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(MESSAGES_TREE)?;
        load_sequences(&tree, sequence.as_ref()).await?;

        let sink = Arc::new(SledSink {
            db,
            tree: tree.clone(),
            sequence,
            clock: clock.clone(),
        });

        Ok(Self {
            tree,
            writer: BatchWriter::new(batch, sink),
            clock,
        })
    }
}

/// Raise every subject's counter to its persisted high-water mark.
async fn load_sequences(tree: &Tree, sequence: &dyn SequenceGenerator) -> Result<(), StoreError> {
    for entry in tree.scan_prefix([HIGH_WATER_PREFIX]) {
        let (key, value) = entry?;
        let subject = String::from_utf8(key[1..].to_vec()).map_err(StoreError::backend)?;
        let last_id = decode_id(&value)?;
        sequence.load(&subject, last_id).await?;
        info!(subject, last_id, "sequence restored");
    }
    Ok(())
}

impl SledStore {
    /// Highest id whose write reached disk for `subject`, or 0.
    fn persisted_high_water(&self, subject: &str) -> Result<MessageId, StoreError> {
        match self.tree.get(high_water_key(subject))? {
            Some(value) => decode_id(&value),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl MessageStore for SledStore {
    async fn save_message(&self, subject: &str, message: &mut Message) -> Result<(), StoreError> {
        let saved = self.writer.add_and_wait(subject, message.clone()).await?;
        message.id = saved.id;
        Ok(())
    }

    async fn get_message(&self, subject: &str, id: MessageId) -> Result<Message, StoreError> {
        let Some(value) = self.tree.get(message_key(subject, id))? else {
            // Ids covered by the mark were written without a record (zero
            // expiration); ids above it were never successfully written.
            let last_id = self.persisted_high_water(subject)?;
            return Err(if id >= 1 && id <= last_id {
                StoreError::Expired {
                    subject: subject.to_string(),
                    id,
                }
            } else {
                StoreError::InvalidId {
                    subject: subject.to_string(),
                    id,
                }
            });
        };

        let record: StoredRecord = serde_json::from_slice(&value)?;
        let created_at = DateTime::from_timestamp_millis(record.created_at_ms)
            .ok_or_else(|| StoreError::backend("stored timestamp out of range"))?;
        let expiration = Duration::from_millis(record.expiration_ms);

        if self.clock.now() >= clock::deadline(created_at, expiration) {
            return Err(StoreError::Expired {
                subject: subject.to_string(),
                id,
            });
        }

        Ok(Message {
            id,
            body: Bytes::from(record.body),
            expiration,
        })
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("tree", &"messages")
            .finish()
    }
}
