//! Write coalescing for slow backends.
//!
//! A [`BatchWriter`] owns a single flusher task fed by a bounded queue.
//! Callers submit one message each with [`BatchWriter::add_and_wait`] and are
//! parked on a oneshot until the flush that contains their item resolves it.
//! The flusher hands the whole buffer to the backend's [`BatchSink`] when
//! either
//! - the buffer reaches `size` items, or
//! - `timeout` elapses since the last flush while the buffer is non-empty.
//!
//! Every item of a flush gets the same outcome. A failed write fails the
//! whole batch; nothing is retried or split here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use crate::broker::message::Message;
use crate::utils::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Flush as soon as this many items are buffered.
    pub size: usize,
    /// Flush a non-empty buffer this long after the previous flush.
    pub timeout: Duration,
    /// Capacity of the hand-off queue in front of the flusher.
    pub queue_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 2048,
            timeout: Duration::from_millis(5),
            queue_capacity: 1024,
        }
    }
}

/// A pending write, alive from submission until its flush resolves it.
#[derive(Debug)]
pub struct BatchItem {
    pub subject: String,
    pub message: Message,
    /// Per-item failure recorded by the sink; reported even if the write succeeds.
    pub error: Option<StoreError>,
    resolve: oneshot::Sender<Result<Message, StoreError>>,
}

impl BatchItem {
    fn resolve(self, write: &Result<(), StoreError>) {
        let outcome = match (write, self.error) {
            (Ok(()), None) => Ok(self.message),
            (Ok(()), Some(err)) => Err(err),
            (Err(write), None) => Err(write.clone()),
            (Err(write), Some(err)) => Err(StoreError::combine(write, err)),
        };
        // The caller may have stopped waiting.
        let _ = self.resolve.send(outcome);
    }
}

/// The backend's raw write function.
#[async_trait]
pub trait BatchSink: Send + Sync + 'static {
    /// Write every item in one call. Sinks assign `message.id` on each item.
    async fn write_batch(&self, items: &mut [BatchItem]) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct BatchWriter {
    items: mpsc::Sender<BatchItem>,
}

impl BatchWriter {
    /// Spawn the flusher task. Must be called from within a Tokio runtime.
    ///
    /// The flusher drains what is left and exits once every clone of the
    /// writer has been dropped.
    pub fn new(config: BatchConfig, sink: Arc<dyn BatchSink>) -> Self {
        let size = config.size.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(run_flusher(size, config.timeout, sink, rx));
        Self { items: tx }
    }

    /// Submit `message` and wait for the flush that carries it.
    ///
    /// Dropping the returned future stops the wait but not the write; the
    /// item is still flushed with its batch.
    pub async fn add_and_wait(
        &self,
        subject: &str,
        message: Message,
    ) -> Result<Message, StoreError> {
        let (tx, rx) = oneshot::channel();
        let item = BatchItem {
            subject: subject.to_string(),
            message,
            error: None,
            resolve: tx,
        };

        self.items.send(item).await.map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }
}

async fn run_flusher(
    size: usize,
    timeout: Duration,
    sink: Arc<dyn BatchSink>,
    mut rx: mpsc::Receiver<BatchItem>,
) {
    let mut ticker = interval_at(Instant::now() + timeout, timeout);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buffer: Vec<BatchItem> = Vec::with_capacity(size);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if flush(sink.as_ref(), &mut buffer, true).await {
                    ticker.reset();
                }
            }
            item = rx.recv() => match item {
                Some(item) => {
                    buffer.push(item);
                    if buffer.len() >= size {
                        flush(sink.as_ref(), &mut buffer, false).await;
                        ticker.reset();
                    }
                }
                None => {
                    flush(sink.as_ref(), &mut buffer, false).await;
                    debug!("batch writer closed");
                    return;
                }
            },
        }
    }
}

/// Returns whether anything was written.
async fn flush(sink: &dyn BatchSink, buffer: &mut Vec<BatchItem>, caused_by_timeout: bool) -> bool {
    if buffer.is_empty() {
        return false;
    }

    let result = sink.write_batch(buffer).await;
    match &result {
        Ok(()) => debug!(batch_size = buffer.len(), caused_by_timeout, "batch flushed"),
        Err(err) => warn!(batch_size = buffer.len(), caused_by_timeout, error = %err, "batch write failed"),
    }

    for item in buffer.drain(..) {
        item.resolve(&result);
    }
    true
}
