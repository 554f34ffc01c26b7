use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use super::*;
use crate::broker::message::Message;
use crate::utils::StoreError;

fn message(body: &str, ttl: Duration) -> Message {
    Message::new(body.to_string(), ttl)
}

#[tokio::test]
async fn memory_ids_are_sequential_per_subject() {
    let store = InMemoryStore::new();

    for expected in 1..=5 {
        let mut msg = message("hello", Duration::from_secs(10));
        store.save_message("a", &mut msg).await.unwrap();
        assert_eq!(msg.id, expected);
    }

    let mut other = message("other", Duration::from_secs(10));
    store.save_message("b", &mut other).await.unwrap();
    assert_eq!(other.id, 1, "subjects have independent id spaces");
}

#[tokio::test]
async fn memory_caller_supplied_id_is_overwritten() {
    let store = InMemoryStore::new();
    let mut msg = message("hello", Duration::from_secs(10));
    msg.id = 42;
    store.save_message("a", &mut msg).await.unwrap();
    assert_eq!(msg.id, 1);
}

#[tokio::test]
async fn memory_get_returns_saved_body() {
    let store = InMemoryStore::new();
    let mut msg = message("payload", Duration::from_secs(10));
    store.save_message("a", &mut msg).await.unwrap();

    let fetched = store.get_message("a", msg.id).await.unwrap();
    assert_eq!(fetched.body, "payload");
    assert_eq!(fetched.id, msg.id);
}

#[tokio::test]
async fn memory_unknown_id_is_invalid() {
    let store = InMemoryStore::new();
    let err = store.get_message("a", 7).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::InvalidId {
            subject: "a".into(),
            id: 7
        }
    );

    let mut msg = message("x", Duration::from_secs(10));
    store.save_message("a", &mut msg).await.unwrap();
    assert!(matches!(
        store.get_message("b", msg.id).await,
        Err(StoreError::InvalidId { .. })
    ));
}

#[tokio::test]
async fn memory_expiry_follows_injected_clock() {
    let clock = Arc::new(ManualClock::default());
    let store = InMemoryStore::with_clock(clock.clone());

    let mut msg = message("short lived", Duration::from_secs(5));
    store.save_message("a", &mut msg).await.unwrap();

    clock.advance(Duration::from_secs(4));
    assert!(store.get_message("a", msg.id).await.is_ok());

    // Expired exactly at the deadline
    clock.advance(Duration::from_secs(1));
    assert!(matches!(
        store.get_message("a", msg.id).await,
        Err(StoreError::Expired { .. })
    ));
}

#[tokio::test]
async fn memory_zero_expiration_is_immediately_expired() {
    let store = InMemoryStore::with_clock(Arc::new(ManualClock::default()));
    let mut msg = message("gone", Duration::ZERO);
    store.save_message("a", &mut msg).await.unwrap();
    assert_eq!(msg.id, 1);
    assert!(matches!(
        store.get_message("a", 1).await,
        Err(StoreError::Expired { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_concurrent_saves_get_unique_ids() {
    let store = Arc::new(InMemoryStore::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..50 {
                let mut msg = message("x", Duration::from_secs(60));
                store.save_message("shared", &mut msg).await.unwrap();
                ids.push(msg.id);
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        let ids = handle.await.unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all.extend(ids);
    }
    all.sort_unstable();
    assert_eq!(all, (1..=400).collect::<Vec<_>>());
}

#[tokio::test]
async fn sequence_starts_at_one_and_increments() {
    let seq = InMemorySequence::new();
    assert_eq!(seq.last_id("a").await.unwrap(), 0);
    assert_eq!(seq.create_new_id("a").await.unwrap(), 1);
    assert_eq!(seq.create_new_id("a").await.unwrap(), 2);
    assert_eq!(seq.create_new_id("b").await.unwrap(), 1);
    assert_eq!(seq.last_id("a").await.unwrap(), 2);
}

#[tokio::test]
async fn sequence_load_only_raises_counter() {
    let seq = InMemorySequence::new();
    seq.load("a", 10).await.unwrap();
    assert_eq!(seq.create_new_id("a").await.unwrap(), 11);

    seq.load("a", 3).await.unwrap();
    assert_eq!(seq.create_new_id("a").await.unwrap(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequence_concurrent_callers_never_share_ids() {
    let seq = Arc::new(InMemorySequence::new());
    let mut handles = Vec::new();
    for _ in 0..4 {
        let seq = seq.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..100 {
                ids.push(seq.create_new_id("s").await.unwrap());
            }
            ids
        }));
    }
    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 400);
}

/// Records every flush and assigns ids like a real backend would.
#[derive(Default)]
struct RecordingSink {
    flushes: Mutex<Vec<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl BatchSink for RecordingSink {
    async fn write_batch(&self, items: &mut [BatchItem]) -> Result<(), StoreError> {
        let mut flushes = self.flushes.lock().unwrap();
        let next = flushes.iter().map(Vec::len).sum::<usize>() as u64;
        flushes.push(items.iter().map(|i| i.subject.clone()).collect());
        for (offset, item) in items.iter_mut().enumerate() {
            item.message.id = next + offset as u64 + 1;
        }
        if self.fail {
            return Err(StoreError::backend("write rejected"));
        }
        Ok(())
    }
}

fn batch_config(size: usize, timeout: Duration) -> BatchConfig {
    BatchConfig {
        size,
        timeout,
        queue_capacity: 16,
    }
}

#[tokio::test]
async fn batch_flushes_once_after_timeout() {
    let sink = Arc::new(RecordingSink::default());
    let writer = BatchWriter::new(batch_config(10, Duration::from_millis(200)), sink.clone());

    let submit = |subject: &'static str| {
        let writer = writer.clone();
        tokio::spawn(async move {
            writer
                .add_and_wait(subject, message("x", Duration::from_secs(1)))
                .await
        })
    };
    let handles = vec![submit("a"), submit("b"), submit("a")];

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);

    let flushes = sink.flushes.lock().unwrap();
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0].len(), 3);
}

#[tokio::test]
async fn batch_flushes_immediately_at_size_limit() {
    let sink = Arc::new(RecordingSink::default());
    let writer = BatchWriter::new(batch_config(3, Duration::from_secs(30)), sink.clone());

    let mut handles = Vec::new();
    for _ in 0..3 {
        let writer = writer.clone();
        handles.push(tokio::spawn(async move {
            writer
                .add_and_wait("a", message("x", Duration::from_secs(1)))
                .await
        }));
    }

    let all = tokio::time::timeout(Duration::from_secs(5), async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    })
    .await;
    assert!(all.is_ok(), "size-triggered flush must not wait for the timeout");
    assert_eq!(sink.flushes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn batch_failure_fails_every_item() {
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..Default::default()
    });
    let writer = BatchWriter::new(batch_config(2, Duration::from_secs(30)), sink);

    let first = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.add_and_wait("a", message("1", Duration::from_secs(1))).await })
    };
    let second = writer
        .add_and_wait("b", message("2", Duration::from_secs(1)))
        .await;

    assert_eq!(second, Err(StoreError::backend("write rejected")));
    assert_eq!(first.await.unwrap(), Err(StoreError::backend("write rejected")));
}

#[tokio::test]
async fn batch_caller_timeout_does_not_cancel_the_write() {
    let sink = Arc::new(RecordingSink::default());
    let writer = BatchWriter::new(batch_config(10, Duration::from_millis(300)), sink.clone());

    let waited = tokio::time::timeout(
        Duration::from_millis(20),
        writer.add_and_wait("a", message("late", Duration::from_secs(1))),
    )
    .await;
    assert!(waited.is_err());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(sink.flushes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn batch_timeout_restarts_after_size_flush() {
    let sink = Arc::new(RecordingSink::default());
    let timeout = Duration::from_millis(300);
    let writer = BatchWriter::new(batch_config(2, timeout), sink.clone());

    // Let most of the first timeout elapse before the size-triggered flush.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (first, second) = tokio::join!(
        writer.add_and_wait("a", message("1", Duration::from_secs(1))),
        writer.add_and_wait("a", message("2", Duration::from_secs(1))),
    );
    first.unwrap();
    second.unwrap();
    let size_flush = tokio::time::Instant::now();

    writer
        .add_and_wait("a", message("sparse", Duration::from_secs(1)))
        .await
        .unwrap();
    let waited = size_flush.elapsed();

    assert!(
        waited >= Duration::from_millis(250),
        "sparse item flushed on the stale tick after {waited:?}"
    );
    assert!(waited < Duration::from_millis(1500), "sparse item waited {waited:?}");

    let flushes = sink.flushes.lock().unwrap();
    assert_eq!(flushes.len(), 2);
    assert_eq!(flushes[1].len(), 1);
}

#[tokio::test]
async fn sled_roundtrip_and_expiry() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let store = SledStore::open(
        dir.path(),
        Arc::new(InMemorySequence::new()),
        clock.clone(),
        batch_config(8, Duration::from_millis(5)),
    )
    .await
    .unwrap();

    let mut msg = message("durable", Duration::from_secs(10));
    store.save_message("orders", &mut msg).await.unwrap();
    assert_eq!(msg.id, 1);

    let fetched = store.get_message("orders", 1).await.unwrap();
    assert_eq!(fetched.body, "durable");
    assert_eq!(fetched.expiration, Duration::from_secs(10));

    assert!(matches!(
        store.get_message("orders", 2).await,
        Err(StoreError::InvalidId { .. })
    ));

    clock.advance(Duration::from_secs(10));
    assert!(matches!(
        store.get_message("orders", 1).await,
        Err(StoreError::Expired { .. })
    ));
}

#[tokio::test]
async fn sled_zero_expiration_gets_id_but_is_not_stored() {
    let dir = tempdir().unwrap();
    let store = SledStore::open(
        dir.path(),
        Arc::new(InMemorySequence::new()),
        Arc::new(SystemClock),
        batch_config(8, Duration::from_millis(5)),
    )
    .await
    .unwrap();

    let mut msg = message("nothing", Duration::ZERO);
    store.save_message("a", &mut msg).await.unwrap();
    assert_eq!(msg.id, 1);
    assert!(matches!(
        store.get_message("a", 1).await,
        Err(StoreError::Expired { .. })
    ));
}

#[tokio::test]
async fn sled_restart_never_reuses_ids() {
    let dir = tempdir().unwrap();
    {
        let store = SledStore::open(
            dir.path(),
            Arc::new(InMemorySequence::new()),
            Arc::new(SystemClock),
            batch_config(8, Duration::from_millis(5)),
        )
        .await
        .unwrap();
        for _ in 0..3 {
            let mut msg = message("before", Duration::from_secs(60));
            store.save_message("a", &mut msg).await.unwrap();
        }
    }
    // Let the old flusher observe its closed queue and release the database.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sequence = Arc::new(InMemorySequence::new());
    let store = SledStore::open(
        dir.path(),
        sequence.clone(),
        Arc::new(SystemClock),
        batch_config(8, Duration::from_millis(5)),
    )
    .await
    .unwrap();
    assert_eq!(sequence.last_id("a").await.unwrap(), 3);

    let mut msg = message("after", Duration::from_secs(60));
    store.save_message("a", &mut msg).await.unwrap();
    assert_eq!(msg.id, 4);
    assert_eq!(store.get_message("a", 2).await.unwrap().body, "before");
}

async fn open_sled(path: &std::path::Path, sequence: Arc<InMemorySequence>) -> SledStore {
    SledStore::open(
        path,
        sequence,
        Arc::new(SystemClock),
        batch_config(8, Duration::from_millis(5)),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn sled_restart_after_zero_expiration_tail() {
    let dir = tempdir().unwrap();
    {
        let store = open_sled(dir.path(), Arc::new(InMemorySequence::new())).await;
        let mut kept = message("kept", Duration::from_secs(60));
        store.save_message("s", &mut kept).await.unwrap();
        let mut gone = message("gone", Duration::ZERO);
        store.save_message("s", &mut gone).await.unwrap();
        assert_eq!((kept.id, gone.id), (1, 2));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sequence = Arc::new(InMemorySequence::new());
    let store = open_sled(dir.path(), sequence.clone()).await;
    assert_eq!(sequence.last_id("s").await.unwrap(), 2);

    let mut next = message("after", Duration::from_secs(60));
    store.save_message("s", &mut next).await.unwrap();
    assert_eq!(next.id, 3);
    assert!(matches!(
        store.get_message("s", 2).await,
        Err(StoreError::Expired { .. })
    ));
}

#[tokio::test]
async fn sled_subject_named_like_default_tree_survives_restart() {
    let subject = "__sled__default";
    let dir = tempdir().unwrap();
    {
        let store = open_sled(dir.path(), Arc::new(InMemorySequence::new())).await;
        for body in ["one", "two", "three"] {
            let mut msg = message(body, Duration::from_secs(60));
            store.save_message(subject, &mut msg).await.unwrap();
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let store = open_sled(dir.path(), Arc::new(InMemorySequence::new())).await;
    let mut msg = message("four", Duration::from_secs(60));
    store.save_message(subject, &mut msg).await.unwrap();
    assert_eq!(msg.id, 4);
    assert_eq!(store.get_message(subject, 1).await.unwrap().body, "one");
}

#[tokio::test]
async fn sled_subjects_with_shared_prefixes_stay_apart() {
    let dir = tempdir().unwrap();
    let store = open_sled(dir.path(), Arc::new(InMemorySequence::new())).await;

    let mut short = message("short", Duration::from_secs(60));
    store.save_message("a", &mut short).await.unwrap();
    let mut long = message("long", Duration::from_secs(60));
    store.save_message("ab", &mut long).await.unwrap();

    assert_eq!((short.id, long.id), (1, 1));
    assert_eq!(store.get_message("a", 1).await.unwrap().body, "short");
    assert_eq!(store.get_message("ab", 1).await.unwrap().body, "long");
    assert!(matches!(
        store.get_message("a", 2).await,
        Err(StoreError::InvalidId { .. })
    ));
}
