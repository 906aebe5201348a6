use std::{
    collections::BTreeSet,
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};

use tokio::sync::broadcast;

use worldlog::{
    action::ActionRecord,
    persist::{
        Document, SharedStore,
        filter::Filter,
        memory::{InsertVerdict, MemoryStore},
        shared,
    },
    runtime::{
        events::WriterEvent,
        writer::{BatchWriter, WriterConfig},
    },
    types::{ActorId, BlockPos, Material},
};

const COLLECTION: &str = "actions";

fn fast_config() -> WriterConfig {
    WriterConfig {
        coalesce_window_ms: 20,
        failure_backoff_ms: 200,
        ..WriterConfig::default()
    }
}

fn record(actor: ActorId, x: i32) -> ActionRecord {
    ActionRecord::block_change(actor, BlockPos::new("world", x, 64, 0), Material::air(), Material::new("STONE"))
}

async fn next_event(sub: &mut broadcast::Receiver<WriterEvent>) -> WriterEvent {
    tokio::time::timeout(Duration::from_secs(3), sub.recv())
        .await
        .expect("event")
        .expect("recv")
}

async fn wait_for(sub: &mut broadcast::Receiver<WriterEvent>, want: impl Fn(&WriterEvent) -> bool) -> WriterEvent {
    loop {
        let evt = next_event(sub).await;
        if want(&evt) {
            return evt;
        }
    }
}

async fn stored_xs(store: &SharedStore) -> Vec<i64> {
    store
        .lock()
        .await
        .find(COLLECTION, &Filter::new(), None)
        .expect("find")
        .iter()
        .map(|doc| doc["location"]["x"].as_i64().expect("x"))
        .collect()
}

#[tokio::test]
async fn every_submitted_record_is_written_once() {
    let store = shared(MemoryStore::new());
    let writer = BatchWriter::new(store.clone(), COLLECTION, fast_config());
    let mut sub = writer.subscribe();
    writer.enable();
    assert!(matches!(next_event(&mut sub).await, WriterEvent::Enabled));

    let actor = ActorId::new_random();
    for x in 0..250 {
        writer.submit(record(actor, x));
    }

    let mut written = 0;
    while written < 250 {
        if let WriterEvent::BatchWritten { written: n } = next_event(&mut sub).await {
            assert!(n <= 100, "batch of {n} exceeds the limit");
            written += n;
        }
    }
    assert_eq!(writer.pending(), 0);

    let xs = stored_xs(&store).await;
    assert_eq!(xs.len(), 250);
    assert_eq!(xs.iter().copied().collect::<BTreeSet<_>>().len(), 250);

    writer.disable().await.expect("disable");
}

#[tokio::test]
async fn rejected_records_are_requeued_and_retried_after_backoff() {
    let mut seen = 0usize;
    let store = shared(MemoryStore::new().with_insert_policy(Box::new(move |index: usize, _doc: &Document| {
        seen += 1;
        if seen <= 100 && index % 3 == 2 {
            InsertVerdict::Reject("duplicate key".to_string())
        } else {
            InsertVerdict::Accept
        }
    })));
    let config = WriterConfig {
        coalesce_window_ms: 50,
        failure_backoff_ms: 300,
        ..WriterConfig::default()
    };
    let backoff = Duration::from_millis(config.failure_backoff_ms);
    let writer = BatchWriter::new(store.clone(), COLLECTION, config);
    let mut sub = writer.subscribe();

    let actor = ActorId::new_random();
    writer.enable();
    for x in 0..100 {
        writer.submit(record(actor, x));
    }

    let evt = wait_for(&mut sub, |e| matches!(e, WriterEvent::Requeued { .. })).await;
    let requeued_at = Instant::now();
    assert_eq!(evt, WriterEvent::Requeued { rejected: 33 });
    assert_eq!(writer.pending(), 33);
    assert_eq!(stored_xs(&store).await.len(), 67);

    // Nothing is retried while the writer backs off.
    tokio::time::sleep(backoff / 2).await;
    assert_eq!(writer.pending(), 33);

    let evt = wait_for(&mut sub, |e| matches!(e, WriterEvent::BatchWritten { .. })).await;
    let waited = requeued_at.elapsed();
    assert_eq!(evt, WriterEvent::BatchWritten { written: 33 });
    assert!(waited >= backoff, "retried after {waited:?}, backoff is {backoff:?}");
    assert_eq!(writer.pending(), 0);

    let xs: BTreeSet<i64> = stored_xs(&store).await.into_iter().collect();
    assert_eq!(xs, (0..100).collect());

    writer.disable().await.expect("disable");
}

#[tokio::test]
async fn unavailable_store_keeps_the_batch_queued() {
    let memory = MemoryStore::new();
    let offline = memory.offline_switch();
    offline.store(true, Ordering::SeqCst);
    let store = shared(memory);

    let writer = BatchWriter::new(store.clone(), COLLECTION, fast_config());
    let mut sub = writer.subscribe();
    writer.enable();

    let actor = ActorId::new_random();
    for x in 0..10 {
        writer.submit(record(actor, x));
    }

    let evt = wait_for(&mut sub, |e| matches!(e, WriterEvent::StoreUnavailable { .. })).await;
    assert_eq!(evt, WriterEvent::StoreUnavailable { requeued: 10 });
    assert_eq!(writer.pending(), 10);

    offline.store(false, Ordering::SeqCst);
    let evt = wait_for(&mut sub, |e| matches!(e, WriterEvent::BatchWritten { .. })).await;
    assert_eq!(evt, WriterEvent::BatchWritten { written: 10 });
    assert_eq!(stored_xs(&store).await.len(), 10);

    writer.disable().await.expect("disable");
}

#[tokio::test]
async fn total_failure_without_requeue_drops_the_batch() {
    let memory = MemoryStore::new();
    let offline = memory.offline_switch();
    offline.store(true, Ordering::SeqCst);
    let store = shared(memory);

    let config = WriterConfig {
        requeue_on_total_failure: false,
        ..fast_config()
    };
    let writer = BatchWriter::new(store, COLLECTION, config);
    let mut sub = writer.subscribe();
    writer.enable();
    writer.submit(record(ActorId::new_random(), 1));

    let evt = wait_for(&mut sub, |e| matches!(e, WriterEvent::StoreUnavailable { .. })).await;
    assert_eq!(evt, WriterEvent::StoreUnavailable { requeued: 0 });
    assert_eq!(writer.pending(), 0);

    writer.disable().await.expect("disable");
}

#[tokio::test]
async fn disabled_writer_drops_submissions() {
    let store = shared(MemoryStore::new());
    let writer = Arc::new(BatchWriter::new(store.clone(), COLLECTION, fast_config()));
    let actor = ActorId::new_random();

    writer.submit(record(actor, 0));
    assert_eq!(writer.pending(), 0);

    writer.enable();
    writer.enable();
    assert!(writer.is_enabled());
    writer.disable().await.expect("disable");
    assert!(!writer.is_enabled());

    writer.submit(record(actor, 1));
    assert_eq!(writer.pending(), 0);
    assert!(stored_xs(&store).await.is_empty());
}

#[tokio::test]
async fn writer_can_be_re_enabled_after_disable() {
    let store = shared(MemoryStore::new());
    let writer = BatchWriter::new(store.clone(), COLLECTION, fast_config());
    let mut sub = writer.subscribe();
    let actor = ActorId::new_random();

    writer.enable();
    writer.disable().await.expect("disable");
    assert!(matches!(
        wait_for(&mut sub, |e| matches!(e, WriterEvent::Stopped { .. })).await,
        WriterEvent::Stopped { dropped: 0 }
    ));

    writer.enable();
    writer.submit(record(actor, 5));
    wait_for(&mut sub, |e| matches!(e, WriterEvent::BatchWritten { .. })).await;
    assert_eq!(stored_xs(&store).await, vec![5]);
    writer.disable().await.expect("disable");
}

#[tokio::test]
async fn disable_under_a_deep_queue_stops_between_batches() {
    let store = shared(MemoryStore::new().with_insert_policy(Box::new(|index: usize, _doc: &Document| {
        if index == 0 {
            std::thread::sleep(Duration::from_millis(40));
        }
        InsertVerdict::Accept
    })));
    let writer = BatchWriter::new(store.clone(), COLLECTION, fast_config());
    let mut sub = writer.subscribe();
    writer.enable();

    let actor = ActorId::new_random();
    for x in 0..1000 {
        writer.submit(record(actor, x));
    }

    wait_for(&mut sub, |e| matches!(e, WriterEvent::BatchWritten { .. })).await;
    writer.disable().await.expect("disable");

    let WriterEvent::Stopped { dropped } = wait_for(&mut sub, |e| matches!(e, WriterEvent::Stopped { .. })).await else {
        unreachable!();
    };
    let stored = stored_xs(&store).await.len();
    assert!(dropped >= 500, "only {dropped} dropped; the loop kept draining after disable");
    assert_eq!(stored + dropped, 1000);
    assert_eq!(writer.pending(), 0);
}

#[tokio::test]
async fn enable_during_disable_restarts_the_loop() {
    let store = shared(MemoryStore::new());
    let writer = Arc::new(BatchWriter::new(store.clone(), COLLECTION, fast_config()));
    let mut sub = writer.subscribe();
    writer.enable();
    assert!(matches!(next_event(&mut sub).await, WriterEvent::Enabled));

    let stopping = tokio::spawn({
        let writer = Arc::clone(&writer);
        async move { writer.disable().await }
    });
    while writer.is_enabled() {
        tokio::task::yield_now().await;
    }
    writer.enable();
    stopping.await.expect("join").expect("disable");

    assert!(writer.is_enabled());
    wait_for(&mut sub, |e| matches!(e, WriterEvent::Stopped { .. })).await;
    wait_for(&mut sub, |e| matches!(e, WriterEvent::Enabled)).await;

    writer.submit(record(ActorId::new_random(), 7));
    wait_for(&mut sub, |e| matches!(e, WriterEvent::BatchWritten { .. })).await;
    assert_eq!(stored_xs(&store).await, vec![7]);

    writer.disable().await.expect("disable");
    assert!(!writer.is_enabled());
}
