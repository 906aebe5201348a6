//! Pending queue and the single drain loop that persists it.
//!
//! Producers call [`BatchWriter::submit`] from any thread. One tokio task
//! sleeps for the coalesce window, then moves the queue into the store in
//! bulk inserts of at most `batch_max_records`. Rejected documents go back
//! on the queue and the loop backs off before trying again. `enable` and
//! `disable` start and stop the task; the drainer's state survives a
//! restart.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{
    action::ActionRecord,
    persist::{BatchReport, Document, SharedStore, StoreError},
};

use super::events::WriterEvent;

/// Failure while stopping the drain loop.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The drain task panicked or was cancelled.
    #[error("drain task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Drain loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Most records sent in one bulk insert.
    pub batch_max_records: usize,
    /// Sleep before each drain pass, letting records accumulate.
    pub coalesce_window_ms: u64,
    /// Pause after a failed bulk insert.
    pub failure_backoff_ms: u64,
    /// Put the whole batch back on the queue when the store fails outright.
    pub requeue_on_total_failure: bool,
    /// Drain the queue once more before the loop exits.
    pub flush_on_disable: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_max_records: 100,
            coalesce_window_ms: 100,
            failure_backoff_ms: 1000,
            requeue_on_total_failure: true,
            flush_on_disable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainOutcome {
    Drained { written: usize },
    Backoff { requeued: usize },
}

struct Drainer {
    rx: mpsc::UnboundedReceiver<ActionRecord>,
    requeue: mpsc::UnboundedSender<ActionRecord>,
    pending: Arc<AtomicUsize>,
    store: SharedStore,
    collection: Arc<str>,
    config: WriterConfig,
    events_tx: broadcast::Sender<WriterEvent>,
}

enum TaskSlot {
    Idle(Drainer),
    Running(JoinHandle<Drainer>),
    /// `disable` owns the join handle and is waiting for the loop to exit.
    Stopping,
    Lost,
}

/// Multi-producer pending queue drained by one background task.
///
/// `submit` never blocks. Records submitted while the writer is disabled
/// are dropped.
pub struct BatchWriter {
    tx: mpsc::UnboundedSender<ActionRecord>,
    enabled: Arc<AtomicBool>,
    /// Set by an `enable` that raced an in-progress `disable`.
    restart: AtomicBool,
    pending: Arc<AtomicUsize>,
    events_tx: broadcast::Sender<WriterEvent>,
    task: Mutex<TaskSlot>,
}

impl BatchWriter {
    /// Creates a disabled writer targeting `collection`.
    pub fn new(store: SharedStore, collection: impl Into<String>, config: WriterConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<ActionRecord>();
        let (events_tx, _) = broadcast::channel::<WriterEvent>(1024);
        let pending = Arc::new(AtomicUsize::new(0));
        let collection: String = collection.into();

        let drainer = Drainer {
            rx,
            requeue: tx.clone(),
            pending: Arc::clone(&pending),
            store,
            collection: Arc::from(collection),
            config,
            events_tx: events_tx.clone(),
        };

        Self {
            tx,
            enabled: Arc::new(AtomicBool::new(false)),
            restart: AtomicBool::new(false),
            pending,
            events_tx,
            task: Mutex::new(TaskSlot::Idle(drainer)),
        }
    }

    /// Subscribes to drain loop events.
    pub fn subscribe(&self) -> broadcast::Receiver<WriterEvent> {
        self.events_tx.subscribe()
    }

    /// True while the drain loop accepts records.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Records waiting to be written.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Starts the drain loop on the current tokio runtime. No-op when running.
    ///
    /// Called while a `disable` is still waiting for the loop to exit, the
    /// loop is started again as soon as it has stopped.
    pub fn enable(&self) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let drainer = match std::mem::replace(&mut *slot, TaskSlot::Lost) {
            TaskSlot::Idle(drainer) => drainer,
            running @ TaskSlot::Running(_) => {
                *slot = running;
                if !self.enabled.load(Ordering::SeqCst) {
                    // disable() has cleared the flag but not yet taken the handle.
                    self.restart.store(true, Ordering::SeqCst);
                }
                return;
            }
            TaskSlot::Stopping => {
                *slot = TaskSlot::Stopping;
                self.restart.store(true, Ordering::SeqCst);
                debug!("enable requested while stopping; restarting once the loop exits");
                return;
            }
            TaskSlot::Lost => {
                warn!("batch writer cannot restart after its drain task failed");
                return;
            }
        };

        *slot = self.start(drainer);
        info!("batch writer enabled");
    }

    fn start(&self, drainer: Drainer) -> TaskSlot {
        self.enabled.store(true, Ordering::SeqCst);
        let enabled = Arc::clone(&self.enabled);
        TaskSlot::Running(tokio::spawn(drainer.run(enabled)))
    }

    /// Queues `record` for persistence; dropped when the writer is disabled.
    pub fn submit(&self, record: ActionRecord) {
        if !self.enabled.load(Ordering::SeqCst) {
            debug!("batch writer disabled; dropping record");
            return;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(record).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Stops the drain loop and waits for it to exit. A bulk insert already
    /// in flight finishes first; queued batches behind it are not written
    /// unless `flush_on_disable` is set.
    ///
    /// Returns at once when the loop is not running or another `disable`
    /// is already stopping it.
    pub async fn disable(&self) -> Result<(), WriterError> {
        self.restart.store(false, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);

        let handle = {
            let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *slot, TaskSlot::Stopping) {
                TaskSlot::Running(handle) => handle,
                other => {
                    *slot = other;
                    return Ok(());
                }
            }
        };

        let joined = handle.await;
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let drainer = match joined {
            Ok(drainer) => drainer,
            Err(err) => {
                *slot = TaskSlot::Lost;
                return Err(err.into());
            }
        };

        if self.restart.swap(false, Ordering::SeqCst) {
            *slot = self.start(drainer);
            info!("batch writer re-enabled while stopping");
        } else {
            *slot = TaskSlot::Idle(drainer);
            info!("batch writer disabled");
        }
        Ok(())
    }
}

impl Drainer {
    async fn run(mut self, enabled: Arc<AtomicBool>) -> Self {
        let coalesce = Duration::from_millis(self.config.coalesce_window_ms);
        let backoff = Duration::from_millis(self.config.failure_backoff_ms);
        let _ = self.events_tx.send(WriterEvent::Enabled);

        while enabled.load(Ordering::SeqCst) {
            tokio::time::sleep(coalesce).await;
            match self.drain_cycle(Some(&*enabled)).await {
                DrainOutcome::Drained { written } => {
                    if written > 0 {
                        debug!(written, "queue drained");
                    }
                }
                DrainOutcome::Backoff { requeued } => {
                    debug!(requeued, backoff_ms = self.config.failure_backoff_ms, "backing off after failed write");
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        if self.config.flush_on_disable {
            let _ = self.drain_cycle(None).await;
        }

        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        self.pending.fetch_sub(dropped, Ordering::SeqCst);
        if dropped > 0 {
            warn!(dropped, "discarding records still queued at shutdown");
        }
        let _ = self.events_tx.send(WriterEvent::Stopped { dropped });
        self
    }

    /// Writes batches until the queue is empty or a write fails. With
    /// `enabled` given, also stops after any batch once the flag is cleared.
    async fn drain_cycle(&mut self, enabled: Option<&AtomicBool>) -> DrainOutcome {
        let mut written = 0usize;

        loop {
            let mut batch = Vec::with_capacity(self.config.batch_max_records);
            while batch.len() < self.config.batch_max_records {
                match self.rx.try_recv() {
                    Ok(record) => batch.push(record),
                    Err(_) => break,
                }
            }
            if batch.is_empty() {
                return DrainOutcome::Drained { written };
            }
            self.pending.fetch_sub(batch.len(), Ordering::SeqCst);

            let (records, docs) = encode_batch(batch);
            if docs.is_empty() {
                continue;
            }

            match self.insert(docs).await {
                Ok(report) if report.is_complete() => {
                    written += report.inserted.len();
                    debug!(written = report.inserted.len(), "bulk insert complete");
                    let _ = self.events_tx.send(WriterEvent::BatchWritten {
                        written: report.inserted.len(),
                    });
                    if enabled.is_some_and(|flag| !flag.load(Ordering::SeqCst)) {
                        return DrainOutcome::Drained { written };
                    }
                }
                Ok(report) => {
                    let rejected = report.rejected.len();
                    warn!(
                        written = report.inserted.len(),
                        rejected,
                        first_reason = %report.rejected[0].reason,
                        "bulk insert partially rejected"
                    );
                    for rejection in &report.rejected {
                        if let Some(record) = records.get(rejection.index) {
                            self.requeue(record.clone());
                        }
                    }
                    let _ = self.events_tx.send(WriterEvent::Requeued { rejected });
                    return DrainOutcome::Backoff { requeued: rejected };
                }
                Err(err) => {
                    let requeued = if self.config.requeue_on_total_failure {
                        let n = records.len();
                        for record in records {
                            self.requeue(record);
                        }
                        n
                    } else {
                        0
                    };
                    warn!(error = %err, requeued, "bulk insert failed");
                    let _ = self.events_tx.send(WriterEvent::StoreUnavailable { requeued });
                    return DrainOutcome::Backoff { requeued };
                }
            }
        }
    }

    async fn insert(&self, docs: Vec<Document>) -> Result<BatchReport, StoreError> {
        let store = Arc::clone(&self.store);
        let collection = Arc::clone(&self.collection);
        tokio::task::spawn_blocking(move || {
            let mut store = store.blocking_lock();
            store.insert_batch(&collection, &docs)
        })
        .await
        .map_err(|e| StoreError::Message(format!("join error: {e}")))?
    }

    fn requeue(&self, record: ActionRecord) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.requeue.send(record).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn encode_batch(batch: Vec<ActionRecord>) -> (Vec<ActionRecord>, Vec<Document>) {
    let mut records = Vec::with_capacity(batch.len());
    let mut docs = Vec::with_capacity(batch.len());
    for record in batch {
        match record.to_document() {
            Ok(doc) => {
                docs.push(doc);
                records.push(record);
            }
            Err(err) => warn!(error = %err, "dropping record that failed to encode"),
        }
    }
    (records, docs)
}
