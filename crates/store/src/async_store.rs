//! Asynchronous store: WAL-first writes and background maintenance.
//!
//! [`AsyncStore`] wraps the synchronous [`Store`] with two changes:
//!
//! - **WAL-first writes.** `put`/`delete` return as soon as the record is
//!   durable in the WAL. The memtable apply happens inline when the store
//!   lock is free, otherwise the record rides a bounded queue drained by a
//!   dedicated apply worker. Writers never wait out a flush or compaction.
//! - **Background compaction.** Compaction jobs run on a dedicated worker
//!   with per-level serialization; merge I/O happens outside the store
//!   lock and only the catalog swap is taken under it.
//!
//! Read-your-write is provided by [`wait_for_seq`](AsyncStore::wait_for_seq),
//! a fence over the contiguous applied-sequence watermark.
//!
//! Both workers are plain OS threads; shutdown is cooperative via a flag
//! plus sentinel messages, and `close` joins them before closing the WAL.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use memtable::{Key, Timestamp, Value};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use wal::{Seq, WalRecord};

use crate::error::{Error, Result};
use crate::{Config, Store};

/// Identifies a scheduled compaction job.
pub type JobId = u64;

/// Lifecycle of a compaction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Bookkeeping for one scheduled compaction.
#[derive(Debug, Clone)]
pub struct CompactionJob {
    pub id: JobId,
    pub level: usize,
    pub status: JobStatus,
    /// Error message captured when the job failed.
    pub error: Option<String>,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
}

enum ApplyMsg {
    Record {
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        ts: u64,
        seq: Seq,
    },
    Shutdown,
}

enum CompactMsg {
    Job(JobId),
    Shutdown,
}

#[derive(Default)]
struct JobTable {
    jobs: BTreeMap<JobId, CompactionJob>,
    next_id: JobId,
}

struct AsyncShared {
    jobs: Mutex<JobTable>,
    jobs_cv: Condvar,
    /// One lock per level: a level compacts at most once at a time.
    level_locks: Vec<Mutex<()>>,
    shutdown: AtomicBool,
}

/// The asynchronous storage engine. See the module docs.
pub struct AsyncStore {
    store: Arc<Store>,
    shared: Arc<AsyncShared>,
    apply_tx: SyncSender<ApplyMsg>,
    compact_tx: Sender<CompactMsg>,
    apply_worker: Option<JoinHandle<()>>,
    compact_worker: Option<JoinHandle<()>>,
}

impl AsyncStore {
    /// Opens the underlying store (full recovery included) and starts the
    /// apply and compaction workers.
    pub fn open(config: Config) -> Result<Self> {
        let store = Arc::new(Store::open(config)?);
        let shared = Arc::new(AsyncShared {
            jobs: Mutex::new(JobTable::default()),
            jobs_cv: Condvar::new(),
            level_locks: (0..store.config().max_levels)
                .map(|_| Mutex::new(()))
                .collect(),
            shutdown: AtomicBool::new(false),
        });

        let (apply_tx, apply_rx) = mpsc::sync_channel(store.config().apply_queue_max);
        let (compact_tx, compact_rx) = mpsc::channel();

        let apply_worker = thread::Builder::new()
            .name("apply-worker".to_string())
            .spawn({
                let store = Arc::clone(&store);
                move || run_apply_worker(&store, &apply_rx)
            })?;

        let compact_worker = thread::Builder::new()
            .name("compaction-worker".to_string())
            .spawn({
                let store = Arc::clone(&store);
                let shared = Arc::clone(&shared);
                let requeue_tx = compact_tx.clone();
                move || run_compaction_worker(&store, &shared, &compact_rx, &requeue_tx)
            })?;

        info!("async store started");
        Ok(Self {
            store,
            shared,
            apply_tx,
            compact_tx,
            apply_worker: Some(apply_worker),
            compact_worker: Some(compact_worker),
        })
    }

    // --------------------- Writes ---------------------

    /// Inserts or updates `key`. Durable in the WAL on return; visible to
    /// reads once applied (immediately on the fast path, or fence with
    /// [`wait_for_seq`](AsyncStore::wait_for_seq)).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Seq> {
        self.write_record(key, Some(value))
    }

    /// Writes a tombstone for `key`. Same visibility contract as `put`.
    pub fn delete(&self, key: &[u8]) -> Result<Seq> {
        self.write_record(key, None)
    }

    fn write_record(&self, key: &[u8], value: Option<&[u8]>) -> Result<Seq> {
        if key.is_empty() {
            return Err(Error::invalid_argument("key must not be empty"));
        }
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::invalid_argument("store is closed"));
        }

        let ts = self.store.clock.lock().next();
        let record = match value {
            Some(value) => WalRecord::put(key.to_vec(), value.to_vec(), ts),
            None => WalRecord::tombstone(key.to_vec(), ts),
        };
        let seq = self.store.wal.lock().append(&record)?;

        // Fast path: apply inline when nobody is holding the store lock.
        if let Some(mut state) = self.store.state.try_lock() {
            self.store.apply_locked(&mut state, key, value, ts, seq)?;
            drop(state);
            self.maybe_schedule_l0();
            return Ok(seq);
        }

        let msg = ApplyMsg::Record {
            key: key.to_vec(),
            value: value.map(<[u8]>::to_vec),
            ts,
            seq,
        };
        match self.apply_tx.try_send(msg) {
            Ok(()) => Ok(seq),
            Err(TrySendError::Full(msg)) => {
                // Queue is saturated: try a short timed lock acquire and
                // apply synchronously; as a last resort block on the queue
                // so the write still makes progress.
                let timeout = Duration::from_millis(self.store.config().apply_lock_timeout_ms);
                if let Some(mut state) = self.store.state.try_lock_for(timeout) {
                    self.store.apply_locked(&mut state, key, value, ts, seq)?;
                    drop(state);
                    self.maybe_schedule_l0();
                    Ok(seq)
                } else {
                    self.apply_tx
                        .send(msg)
                        .map_err(|_| Error::invalid_argument("store is closed"))?;
                    Ok(seq)
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::invalid_argument("store is closed"))
            }
        }
    }

    /// Background L0 policy: once L0 accumulates `l0_compaction_trigger`
    /// tables (and no L0 job is already in flight), schedule an L0 -> L1
    /// merge.
    fn maybe_schedule_l0(&self) {
        let trigger = self.store.config().l0_compaction_trigger;
        if trigger == 0 || self.store.catalog().level_len(0) < trigger {
            return;
        }
        {
            let jobs = self.shared.jobs.lock();
            let in_flight = jobs.jobs.values().any(|job| {
                job.level == 0
                    && matches!(job.status, JobStatus::Pending | JobStatus::Running)
            });
            if in_flight {
                return;
            }
        }
        if let Err(e) = self.schedule_compaction(0, false) {
            warn!(error = %e, "failed to schedule L0 compaction");
        }
    }

    // --------------------- Reads ---------------------

    /// See [`Store::get`]. Reads observe whatever has been applied; fence
    /// with [`wait_for_seq`](AsyncStore::wait_for_seq) for read-your-write.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        self.store.get(key)
    }

    /// See [`Store::get_with_meta`].
    pub fn get_with_meta(&self, key: &[u8]) -> Result<Option<(Option<Value>, Timestamp)>> {
        self.store.get_with_meta(key)
    }

    /// See [`Store::range`].
    pub fn range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> Result<Vec<(Key, Value)>> {
        self.store.range(lo, hi)
    }

    /// See [`Store::flush_memtable`].
    pub fn flush_memtable(&self) -> Result<()> {
        self.store.flush_memtable()
    }

    // --------------------- Fencing ---------------------

    /// Blocks until every write with sequence at or below `seq` is visible
    /// to reads, or the timeout passes (`None` = forever). A `false` return
    /// means the fence timed out; the apply keeps going regardless.
    pub fn wait_for_seq(&self, seq: Seq, timeout: Option<Duration>) -> bool {
        self.store.seq_state.wait_for(seq, timeout)
    }

    /// The current `last_applied_seq` watermark.
    #[must_use]
    pub fn last_applied_seq(&self) -> Seq {
        self.store.last_applied_seq()
    }

    /// The configuration of the underlying store.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.store.config()
    }

    /// The catalog of live SSTables.
    #[must_use]
    pub fn catalog(&self) -> &crate::Catalog {
        self.store.catalog()
    }

    // --------------------- Compaction jobs ---------------------

    /// Enqueues a compaction of `level` into `level + 1` and returns its
    /// job id; with `wait`, blocks until the job finishes.
    pub fn schedule_compaction(&self, level: usize, wait: bool) -> Result<JobId> {
        if level + 1 >= self.store.config().max_levels {
            return Err(Error::invalid_argument(format!(
                "cannot compact level {}, at max level",
                level
            )));
        }
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::compaction("store is closing"));
        }

        let id = {
            let mut jobs = self.shared.jobs.lock();
            jobs.next_id += 1;
            let id = jobs.next_id;
            jobs.jobs.insert(
                id,
                CompactionJob {
                    id,
                    level,
                    status: JobStatus::Pending,
                    error: None,
                    started_at: None,
                    completed_at: None,
                },
            );
            id
        };

        self.compact_tx
            .send(CompactMsg::Job(id))
            .map_err(|_| Error::compaction("store is closing"))?;
        info!(job = id, level, "scheduled compaction");

        if wait {
            self.wait_for_compaction(id, None);
        }
        Ok(id)
    }

    /// Blocks until job `id` reaches a terminal state or the timeout
    /// passes. `true` only for successful completion; timeouts do not
    /// cancel the job.
    pub fn wait_for_compaction(&self, id: JobId, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        let mut jobs = self.shared.jobs.lock();
        loop {
            match jobs.jobs.get(&id).map(|job| job.status) {
                None => {
                    warn!(job = id, "waiting on unknown compaction job");
                    return false;
                }
                Some(JobStatus::Completed) => return true,
                Some(JobStatus::Failed) => return false,
                Some(_) => {}
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.jobs_cv.wait_until(&mut jobs, deadline).timed_out() {
                        return matches!(
                            jobs.jobs.get(&id).map(|job| job.status),
                            Some(JobStatus::Completed)
                        );
                    }
                }
                None => self.shared.jobs_cv.wait(&mut jobs),
            }
        }
    }

    /// Snapshot of one job's bookkeeping, or `None` for an unknown id.
    #[must_use]
    pub fn get_status(&self, id: JobId) -> Option<CompactionJob> {
        self.shared.jobs.lock().jobs.get(&id).cloned()
    }

    /// All jobs that have not yet reached a terminal state.
    #[must_use]
    pub fn list_pending_compactions(&self) -> Vec<CompactionJob> {
        self.shared
            .jobs
            .lock()
            .jobs
            .values()
            .filter(|job| matches!(job.status, JobStatus::Pending | JobStatus::Running))
            .cloned()
            .collect()
    }

    /// Schedules a compaction of `level` and waits for it, mirroring the
    /// synchronous [`Store::compact_level`] contract.
    pub fn compact_level(&self, level: usize) -> Result<()> {
        let id = self.schedule_compaction(level, false)?;
        if self.wait_for_compaction(id, None) {
            return Ok(());
        }
        let detail = self
            .get_status(id)
            .and_then(|job| job.error)
            .unwrap_or_else(|| "compaction job failed".to_string());
        Err(Error::compaction(detail))
    }

    // --------------------- Shutdown ---------------------

    /// Stops accepting work, drains what it can, joins both workers, and
    /// closes the inner store (the WAL last). Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("shutting down async store");

        let _ = self.apply_tx.send(ApplyMsg::Shutdown);
        let _ = self.compact_tx.send(CompactMsg::Shutdown);

        if let Some(handle) = self.apply_worker.take() {
            if handle.join().is_err() {
                warn!("apply worker panicked");
            }
        }
        if let Some(handle) = self.compact_worker.take() {
            if handle.join().is_err() {
                warn!("compaction worker panicked");
            }
        }

        self.store.close()
    }
}

impl Drop for AsyncStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for AsyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStore")
            .field("store", &self.store)
            .field("pending_jobs", &self.list_pending_compactions().len())
            .finish()
    }
}

// --------------------- Workers ---------------------

fn run_apply_worker(store: &Store, rx: &Receiver<ApplyMsg>) {
    info!("apply worker started");
    while let Ok(msg) = rx.recv() {
        match msg {
            ApplyMsg::Record { key, value, ts, seq } => apply_one(store, &key, value, ts, seq),
            ApplyMsg::Shutdown => break,
        }
    }
    // Drain whatever was queued before the sentinel.
    while let Ok(ApplyMsg::Record { key, value, ts, seq }) = rx.try_recv() {
        apply_one(store, &key, value, ts, seq);
    }
    info!("apply worker stopped");
}

fn apply_one(store: &Store, key: &[u8], value: Option<Vec<u8>>, ts: u64, seq: Seq) {
    loop {
        if let Some(mut state) = store.state.try_lock() {
            if let Err(e) = store.apply_locked(&mut state, key, value.as_deref(), ts, seq) {
                // The record is durable in the WAL; replay will recover it.
                warn!(seq, error = %e, "apply worker failed to apply record");
            }
            return;
        }
        // The lock is busy (likely a flush); back off briefly and retry.
        thread::yield_now();
        thread::sleep(Duration::from_micros(50));
    }
}

fn run_compaction_worker(
    store: &Store,
    shared: &AsyncShared,
    rx: &Receiver<CompactMsg>,
    requeue_tx: &Sender<CompactMsg>,
) {
    info!("compaction worker started");
    while let Ok(msg) = rx.recv() {
        match msg {
            CompactMsg::Job(id) => process_job(store, shared, requeue_tx, id),
            CompactMsg::Shutdown => break,
        }
    }
    // Jobs still queued at shutdown are not run.
    while let Ok(CompactMsg::Job(id)) = rx.try_recv() {
        finish_job(shared, id, JobStatus::Failed, Some("store is closing".to_string()));
    }
    info!("compaction worker stopped");
}

fn process_job(store: &Store, shared: &AsyncShared, requeue_tx: &Sender<CompactMsg>, id: JobId) {
    let Some(level) = shared.jobs.lock().jobs.get(&id).map(|job| job.level) else {
        warn!(job = id, "compaction job vanished from the table");
        return;
    };

    // One compaction per level at a time; a busy level requeues the job
    // after a short backoff.
    let Some(_level_guard) = shared.level_locks[level].try_lock() else {
        if shared.shutdown.load(Ordering::Acquire) {
            finish_job(shared, id, JobStatus::Failed, Some("store is closing".to_string()));
            return;
        }
        debug!(job = id, level, "level busy, requeueing");
        thread::sleep(Duration::from_millis(100));
        if requeue_tx.send(CompactMsg::Job(id)).is_err() {
            finish_job(shared, id, JobStatus::Failed, Some("store is closing".to_string()));
        }
        return;
    };

    {
        let mut jobs = shared.jobs.lock();
        if let Some(job) = jobs.jobs.get_mut(&id) {
            job.status = JobStatus::Running;
            job.started_at = Some(SystemTime::now());
        }
    }
    info!(job = id, level, "compaction job running");

    let Some((inputs, target_level)) = store.plan_compaction(level) else {
        finish_job(shared, id, JobStatus::Completed, None);
        return;
    };

    // Merge I/O runs outside the store lock; apply_compaction takes it
    // only for the catalog swap.
    let outcome = store
        .compactor
        .compact(&inputs, target_level, store.catalog())
        .and_then(|outputs| store.apply_compaction(&inputs, outputs, target_level));

    match outcome {
        Ok(()) => finish_job(shared, id, JobStatus::Completed, None),
        Err(e) => {
            warn!(job = id, level, error = %e, "compaction job failed");
            finish_job(shared, id, JobStatus::Failed, Some(e.to_string()));
        }
    }
}

fn finish_job(shared: &AsyncShared, id: JobId, status: JobStatus, error: Option<String>) {
    let mut jobs = shared.jobs.lock();
    if let Some(job) = jobs.jobs.get_mut(&id) {
        job.status = status;
        job.error = error;
        job.completed_at = Some(SystemTime::now());
        if job.started_at.is_none() {
            job.started_at = job.completed_at;
        }
    }
    shared.jobs_cv.notify_all();
}
