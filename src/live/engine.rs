//! The live-query engine.
//!
//! Each registered query owns a worker thread and a one-slot mailbox. The engine listens on
//! the store's commit broker; a commit whose changes intersect a query's recorded read set
//! marks that query dirty and wakes its worker, which re-runs the query against the newest
//! snapshot and replaces whatever undelivered result sits in the mailbox.
//!
//! Per query the phases are `Idle -> Evaluating -> Delivered -> (Evaluating | TornDown)`.
//! Commits that land while a query is evaluating fold into one follow-up evaluation, so a
//! subscriber only ever sees results in commit order and never an intermediate one it was
//! too slow to pick up.

use crate::core::broker::{CommitBatch, CommitListener};
use crate::core::error::StoreError;
use crate::core::store::Store;
use crate::live::deps::{ReadSet, Reader};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub type QueryId = u64;

/// Result stream item: a fresh query result or the error its evaluation raised.
pub type Item<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Evaluating,
    Delivered,
    TornDown,
}

// ===== Mailbox =====

/// Single-producer, latest-value-wins channel end.
///
/// Holds a receiver clone so a full slot can be emptied before the newer value goes in.
pub(crate) struct Mailbox<T> {
    tx: Sender<Item<T>>,
    stale: Receiver<Item<T>>,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> (Self, Receiver<Item<T>>) {
        let (tx, rx) = bounded(1);
        let stale = rx.clone();
        (Mailbox { tx, stale }, rx)
    }

    pub(crate) fn deliver(&self, mut item: Item<T>) {
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return,
                Err(crossbeam_channel::TrySendError::Full(back)) => {
                    item = back;
                    let _ = self.stale.try_recv();
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

// ===== Slots =====

struct SlotState {
    deps: ReadSet,
    dirty: bool,
    phase: Phase,
    /// Snapshot version of the evaluation in flight, once known.
    reading: Option<u64>,
    evaluations: u64,
}

struct Slot {
    id: QueryId,
    label: String,
    state: Mutex<SlotState>,
    wake: Condvar,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn on_commit(&self, batch: &CommitBatch) {
        let mut state = self.lock();
        let stale = match state.phase {
            Phase::TornDown => false,
            Phase::Evaluating => state.reading.is_none_or(|v| v < batch.version),
            Phase::Idle | Phase::Delivered => state.deps.affected_by(batch),
        };
        if stale {
            state.dirty = true;
            self.wake.notify_one();
        }
    }

    /// Returns false when the slot was already torn down.
    fn tear_down(&self) -> bool {
        let mut state = self.lock();
        if state.phase == Phase::TornDown {
            return false;
        }
        state.phase = Phase::TornDown;
        self.wake.notify_all();
        true
    }
}

struct EngineInner {
    registry: Mutex<BTreeMap<QueryId, Arc<Slot>>>,
    next_id: AtomicU64,
}

impl EngineInner {
    fn unregister(&self, id: QueryId) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(&id);
        }
    }
}

impl CommitListener for EngineInner {
    fn on_commit(&self, batch: &CommitBatch) {
        let slots: Vec<Arc<Slot>> = match self.registry.lock() {
            Ok(registry) => registry.values().cloned().collect(),
            Err(_) => return,
        };
        // Registry order is registration order.
        for slot in slots {
            slot.on_commit(batch);
        }
    }
}

// ===== Engine =====

/// Registers queries against one store. Cheap to clone.
#[derive(Clone)]
pub struct LiveEngine {
    store: Store,
    inner: Arc<EngineInner>,
}

impl LiveEngine {
    pub fn new(store: &Store) -> Result<Self, StoreError> {
        let inner = Arc::new(EngineInner {
            registry: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        });
        let listener: Arc<dyn CommitListener> = inner.clone();
        store.subscribe(Arc::downgrade(&listener))?;
        Ok(LiveEngine {
            store: store.clone(),
            inner,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Register `query` and start evaluating it immediately.
    ///
    /// The first item on the returned handle is the baseline result.
    pub fn register<T, F>(&self, label: &str, query: F) -> Result<LiveQuery<T>, StoreError>
    where
        T: Send + 'static,
        F: Fn(&Reader) -> Result<T, StoreError> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot {
            id,
            label: label.to_string(),
            state: Mutex::new(SlotState {
                deps: ReadSet::wildcard(),
                dirty: true,
                phase: Phase::Idle,
                reading: None,
                evaluations: 0,
            }),
            wake: Condvar::new(),
        });
        let (mailbox, rx) = Mailbox::new();

        self.inner
            .registry
            .lock()
            .map_err(|_| StoreError::LockPoisoned("live registry"))?
            .insert(id, Arc::clone(&slot));

        let worker_slot = Arc::clone(&slot);
        let store = self.store.clone();
        let spawned = thread::Builder::new()
            .name(format!("live-{id}"))
            .spawn(move || run_worker(&worker_slot, &store, &query, &mailbox));
        if let Err(err) = spawned {
            slot.tear_down();
            self.inner.unregister(id);
            return Err(StoreError::Io(err));
        }
        debug!(query = id, label, "live query registered");

        Ok(LiveQuery {
            rx,
            handle: Teardown {
                slot,
                engine: Arc::downgrade(&self.inner),
            },
        })
    }

    /// Number of registered, not yet torn down queries.
    pub fn active(&self) -> usize {
        self.inner.registry.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Tear down every registered query.
    pub fn shutdown(&self) {
        let slots: Vec<Arc<Slot>> = match self.inner.registry.lock() {
            Ok(mut registry) => std::mem::take(&mut *registry).into_values().collect(),
            Err(_) => return,
        };
        for slot in slots {
            slot.tear_down();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "query panicked".to_string()
    }
}

fn run_worker<T, F>(slot: &Slot, store: &Store, query: &F, mailbox: &Mailbox<T>)
where
    F: Fn(&Reader) -> Result<T, StoreError>,
{
    loop {
        {
            let mut state = slot.lock();
            while !state.dirty && state.phase != Phase::TornDown {
                state = match slot.wake.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            if state.phase == Phase::TornDown {
                return;
            }
            state.dirty = false;
            state.phase = Phase::Evaluating;
            state.reading = None;
        }

        let snapshot = match store.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let mut state = slot.lock();
                if state.phase != Phase::TornDown {
                    state.phase = Phase::Idle;
                    mailbox.deliver(Err(err));
                }
                return;
            }
        };
        let version = snapshot.version();
        slot.lock().reading = Some(version);

        let reader = Reader::new(snapshot);
        let outcome = catch_unwind(AssertUnwindSafe(|| query(&reader)));
        let reads = reader.into_reads();

        let mut state = slot.lock();
        if state.phase == Phase::TornDown {
            return;
        }
        state.evaluations += 1;
        state.reading = None;
        let message = match outcome {
            Ok(Ok(value)) => {
                state.deps = reads;
                state.phase = Phase::Delivered;
                debug!(query = slot.id, label = %slot.label, version, "live query delivered");
                mailbox.deliver(Ok(value));
                continue;
            }
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        // Keep listening on everything read so far; the next qualifying commit retries.
        let mut deps = std::mem::take(&mut state.deps);
        deps.union(reads);
        state.deps = if deps.is_empty() {
            ReadSet::wildcard()
        } else {
            deps
        };
        state.phase = Phase::Idle;
        warn!(query = slot.id, label = %slot.label, version, error = %message, "live query failed");
        mailbox.deliver(Err(StoreError::Evaluation {
            query: slot.label.clone(),
            message,
        }));
    }
}

// ===== Handles =====

/// Idempotent teardown of one registered query.
pub struct Teardown {
    slot: Arc<Slot>,
    engine: Weak<EngineInner>,
}

impl Teardown {
    pub fn id(&self) -> QueryId {
        self.slot.id
    }

    /// Cancel pending evaluation and stop listening for commits. Does not wait for an
    /// evaluation already running.
    pub fn tear_down(&self) {
        if self.slot.tear_down() {
            if let Some(engine) = self.engine.upgrade() {
                engine.unregister(self.slot.id);
            }
            debug!(query = self.slot.id, label = %self.slot.label, "live query torn down");
        }
    }

    pub fn phase(&self) -> Phase {
        self.slot.lock().phase
    }

    pub fn evaluations(&self) -> u64 {
        self.slot.lock().evaluations
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.tear_down();
    }
}

/// Subscriber side of a registered query. Dropping it tears the query down.
pub struct LiveQuery<T> {
    rx: Receiver<Item<T>>,
    handle: Teardown,
}

impl<T> LiveQuery<T> {
    pub fn id(&self) -> QueryId {
        self.handle.id()
    }

    pub fn label(&self) -> &str {
        &self.handle.slot.label
    }

    /// Block for the next result. `Closed` once the query is torn down and drained.
    pub fn recv(&self) -> Item<T> {
        self.rx.recv().unwrap_or(Err(StoreError::Closed))
    }

    /// `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Item<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(StoreError::Closed)),
        }
    }

    pub fn try_recv(&self) -> Option<Item<T>> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StoreError::Closed)),
        }
    }

    pub fn teardown(&self) {
        self.handle.tear_down();
    }

    pub fn phase(&self) -> Phase {
        self.handle.phase()
    }

    /// Completed evaluations, successful or not.
    pub fn evaluations(&self) -> u64 {
        self.handle.evaluations()
    }

    pub(crate) fn into_parts(self) -> (Receiver<Item<T>>, Teardown) {
        (self.rx, self.handle)
    }
}
