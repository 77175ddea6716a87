//! The entity store.
//!
//! Committed state is an immutable [`Snapshot`] swapped atomically on every commit, so
//! readers never block writers and always observe exactly one committed version. Writers
//! go through [`Store::transaction`], which takes per-table locks in table order, stages
//! writes in an overlay, hands the batch to the durable medium and only then publishes the
//! new snapshot and its change notifications.

use crate::core::broker::{Change, ChangeBroker, ChangeKind, CommitBatch, CommitListener};
use crate::core::config::StoreConfig;
use crate::core::db::{MemoryMedium, Medium, SqliteMedium, Write};
use crate::core::error::StoreError;
use crate::core::integrity;
use crate::core::model::{Entity, Key, Record};
use crate::core::query::{Condition, Query};
use crate::core::schema::{Field, IndexValue, TABLE_COUNT, TableName};
use crate::core::time::{self, MonotonicClock};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tracing::{debug, info, warn};

// ===== Table data =====

/// One table's committed rows plus its secondary indexes.
#[derive(Debug, Clone)]
pub struct TableData {
    rows: BTreeMap<Key, Record>,
    index: BTreeMap<Field, BTreeMap<IndexValue, BTreeSet<Key>>>,
    next_seq: u64,
}

impl TableData {
    fn new(table: TableName) -> Self {
        TableData {
            rows: BTreeMap::new(),
            index: table.indexes().iter().map(|f| (*f, BTreeMap::new())).collect(),
            next_seq: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Record> {
        self.rows.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    /// Next free sequence number for auto-sequenced keys.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn insert(&mut self, record: Record) {
        let key = record.key();
        self.remove(&key);
        if let Key::Seq(n) = key {
            self.next_seq = self.next_seq.max(n + 1);
        }
        for (field, entries) in self.index.iter_mut() {
            for value in record.index_values(*field) {
                entries.entry(value).or_default().insert(key.clone());
            }
        }
        self.rows.insert(key, record);
    }

    fn remove(&mut self, key: &Key) -> Option<Record> {
        let old = self.rows.remove(key)?;
        for (field, entries) in self.index.iter_mut() {
            for value in old.index_values(*field) {
                if let Some(keys) = entries.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        entries.remove(&value);
                    }
                }
            }
        }
        Some(old)
    }

    /// Rows matching `query`, in key order. The first condition drives the index lookup.
    pub fn select(&self, query: &Query) -> Vec<&Record> {
        let Some(first) = query.conditions().first() else {
            return self.rows.values().collect();
        };
        self.keys_for(first)
            .iter()
            .filter_map(|k| self.rows.get(k))
            .filter(|r| query.matches(r))
            .collect()
    }

    fn keys_for(&self, condition: &Condition) -> BTreeSet<Key> {
        let Some(entries) = self.index.get(&condition.field()) else {
            return BTreeSet::new();
        };
        match condition {
            Condition::Eq(_, value) => entries.get(value).cloned().unwrap_or_default(),
            Condition::AnyOf(_, values) => values
                .iter()
                .filter_map(|v| entries.get(v))
                .flatten()
                .cloned()
                .collect(),
            Condition::Range(_, lo, hi) => {
                if range_is_empty(lo, hi) {
                    return BTreeSet::new();
                }
                entries
                    .range((lo.as_ref(), hi.as_ref()))
                    .flat_map(|(_, keys)| keys.iter().cloned())
                    .collect()
            }
        }
    }
}

fn range_is_empty(lo: &Bound<IndexValue>, hi: &Bound<IndexValue>) -> bool {
    match (lo, hi) {
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => {
            a >= b
        }
        _ => false,
    }
}

// ===== Snapshot =====

/// An immutable committed state of all tables.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    tables: [Arc<TableData>; TABLE_COUNT],
}

impl Snapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn table(&self, table: TableName) -> &TableData {
        &self.tables[table.index()]
    }
}

/// Read access shared by snapshots, transactions and tracked live-query readers.
pub trait Reads {
    fn read_record(&self, table: TableName, key: &Key) -> Result<Option<Record>, StoreError>;

    fn read_query(&self, query: &Query) -> Result<Vec<Record>, StoreError>;

    fn get<E: Entity>(&self, key: impl Into<Key>) -> Result<Option<E>, StoreError> {
        Ok(self
            .read_record(E::TABLE, &key.into())?
            .and_then(E::from_record))
    }

    /// Like [`Reads::get`] but an absent row is a `NotFound` error.
    fn require<E: Entity>(&self, key: impl Into<Key>) -> Result<E, StoreError> {
        let key = key.into();
        self.get::<E>(key.clone())?
            .ok_or_else(|| StoreError::not_found(E::TABLE, key))
    }

    fn query<E: Entity>(&self, query: &Query) -> Result<Vec<E>, StoreError> {
        if query.table() != E::TABLE {
            return Err(StoreError::validation(
                E::TABLE,
                None,
                "table",
                format!("query targets {}", query.table()),
            ));
        }
        Ok(self
            .read_query(query)?
            .into_iter()
            .filter_map(E::from_record)
            .collect())
    }

    fn all<E: Entity>(&self) -> Result<Vec<E>, StoreError> {
        self.query::<E>(&Query::all(E::TABLE))
    }
}

impl Reads for Snapshot {
    fn read_record(&self, table: TableName, key: &Key) -> Result<Option<Record>, StoreError> {
        Ok(self.table(table).get(key).cloned())
    }

    fn read_query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .table(query.table())
            .select(query)
            .into_iter()
            .cloned()
            .collect())
    }
}

// ===== Hooks =====

#[derive(Debug, Clone, Copy)]
pub struct HookContext {
    /// Store clock reading for this write.
    pub now: i64,
}

pub type Hook = Arc<dyn Fn(&mut Record, &HookContext) + Send + Sync>;

/// Table-scoped callbacks run inside the writing transaction before a record is staged.
#[derive(Clone, Default)]
pub struct Hooks {
    on_create: Vec<(TableName, Hook)>,
    on_update: Vec<(TableName, Hook)>,
}

impl Hooks {
    /// `createdAt`/`updatedAt` maintenance for every table that carries them.
    pub fn timestamps() -> Self {
        let mut hooks = Hooks::default();
        for table in [TableName::Quiz, TableName::Question, TableName::Round] {
            hooks.on_create(table, |record, ctx| {
                record.set_created_at(ctx.now);
                record.set_updated_at(ctx.now);
            });
        }
        for table in [TableName::Quiz, TableName::Question] {
            hooks.on_update(table, |record, ctx| record.set_updated_at(ctx.now));
        }
        hooks
    }

    pub fn on_create(
        &mut self,
        table: TableName,
        hook: impl Fn(&mut Record, &HookContext) + Send + Sync + 'static,
    ) -> &mut Self {
        self.on_create.push((table, Arc::new(hook)));
        self
    }

    pub fn on_update(
        &mut self,
        table: TableName,
        hook: impl Fn(&mut Record, &HookContext) + Send + Sync + 'static,
    ) -> &mut Self {
        self.on_update.push((table, Arc::new(hook)));
        self
    }

    fn run(list: &[(TableName, Hook)], record: &mut Record, ctx: &HookContext) {
        let table = record.table();
        for (_, hook) in list.iter().filter(|(t, _)| *t == table) {
            hook(record, ctx);
        }
    }
}

// ===== Store =====

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Table locks held by the current thread, per store instance.
    static HELD: RefCell<Vec<(u64, TableName)>> = const { RefCell::new(Vec::new()) };
}

struct StoreInner {
    id: u64,
    locks: [Mutex<()>; TABLE_COUNT],
    snapshot: RwLock<Arc<Snapshot>>,
    medium: Mutex<Box<dyn Medium>>,
    hooks: Hooks,
    broker: ChangeBroker,
    clock: MonotonicClock,
    closed: AtomicBool,
    label: String,
}

/// Handle to an open store. Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

pub struct StoreBuilder {
    medium: Option<Box<dyn Medium>>,
    hooks: Hooks,
    audit_log: Option<PathBuf>,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        StoreBuilder {
            medium: None,
            hooks: Hooks::timestamps(),
            audit_log: None,
        }
    }
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn medium(mut self, medium: impl Medium + 'static) -> Self {
        self.medium = Some(Box::new(medium));
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_create(
        mut self,
        table: TableName,
        hook: impl Fn(&mut Record, &HookContext) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_create(table, hook);
        self
    }

    pub fn on_update(
        mut self,
        table: TableName,
        hook: impl Fn(&mut Record, &HookContext) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_update(table, hook);
        self
    }

    pub fn audit_log(mut self, path: PathBuf) -> Self {
        self.audit_log = Some(path);
        self
    }

    /// Load every record from the medium and rebuild indexes and sequences.
    pub fn open(self) -> Result<Store, StoreError> {
        let mut medium: Box<dyn Medium> = match self.medium {
            Some(medium) => medium,
            None => Box::new(MemoryMedium::new()),
        };
        let records = medium.load()?;
        let label = medium.describe();

        let clock = MonotonicClock::new();
        let mut tables = TableName::ALL.map(TableData::new);
        for record in records {
            if let Some(ts) = record.updated_at().or(record.created_at()) {
                clock.observe(ts);
            }
            tables[record.table().index()].insert(record);
        }
        let count: usize = tables.iter().map(TableData::len).sum();

        let snapshot = Snapshot {
            version: 0,
            tables: tables.map(Arc::new),
        };
        info!(medium = %label, records = count, "store opened");

        Ok(Store {
            inner: Arc::new(StoreInner {
                id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
                locks: std::array::from_fn(|_| Mutex::new(())),
                snapshot: RwLock::new(Arc::new(snapshot)),
                medium: Mutex::new(medium),
                hooks: self.hooks,
                broker: ChangeBroker::new(self.audit_log),
                clock,
                closed: AtomicBool::new(false),
                label,
            }),
        })
    }
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Open the store described by `config` (SQLite unless `in_memory` is set).
    pub fn open(config: &StoreConfig) -> Result<Store, StoreError> {
        let mut builder = StoreBuilder::new();
        if config.in_memory {
            builder = builder.medium(MemoryMedium::new());
        } else {
            builder = builder.medium(SqliteMedium::open(
                &config.database_path(),
                config.busy_timeout_secs,
            )?);
        }
        if config.audit_log {
            std::fs::create_dir_all(&config.data_dir)?;
            builder = builder.audit_log(config.audit_log_path());
        }
        builder.open()
    }

    pub fn in_memory() -> Result<Store, StoreError> {
        StoreBuilder::new().open()
    }

    pub fn with_medium(medium: impl Medium + 'static) -> Result<Store, StoreError> {
        StoreBuilder::new().medium(medium).open()
    }

    /// Flush and release the medium. Every later operation fails with `Closed`.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut medium = self.inner.medium.lock().unwrap_or_else(PoisonError::into_inner);
        medium.close()?;
        info!(medium = %self.inner.label, "store closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Current committed state.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        self.ensure_open()?;
        let snapshot = self
            .inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(&snapshot))
    }

    pub fn version(&self) -> Result<u64, StoreError> {
        Ok(self.snapshot()?.version())
    }

    pub fn subscribe(&self, listener: Weak<dyn CommitListener>) -> Result<(), StoreError> {
        self.inner.broker.subscribe(listener)
    }

    pub fn now(&self) -> i64 {
        self.inner.clock.now()
    }

    /// Run `body` with exclusive write access to `tables`.
    ///
    /// All writes commit atomically when `body` returns `Ok`; none do when it returns `Err`.
    /// Change notifications are published before this returns. A nested call on the same
    /// thread that overlaps the held tables, or would take a table out of lock order, fails
    /// with `Deadlock` instead of blocking forever.
    pub fn transaction<R>(
        &self,
        op: &str,
        tables: &[TableName],
        body: impl FnOnce(&mut Tx<'_>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.ensure_open()?;
        let mut scope = tables.to_vec();
        scope.sort();
        scope.dedup();
        if scope.is_empty() {
            return Err(StoreError::validation(
                TableName::Quiz,
                None,
                "tables",
                "a transaction needs at least one table",
            ));
        }

        let store_id = self.inner.id;
        let conflict = HELD.with(|held| {
            let held = held.borrow();
            let mine: Vec<TableName> = held
                .iter()
                .filter(|(id, _)| *id == store_id)
                .map(|(_, t)| *t)
                .collect();
            let overlaps = scope.iter().any(|t| mine.contains(t));
            let out_of_order = mine.iter().max().is_some_and(|max| scope[0] < *max);
            overlaps || out_of_order
        });
        if conflict {
            warn!(op, tables = ?scope, "re-entrant transaction rejected");
            return Err(StoreError::Deadlock { tables: scope });
        }

        let mut guards = Vec::with_capacity(scope.len());
        for table in &scope {
            // Table locks guard no data; a panicking body leaves only its discarded overlay.
            let guard = self.inner.locks[table.index()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guards.push(guard);
        }
        let _held = HeldTables::register(store_id, &scope);

        let base = self.snapshot()?;
        let next_seq = base.table(TableName::PointEvent).next_seq();
        let mut tx = Tx {
            inner: &self.inner,
            scope: scope.clone(),
            base,
            writes: BTreeMap::new(),
            next_seq,
            _guards: guards,
        };

        match body(&mut tx) {
            Ok(value) => {
                tx.commit(op)?;
                Ok(value)
            }
            Err(err) => {
                debug!(op, error = %err, "transaction rolled back");
                self.inner.broker.record_failure(op, &scope);
                Err(err)
            }
        }
    }

    /// Create one record, checking references against every table it points at.
    pub fn create<E: Entity>(&self, new: E::New) -> Result<E, StoreError> {
        let mut tables = vec![E::TABLE];
        tables.extend_from_slice(E::REFERENCES);
        self.transaction(&format!("{}.create", E::TABLE), &tables, |tx| {
            tx.create::<E>(new)
        })
    }

    pub fn get<E: Entity>(&self, key: impl Into<Key>) -> Result<Option<E>, StoreError> {
        self.snapshot()?.get::<E>(key)
    }

    pub fn query<E: Entity>(&self, query: &Query) -> Result<Vec<E>, StoreError> {
        self.snapshot()?.query::<E>(query)
    }

    pub fn all<E: Entity>(&self) -> Result<Vec<E>, StoreError> {
        self.snapshot()?.all::<E>()
    }

    /// Merge `patches` into an existing record. Absent ids fail with `NotFound`.
    pub fn update<E: Entity>(
        &self,
        key: impl Into<Key>,
        patches: impl IntoIterator<Item = E::Patch>,
    ) -> Result<E, StoreError> {
        let key = key.into();
        let mut tables = vec![E::TABLE];
        tables.extend_from_slice(E::REFERENCES);
        tables.extend_from_slice(E::UPDATE_CHECKS);
        self.transaction(&format!("{}.update", E::TABLE), &tables, |tx| {
            tx.update::<E>(key, patches)
        })
    }

    /// Delete a record and run its cascades. Deleting an absent id is a no-op.
    pub fn delete<E: Entity>(&self, key: impl Into<Key>) -> Result<bool, StoreError> {
        let key = key.into();
        let mut tables = vec![E::TABLE];
        tables.extend_from_slice(E::CASCADES);
        self.transaction(&format!("{}.delete", E::TABLE), &tables, |tx| {
            tx.delete::<E>(key)
        })
    }
}

/// Pops this transaction's entries from the thread-local held set, also on unwind.
struct HeldTables {
    store_id: u64,
    count: usize,
}

impl HeldTables {
    fn register(store_id: u64, scope: &[TableName]) -> Self {
        HELD.with(|held| {
            held.borrow_mut()
                .extend(scope.iter().map(|t| (store_id, *t)));
        });
        HeldTables {
            store_id,
            count: scope.len(),
        }
    }
}

impl Drop for HeldTables {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            for _ in 0..self.count {
                if let Some(pos) = held.iter().rposition(|(id, _)| *id == self.store_id) {
                    held.remove(pos);
                }
            }
        });
    }
}

// ===== Transaction =====

fn typed<E: Entity>(record: Record) -> Result<E, StoreError> {
    let key = record.key();
    E::from_record(record).ok_or_else(|| {
        StoreError::validation(E::TABLE, Some(&key.to_string()), "table", "record type mismatch")
    })
}

/// An open transaction. Reads see the committed state of its tables plus its own writes.
pub struct Tx<'s> {
    inner: &'s StoreInner,
    scope: Vec<TableName>,
    base: Arc<Snapshot>,
    writes: BTreeMap<(TableName, Key), Option<Record>>,
    next_seq: u64,
    _guards: Vec<MutexGuard<'s, ()>>,
}

impl Tx<'_> {
    pub fn scope(&self) -> &[TableName] {
        &self.scope
    }

    pub fn in_scope(&self, table: TableName) -> bool {
        self.scope.contains(&table)
    }

    pub fn require_scope(&self, table: TableName) -> Result<(), StoreError> {
        if !self.in_scope(table) {
            return Err(StoreError::validation(
                table,
                None,
                "table",
                "table is not part of this transaction",
            ));
        }
        Ok(())
    }

    fn context(&self) -> HookContext {
        HookContext {
            now: self.inner.clock.now(),
        }
    }

    fn allocate_key(&mut self, table: TableName) -> Key {
        if table == TableName::PointEvent {
            let n = self.next_seq;
            self.next_seq += 1;
            Key::Seq(n)
        } else {
            Key::Id(time::new_id())
        }
    }

    fn stage(&mut self, record: Record) {
        self.writes
            .insert((record.table(), record.key()), Some(record));
    }

    pub(crate) fn remove_row(&mut self, table: TableName, key: Key) {
        self.writes.insert((table, key), None);
    }

    fn run_hooks(
        &self,
        hooks: &[(TableName, Hook)],
        record: &mut Record,
    ) -> Result<(), StoreError> {
        let (table, key) = (record.table(), record.key());
        Hooks::run(hooks, record, &self.context());
        if record.table() != table || record.key() != key {
            return Err(StoreError::validation(
                table,
                Some(&key.to_string()),
                "id",
                "hooks may not change a record's identity",
            ));
        }
        Ok(())
    }

    /// Assign a key and timestamps, validate references and stage the new record.
    pub fn create<E: Entity>(&mut self, new: E::New) -> Result<E, StoreError> {
        self.require_scope(E::TABLE)?;
        let key = self.allocate_key(E::TABLE);
        let mut record = E::build(key, new)?.into_record();
        let inner = self.inner;
        self.run_hooks(&inner.hooks.on_create, &mut record)?;
        integrity::check_references(self, None, &record)?;
        self.stage(record.clone());
        typed::<E>(record)
    }

    pub fn update<E: Entity>(
        &mut self,
        key: impl Into<Key>,
        patches: impl IntoIterator<Item = E::Patch>,
    ) -> Result<E, StoreError> {
        self.require_scope(E::TABLE)?;
        let key = key.into();
        let before = self
            .read_record(E::TABLE, &key)?
            .ok_or_else(|| StoreError::not_found(E::TABLE, &key))?;
        let mut entity = E::from_record(before.clone())
            .ok_or_else(|| StoreError::not_found(E::TABLE, &key))?;
        for patch in patches {
            entity.apply(patch)?;
        }
        let mut record = entity.into_record();
        let inner = self.inner;
        self.run_hooks(&inner.hooks.on_update, &mut record)?;
        integrity::check_references(self, Some(&before), &record)?;
        self.stage(record.clone());
        typed::<E>(record)
    }

    /// Delete `key` and cascade. Returns whether a row existed.
    pub fn delete<E: Entity>(&mut self, key: impl Into<Key>) -> Result<bool, StoreError> {
        self.require_scope(E::TABLE)?;
        let key = key.into();
        let Some(record) = self.read_record(E::TABLE, &key)? else {
            return Ok(false);
        };
        integrity::cascade_delete(self, &record)?;
        self.remove_row(E::TABLE, key);
        Ok(true)
    }

    /// Stage a record exactly as given: no hooks, no reference checks. Used by import.
    pub fn restore(&mut self, record: Record) -> Result<(), StoreError> {
        self.require_scope(record.table())?;
        if let Some(ts) = record.updated_at().or(record.created_at()) {
            self.inner.clock.observe(ts);
        }
        if let Key::Seq(n) = record.key() {
            self.next_seq = self.next_seq.max(n + 1);
        }
        self.stage(record);
        Ok(())
    }

    /// Stage deletion of every row of `table`, without cascades.
    pub fn clear(&mut self, table: TableName) -> Result<usize, StoreError> {
        self.require_scope(table)?;
        let keys: Vec<Key> = self
            .read_query(&Query::all(table))?
            .iter()
            .map(Record::key)
            .collect();
        let count = keys.len();
        for key in keys {
            self.remove_row(table, key);
        }
        Ok(count)
    }

    pub fn count(&self, table: TableName) -> Result<usize, StoreError> {
        Ok(self.read_query(&Query::all(table))?.len())
    }

    fn commit(self, op: &str) -> Result<(), StoreError> {
        let Tx {
            inner,
            scope,
            base,
            writes,
            next_seq,
            _guards,
        } = self;

        let mut changes = Vec::new();
        let mut batch_writes = Vec::new();
        for ((table, key), after) in writes {
            let before = base.table(table).get(&key).cloned();
            let kind = match (&before, &after) {
                (None, Some(_)) => ChangeKind::Created,
                (Some(_), Some(_)) => ChangeKind::Updated,
                (Some(_), None) => ChangeKind::Deleted,
                (None, None) => continue,
            };
            batch_writes.push(match &after {
                Some(record) => Write::Put(record.clone()),
                None => Write::Delete(table, key.clone()),
            });
            changes.push(Change {
                table,
                key,
                kind,
                before,
                after,
            });
        }
        // Released so the committed tables below are copied only while a reader holds them.
        drop(base);
        if changes.is_empty() {
            return Ok(());
        }

        {
            let mut medium = inner.medium.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = medium.persist(&batch_writes) {
                warn!(op, error = %err, "commit failed to persist");
                inner.broker.record_failure(op, &scope);
                return Err(err);
            }
        }

        let version = {
            let mut current = inner
                .snapshot
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let next = Arc::make_mut(&mut *current);
            next.version += 1;
            for change in &changes {
                let data = Arc::make_mut(&mut next.tables[change.table.index()]);
                match &change.after {
                    Some(record) => data.insert(record.clone()),
                    None => {
                        data.remove(&change.key);
                    }
                }
            }
            let points = &mut next.tables[TableName::PointEvent.index()];
            if points.next_seq < next_seq {
                Arc::make_mut(points).next_seq = next_seq;
            }
            next.version
        };

        debug!(op, version, changes = changes.len(), tables = ?scope, "commit");
        let batch = CommitBatch {
            version,
            op: op.to_string(),
            tables: scope,
            changes,
        };
        inner.broker.publish(&batch);
        Ok(())
    }
}

impl Reads for Tx<'_> {
    fn read_record(&self, table: TableName, key: &Key) -> Result<Option<Record>, StoreError> {
        self.require_scope(table)?;
        if let Some(staged) = self.writes.get(&(table, key.clone())) {
            return Ok(staged.clone());
        }
        Ok(self.base.table(table).get(key).cloned())
    }

    fn read_query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let table = query.table();
        self.require_scope(table)?;
        let mut rows: BTreeMap<Key, Record> = self
            .base
            .table(table)
            .select(query)
            .into_iter()
            .filter(|r| !self.writes.contains_key(&(table, r.key())))
            .map(|r| (r.key(), r.clone()))
            .collect();
        for ((t, key), staged) in &self.writes {
            if *t != table {
                continue;
            }
            if let Some(record) = staged
                && query.matches(record)
            {
                rows.insert(key.clone(), record.clone());
            }
        }
        Ok(rows.into_values().collect())
    }
}
