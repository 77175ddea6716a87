use crate::core::error::StoreError;
use crate::core::model::{Key, Record};
use crate::core::schema::TableName;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::warn;

/// The commit broker is the thin waist between writers and readers.
/// Every committed transaction passes through it exactly once, in commit order per table set.
pub struct ChangeBroker {
    listeners: RwLock<Vec<Weak<dyn CommitListener>>>,
    audit_log_path: Option<PathBuf>,
    audit_lock: Mutex<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One changed row. `before`/`after` let listeners match predicates on either side of the write.
#[derive(Debug, Clone)]
pub struct Change {
    pub table: TableName,
    pub key: Key,
    pub kind: ChangeKind,
    pub before: Option<Record>,
    pub after: Option<Record>,
}

#[derive(Debug, Clone)]
pub struct CommitBatch {
    /// Snapshot version this commit produced.
    pub version: u64,
    pub op: String,
    pub tables: Vec<TableName>,
    pub changes: Vec<Change>,
}

impl CommitBatch {
    pub fn touches(&self, table: TableName) -> bool {
        self.changes.iter().any(|c| c.table == table)
    }
}

pub trait CommitListener: Send + Sync {
    fn on_commit(&self, batch: &CommitBatch);
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub version: Option<u64>,
    pub tables: Vec<TableName>,
    pub changes: usize,
    pub status: String,
}

impl ChangeBroker {
    pub fn new(audit_log_path: Option<PathBuf>) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            audit_log_path,
            audit_lock: Mutex::new(()),
        }
    }

    /// Listeners are held weakly; dropping the last strong handle unsubscribes.
    pub fn subscribe(&self, listener: Weak<dyn CommitListener>) -> Result<(), StoreError> {
        let mut listeners = self
            .listeners
            .write()
            .map_err(|_| StoreError::LockPoisoned("broker listeners"))?;
        listeners.push(listener);
        Ok(())
    }

    /// Deliver a committed batch to every live listener, then append it to the audit log.
    ///
    /// The batch is already durable and visible, so an audit failure is logged and never
    /// reported as a failed commit.
    pub fn publish(&self, batch: &CommitBatch) {
        let live: Vec<Arc<dyn CommitListener>> = {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_commit(batch);
        }
        let logged = self.log_event(
            &batch.op,
            Some(batch.version),
            &batch.tables,
            batch.changes.len(),
            "success",
        );
        if let Err(err) = logged {
            warn!(op = %batch.op, version = batch.version, error = %err, "audit log append failed");
        }
    }

    /// Audit a rolled-back transaction. The caller keeps reporting its own error.
    pub fn record_failure(&self, op: &str, tables: &[TableName]) {
        if let Err(err) = self.log_event(op, None, tables, 0, "error") {
            warn!(op, error = %err, "audit log append failed");
        }
    }

    fn log_event(
        &self,
        op: &str,
        version: Option<u64>,
        tables: &[TableName],
        changes: usize,
        status: &str,
    ) -> Result<(), StoreError> {
        let Some(path) = &self.audit_log_path else {
            return Ok(());
        };

        let ev = BrokerEvent {
            ts: format!("{}Z", time::now_millis() / 1000),
            event_id: time::new_event_id(),
            op: op.to_string(),
            version,
            tables: tables.to_vec(),
            changes,
            status: status.to_string(),
        };

        let _guard = self.audit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}
