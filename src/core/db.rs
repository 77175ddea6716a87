//! Durable keyed-table media behind the store.
//!
//! The store keeps its indexed working set in memory and hands every commit to a [`Medium`]
//! as one batch. A medium must apply a batch atomically: all writes land or none do.

use crate::core::error::StoreError;
use crate::core::model::{Key, Record};
use crate::core::schema::TableName;
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One row-level write of a commit batch.
#[derive(Debug, Clone)]
pub enum Write {
    Put(Record),
    Delete(TableName, Key),
}

pub trait Medium: Send {
    /// Every stored record, in no particular order.
    fn load(&mut self) -> Result<Vec<Record>, StoreError>;

    /// Apply one commit batch atomically.
    fn persist(&mut self, writes: &[Write]) -> Result<(), StoreError>;

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn describe(&self) -> String;
}

pub fn db_connect(db_path: &Path, busy_timeout_secs: u32) -> Result<Connection, StoreError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(u64::from(busy_timeout_secs)))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA synchronous=NORMAL;", [])?;
    Ok(conn)
}

/// SQLite medium: one SQL table per entity table, JSON bodies keyed by the encoded key.
pub struct SqliteMedium {
    conn: Option<Connection>,
    path: PathBuf,
}

impl SqliteMedium {
    pub fn open(db_path: &Path, busy_timeout_secs: u32) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = db_connect(db_path, busy_timeout_secs)?;
        for table in TableName::ALL {
            conn.execute(&table.create_sql(), [])?;
        }
        Ok(SqliteMedium {
            conn: Some(conn),
            path: db_path.to_path_buf(),
        })
    }

    fn conn(&mut self) -> Result<&mut Connection, StoreError> {
        self.conn.as_mut().ok_or(StoreError::Closed)
    }
}

impl Medium for SqliteMedium {
    fn load(&mut self) -> Result<Vec<Record>, StoreError> {
        let conn = self.conn()?;
        let mut out = Vec::new();
        for table in TableName::ALL {
            let mut stmt = conn.prepare(&format!("SELECT body FROM {} ORDER BY row_key", table))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for body in rows {
                out.push(Record::decode_body(table, &body?)?);
            }
        }
        Ok(out)
    }

    fn persist(&mut self, writes: &[Write]) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let tx = conn.transaction()?;
        for write in writes {
            match write {
                Write::Put(record) => {
                    tx.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {} (row_key, body) VALUES (?1, ?2)",
                            record.table()
                        ),
                        params![record.key().encode(), record.encode_body()?],
                    )?;
                }
                Write::Delete(table, key) => {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE row_key = ?1", table),
                        params![key.encode()],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

/// In-process medium. Clones share contents, so a store reopened on a clone sees everything
/// the previous store committed.
#[derive(Clone, Default)]
pub struct MemoryMedium {
    rows: Arc<Mutex<BTreeMap<(TableName, Key), Record>>>,
    fail_next: Arc<AtomicBool>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `persist` call fail without writing anything.
    pub fn fail_next_persist(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Medium for MemoryMedium {
    fn load(&mut self) -> Result<Vec<Record>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory medium"))?;
        Ok(rows.values().cloned().collect())
    }

    fn persist(&mut self, writes: &[Write]) -> Result<(), StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(
                "injected persist failure",
            )));
        }
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory medium"))?;
        for write in writes {
            match write {
                Write::Put(record) => {
                    rows.insert((record.table(), record.key()), record.clone());
                }
                Write::Delete(table, key) => {
                    rows.remove(&(*table, key.clone()));
                }
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
