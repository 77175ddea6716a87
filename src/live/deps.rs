//! Read-set recording for live queries.
//!
//! A query evaluates against a [`Reader`], which forwards to one committed snapshot and
//! remembers every key and predicate it was asked for. The resulting [`ReadSet`] is
//! matched against each commit's changed rows to decide whether the query is stale.

use crate::core::broker::{Change, CommitBatch};
use crate::core::error::StoreError;
use crate::core::model::{Key, Record};
use crate::core::query::Query;
use crate::core::schema::TableName;
use crate::core::store::{Reads, Snapshot};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything one evaluation touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadSet {
    wildcard: bool,
    keys: BTreeSet<(TableName, Key)>,
    queries: Vec<Query>,
}

impl ReadSet {
    /// Depends on every write. Used before the first evaluation has recorded anything.
    pub fn wildcard() -> Self {
        ReadSet {
            wildcard: true,
            ..Default::default()
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn is_empty(&self) -> bool {
        !self.wildcard && self.keys.is_empty() && self.queries.is_empty()
    }

    pub fn tables(&self) -> BTreeSet<TableName> {
        self.keys
            .iter()
            .map(|(t, _)| *t)
            .chain(self.queries.iter().map(Query::table))
            .collect()
    }

    pub fn record_key(&mut self, table: TableName, key: Key) {
        self.keys.insert((table, key));
    }

    pub fn record_query(&mut self, query: &Query) {
        if !self.queries.contains(query) {
            self.queries.push(query.clone());
        }
    }

    pub fn union(&mut self, other: ReadSet) {
        self.wildcard |= other.wildcard;
        self.keys.extend(other.keys);
        for query in other.queries {
            self.record_query(&query);
        }
    }

    /// True when `change` could alter what a read in this set returned.
    pub fn touched_by(&self, change: &Change) -> bool {
        if self.wildcard || self.keys.contains(&(change.table, change.key.clone())) {
            return true;
        }
        let matches = |record: &Option<Record>| {
            record.as_ref().is_some_and(|r| {
                self.queries
                    .iter()
                    .any(|q| q.table() == change.table && q.matches(r))
            })
        };
        matches(&change.before) || matches(&change.after)
    }

    pub fn affected_by(&self, batch: &CommitBatch) -> bool {
        batch.changes.iter().any(|c| self.touched_by(c))
    }
}

/// Snapshot reader that records its reads.
pub struct Reader {
    snapshot: Arc<Snapshot>,
    reads: RefCell<ReadSet>,
}

impl Reader {
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Reader {
            snapshot,
            reads: RefCell::new(ReadSet::default()),
        }
    }

    /// Version of the snapshot this evaluation sees.
    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    pub fn into_reads(self) -> ReadSet {
        self.reads.into_inner()
    }
}

impl Reads for Reader {
    fn read_record(&self, table: TableName, key: &Key) -> Result<Option<Record>, StoreError> {
        self.reads.borrow_mut().record_key(table, key.clone());
        self.snapshot.read_record(table, key)
    }

    fn read_query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        self.reads.borrow_mut().record_query(query);
        self.snapshot.read_query(query)
    }
}
