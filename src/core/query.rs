//! Read predicates over indexed fields.
//!
//! A [`Query`] is a conjunction of conditions, each on a field the table declares an index
//! for. Unindexed fields are rejected when the query is built, never by a runtime scan.

use crate::core::error::StoreError;
use crate::core::model::{Entity, Record};
use crate::core::schema::{Field, IndexValue, TableName};
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq(Field, IndexValue),
    AnyOf(Field, Vec<IndexValue>),
    Range(Field, Bound<IndexValue>, Bound<IndexValue>),
}

impl Condition {
    pub fn field(&self) -> Field {
        match self {
            Condition::Eq(f, _) | Condition::AnyOf(f, _) | Condition::Range(f, _, _) => *f,
        }
    }

    fn accepts(&self, value: &IndexValue) -> bool {
        match self {
            Condition::Eq(_, want) => value == want,
            Condition::AnyOf(_, set) => set.contains(value),
            Condition::Range(_, lo, hi) => {
                let above = match lo {
                    Bound::Included(b) => value >= b,
                    Bound::Excluded(b) => value > b,
                    Bound::Unbounded => true,
                };
                let below = match hi {
                    Bound::Included(b) => value <= b,
                    Bound::Excluded(b) => value < b,
                    Bound::Unbounded => true,
                };
                above && below
            }
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        record
            .index_values(self.field())
            .iter()
            .any(|v| self.accepts(v))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    table: TableName,
    conditions: Vec<Condition>,
}

impl Query {
    /// Start a query on the table of `E`.
    pub fn on<E: Entity>() -> QueryBuilder {
        QueryBuilder::new(E::TABLE)
    }

    pub fn table(&self) -> TableName {
        self.table
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Full-table read; always valid.
    pub fn all(table: TableName) -> Query {
        Query {
            table,
            conditions: Vec::new(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.table() == self.table && self.conditions.iter().all(|c| c.matches(record))
    }
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: TableName,
    conditions: Vec<Condition>,
}

impl QueryBuilder {
    pub fn new(table: TableName) -> Self {
        QueryBuilder {
            table,
            conditions: Vec::new(),
        }
    }

    pub fn eq(mut self, field: Field, value: impl Into<IndexValue>) -> Self {
        self.conditions.push(Condition::Eq(field, value.into()));
        self
    }

    pub fn any_of<V: Into<IndexValue>>(
        mut self,
        field: Field,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.conditions.push(Condition::AnyOf(field, values));
        self
    }

    pub fn range(mut self, field: Field, lo: Bound<IndexValue>, hi: Bound<IndexValue>) -> Self {
        self.conditions.push(Condition::Range(field, lo, hi));
        self
    }

    pub fn build(self) -> Result<Query, StoreError> {
        for condition in &self.conditions {
            let field = condition.field();
            if !self.table.is_indexed(field) {
                return Err(StoreError::validation(
                    self.table,
                    None,
                    field.as_str(),
                    "field is not indexed",
                ));
            }
        }
        Ok(Query {
            table: self.table,
            conditions: self.conditions,
        })
    }
}
