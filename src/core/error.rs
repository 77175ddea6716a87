use crate::core::schema::TableName;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("validation failed on {table} {id:?} field `{field}`: {reason}")]
    Validation {
        table: TableName,
        id: Option<String>,
        field: &'static str,
        reason: String,
    },
    #[error("{table} {id} not found")]
    NotFound { table: TableName, id: String },
    #[error("transaction on {tables:?} would deadlock: the calling thread already holds a conflicting table lock")]
    Deadlock { tables: Vec<TableName> },
    #[error("live query `{query}` failed: {message}")]
    Evaluation { query: String, message: String },
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    #[error("store or subscription is closed")]
    Closed,
}

/// Coarse classification of [`StoreError`], for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Deadlock,
    Evaluation,
    Storage,
    Closed,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation { .. } | StoreError::Config(_) => ErrorKind::Validation,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Deadlock { .. } => ErrorKind::Deadlock,
            StoreError::Evaluation { .. } => ErrorKind::Evaluation,
            StoreError::Closed => ErrorKind::Closed,
            StoreError::Sqlite(_)
            | StoreError::Io(_)
            | StoreError::Json(_)
            | StoreError::LockPoisoned(_) => ErrorKind::Storage,
        }
    }

    pub fn validation(
        table: TableName,
        id: Option<&str>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        StoreError::Validation {
            table,
            id: id.map(str::to_string),
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(table: TableName, id: impl ToString) -> Self {
        StoreError::NotFound {
            table,
            id: id.to_string(),
        }
    }
}

/// Errors cross thread boundaries in live-query channels, so they must be cloneable.
/// Infrastructure errors lose their source chain and keep only the message.
impl Clone for StoreError {
    fn clone(&self) -> Self {
        match self {
            StoreError::Validation {
                table,
                id,
                field,
                reason,
            } => StoreError::Validation {
                table: *table,
                id: id.clone(),
                field: *field,
                reason: reason.clone(),
            },
            StoreError::NotFound { table, id } => StoreError::NotFound {
                table: *table,
                id: id.clone(),
            },
            StoreError::Deadlock { tables } => StoreError::Deadlock {
                tables: tables.clone(),
            },
            StoreError::Evaluation { query, message } => StoreError::Evaluation {
                query: query.clone(),
                message: message.clone(),
            },
            StoreError::Sqlite(e) => StoreError::Io(io::Error::other(e.to_string())),
            StoreError::Io(e) => StoreError::Io(io::Error::new(e.kind(), e.to_string())),
            StoreError::Json(e) => StoreError::Io(io::Error::other(e.to_string())),
            StoreError::Config(s) => StoreError::Config(s.clone()),
            StoreError::LockPoisoned(s) => StoreError::LockPoisoned(*s),
            StoreError::Closed => StoreError::Closed,
        }
    }
}
