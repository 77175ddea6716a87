//! Portable store archives.
//!
//! An archive is JSON Lines: one header, one line per record, one trailer. The trailer
//! carries per-table counts and a SHA-256 over the record lines, so a truncated or edited
//! archive is rejected before anything is written. Import lands in a single transaction over
//! every table: the whole archive or nothing.

use crate::core::error::StoreError;
use crate::core::model::Record;
use crate::core::schema::TableName;
use crate::core::store::Store;
use crate::core::time;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const ARCHIVE_FORMAT: &str = "quizbase-archive";
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveHeader {
    pub format: String,
    pub version: u32,
    pub exported_at: i64,
    /// Store version the archive was taken from.
    pub snapshot_version: u64,
    pub tables: Vec<TableName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveTrailer {
    pub counts: BTreeMap<TableName, usize>,
    pub sha256: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Line {
    Record(Record),
    Trailer(ArchiveTrailer),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportMode {
    /// Refuse to import into a store that holds any record.
    #[default]
    RequireEmpty,
    /// Clear every table first, in the same transaction.
    Replace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSummary {
    pub counts: BTreeMap<TableName, usize>,
    pub sha256: String,
}

impl ArchiveSummary {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

fn corrupt(reason: impl Into<String>) -> StoreError {
    StoreError::validation(TableName::Quiz, None, "archive", reason)
}

/// Write every record of one consistent snapshot to `out`.
pub fn export_archive(store: &Store, out: impl Write) -> Result<ArchiveSummary, StoreError> {
    let snapshot = store.snapshot()?;
    let mut out = BufWriter::new(out);

    let header = ArchiveHeader {
        format: ARCHIVE_FORMAT.to_string(),
        version: ARCHIVE_VERSION,
        exported_at: time::now_millis(),
        snapshot_version: snapshot.version(),
        tables: TableName::ALL.to_vec(),
    };
    writeln!(out, "{}", serde_json::to_string(&header)?)?;

    let mut hasher = Sha256::new();
    let mut counts = BTreeMap::new();
    for table in TableName::ALL {
        let data = snapshot.table(table);
        for record in data.records() {
            let line = serde_json::to_string(record)?;
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
            writeln!(out, "{line}")?;
        }
        counts.insert(table, data.len());
    }

    let trailer = ArchiveTrailer {
        counts,
        sha256: format!("{:x}", hasher.finalize()),
    };
    writeln!(out, "{}", serde_json::to_string(&trailer)?)?;
    out.flush()?;

    let summary = ArchiveSummary {
        counts: trailer.counts,
        sha256: trailer.sha256,
    };
    info!(
        records = summary.total(),
        version = snapshot.version(),
        "archive exported"
    );
    Ok(summary)
}

pub fn export_to_path(store: &Store, path: &Path) -> Result<ArchiveSummary, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    export_archive(store, File::create(path)?)
}

/// Restore an archive. Ids and timestamps are kept as archived.
pub fn import_archive(
    store: &Store,
    input: impl BufRead,
    mode: ImportMode,
) -> Result<ArchiveSummary, StoreError> {
    let mut lines = input.lines();
    let header_line = lines.next().ok_or_else(|| corrupt("archive is empty"))??;
    let header: ArchiveHeader = serde_json::from_str(&header_line)?;
    if header.format != ARCHIVE_FORMAT {
        return Err(corrupt(format!("unknown format `{}`", header.format)));
    }
    if header.version > ARCHIVE_VERSION {
        return Err(corrupt(format!(
            "archive version {} is newer than supported version {ARCHIVE_VERSION}",
            header.version
        )));
    }

    let summary = store.transaction("archive.import", &TableName::ALL, |tx| {
        match mode {
            ImportMode::RequireEmpty => {
                for table in TableName::ALL {
                    if tx.count(table)? > 0 {
                        return Err(StoreError::validation(
                            table,
                            None,
                            "archive",
                            "store is not empty; import with replace to overwrite it",
                        ));
                    }
                }
            }
            ImportMode::Replace => {
                for table in TableName::ALL {
                    tx.clear(table)?;
                }
            }
        }

        let mut hasher = Sha256::new();
        let mut counts: BTreeMap<TableName, usize> =
            TableName::ALL.iter().map(|t| (*t, 0)).collect();
        let mut trailer = None;
        for line in lines.by_ref() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if trailer.is_some() {
                return Err(corrupt("data after trailer"));
            }
            match serde_json::from_str::<Line>(&line)? {
                Line::Record(record) => {
                    hasher.update(line.as_bytes());
                    hasher.update(b"\n");
                    *counts.entry(record.table()).or_default() += 1;
                    tx.restore(record)?;
                }
                Line::Trailer(t) => trailer = Some(t),
            }
        }

        let trailer = trailer.ok_or_else(|| corrupt("archive has no trailer (truncated?)"))?;
        let digest = format!("{:x}", hasher.finalize());
        if digest != trailer.sha256 {
            return Err(corrupt("digest mismatch"));
        }
        if counts != trailer.counts {
            return Err(corrupt("record counts do not match trailer"));
        }
        Ok(ArchiveSummary {
            counts,
            sha256: digest,
        })
    })?;

    info!(records = summary.total(), ?mode, "archive imported");
    Ok(summary)
}

pub fn import_from_path(
    store: &Store,
    path: &Path,
    mode: ImportMode,
) -> Result<ArchiveSummary, StoreError> {
    import_archive(store, BufReader::new(File::open(path)?), mode)
}
