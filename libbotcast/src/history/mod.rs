//! Persistent post history
//!
//! The history is a JSON array of iteration records kept in a single file.
//! [`HistoryStore`] owns that file: it loads it through the repair and
//! migration stages, appends new records, and writes the canonical form
//! back.
//!
//! Loading never fails because of what is *in* the file. Unparseable content
//! is copied to `<file>.bak` and the history starts empty; entries from older
//! versions are upgraded on the fly.
//!
//! # Example
//!
//! ```no_run
//! use libbotcast::history::HistoryStore;
//! use libbotcast::records::IterationRecord;
//!
//! # fn example() -> libbotcast::Result<()> {
//! let mut history = HistoryStore::open("/tmp/bot-history.json")?;
//! history.append(IterationRecord::default());
//! history.save()?;
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::{HistoryError, Result};
use crate::records::IterationRecord;

pub mod migrate;
pub mod repair;

use self::migrate::{decode_entry, Origin};
use self::repair::{needs_repair, repair_entry};

/// What happened while loading the history file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records now in memory
    pub entries: usize,
    /// Entries that carried the nested-record corruption
    pub repaired: usize,
    /// Entries lifted from the legacy single-backend format
    pub migrated: usize,
    /// Entries that could not be decoded and were left out
    pub skipped: usize,
    /// Where the original file was copied, if it had to be
    pub backup: Option<PathBuf>,
}

impl LoadReport {
    /// Whether saving now would write something different from what was read
    pub fn needs_rewrite(&self) -> bool {
        self.repaired > 0 || self.migrated > 0 || self.skipped > 0 || self.backup.is_some()
    }
}

/// Owner of the history file and its in-memory records
///
/// Records are kept in posting order. Nothing locks the file; run one bot
/// process per history file.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    entries: Vec<IterationRecord>,
}

impl HistoryStore {
    /// Create an empty store for `path` without touching the filesystem
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Create a store for `path` and load it
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Io` if the file exists but cannot be read, or
    /// if a needed backup cannot be written.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file that receives unparseable history: `<file>.bak`
    pub fn backup_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".bak");
        PathBuf::from(name)
    }

    pub fn entries(&self) -> &[IterationRecord] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.entries.last()
    }

    /// Add a record at the end of the history (in memory only)
    pub fn append(&mut self, record: IterationRecord) {
        self.entries.push(record);
    }

    /// Replace the in-memory history with the file's content
    ///
    /// Each entry goes through [`repair_entry`] and then [`decode_entry`].
    /// A missing file gives an empty history. A file that is not a JSON
    /// array is copied to [`backup_path`](Self::backup_path) and gives an
    /// empty history. Entries that cannot be decoded are skipped after the
    /// file has been backed up the same way.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Io` for filesystem failures other than the file
    /// not existing.
    pub fn load(&mut self) -> Result<LoadReport> {
        self.entries.clear();

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No history file yet, starting empty");
                return Ok(LoadReport::default());
            }
            Err(e) => return Err(HistoryError::Io(e).into()),
        };

        let items = match parse_array(&bytes) {
            Ok(items) => items,
            Err(reason) => {
                let backup = self.write_backup(&bytes)?;
                error!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    "Could not decode history ({}), starting empty. \
                     Former history available in the backup file",
                    reason
                );
                return Ok(LoadReport {
                    backup: Some(backup),
                    ..LoadReport::default()
                });
            }
        };

        let mut report = LoadReport::default();
        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if needs_repair(&item) {
                report.repaired += 1;
            }
            match decode_entry(repair_entry(item)) {
                Ok((record, origin)) => {
                    if origin == Origin::Legacy {
                        report.migrated += 1;
                    }
                    records.push(record);
                }
                Err(e) => {
                    error!(path = %self.path.display(), index, "Skipping history entry: {}", e);
                    report.skipped += 1;
                }
            }
        }

        if report.skipped > 0 {
            let backup = self.write_backup(&bytes)?;
            warn!(backup = %backup.display(), "Original history kept in the backup file");
            report.backup = Some(backup);
        }
        if report.repaired > 0 || report.migrated > 0 {
            info!(
                repaired = report.repaired,
                migrated = report.migrated,
                "Upgraded history entries written by an older version"
            );
        }

        report.entries = records.len();
        self.entries = records;
        debug!(path = %self.path.display(), entries = report.entries, "Loaded history");
        Ok(report)
    }

    /// Render the whole history in its canonical on-disk form
    ///
    /// Two-space indented JSON with sorted keys and a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let array = Value::Array(
            self.entries
                .iter()
                .map(|record| Value::Object(record.to_map()))
                .collect(),
        );
        let mut content = serde_json::to_string_pretty(&array).map_err(HistoryError::Json)?;
        content.push('\n');
        Ok(content)
    }

    /// Write the whole history to the file
    ///
    /// The content goes to `<file>.tmp` first and is renamed over the file.
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Io` if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        debug!(path = %self.path.display(), entries = self.entries.len(), "Saving history");

        let content = self.to_json()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(HistoryError::Io)?;
            }
        }
        atomic_write(&self.path, &content)
    }

    fn write_backup(&self, bytes: &[u8]) -> Result<PathBuf> {
        let backup = self.backup_path();
        fs::write(&backup, bytes).map_err(HistoryError::Io)?;
        Ok(backup)
    }
}

/// Parse the file content as a JSON array
///
/// Nesting depth is not limited: corrupted records can be deeply nested.
/// `serde_stacker` moves the parser onto heap-allocated stack segments once
/// the thread stack runs low.
fn parse_array(bytes: &[u8]) -> std::result::Result<Vec<Value>, String> {
    let mut json = serde_json::Deserializer::from_slice(bytes);
    json.disable_recursion_limit();

    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut json))
        .map_err(|e| e.to_string())?;
    json.end().map_err(|e| e.to_string())?;

    match value {
        Value::Array(items) => Ok(items),
        other => {
            dismantle(other);
            Err("top-level value is not an array".to_string())
        }
    }
}

/// Drop a value of any depth without recursing
///
/// `Value`'s own `Drop` recurses once per nesting level.
pub(crate) fn dismantle(value: Value) {
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        match value {
            Value::Array(items) => pending.extend(items),
            Value::Object(map) => pending.extend(map.into_iter().map(|(_, value)| value)),
            _ => {}
        }
    }
}

/// Write via a temp file and rename so readers never see a partial file
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let mut temp_name = OsString::from(path.as_os_str());
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, content).map_err(HistoryError::Io)?;
    fs::rename(&temp_path, path).map_err(HistoryError::Io)?;

    Ok(())
}
