//! Per-day attendance ledgers.
//!
//! Each calendar date has one append-only CSV file `Attendance-MM_DD_YY.csv`
//! with header `Name,Roll,Time`. A [`LedgerBook`] hands out one shared
//! [`AttendanceLedger`] per date; each ledger guards its check-then-append
//! with its own mutex so at most one record per roll id is ever written.

use crate::types::{AttendanceRecord, Identity};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

const HEADER: [&str; 3] = ["Name", "Roll", "Time"];
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ledger {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("ledger {path}: bad time {value:?}")]
    BadTime { path: PathBuf, value: String },
}

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "record")]
pub enum CommitOutcome {
    /// A new record was appended.
    Recorded(AttendanceRecord),
    /// The identity already has a record for this date; nothing was written.
    AlreadyPresent(AttendanceRecord),
}

#[derive(Debug, Serialize, Deserialize)]
struct Row {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Roll")]
    roll: u32,
    #[serde(rename = "Time")]
    time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    /// Absent or empty; the header has not been written.
    Missing,
    /// Exists and ends with a newline.
    Terminated,
    /// Exists but the last line has no trailing newline.
    Unterminated,
    /// A write failed part way; re-read the file before the next append.
    Unknown,
}

impl FileState {
    fn of(bytes: &[u8]) -> Self {
        match bytes.last() {
            None => FileState::Missing,
            Some(b'\n') => FileState::Terminated,
            Some(_) => FileState::Unterminated,
        }
    }

    fn on_disk(path: &Path) -> Result<Self, LedgerError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Self::of(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileState::Missing),
            Err(source) => Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

struct LedgerState {
    records: Vec<AttendanceRecord>,
    file: FileState,
}

/// The attendance records for one calendar date.
pub struct AttendanceLedger {
    date: NaiveDate,
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl AttendanceLedger {
    /// Load the ledger for `date` from `dir`. A missing file is an empty ledger;
    /// the file is only created on the first commit.
    pub fn load(dir: &Path, date: NaiveDate) -> Result<Self, LedgerError> {
        let path = dir.join(file_name(date));
        let (records, file) = match std::fs::read(&path) {
            Ok(bytes) => (parse_records(&path, date, &bytes)?, FileState::of(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), FileState::Missing),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), records = records.len(), "ledger loaded");
        Ok(Self {
            date,
            path,
            state: Mutex::new(LedgerState { records, file }),
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `identity` as present at `time`, unless it already is.
    ///
    /// The lookup and the append happen under one lock, so concurrent commits
    /// for the same identity yield exactly one `Recorded`. A failed write
    /// leaves the in-memory records unchanged; whatever bytes did reach the
    /// file are re-read before the next append.
    pub fn commit(
        &self,
        identity: &Identity,
        time: NaiveTime,
    ) -> Result<CommitOutcome, LedgerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = state
            .records
            .iter()
            .find(|r| r.identity.roll_id == identity.roll_id)
        {
            tracing::debug!(roll = identity.roll_id, date = %self.date, "already present");
            return Ok(CommitOutcome::AlreadyPresent(existing.clone()));
        }

        let record = AttendanceRecord {
            identity: identity.clone(),
            date: self.date,
            time,
        };
        let file = match state.file {
            FileState::Unknown => FileState::on_disk(&self.path)?,
            known => known,
        };
        if let Err(e) = self.append(file, &record) {
            tracing::warn!(path = %self.path.display(), error = %e, "ledger append failed");
            state.file = FileState::Unknown;
            return Err(e);
        }
        state.file = FileState::Terminated;
        state.records.push(record.clone());

        tracing::info!(
            roll = identity.roll_id,
            name = %identity.display_name,
            date = %self.date,
            time = %time.format(TIME_FORMAT),
            "attendance recorded"
        );
        Ok(CommitOutcome::Recorded(record))
    }

    /// Records in insertion order.
    pub fn list(&self) -> Vec<AttendanceRecord> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clone()
    }

    pub fn present_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    fn append(&self, file_state: FileState, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;

        if file_state == FileState::Unterminated {
            file.write_all(b"\n").map_err(io_err)?;
        }

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        let csv_err = |source| LedgerError::Csv {
            path: self.path.clone(),
            source,
        };
        if file_state == FileState::Missing {
            writer.write_record(HEADER).map_err(csv_err)?;
        }
        writer
            .serialize(Row {
                name: record.identity.display_name.clone(),
                roll: record.identity.roll_id,
                time: record.time.format(TIME_FORMAT).to_string(),
            })
            .map_err(csv_err)?;
        writer.flush().map_err(io_err)?;
        Ok(())
    }
}

/// Ledger file name for a date, e.g. `Attendance-10_17_26.csv`.
pub fn file_name(date: NaiveDate) -> String {
    format!("Attendance-{}.csv", date.format("%m_%d_%y"))
}

fn parse_records(
    path: &Path,
    date: NaiveDate,
    bytes: &[u8],
) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let mut records = Vec::new();
    for row in reader.deserialize::<Row>() {
        let row = row.map_err(|source| LedgerError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let time = NaiveTime::parse_from_str(row.time.trim(), TIME_FORMAT).map_err(|_| {
            LedgerError::BadTime {
                path: path.to_path_buf(),
                value: row.time.clone(),
            }
        })?;
        records.push(AttendanceRecord {
            identity: Identity::new(row.name, row.roll),
            date,
            time,
        });
    }
    Ok(records)
}

/// Lazily-opened ledgers, one per date, all stored under one directory.
pub struct LedgerBook {
    dir: PathBuf,
    ledgers: Mutex<HashMap<NaiveDate, Arc<AttendanceLedger>>>,
}

impl LedgerBook {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            ledgers: Mutex::new(HashMap::new()),
        })
    }

    /// The single shared ledger for `date`, loaded on first access.
    pub fn ledger(&self, date: NaiveDate) -> Result<Arc<AttendanceLedger>, LedgerError> {
        let mut ledgers = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ledger) = ledgers.get(&date) {
            return Ok(Arc::clone(ledger));
        }
        let ledger = Arc::new(AttendanceLedger::load(&self.dir, date)?);
        ledgers.insert(date, Arc::clone(&ledger));
        Ok(ledger)
    }

    pub fn list(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.ledger(date)?.list())
    }
}
