//! Session table persistence
//!
//! The sessionized event table is handed to an external store between the
//! segmentation and aggregation stages. Writes replace any existing table of
//! the same name.
//!
//! Column contract: `id, type, customer-id, timestamp, time_diff, session`.

use crate::error::FunnelError;
use crate::types::{Event, SessionedEvent, TimedEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default table name for the sessionized events
pub const SESSION_TABLE: &str = "sessioned_events";

/// One row of the persisted session table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "customer-id")]
    pub customer_id: String,
    pub timestamp: DateTime<Utc>,
    pub time_diff: f64,
    pub session: u64,
}

impl From<&SessionedEvent> for SessionRow {
    fn from(e: &SessionedEvent) -> Self {
        let event = &e.timed.event;
        SessionRow {
            id: event.id.clone(),
            event_type: event.event_type.clone(),
            customer_id: event.customer_id.clone(),
            timestamp: event.timestamp,
            time_diff: e.timed.time_diff,
            session: e.session_id,
        }
    }
}

impl SessionRow {
    /// Rebuild a sessioned event, recomputing the purchase flag from `type`
    pub fn into_sessioned(self, purchase_event_type: &str) -> SessionedEvent {
        let there_is_buy = self.event_type == purchase_event_type;
        SessionedEvent {
            timed: TimedEvent {
                event: Event {
                    id: self.id,
                    event_type: self.event_type,
                    customer_id: self.customer_id,
                    timestamp: self.timestamp,
                },
                time_diff: self.time_diff,
            },
            session_id: self.session,
            there_is_buy,
        }
    }
}

/// Storage backend for session tables
pub trait SessionTableStore {
    /// Write `rows` under `table`, replacing any previous contents
    fn save(&mut self, table: &str, rows: &[SessionRow]) -> Result<(), FunnelError>;

    /// Read back a table written by [`SessionTableStore::save`]
    fn load(&self, table: &str) -> Result<Vec<SessionRow>, FunnelError>;
}

/// In-process store, mainly for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<SessionRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionTableStore for MemoryStore {
    fn save(&mut self, table: &str, rows: &[SessionRow]) -> Result<(), FunnelError> {
        self.tables.insert(table.to_string(), rows.to_vec());
        Ok(())
    }

    fn load(&self, table: &str) -> Result<Vec<SessionRow>, FunnelError> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| FunnelError::StorageError(format!("Table not found: {}", table)))
    }
}

/// Store that keeps each table as `<root>/<table>.csv`
#[derive(Debug, Clone)]
pub struct CsvDirStore {
    root: PathBuf,
}

impl CsvDirStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, FunnelError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            FunnelError::StorageError(format!("Cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the CSV file backing `table`
    pub fn table_path(&self, table: &str) -> Result<PathBuf, FunnelError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(FunnelError::StorageError(format!(
                "Invalid table name: {:?}",
                table
            )));
        }
        Ok(self.root.join(format!("{}.csv", table)))
    }
}

impl SessionTableStore for CsvDirStore {
    fn save(&mut self, table: &str, rows: &[SessionRow]) -> Result<(), FunnelError> {
        let path = self.table_path(table)?;
        write_csv(&path, rows)?;
        info!(table, path = %path.display(), rows = rows.len(), "saved session table");
        Ok(())
    }

    fn load(&self, table: &str) -> Result<Vec<SessionRow>, FunnelError> {
        let path = self.table_path(table)?;
        if !path.exists() {
            return Err(FunnelError::StorageError(format!(
                "Table not found: {}",
                path.display()
            )));
        }
        let rows = read_csv(&path)?;
        debug!(table, rows = rows.len(), "loaded session table");
        Ok(rows)
    }
}

/// Write session rows as CSV with the contract header
pub fn write_csv(path: &Path, rows: &[SessionRow]) -> Result<(), FunnelError> {
    let file = fs::File::create(path).map_err(|e| {
        FunnelError::StorageError(format!("Cannot create {}: {}", path.display(), e))
    })?;
    write_csv_to(file, rows)
}

/// Write session rows as CSV to any writer
pub fn write_csv_to<W: io::Write>(out: W, rows: &[SessionRow]) -> Result<(), FunnelError> {
    let mut writer = csv::Writer::from_writer(out);
    if rows.is_empty() {
        writer.write_record(["id", "type", "customer-id", "timestamp", "time_diff", "session"])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .flush()
        .map_err(|e| FunnelError::StorageError(format!("Cannot write CSV: {}", e)))?;
    Ok(())
}

/// Read session rows from a CSV file
pub fn read_csv(path: &Path) -> Result<Vec<SessionRow>, FunnelError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: SessionRow = result?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn sample_rows() -> Vec<SessionRow> {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        vec![
            SessionRow {
                id: "1".to_string(),
                event_type: "view".to_string(),
                customer_id: "A".to_string(),
                timestamp: base,
                time_diff: 0.0,
                session: 1,
            },
            SessionRow {
                id: "2".to_string(),
                event_type: "placed_order".to_string(),
                customer_id: "A".to_string(),
                timestamp: base + chrono::Duration::milliseconds(1500),
                time_diff: 1.5,
                session: 1,
            },
        ]
    }

    #[test]
    fn test_memory_store_round_trip_and_replace() {
        let mut store = MemoryStore::new();
        store.save(SESSION_TABLE, &sample_rows()).unwrap();
        assert_eq!(store.load(SESSION_TABLE).unwrap(), sample_rows());

        store.save(SESSION_TABLE, &sample_rows()[..1]).unwrap();
        assert_eq!(store.load(SESSION_TABLE).unwrap().len(), 1);

        assert!(matches!(
            store.load("missing"),
            Err(FunnelError::StorageError(_))
        ));
    }

    #[test]
    fn test_csv_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CsvDirStore::open(dir.path()).unwrap();

        store.save(SESSION_TABLE, &sample_rows()).unwrap();
        let loaded = store.load(SESSION_TABLE).unwrap();

        assert_eq!(loaded, sample_rows());
    }

    #[test]
    fn test_csv_header_matches_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CsvDirStore::open(dir.path()).unwrap();
        store.save("step_1", &sample_rows()).unwrap();

        let contents = fs::read_to_string(store.table_path("step_1").unwrap()).unwrap();
        let header = contents.lines().next().unwrap();

        assert_eq!(header, "id,type,customer-id,timestamp,time_diff,session");
    }

    #[test]
    fn test_csv_store_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CsvDirStore::open(dir.path()).unwrap();

        store.save("empty", &[]).unwrap();
        assert!(store.load("empty").unwrap().is_empty());
    }

    #[test]
    fn test_csv_store_rejects_bad_table_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CsvDirStore::open(dir.path()).unwrap();

        assert!(store.save("../escape", &sample_rows()).is_err());
        assert!(store.load("").is_err());
    }

    #[test]
    fn test_row_rebuilds_purchase_flag() {
        let rows = sample_rows();
        let flags: Vec<bool> = rows
            .into_iter()
            .map(|r| r.into_sessioned("placed_order").there_is_buy)
            .collect();

        assert_eq!(flags, vec![false, true]);
    }
}
