//! Event log reader
//!
//! Decodes the raw event log (JSON array or NDJSON) into [`RawEventRecord`]s.

use crate::error::FunnelError;
use crate::schema::raw_event::{RawEventRecord, ValidationError};
use std::fs;
use std::io::{self, Read};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Reader for raw event logs
pub struct RawEventReader;

impl RawEventReader {
    /// Parse a JSON string containing an array of records.
    ///
    /// Only the outer array must decode; elements of the wrong shape are
    /// kept and rejected later against their own index.
    pub fn parse_array(json: &str) -> Result<Vec<RawEventRecord>, FunnelError> {
        let values: Vec<Value> = serde_json::from_str(json)
            .map_err(|e| FunnelError::InputRead(format!("Failed to decode event array: {}", e)))?;
        Ok(values.into_iter().map(RawEventRecord::from).collect())
    }

    /// Parse NDJSON (one record per line)
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawEventRecord>, FunnelError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value = serde_json::from_str::<Value>(trimmed).map_err(|e| {
                FunnelError::InputRead(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            records.push(RawEventRecord::from(value));
        }
        Ok(records)
    }

    /// Parse either format, picking by the first non-whitespace character
    pub fn parse_auto(data: &str) -> Result<Vec<RawEventRecord>, FunnelError> {
        if data.trim_start().starts_with('[') {
            Self::parse_array(data)
        } else {
            Self::parse_ndjson(data)
        }
    }

    /// Read a file (or stdin when the path is `-`) into a string
    pub fn read_source(path: &Path) -> Result<String, FunnelError> {
        if path.to_string_lossy() == "-" {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer).map_err(|e| {
                FunnelError::InputRead(format!("Failed to read stdin: {}", e))
            })?;
            Ok(buffer)
        } else {
            fs::read_to_string(path).map_err(|e| {
                FunnelError::InputRead(format!("Failed to read {}: {}", path.display(), e))
            })
        }
    }

    /// Read and decode an event log from disk
    pub fn read_path(path: &Path) -> Result<Vec<RawEventRecord>, FunnelError> {
        let data = Self::read_source(path)?;
        let records = Self::parse_auto(&data)?;
        debug!(path = %path.display(), records = records.len(), "read event log");
        Ok(records)
    }

    /// Validate a batch of records, returning only the failures
    pub fn validate_records(records: &[RawEventRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.validate().err().map(|error| ValidationResult {
                    index,
                    event_id: record.display_id(),
                    error,
                })
            })
            .collect()
    }
}

/// A record that failed validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub event_id: Option<String>,
    pub error: ValidationError,
}
