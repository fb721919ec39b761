//! Event normalization
//!
//! Flattens raw nested records into [`Event`]s.
//! - A record missing a required field aborts the whole batch
//! - Records from anonymous visitors (null customer) are dropped

use crate::error::FunnelError;
use crate::schema::RawEventRecord;
use crate::types::Event;
use tracing::{debug, warn};

/// Normalizer for converting raw records into events
pub struct EventNormalizer;

impl EventNormalizer {
    /// Normalize a batch of raw records.
    ///
    /// Fails on the first malformed record with its index and id; no partial
    /// output is returned.
    pub fn normalize(records: &[RawEventRecord]) -> Result<Vec<Event>, FunnelError> {
        let mut events = Vec::with_capacity(records.len());
        let mut anonymous = 0usize;

        for (index, record) in records.iter().enumerate() {
            let flat = record.flatten().map_err(|e| {
                warn!(index, field = e.field(), "malformed event record");
                FunnelError::MalformedEvent {
                    index,
                    id: record.display_id(),
                    field: e.to_string(),
                }
            })?;

            match flat.customer_id {
                Some(customer_id) => events.push(Event {
                    id: flat.id,
                    event_type: flat.event_type,
                    customer_id,
                    timestamp: flat.timestamp,
                }),
                None => anonymous += 1,
            }
        }

        debug!(
            records = records.len(),
            events = events.len(),
            anonymous,
            "normalized event records"
        );

        Ok(events)
    }
}
