//! Pipeline orchestration
//!
//! This module provides the public API for Funnel Flux.
//! It orchestrates the full pipeline from the raw event log to the funnel
//! report.

use crate::config::FunnelConfig;
use crate::encoder::FunnelReportEncoder;
use crate::error::FunnelError;
use crate::funnel::PurchaseFunnelAggregator;
use crate::normalizer::EventNormalizer;
use crate::schema::{RawEventReader, RawEventRecord};
use crate::sessionizer::SessionSegmenter;
use crate::store::{SessionRow, SessionTableStore, SESSION_TABLE};
use crate::timing::{CustomerOrdered, TimeDeltaComputer};
use crate::types::{CustomerFunnelSummary, FunnelReport, SessionedEvent};
use tracing::info;

/// Convert a raw event log (JSON array or NDJSON) to a funnel report JSON.
///
/// Uses the default configuration: sequential segmentation, trailing cycles
/// included.
///
/// # Example
/// ```ignore
/// let report_json = events_to_funnel_report(event_log_json)?;
/// ```
pub fn events_to_funnel_report(raw_json: String) -> Result<String, FunnelError> {
    let processor = FunnelProcessor::new();
    let report = processor.process(&raw_json)?;
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Configured processor for running the pipeline stages.
///
/// Pipeline stages:
/// 1. EventNormalizer - Flatten records, drop anonymous visitors
/// 2. TimeDeltaComputer - Canonical sort and per-customer time deltas
/// 3. SessionSegmenter - Session ids from the inactivity rule
/// 4. PurchaseFunnelAggregator - Purchase cycles and per-customer averages
/// 5. FunnelReportEncoder - Report payload
pub struct FunnelProcessor {
    config: FunnelConfig,
    segmenter: SessionSegmenter,
    aggregator: PurchaseFunnelAggregator,
    encoder: FunnelReportEncoder,
}

impl Default for FunnelProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FunnelProcessor {
    /// Create a new processor with default settings
    pub fn new() -> Self {
        Self::with_config(FunnelConfig::default())
    }

    /// Create a processor from a configuration
    pub fn with_config(config: FunnelConfig) -> Self {
        Self {
            segmenter: SessionSegmenter::with_purchase_type(config.purchase_event_type.clone()),
            aggregator: PurchaseFunnelAggregator::with_policy(config.trailing_cycles),
            encoder: FunnelReportEncoder::new(),
            config,
        }
    }

    pub fn config(&self) -> &FunnelConfig {
        &self.config
    }

    /// Run stages 1-3 over decoded records
    pub fn sessionize(
        &self,
        records: &[RawEventRecord],
    ) -> Result<CustomerOrdered<SessionedEvent>, FunnelError> {
        let events = EventNormalizer::normalize(records)?;
        let timed = TimeDeltaComputer::compute(events);

        let sessioned = if self.config.parallel {
            self.segmenter
                .segment_parallel(timed, self.config.effective_workers())?
        } else {
            self.segmenter.segment(timed)
        };

        info!(
            records = records.len(),
            events = sessioned.len(),
            parallel = self.config.parallel,
            "sessionized event log"
        );

        Ok(sessioned)
    }

    /// Decode a raw event log and run stages 1-3
    pub fn sessionize_json(
        &self,
        raw_json: &str,
    ) -> Result<CustomerOrdered<SessionedEvent>, FunnelError> {
        let records = RawEventReader::parse_auto(raw_json)?;
        self.sessionize(&records)
    }

    /// Write the session table to a store (replace semantics)
    pub fn persist(
        &self,
        store: &mut dyn SessionTableStore,
        table: &str,
        events: &CustomerOrdered<SessionedEvent>,
    ) -> Result<(), FunnelError> {
        let rows: Vec<SessionRow> = events.iter().map(SessionRow::from).collect();
        store.save(table, &rows)
    }

    /// Per-customer funnel summaries for sessioned events
    pub fn summarize(&self, events: &[SessionedEvent]) -> Vec<CustomerFunnelSummary> {
        let summaries = self.aggregator.summarize(events);
        info!(eligible_customers = summaries.len(), "aggregated purchase funnel");
        summaries
    }

    /// Load a session table from a store and aggregate it
    pub fn aggregate_from_store(
        &self,
        store: &dyn SessionTableStore,
        table: &str,
    ) -> Result<Vec<CustomerFunnelSummary>, FunnelError> {
        let events: Vec<SessionedEvent> = store
            .load(table)?
            .into_iter()
            .map(|row| row.into_sessioned(&self.config.purchase_event_type))
            .collect();
        Ok(self.summarize(&events))
    }

    /// Build the report for a set of summaries
    pub fn report(&self, summaries: &[CustomerFunnelSummary]) -> FunnelReport {
        self.encoder.encode(summaries, self.config.trailing_cycles)
    }

    /// Full in-memory run: raw event log to report
    pub fn process(&self, raw_json: &str) -> Result<FunnelReport, FunnelError> {
        let sessioned = self.sessionize_json(raw_json)?;
        let summaries = self.summarize(sessioned.as_slice());
        Ok(self.report(&summaries))
    }

    /// Full run that hands the session table through `store` between the
    /// segmentation and aggregation stages
    pub fn process_with_store(
        &self,
        raw_json: &str,
        store: &mut dyn SessionTableStore,
    ) -> Result<FunnelReport, FunnelError> {
        let sessioned = self.sessionize_json(raw_json)?;
        self.persist(store, SESSION_TABLE, &sessioned)?;
        let summaries = self.aggregate_from_store(store, SESSION_TABLE)?;
        Ok(self.report(&summaries))
    }
}
