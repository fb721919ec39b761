//! Funnel report encoding
//!
//! Encodes customer summaries into the JSON document served to metric
//! consumers. The two per-customer maps keep their legacy external names
//! (`median_visits_before_order`, `median_session_duration_minutes_before_order`)
//! but carry means, and the duration map is in seconds.

use crate::error::FunnelError;
use crate::funnel::PurchaseFunnelAggregator;
use crate::types::{CustomerFunnelSummary, FunnelReport, ReportProducer, TrailingCyclePolicy};
use crate::{FUNNEL_VERSION, PRODUCER_NAME};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Encoder producing [`FunnelReport`] payloads
pub struct FunnelReportEncoder {
    instance_id: String,
}

impl Default for FunnelReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FunnelReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Build the report for a set of customer summaries
    pub fn encode(
        &self,
        summaries: &[CustomerFunnelSummary],
        policy: TrailingCyclePolicy,
    ) -> FunnelReport {
        let mut visits = BTreeMap::new();
        let mut durations = BTreeMap::new();
        for summary in summaries {
            visits.insert(
                summary.customer_id.clone(),
                summary.average_sessions_until_buy,
            );
            durations.insert(summary.customer_id.clone(), summary.average_elapsed_seconds);
        }

        FunnelReport {
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: FUNNEL_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            trailing_cycles: policy,
            median_visits_before_order: visits,
            median_session_duration_minutes_before_order: durations,
            customers: summaries.to_vec(),
            global: PurchaseFunnelAggregator::global_metric(summaries),
        }
    }

    /// Encode to a pretty-printed JSON string
    pub fn encode_to_json(
        &self,
        summaries: &[CustomerFunnelSummary],
        policy: TrailingCyclePolicy,
    ) -> Result<String, FunnelError> {
        let report = self.encode(summaries, policy);
        serde_json::to_string_pretty(&report).map_err(FunnelError::JsonError)
    }
}
