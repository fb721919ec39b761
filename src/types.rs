//! Core data types for Funnel Flux
//!
//! These types represent the data flowing through the funnel pipeline:
//! Event → TimedEvent → SessionedEvent → PurchaseCycle → CustomerFunnelSummary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type that marks a purchase
pub const PURCHASE_EVENT_TYPE: &str = "placed_order";

/// A normalized event with a known customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque event identifier
    pub id: String,
    /// Categorical event type (e.g. "view", "placed_order")
    #[serde(rename = "type")]
    pub event_type: String,
    /// External customer key
    pub customer_id: String,
    /// Event instant (UTC)
    pub timestamp: DateTime<Utc>,
}

/// Event annotated with the elapsed time since the customer's previous event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    #[serde(flatten)]
    pub event: Event,
    /// Seconds since the previous event of the same customer (0 for the first)
    pub time_diff: f64,
}

/// Timed event with its assigned session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionedEvent {
    #[serde(flatten)]
    pub timed: TimedEvent,
    /// Session identifier, non-decreasing within a customer
    pub session_id: u64,
    /// Whether this event is a purchase
    pub there_is_buy: bool,
}

impl SessionedEvent {
    pub fn time_diff(&self) -> f64 {
        self.timed.time_diff
    }
}

/// A run of consecutive sessions ending at a purchase, or the trailing
/// purchase-less run after a customer's last purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseCycle {
    pub customer_id: String,
    /// 1-based cycle index within the customer
    pub cycle: u64,
    /// Number of distinct sessions in the cycle
    pub sessions_until_buy: u64,
    /// Sum of time_diff over all events in the cycle
    pub elapsed_seconds: f64,
    /// Whether the cycle ends in a purchase session
    pub has_purchase: bool,
}

/// Per-customer funnel averages across purchase cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFunnelSummary {
    pub customer_id: String,
    pub average_sessions_until_buy: f64,
    pub average_elapsed_seconds: f64,
    /// Number of cycles the averages were taken over
    pub cycle_count: usize,
}

/// Averages of the per-customer summaries across all eligible customers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalFunnelMetric {
    pub average_sessions_until_buy: f64,
    pub average_elapsed_seconds: f64,
    pub customer_count: usize,
}

/// Policy for purchase-less cycles after a customer's last purchase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingCyclePolicy {
    /// Keep trailing cycles in the per-customer average
    #[default]
    Include,
    /// Drop cycles without a purchase before averaging
    Exclude,
}

impl TrailingCyclePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrailingCyclePolicy::Include => "include",
            TrailingCyclePolicy::Exclude => "exclude",
        }
    }
}

// ============================================================================
// Report types (external JSON contract)
// ============================================================================

/// Producer metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Per-customer funnel values keyed by customer id.
///
/// Field names are the legacy external API names; both maps hold means, and
/// the duration map holds seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelReport {
    pub producer: ReportProducer,
    pub computed_at_utc: String,
    pub trailing_cycles: TrailingCyclePolicy,
    pub median_visits_before_order: std::collections::BTreeMap<String, f64>,
    pub median_session_duration_minutes_before_order: std::collections::BTreeMap<String, f64>,
    pub customers: Vec<CustomerFunnelSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalFunnelMetric>,
}
