//! Funnel Flux - Batch compute engine for purchase-funnel metrics
//!
//! Funnel Flux turns a per-customer event log into funnel metrics through a
//! deterministic pipeline: normalization → time deltas → session
//! segmentation → purchase-cycle aggregation → report encoding.
//!
//! The headline metric is how many browsing sessions, and how many elapsed
//! seconds of browsing, typically precede a purchase, averaged per customer
//! and then across customers.

pub mod config;
pub mod encoder;
pub mod error;
pub mod funnel;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod sessionizer;
pub mod store;
pub mod timing;
pub mod types;

pub use config::FunnelConfig;
pub use error::FunnelError;
pub use funnel::PurchaseFunnelAggregator;
pub use normalizer::EventNormalizer;
pub use pipeline::{events_to_funnel_report, FunnelProcessor};
pub use sessionizer::{SessionAutomaton, SessionSegmenter, SESSION_TIMEOUT_SEC};
pub use timing::{CustomerOrdered, TimeDeltaComputer};

// Schema exports
pub use schema::{RawEventReader, RawEventRecord, SCHEMA_VERSION};

/// Crate version embedded in every report
pub const FUNNEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "funnel-flux";
