//! Purchase funnel aggregation
//!
//! Groups each purchasing customer's sessions into purchase cycles and
//! averages how many sessions, and how many elapsed seconds, each cycle took.
//!
//! Cycle assignment over a customer's sessions in id order:
//! `cycle = 1 + cum_buy_inclusive - session_has_buy`, so every session up to
//! and including a purchase session shares that purchase's cycle, and the
//! session after a purchase opens the next one.

use crate::types::{
    CustomerFunnelSummary, GlobalFunnelMetric, PurchaseCycle, SessionedEvent, TrailingCyclePolicy,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Per-session rollup
#[derive(Debug, Default, Clone, Copy)]
struct SessionStats {
    has_buy: bool,
    elapsed_seconds: f64,
}

/// Aggregator for purchase-funnel statistics
#[derive(Debug, Clone, Default)]
pub struct PurchaseFunnelAggregator {
    policy: TrailingCyclePolicy,
}

impl PurchaseFunnelAggregator {
    /// Aggregator that keeps trailing purchase-less cycles
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: TrailingCyclePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> TrailingCyclePolicy {
        self.policy
    }

    /// Purchase cycles of every eligible customer, ordered by customer then cycle.
    ///
    /// Customers who never purchased contribute nothing. Trailing cycles are
    /// always returned here; the policy only applies when summarizing.
    pub fn cycles(&self, events: &[SessionedEvent]) -> Vec<PurchaseCycle> {
        let mut sessions: BTreeMap<&str, BTreeMap<u64, SessionStats>> = BTreeMap::new();
        for event in events {
            let stats = sessions
                .entry(event.timed.event.customer_id.as_str())
                .or_default()
                .entry(event.session_id)
                .or_default();
            stats.has_buy |= event.there_is_buy;
            stats.elapsed_seconds += event.time_diff();
        }

        let total_customers = sessions.len();
        let mut cycles = Vec::new();

        for (customer_id, customer_sessions) in sessions {
            if !customer_sessions.values().any(|s| s.has_buy) {
                continue;
            }

            let mut cum_buy = 0u64;
            let mut current: Option<PurchaseCycle> = None;

            for stats in customer_sessions.values() {
                let has_buy = u64::from(stats.has_buy);
                cum_buy += has_buy;
                let cycle = 1 + cum_buy - has_buy;

                match current.as_mut() {
                    Some(open) if open.cycle == cycle => {
                        open.sessions_until_buy += 1;
                        open.elapsed_seconds += stats.elapsed_seconds;
                        open.has_purchase |= stats.has_buy;
                    }
                    _ => {
                        cycles.extend(current.take());
                        current = Some(PurchaseCycle {
                            customer_id: customer_id.to_string(),
                            cycle,
                            sessions_until_buy: 1,
                            elapsed_seconds: stats.elapsed_seconds,
                            has_purchase: stats.has_buy,
                        });
                    }
                }
            }
            cycles.extend(current);
        }

        debug!(
            customers = total_customers,
            cycles = cycles.len(),
            "assigned purchase cycles"
        );

        cycles
    }

    /// Per-customer averages across purchase cycles, ordered by customer id.
    ///
    /// Returns an empty vector when nobody purchased.
    pub fn summarize(&self, events: &[SessionedEvent]) -> Vec<CustomerFunnelSummary> {
        let cycles = self.cycles(events);
        let summaries = self.summarize_cycles(&cycles);

        debug!(
            eligible_customers = summaries.len(),
            policy = self.policy.as_str(),
            "summarized purchase funnel"
        );

        summaries
    }

    /// Average already-computed cycles per customer
    pub fn summarize_cycles(&self, cycles: &[PurchaseCycle]) -> Vec<CustomerFunnelSummary> {
        let mut by_customer: BTreeMap<&str, Vec<&PurchaseCycle>> = BTreeMap::new();
        for cycle in cycles {
            if self.policy == TrailingCyclePolicy::Exclude && !cycle.has_purchase {
                continue;
            }
            by_customer
                .entry(cycle.customer_id.as_str())
                .or_default()
                .push(cycle);
        }

        by_customer
            .into_iter()
            .map(|(customer_id, cycles)| {
                let count = cycles.len() as f64;
                let sessions: f64 = cycles.iter().map(|c| c.sessions_until_buy as f64).sum();
                let elapsed: f64 = cycles.iter().map(|c| c.elapsed_seconds).sum();
                CustomerFunnelSummary {
                    customer_id: customer_id.to_string(),
                    average_sessions_until_buy: sessions / count,
                    average_elapsed_seconds: elapsed / count,
                    cycle_count: cycles.len(),
                }
            })
            .collect()
    }

    /// Average the per-customer summaries; `None` when there are none
    pub fn global_metric(summaries: &[CustomerFunnelSummary]) -> Option<GlobalFunnelMetric> {
        if summaries.is_empty() {
            return None;
        }
        let n = summaries.len() as f64;
        Some(GlobalFunnelMetric {
            average_sessions_until_buy: summaries
                .iter()
                .map(|s| s.average_sessions_until_buy)
                .sum::<f64>()
                / n,
            average_elapsed_seconds: summaries
                .iter()
                .map(|s| s.average_elapsed_seconds)
                .sum::<f64>()
                / n,
            customer_count: summaries.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, TimedEvent};
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn sessioned(
        customer: &str,
        session_id: u64,
        time_diff: f64,
        event_type: &str,
    ) -> SessionedEvent {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        SessionedEvent {
            timed: TimedEvent {
                event: Event {
                    id: format!("{customer}-{session_id}-{time_diff}"),
                    event_type: event_type.to_string(),
                    customer_id: customer.to_string(),
                    timestamp: base + Duration::seconds(time_diff as i64),
                },
                time_diff,
            },
            session_id,
            there_is_buy: event_type == "placed_order",
        }
    }

    /// Customer A from the reference scenario, already segmented
    fn customer_a() -> Vec<SessionedEvent> {
        vec![
            sessioned("A", 1, 0.0, "view"),
            sessioned("A", 1, 1800.0, "view"),
            sessioned("A", 2, 3200.0, "view"),
            sessioned("A", 2, 100.0, "placed_order"),
            sessioned("A", 3, 4900.0, "view"),
        ]
    }

    #[test]
    fn test_reference_cycles() {
        let cycles = PurchaseFunnelAggregator::new().cycles(&customer_a());

        assert_eq!(
            cycles,
            vec![
                PurchaseCycle {
                    customer_id: "A".to_string(),
                    cycle: 1,
                    sessions_until_buy: 2,
                    elapsed_seconds: 5100.0,
                    has_purchase: true,
                },
                PurchaseCycle {
                    customer_id: "A".to_string(),
                    cycle: 2,
                    sessions_until_buy: 1,
                    elapsed_seconds: 4900.0,
                    has_purchase: false,
                },
            ]
        );
    }

    #[test]
    fn test_reference_summary_includes_trailing_cycle() {
        let summaries = PurchaseFunnelAggregator::new().summarize(&customer_a());

        assert_eq!(
            summaries,
            vec![CustomerFunnelSummary {
                customer_id: "A".to_string(),
                average_sessions_until_buy: 1.5,
                average_elapsed_seconds: 5000.0,
                cycle_count: 2,
            }]
        );
    }

    #[test]
    fn test_exclude_policy_drops_trailing_cycle() {
        let summaries = PurchaseFunnelAggregator::with_policy(TrailingCyclePolicy::Exclude)
            .summarize(&customer_a());

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].average_sessions_until_buy, 2.0);
        assert_eq!(summaries[0].average_elapsed_seconds, 5100.0);
        assert_eq!(summaries[0].cycle_count, 1);
    }

    #[test]
    fn test_non_purchasers_are_absent() {
        let mut events = customer_a();
        events.push(sessioned("Z", 10, 0.0, "view"));
        events.push(sessioned("Z", 11, 4000.0, "view"));

        let summaries = PurchaseFunnelAggregator::new().summarize(&events);
        let customers: Vec<&str> = summaries.iter().map(|s| s.customer_id.as_str()).collect();

        assert_eq!(customers, vec!["A"]);
    }

    #[test]
    fn test_no_eligible_customers_is_empty() {
        let events = vec![sessioned("Z", 1, 0.0, "view")];
        let aggregator = PurchaseFunnelAggregator::new();

        assert!(aggregator.summarize(&events).is_empty());
        assert!(aggregator.summarize(&[]).is_empty());
    }

    #[test]
    fn test_consecutive_purchase_sessions_form_own_cycles() {
        let events = vec![
            sessioned("B", 4, 0.0, "placed_order"),
            sessioned("B", 5, 4000.0, "placed_order"),
            sessioned("B", 6, 5000.0, "view"),
            sessioned("B", 7, 6000.0, "view"),
            sessioned("B", 7, 60.0, "placed_order"),
        ];

        let cycles = PurchaseFunnelAggregator::new().cycles(&events);
        let shape: Vec<(u64, u64, f64, bool)> = cycles
            .iter()
            .map(|c| (c.cycle, c.sessions_until_buy, c.elapsed_seconds, c.has_purchase))
            .collect();

        assert_eq!(
            shape,
            vec![
                (1, 1, 0.0, true),
                (2, 1, 4000.0, true),
                (3, 2, 11060.0, true),
            ]
        );
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut events = customer_a();
        events.reverse();

        let summaries = PurchaseFunnelAggregator::new().summarize(&events);
        assert_eq!(summaries[0].average_sessions_until_buy, 1.5);
        assert_eq!(summaries[0].average_elapsed_seconds, 5000.0);
    }

    #[test]
    fn test_global_metric() {
        let summaries = vec![
            CustomerFunnelSummary {
                customer_id: "A".to_string(),
                average_sessions_until_buy: 1.5,
                average_elapsed_seconds: 5000.0,
                cycle_count: 2,
            },
            CustomerFunnelSummary {
                customer_id: "B".to_string(),
                average_sessions_until_buy: 2.5,
                average_elapsed_seconds: 1000.0,
                cycle_count: 1,
            },
        ];

        let global = PurchaseFunnelAggregator::global_metric(&summaries).unwrap();
        assert_eq!(global.average_sessions_until_buy, 2.0);
        assert_eq!(global.average_elapsed_seconds, 3000.0);
        assert_eq!(global.customer_count, 2);

        assert!(PurchaseFunnelAggregator::global_metric(&[]).is_none());
    }
}
