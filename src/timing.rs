//! Inter-event time deltas
//!
//! Orders events by customer then time, and annotates each event with the
//! seconds elapsed since that customer's previous event.

use crate::types::{Event, SessionedEvent, TimedEvent};
use std::cmp::Ordering;
use tracing::debug;

/// Anything that belongs to a single customer
pub trait CustomerKeyed {
    fn customer_id(&self) -> &str;
}

impl CustomerKeyed for Event {
    fn customer_id(&self) -> &str {
        &self.customer_id
    }
}

impl CustomerKeyed for TimedEvent {
    fn customer_id(&self) -> &str {
        &self.event.customer_id
    }
}

impl CustomerKeyed for SessionedEvent {
    fn customer_id(&self) -> &str {
        &self.timed.event.customer_id
    }
}

/// A sequence sorted by `(customer_id, timestamp, id)`.
///
/// Only the pipeline stages in this crate can build one, starting from
/// [`TimeDeltaComputer`], so holding a value of this type is proof that the
/// canonical order holds.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerOrdered<T> {
    items: Vec<T>,
}

impl<T> CustomerOrdered<T> {
    /// Wrap items already known to be in canonical order
    pub(crate) fn from_sorted(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T: CustomerKeyed> CustomerOrdered<T> {
    /// Contiguous per-customer runs, in canonical customer order
    pub fn customer_runs(&self) -> Vec<&[T]> {
        let mut runs = Vec::new();
        let mut start = 0;
        for i in 1..=self.items.len() {
            if i == self.items.len()
                || self.items[i].customer_id() != self.items[start].customer_id()
            {
                runs.push(&self.items[start..i]);
                start = i;
            }
        }
        runs
    }
}

/// Computes per-customer time deltas
pub struct TimeDeltaComputer;

impl TimeDeltaComputer {
    /// Sort events canonically and compute `time_diff` for each one
    pub fn compute(mut events: Vec<Event>) -> CustomerOrdered<TimedEvent> {
        events.sort_by(canonical_order);

        let mut timed: Vec<TimedEvent> = Vec::with_capacity(events.len());
        for event in events {
            let time_diff = match timed.last() {
                Some(prev) if prev.event.customer_id == event.customer_id => {
                    seconds_between(prev, &event)
                }
                _ => 0.0,
            };
            timed.push(TimedEvent { event, time_diff });
        }

        debug!(events = timed.len(), "computed time deltas");

        CustomerOrdered::from_sorted(timed)
    }
}

fn canonical_order(a: &Event, b: &Event) -> Ordering {
    a.customer_id
        .cmp(&b.customer_id)
        .then(a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

fn seconds_between(prev: &TimedEvent, next: &Event) -> f64 {
    (next.timestamp - prev.event.timestamp).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn event(id: &str, customer: &str, offset_sec: i64) -> Event {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        Event {
            id: id.to_string(),
            event_type: "view".to_string(),
            customer_id: customer.to_string(),
            timestamp: base + Duration::seconds(offset_sec),
        }
    }

    #[test]
    fn test_time_diff_per_customer() {
        let events = vec![
            event("5", "A", 10000),
            event("1", "A", 0),
            event("9", "B", 50),
            event("3", "A", 5000),
            event("2", "A", 1800),
            event("4", "A", 5100),
            event("8", "B", 20),
        ];

        let ordered = TimeDeltaComputer::compute(events);
        let diffs: Vec<(&str, f64)> = ordered
            .iter()
            .map(|t| (t.event.customer_id.as_str(), t.time_diff))
            .collect();

        assert_eq!(
            diffs,
            vec![
                ("A", 0.0),
                ("A", 1800.0),
                ("A", 3200.0),
                ("A", 100.0),
                ("A", 4900.0),
                ("B", 0.0),
                ("B", 30.0),
            ]
        );
    }

    #[test]
    fn test_id_breaks_timestamp_ties() {
        let events = vec![event("b", "A", 60), event("a", "A", 60), event("c", "A", 0)];

        let ordered = TimeDeltaComputer::compute(events);
        let ids: Vec<&str> = ordered.iter().map(|t| t.event.id.as_str()).collect();

        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(ordered.as_slice()[2].time_diff, 0.0);
    }

    #[test]
    fn test_sub_second_precision() {
        let mut second = event("2", "A", 0);
        second.timestamp += Duration::milliseconds(1500);
        let ordered = TimeDeltaComputer::compute(vec![event("1", "A", 0), second]);

        assert!((ordered.as_slice()[1].time_diff - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_customer_runs() {
        let events = vec![event("1", "A", 0), event("2", "B", 0), event("3", "A", 5)];
        let ordered = TimeDeltaComputer::compute(events);
        let runs = ordered.customer_runs();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].len(), 2);
        assert_eq!(runs[1][0].event.customer_id, "B");
    }

    #[test]
    fn test_empty_input() {
        let ordered = TimeDeltaComputer::compute(Vec::new());
        assert!(ordered.is_empty());
        assert!(ordered.customer_runs().is_empty());
    }
}
