//! Session segmentation
//!
//! Assigns a session id to every event using a cumulative-inactivity rule.
//! The rule is a left-to-right automaton over each customer's canonical
//! event order:
//!
//! 1. A new customer always opens a new session.
//! 2. For the same customer, a gap below the timeout is added to the
//!    cumulative gap; once the cumulative gap exceeds the timeout the event
//!    opens a new session and the cumulative gap restarts at zero (the excess
//!    is discarded). A gap at or above the timeout opens a new session
//!    directly.
//!
//! Session ids come from one running counter across customers. Because the
//! automaton resets on every customer change, customers can also be
//! segmented independently and renumbered with a prefix sum.

use crate::error::FunnelError;
use crate::timing::{CustomerKeyed, CustomerOrdered};
use crate::types::{SessionedEvent, TimedEvent, PURCHASE_EVENT_TYPE};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::debug;

/// Inactivity threshold in seconds
pub const SESSION_TIMEOUT_SEC: f64 = 3600.0;

/// Scan state of the segmentation rule
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionAutomaton {
    current_session: u64,
    cumulative_gap: f64,
    previous_customer: Option<String>,
}

impl SessionAutomaton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event and return the session it belongs to
    pub fn step(&mut self, customer_id: &str, time_diff: f64) -> u64 {
        if self.previous_customer.as_deref() != Some(customer_id) {
            self.open_session();
            self.previous_customer = Some(customer_id.to_string());
        } else if time_diff < SESSION_TIMEOUT_SEC {
            self.cumulative_gap += time_diff;
            if self.cumulative_gap > SESSION_TIMEOUT_SEC {
                self.open_session();
            }
        } else {
            self.open_session();
        }

        self.current_session
    }

    pub fn current_session(&self) -> u64 {
        self.current_session
    }

    pub fn cumulative_gap(&self) -> f64 {
        self.cumulative_gap
    }

    fn open_session(&mut self) {
        self.current_session += 1;
        self.cumulative_gap = 0.0;
    }
}

/// Segments timed events into sessions
#[derive(Debug, Clone)]
pub struct SessionSegmenter {
    purchase_event_type: String,
}

impl Default for SessionSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSegmenter {
    pub fn new() -> Self {
        Self::with_purchase_type(PURCHASE_EVENT_TYPE)
    }

    /// Use a different event type as the purchase marker
    pub fn with_purchase_type(purchase_event_type: impl Into<String>) -> Self {
        Self {
            purchase_event_type: purchase_event_type.into(),
        }
    }

    /// Sequential single pass over all customers
    pub fn segment(&self, events: CustomerOrdered<TimedEvent>) -> CustomerOrdered<SessionedEvent> {
        let mut automaton = SessionAutomaton::new();
        let sessioned: Vec<SessionedEvent> = events
            .into_inner()
            .into_iter()
            .map(|timed| {
                let session_id = automaton.step(&timed.event.customer_id, timed.time_diff);
                self.attach(timed, session_id)
            })
            .collect();

        debug!(
            events = sessioned.len(),
            sessions = automaton.current_session(),
            "segmented sessions"
        );

        CustomerOrdered::from_sorted(sessioned)
    }

    /// Segment customers independently on a pool of `workers` threads.
    ///
    /// Local session counts are combined with an exclusive prefix sum in
    /// canonical customer order, so the ids match [`SessionSegmenter::segment`]
    /// exactly.
    pub fn segment_parallel(
        &self,
        events: CustomerOrdered<TimedEvent>,
        workers: usize,
    ) -> Result<CustomerOrdered<SessionedEvent>, FunnelError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()?;

        let local_ids: Vec<Vec<u64>> = {
            let runs = events.customer_runs();
            pool.install(|| runs.par_iter().map(|run| local_sessions(run)).collect())
        };

        let mut sessioned = Vec::with_capacity(events.len());
        let mut offset = 0u64;
        let mut timed_events = events.into_inner().into_iter();
        for ids in &local_ids {
            for local in ids {
                if let Some(timed) = timed_events.next() {
                    sessioned.push(self.attach(timed, offset + local));
                }
            }
            offset += ids.last().copied().unwrap_or(0);
        }

        debug!(
            events = sessioned.len(),
            customers = local_ids.len(),
            sessions = offset,
            workers,
            "segmented sessions in parallel"
        );

        Ok(CustomerOrdered::from_sorted(sessioned))
    }

    fn attach(&self, timed: TimedEvent, session_id: u64) -> SessionedEvent {
        let there_is_buy = timed.event.event_type == self.purchase_event_type;
        SessionedEvent {
            timed,
            session_id,
            there_is_buy,
        }
    }
}

/// Session ids of a single customer's run, starting at 1
fn local_sessions(run: &[TimedEvent]) -> Vec<u64> {
    let mut automaton = SessionAutomaton::new();
    run.iter()
        .map(|timed| automaton.step(timed.customer_id(), timed.time_diff))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::TimeDeltaComputer;
    use crate::types::Event;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn event(id: &str, customer: &str, event_type: &str, offset_sec: i64) -> Event {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        Event {
            id: id.to_string(),
            event_type: event_type.to_string(),
            customer_id: customer.to_string(),
            timestamp: base + Duration::seconds(offset_sec),
        }
    }

    fn customer_a() -> Vec<Event> {
        vec![
            event("1", "A", "view", 0),
            event("2", "A", "view", 1800),
            event("3", "A", "view", 5000),
            event("4", "A", "placed_order", 5100),
            event("5", "A", "view", 10000),
        ]
    }

    fn mixed_customers() -> Vec<Event> {
        let mut events = customer_a();
        events.extend(vec![
            event("b1", "B", "view", 100),
            event("b2", "B", "view", 1300),
            event("b3", "B", "placed_order", 2500),
            event("b4", "B", "view", 3700),
            event("c1", "C", "view", 0),
            event("c2", "C", "view", 7200),
            event("c3", "C", "view", 7300),
        ]);
        events
    }

    fn session_ids(events: &CustomerOrdered<SessionedEvent>) -> Vec<u64> {
        events.iter().map(|e| e.session_id).collect()
    }

    #[test]
    fn test_reference_scenario() {
        let timed = TimeDeltaComputer::compute(customer_a());
        let sessioned = SessionSegmenter::new().segment(timed);

        assert_eq!(session_ids(&sessioned), vec![1, 1, 2, 2, 3]);
        let buys: Vec<bool> = sessioned.iter().map(|e| e.there_is_buy).collect();
        assert_eq!(buys, vec![false, false, false, true, false]);
    }

    #[test]
    fn test_exact_timeout_stays_in_session() {
        let events = vec![
            event("1", "A", "view", 0),
            event("2", "A", "view", 1800),
            event("3", "A", "view", 3600),
        ];
        let sessioned = SessionSegmenter::new().segment(TimeDeltaComputer::compute(events));

        assert_eq!(session_ids(&sessioned), vec![1, 1, 1]);
    }

    #[test]
    fn test_single_gap_at_timeout_opens_session() {
        let events = vec![event("1", "A", "view", 0), event("2", "A", "view", 3600)];
        let sessioned = SessionSegmenter::new().segment(TimeDeltaComputer::compute(events));

        assert_eq!(session_ids(&sessioned), vec![1, 2]);
    }

    #[test]
    fn test_excess_gap_is_not_carried_forward() {
        // 3000 + 1000 rolls over at the third event; the next 3300 starts from zero
        let events = vec![
            event("1", "A", "view", 0),
            event("2", "A", "view", 3000),
            event("3", "A", "view", 4000),
            event("4", "A", "view", 7300),
        ];
        let sessioned = SessionSegmenter::new().segment(TimeDeltaComputer::compute(events));

        assert_eq!(session_ids(&sessioned), vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_new_customer_opens_session() {
        let sessioned =
            SessionSegmenter::new().segment(TimeDeltaComputer::compute(mixed_customers()));

        // A: 1,1,2,2,3  B: gaps 1200,1200,1200 -> cumulative 3600 stays  C: 7200 gap then 100
        assert_eq!(
            session_ids(&sessioned),
            vec![1, 1, 2, 2, 3, 4, 4, 4, 4, 5, 6, 6]
        );
    }

    #[test]
    fn test_session_ids_non_decreasing_with_unit_steps() {
        let sessioned =
            SessionSegmenter::new().segment(TimeDeltaComputer::compute(mixed_customers()));

        for pair in sessioned.as_slice().windows(2) {
            let step = pair[1].session_id - pair[0].session_id;
            assert!(step <= 1, "session ids jumped by {step}");
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let segmenter = SessionSegmenter::new();
        let sequential = segmenter.segment(TimeDeltaComputer::compute(mixed_customers()));

        for workers in [0, 1, 2, 3, 8] {
            let parallel = segmenter
                .segment_parallel(TimeDeltaComputer::compute(mixed_customers()), workers)
                .unwrap();
            assert_eq!(parallel, sequential);
        }
    }

    #[test]
    fn test_parallel_empty_input() {
        let parallel = SessionSegmenter::new()
            .segment_parallel(TimeDeltaComputer::compute(Vec::new()), 4)
            .unwrap();
        assert!(parallel.is_empty());
    }

    #[test]
    fn test_custom_purchase_type() {
        let events = vec![event("1", "A", "checkout", 0), event("2", "A", "placed_order", 5)];
        let sessioned = SessionSegmenter::with_purchase_type("checkout")
            .segment(TimeDeltaComputer::compute(events));

        let buys: Vec<bool> = sessioned.iter().map(|e| e.there_is_buy).collect();
        assert_eq!(buys, vec![true, false]);
    }

    #[test]
    fn test_automaton_state() {
        let mut automaton = SessionAutomaton::new();
        assert_eq!(automaton.step("A", 0.0), 1);
        assert_eq!(automaton.step("A", 2000.0), 1);
        assert_eq!(automaton.cumulative_gap(), 2000.0);
        assert_eq!(automaton.step("A", 2000.0), 2);
        assert_eq!(automaton.cumulative_gap(), 0.0);
        assert_eq!(automaton.step("B", 0.0), 3);
        assert_eq!(automaton.current_session(), 3);
    }
}
