//! Run statistics and the once-only hand-off to a statistics sink.

use crate::config::VenueConfig;
use crate::error::VenueError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;
use tokio::sync::oneshot;

/// Counters the broker keeps for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueStats {
    /// Sum of every seated group's bill
    pub total_profit: u64,

    /// Seated groups, by group size
    pub accepted: BTreeMap<u32, u64>,

    /// Groups turned away for lack of room, by group size
    pub rejected: BTreeMap<u32, u64>,

    /// Seatings, by table capacity
    pub table_usage: BTreeMap<u32, u64>,

    /// `REQUEST_SEAT` records processed while the venue was open
    pub requests_while_open: u64,

    /// Requests answered with `LEAVE` (evacuation)
    pub deflected: u64,

    /// Requests answered with `REJECTED` because the venue was closing
    pub refused_closed: u64,

    /// Evacuations started
    pub evacuations: u64,

    /// Venue reopenings after an evacuation
    pub reopenings: u64,

    /// `CUSTOMER_DONE` records applied
    pub departures: u64,

    /// Records discarded as malformed or unexpected
    pub malformed: u64,

    /// Replies abandoned after retry exhaustion or cancellation
    pub dropped_replies: u64,
}

impl VenueStats {
    /// Creates zeroed counters with a bucket for every configured group size
    /// and table capacity.
    pub fn for_config(config: &VenueConfig) -> Self {
        let sizes = config.min_group_size..=config.max_group_size;
        Self {
            accepted: sizes.clone().map(|s| (s, 0)).collect(),
            rejected: sizes.map(|s| (s, 0)).collect(),
            table_usage: config.table_counts.keys().map(|&c| (c, 0)).collect(),
            ..Default::default()
        }
    }

    pub fn record_accept(&mut self, group_size: u32, capacity: u32, bill: u64) {
        self.requests_while_open += 1;
        *self.accepted.entry(group_size).or_default() += 1;
        *self.table_usage.entry(capacity).or_default() += 1;
        self.total_profit += bill;
    }

    pub fn record_reject(&mut self, group_size: u32) {
        self.requests_while_open += 1;
        *self.rejected.entry(group_size).or_default() += 1;
    }

    pub fn accepted_total(&self) -> u64 {
        self.accepted.values().sum()
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }
}

/// Everything handed to the statistics sink at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub stats: VenueStats,
    /// True if the broker loop ended with an error or a panic
    pub aborted: bool,
}

impl StatsSummary {
    /// Seconds between start and finish (0 if the clock went backwards).
    pub fn duration_secs(&self) -> f64 {
        self.finished_at
            .duration_since(self.started_at)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Receiver of the end-of-run summary.
///
/// `publish` consumes the sink, so a summary can be handed off at most once.
pub trait StatsSink: Send {
    fn publish(self: Box<Self>, summary: StatsSummary) -> Result<(), VenueError>;
}

/// Sends the summary over a oneshot channel.
pub struct OneshotStatsSink {
    tx: oneshot::Sender<StatsSummary>,
}

impl OneshotStatsSink {
    pub fn new() -> (Self, oneshot::Receiver<StatsSummary>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }
}

impl StatsSink for OneshotStatsSink {
    fn publish(self: Box<Self>, summary: StatsSummary) -> Result<(), VenueError> {
        self.tx
            .send(summary)
            .map_err(|_| VenueError::StatsSink("summary receiver dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_follow_config() {
        let stats = VenueStats::for_config(&VenueConfig::default());
        assert_eq!(stats.accepted.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(stats.table_usage.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_counters_balance() {
        let mut stats = VenueStats::for_config(&VenueConfig::default());
        stats.record_accept(2, 2, 30);
        stats.record_accept(1, 1, 12);
        stats.record_reject(3);

        assert_eq!(stats.accepted_total(), 2);
        assert_eq!(stats.rejected_total(), 1);
        assert_eq!(stats.requests_while_open, 3);
        assert_eq!(stats.total_profit, 42);
        assert_eq!(stats.table_usage[&2], 1);
    }

    #[test]
    fn test_oneshot_sink_delivers() {
        let (sink, mut rx) = OneshotStatsSink::new();
        let now = SystemTime::now();
        let summary = StatsSummary {
            started_at: now,
            finished_at: now,
            stats: VenueStats::default(),
            aborted: false,
        };

        Box::new(sink).publish(summary.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), summary);
    }

    #[test]
    fn test_oneshot_sink_reports_dropped_receiver() {
        let (sink, rx) = OneshotStatsSink::new();
        drop(rx);
        let now = SystemTime::now();
        let result = Box::new(sink).publish(StatsSummary {
            started_at: now,
            finished_at: now,
            stats: VenueStats::default(),
            aborted: false,
        });
        assert!(matches!(result, Err(VenueError::StatsSink(_))));
    }
}
