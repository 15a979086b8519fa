//! Run exporters.
//!
//! - [`StatsLog`]: appends a human-readable end-of-run summary to a text log.
//! - [`VenueExport`]: JSON dump of a scenario run (results plus the event
//!   stream) for CI and offline visualization.

use crate::error::SimError;
use crate::supervisor::RunReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use venue_core::{StatsSink, StatsSummary, VenueError, VenueEvent, VenueStats};

/// Statistics sink that appends a text block to a log file.
pub struct StatsLog {
    path: PathBuf,
}

impl StatsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renders the block written for one run.
    pub fn render(summary: &StatsSummary) -> String {
        let started: DateTime<Utc> = summary.started_at.into();
        let finished: DateTime<Utc> = summary.finished_at.into();
        let stats = &summary.stats;

        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "=== Simulation started at: {} ===", started.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
        let _ = writeln!(out, "=== Venue closed at: {} ===", finished.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
        let _ = writeln!(out, "=== Simulation lasted: {:.2} seconds ===", summary.duration_secs());
        if summary.aborted {
            let _ = writeln!(out, "=== Broker exited abnormally ===");
        }
        let _ = writeln!(out, "Total profit: {}", stats.total_profit);

        let _ = writeln!(out);
        let _ = writeln!(out, "--- Customer group statistics ---");
        for (size, accepted) in &stats.accepted {
            let rejected = stats.rejected.get(size).copied().unwrap_or(0);
            let _ = writeln!(out, "  Group size {}: accepted={}, rejected={}", size, accepted, rejected);
        }
        // Sizes that were only ever rejected (oversized groups)
        for (size, rejected) in stats.rejected.iter().filter(|(s, _)| !stats.accepted.contains_key(s)) {
            let _ = writeln!(out, "  Group size {}: accepted=0, rejected={}", size, rejected);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "--- Table statistics ---");
        for (capacity, used) in &stats.table_usage {
            let _ = writeln!(out, "  Table size {}: occupied {} times", capacity, used);
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Evacuations: {}, reopenings: {}, turned away during evacuation: {}",
            stats.evacuations, stats.reopenings, stats.deflected
        );
        let _ = writeln!(out, "=======================================");
        out
    }

    fn append(&self, text: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(text.as_bytes())?;
        file.flush()
    }
}

impl StatsSink for StatsLog {
    fn publish(self: Box<Self>, summary: StatsSummary) -> Result<(), VenueError> {
        self.append(&Self::render(&summary))?;
        Ok(())
    }
}

/// One recorded visualization event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub index: usize,
    #[serde(flatten)]
    pub event: VenueEvent,
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueExport {
    /// Unique id of this export
    pub run_id: Uuid,

    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Simulated duration in seconds
    pub duration_sec: f64,

    /// Final broker counters, absent if the broker failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<VenueStats>,

    /// Supervisor report
    pub report: serde_json::Value,

    /// Every event the broker emitted
    pub frames: Vec<EventFrame>,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl VenueExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            stats: None,
            report: serde_json::Value::Null,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Copies the run's results in.
    pub fn record(&mut self, report: &RunReport) -> Result<(), SimError> {
        self.duration_sec = report.elapsed.as_secs_f64();
        self.stats = report.broker.as_ref().map(|exit| exit.stats.clone());
        self.report = serde_json::to_value(report)?;
        self.frames = report
            .events
            .iter()
            .enumerate()
            .map(|(index, event)| EventFrame { index, event: *event })
            .collect();
        Ok(())
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};
    use venue_core::VenueConfig;

    fn summary() -> StatsSummary {
        let mut stats = VenueStats::for_config(&VenueConfig::default());
        stats.record_accept(2, 2, 36);
        stats.record_reject(3);
        stats.record_reject(7);
        let started_at = UNIX_EPOCH + Duration::from_secs(1704067200);
        StatsSummary {
            started_at,
            finished_at: started_at + Duration::from_millis(12_500),
            stats,
            aborted: false,
        }
    }

    #[test]
    fn test_render_contains_every_section() {
        let text = StatsLog::render(&summary());

        assert!(text.contains("=== Simulation started at: 2024-01-01 00:00:00.000 UTC ==="));
        assert!(text.contains("=== Simulation lasted: 12.50 seconds ==="));
        assert!(text.contains("Total profit: 36"));
        assert!(text.contains("  Group size 2: accepted=1, rejected=0"));
        assert!(text.contains("  Group size 3: accepted=0, rejected=1"));
        assert!(text.contains("  Group size 7: accepted=0, rejected=1"));
        assert!(text.contains("  Table size 2: occupied 1 times"));
        assert!(!text.contains("abnormally"));
    }

    #[test]
    fn test_stats_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("venue_log.txt");

        Box::new(StatsLog::new(&path)).publish(summary()).unwrap();
        Box::new(StatsLog::new(&path)).publish(summary()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Total profit: 36").count(), 2);
    }

    #[test]
    fn test_stats_log_reports_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending
        let result = Box::new(StatsLog::new(dir.path())).publish(summary());
        assert!(matches!(result, Err(VenueError::Io(_))));
    }

    #[test]
    fn test_export_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");

        let mut export = VenueExport::new("steady_service", 42);
        export.frames.push(EventFrame {
            index: 0,
            event: VenueEvent::ProfitChanged { total: 10 },
        });
        export.finalize(true, None);
        export.write_to_file(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["scenario"], "steady_service");
        assert_eq!(value["passed"], true);
        assert_eq!(value["frames"][0]["kind"], "ProfitChanged");
        assert!(value.get("failure_reason").is_none());
    }
}
