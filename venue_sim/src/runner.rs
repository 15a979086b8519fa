//! Scenario runner - executes named venue scenarios on a virtual clock.

use crate::context::SimContext;
use crate::exporter::StatsLog;
use crate::scenarios::ScenarioId;
use crate::supervisor::{RunReport, Supervisor};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use venue_core::{GroupState, UniformRange, VenueConfig, VenueEvent};
use venue_env::{Fabric, Signals, VenueContext};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Supervisor report, absent if the run could not start
    pub report: Option<RunReport>,
}

impl ScenarioResult {
    fn failed(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            failure_reason: Some(reason),
            report: None,
        }
    }

    /// Simulated seconds the run took.
    pub fn sim_time_secs(&self) -> f64 {
        self.report
            .as_ref()
            .map_or(0.0, |report| report.elapsed.as_secs_f64())
    }
}

/// Runs venue scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Simulated run length
    duration: Duration,

    /// Configuration each scenario starts from
    base_config: VenueConfig,

    /// Optional statistics log every run appends to
    stats_log: Option<PathBuf>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duration: Duration::from_secs(30),
            base_config: VenueConfig::default(),
            stats_log: None,
        }
    }

    /// Sets the simulated duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the configuration scenarios are derived from.
    pub fn with_config(mut self, config: VenueConfig) -> Self {
        self.base_config = config;
        self
    }

    /// Appends each run's statistics to `path`.
    pub fn with_stats_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats_log = Some(path.into());
        self
    }

    /// Runs a scenario and returns the result.
    ///
    /// Each run gets its own current-thread runtime with a paused clock, so
    /// simulated minutes take milliseconds and the seed alone decides the
    /// outcome.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => return ScenarioResult::failed(scenario, self.seed, format!("runtime: {}", e)),
        };

        runtime.block_on(self.run_async(scenario))
    }

    async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        let config = self.config_for(scenario);
        let context = SimContext::shared(self.seed);

        let mut supervisor = Supervisor::new(context.clone(), config.clone())
            .with_run_for(self.duration)
            .with_hazards(scenario == ScenarioId::FireDrill)
            .with_event_recording(true);
        if let Some(path) = &self.stats_log {
            supervisor = supervisor.with_stats_sink(Box::new(StatsLog::new(path)));
        }

        if scenario == ScenarioId::FlakyReplies {
            spawn_fault_injector(
                &context,
                supervisor.fabric().clone(),
                supervisor.signals().clone(),
            );
        }

        let report = match supervisor.run().await {
            Ok(report) => report,
            Err(e) => return ScenarioResult::failed(scenario, self.seed, e.to_string()),
        };

        let verdict = check_common(&report).and_then(|()| match scenario {
            ScenarioId::SteadyService => check_steady_service(&report),
            ScenarioId::FireDrill => check_fire_drill(&report),
            ScenarioId::FlakyReplies => check_flaky_replies(&report),
            ScenarioId::OversizedGroups => check_oversized_groups(&report),
            ScenarioId::RushHour => check_rush_hour(&report, config.max_concurrent_customers),
        });

        if let Err(reason) = &verdict {
            warn!("Scenario {} failed: {}", scenario.name(), reason);
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: verdict.is_ok(),
            failure_reason: verdict.err(),
            report: Some(report),
        }
    }

    /// Derives the scenario's configuration from the base configuration.
    pub fn config_for(&self, scenario: ScenarioId) -> VenueConfig {
        let base = self.base_config.clone();
        match scenario {
            ScenarioId::SteadyService | ScenarioId::FlakyReplies => base,
            ScenarioId::FireDrill => VenueConfig {
                fire_interval_ms: UniformRange::new(3_000, 5_000),
                closure_ms: 1_000,
                ..base
            },
            ScenarioId::OversizedGroups => {
                let largest = base.largest_capacity().unwrap_or(1);
                VenueConfig {
                    min_group_size: largest + 1,
                    max_group_size: largest + 2,
                    ..base
                }
            }
            ScenarioId::RushHour => VenueConfig {
                arrival_ms: UniformRange::new(1, 10),
                max_concurrent_customers: base.max_concurrent_customers.min(10),
                ..base
            },
        }
    }
}

/// Fails bursts of reply writes every two seconds until shutdown.
///
/// Bursts alternate between a size the reply retry absorbs and one that
/// exhausts it.
fn spawn_fault_injector(context: &Arc<SimContext>, fabric: Fabric, signals: Signals) {
    let ctx = context.clone();
    context.spawn("fault-injector", async move {
        let mut burst = 0u32;
        loop {
            tokio::select! {
                biased;
                _ = signals.shutdown.raised() => break,
                _ = ctx.sleep(Duration::from_secs(2)) => {}
            }
            let faults = if burst % 2 == 0 { 5 } else { 40 };
            debug!("Injecting {} reply faults.", faults);
            fabric.controller().fail_next_replies(faults);
            burst += 1;
        }
    });
}

fn check_common(report: &RunReport) -> Result<(), String> {
    let exit = report
        .broker
        .as_ref()
        .ok_or_else(|| "broker task failed".to_string())?;

    if report.groups_failed > 0 {
        return Err(format!("{} customer tasks failed", report.groups_failed));
    }
    if let Some(table) = exit.tables.find_inconsistent() {
        return Err(format!("table {} is inconsistent: {:?}", table.id, table));
    }
    let stats = &exit.stats;
    if stats.accepted_total() + stats.rejected_total() != stats.requests_while_open {
        return Err(format!(
            "accepted {} + rejected {} != {} requests processed while open",
            stats.accepted_total(),
            stats.rejected_total(),
            stats.requests_while_open
        ));
    }
    if report.live_reply_channels != 0 {
        return Err(format!("{} reply channels leaked", report.live_reply_channels));
    }
    if report.reply_channels_opened != report.reply_channels_removed {
        return Err(format!(
            "{} reply channels opened but {} removed",
            report.reply_channels_opened, report.reply_channels_removed
        ));
    }
    if report.outcomes.keys().any(|state| !state.is_terminal()) {
        return Err(format!("non-terminal group outcome: {:?}", report.outcomes));
    }
    Ok(())
}

fn check_steady_service(report: &RunReport) -> Result<(), String> {
    let stats = report.broker.as_ref().map(|exit| &exit.stats).ok_or("no broker")?;
    if stats.evacuations > 0 {
        return Err(format!("{} evacuations without a hazard", stats.evacuations));
    }
    if stats.accepted_total() == 0 {
        return Err("no group was ever seated".into());
    }
    if report.outcome_count(GroupState::Done) == 0 {
        return Err("no group finished eating".into());
    }
    Ok(())
}

fn check_fire_drill(report: &RunReport) -> Result<(), String> {
    let exit = report.broker.as_ref().ok_or("no broker")?;
    let stats = &exit.stats;
    if stats.evacuations == 0 {
        return Err("no evacuation happened".into());
    }
    if stats.reopenings + 1 < stats.evacuations {
        return Err(format!(
            "{} evacuations but only {} reopenings",
            stats.evacuations, stats.reopenings
        ));
    }

    // After the last completed reopen every table must be announced empty
    if stats.reopenings == stats.evacuations {
        let last_fire = report
            .events
            .iter()
            .rposition(|event| matches!(event, VenueEvent::TableOnFire { .. }))
            .ok_or("evacuation without TableOnFire events")?;
        let reset: Vec<_> = report.events[last_fire..]
            .iter()
            .filter_map(|event| match *event {
                VenueEvent::TableOccupancyChanged { table_id, used_seats: 0, .. } => Some(table_id),
                _ => None,
            })
            .collect();
        for table in exit.tables.tables() {
            if !reset.contains(&table.id) {
                return Err(format!("table {} was not reset after reopening", table.id));
            }
        }
    }
    Ok(())
}

fn check_flaky_replies(report: &RunReport) -> Result<(), String> {
    let stats = report.broker.as_ref().map(|exit| &exit.stats).ok_or("no broker")?;
    if report.injected_faults == 0 {
        return Err("no faults were injected".into());
    }
    if stats.accepted_total() == 0 {
        return Err("broker stopped seating groups".into());
    }
    Ok(())
}

fn check_oversized_groups(report: &RunReport) -> Result<(), String> {
    let stats = report.broker.as_ref().map(|exit| &exit.stats).ok_or("no broker")?;
    if stats.requests_while_open == 0 {
        return Err("no requests were processed".into());
    }
    if stats.accepted_total() != 0 {
        return Err(format!("{} oversized groups were seated", stats.accepted_total()));
    }
    if report.outcome_count(GroupState::Done) != 0 {
        return Err("an oversized group finished eating".into());
    }
    Ok(())
}

fn check_rush_hour(report: &RunReport, cap: usize) -> Result<(), String> {
    if report.peak_live_groups > cap {
        return Err(format!(
            "{} groups were live at once, cap is {}",
            report.peak_live_groups, cap
        ));
    }
    if report.groups_spawned <= cap as u64 {
        return Err(format!("only {} groups arrived", report.groups_spawned));
    }
    Ok(())
}
