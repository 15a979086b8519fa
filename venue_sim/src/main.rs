//! Venue Simulator CLI
//!
//! Runs seeded scenarios on a virtual clock, or a single live session on the
//! wall clock (`--live`), ended by the run timer or Ctrl-C.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use venue_core::{GroupState, VenueConfig};
use venue_env::TokioContext;
use venue_sim::{ScenarioId, ScenarioResult, ScenarioRunner, SimError, StatsLog, Supervisor, VenueExport};

/// Venue seating simulator
#[derive(Parser, Debug)]
#[command(name = "venue-sim")]
#[command(about = "Run the venue seating simulation and its scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (steady_service, fire_drill, flaky_replies, oversized_groups, rush_hour, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Run duration in seconds (simulated, or wall-clock with --live)
    #[arg(short, long, default_value = "30", value_parser = parse_duration_secs)]
    duration: Duration,

    /// JSON venue configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one live session on the wall clock instead of scenarios
    #[arg(long)]
    live: bool,

    /// Append end-of-run statistics to this log file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export a single scenario's results and events to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match &args.config {
        Some(path) => match VenueConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: cannot load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => VenueConfig::default(),
    };

    if args.live {
        return match run_live(&args, config) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                error!("Live run failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if !args.json {
        info!("Venue Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(_) => {
                eprintln!("Error: {}", SimError::UnknownScenario(args.scenario.clone()));
                eprintln!("Available scenarios: steady_service, fire_drill, flaky_replies, oversized_groups, rush_hour, all");
                return ExitCode::FAILURE;
            }
        }
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        eprintln!("Error: --export only supports a single scenario and seed");
        return ExitCode::FAILURE;
    }

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let mut runner = ScenarioRunner::new(seed)
            .with_duration(args.duration)
            .with_config(config.clone());
        if let Some(path) = &args.log {
            runner = runner.with_stats_log(path);
        }

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if let Some(path) = &args.export {
                match export(&result, path) {
                    Ok(()) => info!("Exported {} to {}", scenario.name(), path.display()),
                    Err(e) => error!("Failed to write export: {}", e),
                }
            }

            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "time_secs": r.sim_time_secs(),
                    "groups": r.report.as_ref().map(|report| report.groups_spawned),
                    "profit": r.report.as_ref()
                        .and_then(|report| report.broker.as_ref())
                        .map(|exit| exit.stats.total_profit),
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render JSON summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Parses a non-negative, finite number of seconds.
fn parse_duration_secs(text: &str) -> Result<Duration, String> {
    let secs: f64 = text
        .parse()
        .map_err(|e| format!("`{}` is not a number of seconds: {}", text, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration `{}`: {}", text, e))
}

fn export(result: &ScenarioResult, path: &Path) -> Result<(), SimError> {
    let mut export = VenueExport::new(result.scenario.name(), result.seed);
    if let Some(report) = &result.report {
        export.record(report)?;
    }
    export.finalize(result.passed, result.failure_reason.clone());
    export.write_to_file(path)
}

/// Runs one session on the wall clock. Returns whether the broker exited
/// cleanly.
fn run_live(args: &Args, config: VenueConfig) -> Result<bool, SimError> {
    let runtime = tokio::runtime::Runtime::new()?;
    let log = args
        .log
        .clone()
        .unwrap_or_else(|| PathBuf::from("venue_log.txt"));

    let report = runtime.block_on(async {
        let supervisor = Supervisor::new(TokioContext::shared(), config)
            .with_run_for(args.duration)
            .with_stats_sink(Box::new(StatsLog::new(&log)));
        supervisor.relay_ctrl_c();
        info!("Venue open for {:?}. Press Ctrl-C to close early.", args.duration);
        supervisor.run().await
    })?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "Groups: {} (done={}, rejected={}, fled={}, abandoned={}), peak live {}",
        report.groups_spawned,
        report.outcome_count(GroupState::Done),
        report.outcome_count(GroupState::Rejected),
        report.outcome_count(GroupState::Fled),
        report.outcome_count(GroupState::Abandoned),
        report.peak_live_groups
    );
    info!("Fires: {}", report.fires_raised);
    if let Some(exit) = &report.broker {
        info!("Total profit: {}", exit.stats.total_profit);
    }
    info!("Statistics appended to {}", log.display());

    Ok(!report.broker_failed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_secs() {
        assert_eq!(parse_duration_secs("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration_secs("0.5"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration_secs("0"), Ok(Duration::ZERO));
    }

    #[test]
    fn test_parse_duration_secs_rejects_unrepresentable() {
        for text in ["inf", "NaN", "-1", "1e300", "soon"] {
            assert!(parse_duration_secs(text).is_err(), "{} should be rejected", text);
        }
    }

    #[test]
    fn test_cli_reports_bad_duration() {
        let err = Args::try_parse_from(["venue-sim", "--duration", "inf"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let args = Args::try_parse_from(["venue-sim", "-d", "2.5"]).unwrap();
        assert_eq!(args.duration, Duration::from_millis(2_500));
    }
}
