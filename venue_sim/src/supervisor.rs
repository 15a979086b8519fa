//! Process supervisor: wires broker, hazard scheduler and arriving customer
//! groups together, throttles live groups, and joins everything.
//!
//! # Lifecycle
//!
//! ```text
//! spawn broker ───┐
//! spawn recorder ─┤
//! spawn hazard ───┼─► generate groups (arrival delay, semaphore permit,
//! spawn timer ────┘    reap finished groups) ───────────────────────┐
//!                            shutdown (timer / Ctrl-C / caller) ◄───┘
//!                                     │
//!     join groups → join hazard → join broker → join recorder → RunReport
//! ```
//!
//! Finished groups are tallied as the generator goes, so a long live run
//! only holds handles for groups that are still running.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use venue_core::{
    Broker, BrokerExit, ChannelEventSink, CustomerGroup, GroupOutcome, GroupState, HazardScheduler,
    StatsSink, VenueConfig, VenueError, VenueEvent,
};
use venue_env::{CustomerId, Fabric, Signals, VenueContext};

/// Everything observed during one supervised run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub seed: u64,

    /// Virtual (or wall) time the run took
    pub elapsed: Duration,

    /// Customer groups spawned
    pub groups_spawned: u64,

    /// Customer-group tasks that panicked
    pub groups_failed: u64,

    /// Terminal state tallies
    pub outcomes: BTreeMap<GroupState, u64>,

    /// Highest number of simultaneously live groups
    pub peak_live_groups: usize,

    /// Fires the hazard scheduler actually raised
    pub fires_raised: u64,

    /// Broker's final state; `None` if the broker task panicked
    #[serde(skip)]
    pub broker: Option<BrokerExit>,

    /// Every visualization event, in emission order. Empty unless event
    /// recording was enabled.
    #[serde(skip)]
    pub events: Vec<VenueEvent>,

    /// Reply channels still registered after every group finished
    pub live_reply_channels: usize,

    pub reply_channels_opened: u64,
    pub reply_channels_removed: u64,

    /// Reply writes failed on purpose by the fabric controller
    pub injected_faults: u64,
}

impl RunReport {
    pub fn outcome_count(&self, state: GroupState) -> u64 {
        self.outcomes.get(&state).copied().unwrap_or(0)
    }

    pub fn broker_failed(&self) -> bool {
        self.broker.is_none()
    }
}

/// Supervises one venue run.
pub struct Supervisor<Ctx: VenueContext> {
    context: Arc<Ctx>,
    config: Arc<VenueConfig>,
    fabric: Fabric,
    signals: Signals,
    stats_sink: Option<Box<dyn StatsSink>>,
    run_for: Option<Duration>,
    hazards: bool,
    record_events: bool,
}

/// Terminal-state tally of finished customer groups.
#[derive(Debug, Default)]
struct GroupTally {
    outcomes: BTreeMap<GroupState, u64>,
    failed: u64,
}

impl GroupTally {
    fn record(&mut self, result: Result<GroupOutcome, tokio::task::JoinError>) {
        match result {
            Ok(GroupOutcome { state, .. }) => *self.outcomes.entry(state).or_default() += 1,
            Err(e) => {
                error!("Customer group task failed: {}", e);
                self.failed += 1;
            }
        }
    }

    /// Tallies and forgets every group that already finished.
    async fn reap_finished(&mut self, handles: &mut Vec<JoinHandle<GroupOutcome>>) {
        let mut i = 0;
        while i < handles.len() {
            if handles[i].is_finished() {
                let handle = handles.swap_remove(i);
                self.record(handle.await);
            } else {
                i += 1;
            }
        }
    }
}

impl<Ctx: VenueContext> Supervisor<Ctx> {
    pub fn new(context: Arc<Ctx>, config: VenueConfig) -> Self {
        Self {
            context,
            config: Arc::new(config),
            fabric: Fabric::default(),
            signals: Signals::new(),
            stats_sink: None,
            run_for: None,
            hazards: true,
            record_events: false,
        }
    }

    /// Keeps every visualization event for the report.
    pub fn with_event_recording(mut self, enabled: bool) -> Self {
        self.record_events = enabled;
        self
    }

    /// Raises `shutdown` once `duration` has elapsed.
    pub fn with_run_for(mut self, duration: Duration) -> Self {
        self.run_for = Some(duration);
        self
    }

    /// Enables or disables the hazard scheduler.
    pub fn with_hazards(mut self, enabled: bool) -> Self {
        self.hazards = enabled;
        self
    }

    pub fn with_stats_sink(mut self, sink: Box<dyn StatsSink>) -> Self {
        self.stats_sink = Some(sink);
        self
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Relays Ctrl-C into `shutdown`.
    pub fn relay_ctrl_c(&self) {
        let shutdown = self.signals.shutdown.clone();
        self.context.spawn("ctrl-c", async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("Ctrl-C received, shutting down.");
                        shutdown.raise();
                    }
                    Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
                },
                _ = shutdown.raised() => {}
            }
        });
    }

    /// Runs until `shutdown` is raised, then joins every agent.
    pub async fn run(mut self) -> Result<RunReport, VenueError> {
        let started = self.context.now();

        let mut broker = Broker::new(
            self.context.clone(),
            self.config.clone(),
            self.fabric.clone(),
            self.signals.clone(),
        )?;
        let mut recorder = None;
        if self.record_events {
            let (event_sink, mut event_rx) = ChannelEventSink::new();
            broker = broker.with_events(Arc::new(event_sink));
            // Ends once the broker drops its sink
            recorder = Some(self.context.spawn("event-recorder", async move {
                let mut events = Vec::new();
                while let Some(event) = event_rx.recv().await {
                    events.push(event);
                }
                events
            }));
        }
        if let Some(sink) = self.stats_sink.take() {
            broker = broker.with_stats_sink(sink);
        }
        let broker = self.context.spawn("broker", broker.run());

        let hazard = self.hazards.then(|| {
            let scheduler = HazardScheduler::new(
                self.context.clone(),
                self.config.clone(),
                self.signals.clone(),
            );
            self.context.spawn("hazard", scheduler.run())
        });

        if let Some(duration) = self.run_for {
            self.spawn_timer(duration);
        }

        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tally = GroupTally::default();
        let (groups_spawned, running) = self.generate_groups(&live, &peak, &mut tally).await;
        info!("Customer generator stopped after {} groups.", groups_spawned);

        for handle in running {
            tally.record(handle.await);
        }

        let fires_raised = match hazard {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                error!("Hazard scheduler failed: {}", e);
                0
            }),
            None => 0,
        };

        let broker = match broker.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!("Broker task failed: {}", e);
                None
            }
        };

        let events = match recorder {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                error!("Event recorder failed: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        Ok(RunReport {
            seed: self.context.seed(),
            elapsed: self.context.now().saturating_sub(started),
            groups_spawned,
            groups_failed: tally.failed,
            outcomes: tally.outcomes,
            peak_live_groups: peak.load(Ordering::Relaxed),
            fires_raised,
            broker,
            events,
            live_reply_channels: self.fabric.live_reply_channels(),
            reply_channels_opened: self.fabric.reply_channels_opened(),
            reply_channels_removed: self.fabric.reply_channels_removed(),
            injected_faults: self.fabric.controller().injected_faults(),
        })
    }

    fn spawn_timer(&self, duration: Duration) {
        let ctx = self.context.clone();
        let shutdown = self.signals.shutdown.clone();
        self.context.spawn("run-timer", async move {
            tokio::select! {
                _ = ctx.sleep(duration) => {
                    info!("Run time of {:?} elapsed, shutting down.", duration);
                    shutdown.raise();
                }
                _ = shutdown.raised() => {}
            }
        });
    }

    /// Spawns customer groups at random arrival intervals until shutdown.
    ///
    /// A group only starts once it holds a semaphore permit, so at most
    /// `max_concurrent_customers` groups are ever live. Returns how many
    /// groups were spawned and the handles of those not yet reaped.
    async fn generate_groups(
        &self,
        live: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
        tally: &mut GroupTally,
    ) -> (u64, Vec<JoinHandle<GroupOutcome>>) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_customers));
        let (arrival_low, arrival_high) = self.config.arrival_ms.as_durations();
        let shutdown = &self.signals.shutdown;
        let mut handles = Vec::new();
        let mut next_id = 1u64;

        loop {
            tally.reap_finished(&mut handles).await;

            let delay = self.context.random_duration(arrival_low, arrival_high);
            tokio::select! {
                biased;
                _ = shutdown.raised() => break,
                _ = self.context.sleep(delay) => {}
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.raised() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let id = CustomerId(next_id);
            next_id += 1;
            let size = self.context.random_range(
                u64::from(self.config.min_group_size),
                u64::from(self.config.max_group_size),
            ) as u32;
            let group = CustomerGroup::new(
                self.context.clone(),
                self.config.clone(),
                self.fabric.clone(),
                self.signals.clone(),
                id,
                size,
            );

            let now_live = live.fetch_add(1, Ordering::Relaxed) + 1;
            peak.fetch_max(now_live, Ordering::Relaxed);
            debug!("Customer {} (size={}) arrives; {} live.", id, size, now_live);

            let live = live.clone();
            handles.push(self.context.spawn(&format!("customer-{}", id), async move {
                let outcome = group.run().await;
                live.fetch_sub(1, Ordering::Relaxed);
                drop(permit);
                outcome
            }));
        }

        (next_id - 1, handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use venue_core::{OneshotStatsSink, UniformRange};

    fn quiet_config() -> VenueConfig {
        VenueConfig {
            arrival_ms: UniformRange::new(50, 150),
            eating_ms: UniformRange::new(200, 600),
            poll_interval_ms: 20,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_timer_and_joins_everyone() {
        let supervisor = Supervisor::new(SimContext::shared(1), quiet_config())
            .with_hazards(false)
            .with_run_for(Duration::from_secs(5));

        let report = supervisor.run().await.unwrap();

        assert!(report.groups_spawned > 0);
        assert_eq!(report.outcomes.values().sum::<u64>(), report.groups_spawned);
        assert_eq!(report.groups_failed, 0);
        assert_eq!(report.live_reply_channels, 0);
        assert_eq!(report.reply_channels_opened, report.reply_channels_removed);
        assert!(!report.broker_failed());
        assert!(report.elapsed >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_groups_never_exceed_cap() {
        let config = VenueConfig {
            arrival_ms: UniformRange::new(1, 5),
            eating_ms: UniformRange::new(2_000, 3_000),
            max_concurrent_customers: 4,
            ..quiet_config()
        };
        let supervisor = Supervisor::new(SimContext::shared(2), config)
            .with_hazards(false)
            .with_run_for(Duration::from_secs(3));

        let report = supervisor.run().await.unwrap();

        assert!(report.peak_live_groups <= 4);
        assert_eq!(report.peak_live_groups, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_reach_the_sink() {
        let (sink, rx) = OneshotStatsSink::new();
        let supervisor = Supervisor::new(SimContext::shared(3), quiet_config())
            .with_hazards(false)
            .with_stats_sink(Box::new(sink))
            .with_run_for(Duration::from_secs(2));

        let report = supervisor.run().await.unwrap();
        let summary = rx.await.unwrap();

        let exit = report.broker.unwrap();
        assert_eq!(summary.stats, exit.stats);
        assert!(!summary.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_report() {
        let run = |seed| async move {
            Supervisor::new(SimContext::shared(seed), quiet_config())
                .with_run_for(Duration::from_secs(3))
                .run()
                .await
                .unwrap()
        };

        let a = run(9).await;
        let b = run(9).await;
        assert_eq!(a.groups_spawned, b.groups_spawned);
        assert_eq!(a.outcomes, b.outcomes);
        assert_eq!(a.broker.unwrap().stats, b.broker.unwrap().stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_kept_only_when_recording() {
        let run = |record| async move {
            Supervisor::new(SimContext::shared(6), quiet_config())
                .with_hazards(false)
                .with_event_recording(record)
                .with_run_for(Duration::from_secs(2))
                .run()
                .await
                .unwrap()
        };

        let quiet = run(false).await;
        assert!(quiet.events.is_empty());

        let recorded = run(true).await;
        let exit = recorded.broker.as_ref().unwrap();
        assert!(exit.stats.accepted_total() > 0);
        assert!(recorded
            .events
            .iter()
            .any(|event| matches!(event, VenueEvent::ProfitChanged { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_groups_are_reaped_while_generating() {
        // No broker: every group gives up after its short poll budget
        let config = VenueConfig {
            arrival_ms: UniformRange::new(1, 5),
            customer_poll_budget: 5,
            max_concurrent_customers: 3,
            ..quiet_config()
        };
        let supervisor = Supervisor::new(SimContext::shared(7), config);
        supervisor.spawn_timer(Duration::from_secs(10));

        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tally = GroupTally::default();
        let (spawned, running) = supervisor.generate_groups(&live, &peak, &mut tally).await;

        assert!(spawned > 10);
        assert!(running.len() <= 3);
        for handle in running {
            tally.record(handle.await);
        }
        assert_eq!(tally.outcomes.values().sum::<u64>(), spawned);
        assert_eq!(tally.outcomes.get(&GroupState::Fled).copied(), Some(spawned));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_is_rejected() {
        let config = VenueConfig {
            table_counts: BTreeMap::new(),
            ..Default::default()
        };
        let result = Supervisor::new(SimContext::shared(4), config).run().await;
        assert!(matches!(result, Err(VenueError::Config(_))));
    }
}
