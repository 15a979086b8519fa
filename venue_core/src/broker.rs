//! Broker - sole owner of the table inventory.
//!
//! The broker reads the shared inbound channel one record at a time, so all
//! table mutation is serialized without locks.
//!
//! # State Machine
//!
//! ```text
//!            fire raised                    closure elapsed
//!   ┌──────┐ (drain queue → LEAVE) ┌────────────┐ (rebuild tables,  ┌──────┐
//!   │ Open │──────────────────────►│ Evacuating │─── clear fire) ──►│ Open │
//!   └──┬───┘                       └─────┬──────┘                   └──────┘
//!      │ shutdown                        │ shutdown
//!      ▼                                 ▼
//!   ┌────────┐  drain queue → REJECTED, release inbound, flush stats once
//!   │ Closed │
//!   └────────┘
//! ```
//!
//! Requests answered while not `Open` are excluded from the accepted and
//! rejected counters.

use crate::config::VenueConfig;
use crate::error::VenueError;
use crate::events::{EventSink, NullEventSink, VenueEvent};
use crate::protocol::{Envelope, Message};
use crate::retry::{retry_bounded, RetryOutcome};
use crate::stats::{StatsSink, StatsSummary, VenueStats};
use crate::table::{SeatAssignment, TableInventory};

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use venue_env::{ChannelId, CustomerId, Fabric, FabricError, Flag, InboundReceiver, RecvOutcome, Signals, TableId, VenueContext};

/// Broker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Open,
    Evacuating,
    Closed,
}

/// What the broker hands back when its loop ends.
#[derive(Debug, Clone)]
pub struct BrokerExit {
    pub state: BrokerState,
    pub tables: TableInventory,
    pub stats: VenueStats,
}

/// Which flags abandon a reply's retry loop.
#[derive(Debug, Clone, Copy)]
enum ReplyGate {
    /// Evacuation and closing replies: only shutdown stops them
    Shutdown,
    /// Seating decisions: fire or shutdown stops them
    FireOrShutdown,
}

/// The seating broker.
pub struct Broker<Ctx: VenueContext> {
    context: Arc<Ctx>,
    config: Arc<VenueConfig>,
    fabric: Fabric,
    inbound: Option<InboundReceiver>,
    signals: Signals,
    events: Arc<dyn EventSink>,
    stats_sink: Option<Box<dyn StatsSink>>,
    tables: TableInventory,
    state: BrokerState,
    reopen_at: Option<Duration>,
    stats: VenueStats,
    started_at: SystemTime,
    aborted: bool,
}

impl<Ctx: VenueContext> Broker<Ctx> {
    /// Creates a broker and claims the fabric's inbound channel.
    pub fn new(
        context: Arc<Ctx>,
        config: Arc<VenueConfig>,
        fabric: Fabric,
        signals: Signals,
    ) -> Result<Self, VenueError> {
        config.validate()?;
        let inbound = fabric.take_inbound()?;
        let tables = TableInventory::from_counts(&config.table_counts);
        let stats = VenueStats::for_config(&config);
        let started_at = context.system_time();

        Ok(Self {
            context,
            config,
            fabric,
            inbound: Some(inbound),
            signals,
            events: Arc::new(NullEventSink),
            stats_sink: None,
            tables,
            state: BrokerState::Open,
            reopen_at: None,
            stats,
            started_at,
            aborted: false,
        })
    }

    /// Sets the visualization sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the statistics sink that receives the end-of-run summary.
    pub fn with_stats_sink(mut self, sink: Box<dyn StatsSink>) -> Self {
        self.stats_sink = Some(sink);
        self
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn tables(&self) -> &TableInventory {
        &self.tables
    }

    pub fn stats(&self) -> &VenueStats {
        &self.stats
    }

    /// First-fit seat allocation against the current inventory.
    pub fn seat(&mut self, group_size: u32) -> Option<SeatAssignment> {
        self.tables.seat(group_size)
    }

    /// Runs the request loop until shutdown, then releases the inbound
    /// channel and flushes statistics.
    pub async fn run(mut self) -> BrokerExit {
        info!(
            "[Broker] Open with {} tables ({} seats).",
            self.tables.len(),
            self.tables.tables().iter().map(|t| t.capacity).sum::<u32>()
        );

        if let Err(e) = self.serve().await {
            error!("[Broker] Request loop failed: {}", e);
            self.aborted = true;
        }

        self.state = BrokerState::Closed;
        self.release_inbound();
        self.flush_stats();

        BrokerExit {
            state: self.state,
            tables: self.tables.clone(),
            stats: self.stats.clone(),
        }
    }

    async fn serve(&mut self) -> Result<(), VenueError> {
        let poll = self.config.poll_interval();

        loop {
            if self.signals.shutdown.is_set() {
                self.close().await?;
                return Ok(());
            }
            if self.signals.fire.is_set() && self.state == BrokerState::Open {
                self.evacuate().await?;
            }
            if self.state == BrokerState::Evacuating && self.reopen_due() {
                self.reopen();
            }

            let wait = self.next_wait(poll);
            let is_open = self.state == BrokerState::Open;
            let inbound = self.inbound.as_mut().ok_or(VenueError::InboundReleased)?;

            let outcome = tokio::select! {
                biased;
                _ = self.signals.shutdown.raised() => continue,
                _ = self.signals.fire.raised(), if is_open => continue,
                outcome = inbound.recv_timeout(wait) => outcome,
            };

            match outcome {
                RecvOutcome::Record(line) => self.process_record(&line).await,
                RecvOutcome::Empty => {}
                RecvOutcome::Disconnected => {
                    warn!("[Broker] Inbound channel has no writers left.");
                    return Ok(());
                }
            }
        }
    }

    /// Decodes and handles one inbound record.
    ///
    /// Malformed or unexpected records are logged and discarded.
    pub async fn process_record(&mut self, line: &str) {
        let envelope = match Envelope::decode(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("[Broker] Ignoring malformed record {:?}: {}", line.trim_end(), e);
                self.stats.malformed += 1;
                return;
            }
        };
        debug!("[Broker] Received: {}", line.trim_end());

        match envelope.message {
            Message::RequestSeat { group_size, customer_id } => {
                self.handle_request(&envelope.reply_to, group_size, customer_id)
                    .await;
            }
            Message::CustomerDone { group_size, table_id } => {
                self.handle_done(group_size, table_id);
            }
            other => {
                warn!("[Broker] Ignoring {} on the inbound channel.", other.verb());
                self.stats.malformed += 1;
            }
        }
    }

    async fn handle_request(&mut self, reply_to: &ChannelId, group_size: u32, customer_id: CustomerId) {
        match self.state {
            BrokerState::Evacuating => {
                info!("[Broker] Venue evacuating. Telling customer {} to leave.", customer_id);
                self.stats.deflected += 1;
                let leave = Message::Leave { group_size, customer_id };
                self.reply(reply_to, leave, ReplyGate::Shutdown).await;
            }
            BrokerState::Closed => {
                info!("[Broker] Venue closed. Turning customer {} away.", customer_id);
                self.stats.refused_closed += 1;
                let rejected = Message::Rejected { group_size, customer_id };
                self.reply(reply_to, rejected, ReplyGate::Shutdown).await;
            }
            BrokerState::Open => match self.tables.seat(group_size) {
                Some(assignment) => {
                    let price = self.context.random_range(
                        self.config.price_per_person.min,
                        self.config.price_per_person.max,
                    );
                    let bill = u64::from(group_size) * price;
                    self.stats.record_accept(group_size, assignment.capacity, bill);

                    info!(
                        "[Broker] Customer {} (size={}) seated at table {}, seats {} -> {}. Profit +{}, total {}.",
                        customer_id,
                        group_size,
                        assignment.table_id,
                        assignment.seats_before,
                        assignment.seats_after,
                        bill,
                        self.stats.total_profit
                    );
                    self.events.emit(VenueEvent::ProfitChanged {
                        total: self.stats.total_profit,
                    });
                    self.events.emit(VenueEvent::TableOccupancyChanged {
                        table_id: assignment.table_id,
                        used_seats: assignment.seats_after,
                        capacity: assignment.capacity,
                    });

                    let seated = Message::Seated {
                        group_size,
                        table_id: assignment.table_id,
                    };
                    self.reply(reply_to, seated, ReplyGate::FireOrShutdown).await;
                }
                None => {
                    info!("[Broker] Customer {} (size={}) rejected. No room.", customer_id, group_size);
                    self.stats.record_reject(group_size);
                    let rejected = Message::Rejected { group_size, customer_id };
                    self.reply(reply_to, rejected, ReplyGate::FireOrShutdown).await;
                }
            },
        }
    }

    fn handle_done(&mut self, group_size: u32, table_id: TableId) {
        let Some(table) = self.tables.release(table_id, group_size) else {
            warn!("[Broker] CUSTOMER_DONE for unknown table {}.", table_id);
            self.stats.malformed += 1;
            return;
        };
        let (used_seats, capacity) = (table.used_seats, table.capacity);

        info!("[Broker] {} seats freed at table {}.", group_size, table_id);
        self.stats.departures += 1;
        self.events.emit(VenueEvent::TableOccupancyChanged {
            table_id,
            used_seats,
            capacity,
        });
    }

    async fn reply(&mut self, to: &ChannelId, message: Message, gate: ReplyGate) {
        let record = message.encode();
        let fabric = &self.fabric;
        let gates: Vec<&Flag> = match gate {
            ReplyGate::Shutdown => vec![&self.signals.shutdown],
            ReplyGate::FireOrShutdown => vec![&self.signals.fire, &self.signals.shutdown],
        };

        let outcome = retry_bounded(
            &*self.context,
            &self.config.reply_retry,
            &gates,
            FabricError::is_transient,
            |_| fabric.send_reply(to, &record),
        )
        .await;

        match outcome {
            RetryOutcome::Done { attempts, .. } => {
                if attempts > 1 {
                    debug!("[Broker] {} to {} delivered after {} attempts.", message.verb(), to, attempts);
                }
            }
            RetryOutcome::Cancelled { attempts, flag } => {
                debug!(
                    "[Broker] Dropping {} to {} after {} attempts: {} raised.",
                    message.verb(),
                    to,
                    attempts,
                    flag
                );
                self.stats.dropped_replies += 1;
            }
            RetryOutcome::Exhausted { attempts, error } | RetryOutcome::Failed { attempts, error } => {
                debug!(
                    "[Broker] Dropping {} to {} after {} attempts: {}.",
                    message.verb(),
                    to,
                    attempts,
                    error
                );
                self.stats.dropped_replies += 1;
            }
        }
    }

    async fn evacuate(&mut self) -> Result<(), VenueError> {
        let closure = self.config.closure_duration();
        info!("[Broker] Fire! Venue closed for {:?}.", closure);

        self.state = BrokerState::Evacuating;
        self.reopen_at = Some(self.context.now() + closure);
        self.stats.evacuations += 1;

        for table in self.tables.tables() {
            self.events.emit(VenueEvent::TableOnFire { table_id: table.id });
        }

        let drained = self.drain_queued().await?;
        debug!("[Broker] Drained {} queued records during evacuation.", drained);
        Ok(())
    }

    fn reopen_due(&self) -> bool {
        self.reopen_at
            .map_or(true, |deadline| self.context.now() >= deadline)
    }

    fn reopen(&mut self) {
        self.tables = TableInventory::from_counts(&self.config.table_counts);
        self.signals.fire.clear();
        self.state = BrokerState::Open;
        self.reopen_at = None;
        self.stats.reopenings += 1;

        for table in self.tables.tables() {
            self.events.emit(VenueEvent::TableOccupancyChanged {
                table_id: table.id,
                used_seats: 0,
                capacity: table.capacity,
            });
        }
        info!("[Broker] Reopening after fire. Tables reinitialized.");
    }

    async fn close(&mut self) -> Result<(), VenueError> {
        info!("[Broker] Shutdown observed. Closing.");
        self.state = BrokerState::Closed;
        let drained = self.drain_queued().await?;
        if drained > 0 {
            debug!("[Broker] Answered {} queued records while closing.", drained);
        }
        Ok(())
    }

    /// Handles every record already queued, without waiting for more.
    async fn drain_queued(&mut self) -> Result<usize, VenueError> {
        let mut drained = 0;
        loop {
            let inbound = self.inbound.as_mut().ok_or(VenueError::InboundReleased)?;
            let Some(line) = inbound.try_recv() else {
                return Ok(drained);
            };
            drained += 1;
            self.process_record(&line).await;
        }
    }

    fn next_wait(&self, poll: Duration) -> Duration {
        match self.reopen_at {
            Some(deadline) if self.state == BrokerState::Evacuating => {
                poll.min(deadline.saturating_sub(self.context.now()))
            }
            _ => poll,
        }
    }

    fn release_inbound(&mut self) {
        if self.inbound.take().is_some() {
            debug!("[Broker] Inbound channel released.");
        }
    }

    fn flush_stats(&mut self) {
        let Some(sink) = self.stats_sink.take() else {
            return;
        };
        let summary = StatsSummary {
            started_at: self.started_at,
            finished_at: self.context.system_time(),
            stats: self.stats.clone(),
            aborted: self.aborted,
        };
        let profit = summary.stats.total_profit;
        match sink.publish(summary) {
            Ok(()) => info!("[Broker] Statistics flushed. Total profit = {}.", profit),
            Err(e) => error!("[Broker] Failed to flush statistics: {}", e),
        }
    }
}

impl<Ctx: VenueContext> Drop for Broker<Ctx> {
    fn drop(&mut self) {
        // Only reached with a pending sink if `run` never finished (panic,
        // aborted task, or a broker that was never run).
        if self.stats_sink.is_some() {
            self.aborted = true;
            self.release_inbound();
            self.flush_stats();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UniformRange;
    use crate::retry::RetryPolicy;
    use crate::stats::OneshotStatsSink;
    use std::collections::BTreeMap;
    use venue_env::{ReplyChannel, TokioContext};

    fn test_config(tables: &[(u32, u32)]) -> Arc<VenueConfig> {
        Arc::new(VenueConfig {
            table_counts: tables.iter().copied().collect::<BTreeMap<_, _>>(),
            max_group_size: 4,
            closure_ms: 1_000,
            price_per_person: UniformRange::new(10, 10),
            poll_interval_ms: 20,
            reply_retry: RetryPolicy { max_attempts: 3, delay_ms: 1 },
            ..Default::default()
        })
    }

    fn broker(tables: &[(u32, u32)]) -> (Broker<TokioContext>, Fabric, Signals) {
        let fabric = Fabric::default();
        let signals = Signals::new();
        let broker = Broker::new(
            TokioContext::shared(),
            test_config(tables),
            fabric.clone(),
            signals.clone(),
        )
        .unwrap();
        (broker, fabric, signals)
    }

    fn request(reply: &ReplyChannel, group_size: u32, customer: u64) -> String {
        Envelope::new(
            reply.id().clone(),
            Message::RequestSeat {
                group_size,
                customer_id: CustomerId(customer),
            },
        )
        .encode()
    }

    async fn next_reply(reply: &mut ReplyChannel) -> Message {
        match reply.recv_timeout(Duration::from_secs(5)).await {
            RecvOutcome::Record(line) => Message::decode(&line).unwrap(),
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_pairs_fill_both_tables_then_single_rejected() {
        let (mut broker, fabric, _signals) = broker(&[(2, 2)]);
        let mut a = fabric.open_reply(ChannelId::new("a"));
        let mut b = fabric.open_reply(ChannelId::new("b"));
        let mut c = fabric.open_reply(ChannelId::new("c"));

        broker.process_record(&request(&a, 2, 1)).await;
        broker.process_record(&request(&b, 2, 2)).await;
        broker.process_record(&request(&c, 1, 3)).await;

        assert_eq!(next_reply(&mut a).await, Message::Seated { group_size: 2, table_id: TableId(1) });
        assert_eq!(next_reply(&mut b).await, Message::Seated { group_size: 2, table_id: TableId(2) });
        assert_eq!(
            next_reply(&mut c).await,
            Message::Rejected { group_size: 1, customer_id: CustomerId(3) }
        );

        for table in broker.tables().tables() {
            assert_eq!(table.used_seats, 2);
            assert_eq!(table.occupant_group_size, Some(2));
        }
        assert_eq!(broker.stats().accepted_total(), 2);
        assert_eq!(broker.stats().rejected_total(), 1);
        assert_eq!(broker.stats().total_profit, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_rejected() {
        let (mut broker, fabric, _signals) = broker(&[(1, 2), (2, 2), (3, 2), (4, 2)]);
        let mut reply = fabric.open_reply(ChannelId::new("big"));

        broker.process_record(&request(&reply, 9, 1)).await;

        assert!(matches!(next_reply(&mut reply).await, Message::Rejected { group_size: 9, .. }));
        assert!(broker.tables().is_vacant());
        assert_eq!(broker.stats().rejected[&9], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_customer_done_restores_seats() {
        let (mut broker, fabric, _signals) = broker(&[(4, 1)]);
        let mut reply = fabric.open_reply(ChannelId::new("g"));

        broker.process_record(&request(&reply, 2, 1)).await;
        let Message::Seated { table_id, .. } = next_reply(&mut reply).await else {
            panic!("expected SEATED");
        };

        broker
            .process_record(&format!("g:CUSTOMER_DONE 2 {}\n", table_id))
            .await;

        let table = broker.tables().get(table_id).unwrap();
        assert_eq!(table.used_seats, 0);
        assert_eq!(table.occupant_group_size, None);
        assert_eq!(broker.stats().departures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_records_are_discarded() {
        let (mut broker, fabric, _signals) = broker(&[(2, 1)]);
        let mut reply = fabric.open_reply(ChannelId::new("ok"));

        broker.process_record("garbage without address\n").await;
        broker.process_record("x:REQUEST_SEAT 2\n").await;
        broker.process_record("x:DANCE 1 1\n").await;
        broker.process_record("x:SEATED 1 1\n").await;
        broker.process_record("x:CUSTOMER_DONE 1 42\n").await;

        // The broker keeps serving afterwards
        broker.process_record(&request(&reply, 2, 7)).await;
        assert!(matches!(next_reply(&mut reply).await, Message::Seated { .. }));
        assert_eq!(broker.stats().malformed, 5);
        assert_eq!(broker.stats().requests_while_open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_to_missing_channel_is_dropped() {
        let (mut broker, _fabric, _signals) = broker(&[(2, 1)]);

        broker
            .process_record("customer_fifo_404:REQUEST_SEAT 1 404\n")
            .await;

        assert_eq!(broker.stats().dropped_replies, 1);
        // The seat was still assigned; only the reply was lost
        assert_eq!(broker.stats().accepted_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_request_gets_leave_on_fire_and_tables_reset() {
        let (broker, fabric, signals) = broker(&[(2, 2)]);
        let inbound = fabric.inbound();
        let mut seated = fabric.open_reply(ChannelId::new("seated"));
        let mut pending = fabric.open_reply(ChannelId::new("pending"));
        let task = tokio::spawn(broker.run());

        inbound
            .send(request(&seated, 2, 1), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(matches!(next_reply(&mut seated).await, Message::Seated { .. }));

        // Queue a request and raise fire before the broker gets to run
        inbound
            .send(request(&pending, 1, 2), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(signals.fire.raise());

        assert_eq!(
            next_reply(&mut pending).await,
            Message::Leave { group_size: 1, customer_id: CustomerId(2) }
        );

        // Closure is 1s; the broker clears fire when it reopens
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!signals.fire.is_set());

        signals.shutdown.raise();
        let exit = task.await.unwrap();

        assert_eq!(exit.state, BrokerState::Closed);
        assert!(exit.tables.is_vacant());
        assert_eq!(exit.stats.evacuations, 1);
        assert_eq!(exit.stats.reopenings, 1);
        assert_eq!(exit.stats.deflected, 1);
        // The LEAVE is excluded from both counters
        assert_eq!(exit.stats.accepted_total() + exit.stats.rejected_total(), 1);
        assert_eq!(exit.stats.requests_while_open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_fire_does_not_extend_closure() {
        let (broker, _fabric, signals) = broker(&[(2, 1)]);
        let task = tokio::spawn(broker.run());

        assert!(signals.fire.raise());
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Mid-evacuation re-raise is a no-op
        assert!(!signals.fire.raise());

        // Reopen still happens on the original deadline (t = 1000ms)
        tokio::time::sleep(Duration::from_millis(560)).await;
        assert!(!signals.fire.is_set());

        signals.shutdown.raise();
        let exit = task.await.unwrap();
        assert_eq!(exit.stats.evacuations, 1);
        assert_eq!(exit.stats.reopenings, 1);
    }

    fn broker_with_default_retry(tables: &[(u32, u32)]) -> (Broker<TokioContext>, Fabric, Signals) {
        let fabric = Fabric::default();
        let signals = Signals::new();
        let config = VenueConfig {
            reply_retry: RetryPolicy::default(),
            ..(*test_config(tables)).clone()
        };
        let broker = Broker::new(TokioContext::shared(), Arc::new(config), fabric.clone(), signals.clone())
            .unwrap();
        (broker, fabric, signals)
    }

    /// Queues requests whose senders have already closed their reply channel.
    async fn queue_departed_requests(fabric: &Fabric, count: u64) {
        let inbound = fabric.inbound();
        for n in 1..=count {
            let mut reply = fabric.open_reply(ChannelId::for_customer(CustomerId(n)));
            inbound
                .send(request(&reply, 1, n), Duration::from_millis(10))
                .await
                .unwrap();
            reply.close();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_requesters_do_not_delay_reopen() {
        let (broker, fabric, signals) = broker_with_default_retry(&[(2, 1)]);
        queue_departed_requests(&fabric, 10).await;
        assert!(signals.fire.raise());

        let task = tokio::spawn(broker.run());

        // Closure is 1000ms and starts when the broker sees the fire
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert!(!signals.fire.is_set());

        signals.shutdown.raise();
        let exit = task.await.unwrap();
        assert_eq!(exit.stats.reopenings, 1);
        assert_eq!(exit.stats.deflected, 10);
        assert_eq!(exit.stats.dropped_replies, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_requesters_do_not_stall_open_venue() {
        let (broker, fabric, signals) = broker_with_default_retry(&[(2, 1)]);
        queue_departed_requests(&fabric, 10).await;
        let mut waiting = fabric.open_reply(ChannelId::new("waiting"));
        fabric
            .inbound()
            .send(request(&waiting, 2, 11), Duration::from_millis(10))
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        let task = tokio::spawn(broker.run());

        // The two departed singles hold the only table
        assert_eq!(
            next_reply(&mut waiting).await,
            Message::Rejected { group_size: 2, customer_id: CustomerId(11) }
        );
        assert!(start.elapsed() < Duration::from_millis(50));

        signals.shutdown.raise();
        let exit = task.await.unwrap();
        assert_eq!(exit.stats.dropped_replies, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_during_evacuation_get_leave() {
        let (broker, fabric, signals) = broker(&[(2, 1)]);
        let inbound = fabric.inbound();
        let mut late = fabric.open_reply(ChannelId::new("late"));
        let task = tokio::spawn(broker.run());

        signals.fire.raise();
        tokio::time::sleep(Duration::from_millis(100)).await;

        inbound
            .send(request(&late, 2, 5), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(matches!(next_reply(&mut late).await, Message::Leave { .. }));

        signals.shutdown.raise();
        let exit = task.await.unwrap();
        assert_eq!(exit.stats.requests_while_open, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_requests_rejected_on_shutdown() {
        let (broker, fabric, signals) = broker(&[(2, 1)]);
        let mut reply = fabric.open_reply(ChannelId::new("q"));
        fabric
            .inbound()
            .send(request(&reply, 2, 1), Duration::from_millis(10))
            .await
            .unwrap();
        signals.shutdown.raise();

        let exit = broker.run().await;

        assert!(matches!(next_reply(&mut reply).await, Message::Rejected { .. }));
        assert_eq!(exit.stats.refused_closed, 1);
        assert_eq!(exit.stats.requests_while_open, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_stats_and_releases_inbound() {
        let (broker, fabric, signals) = broker(&[(2, 1)]);
        let (sink, rx) = OneshotStatsSink::new();
        let broker = broker.with_stats_sink(Box::new(sink));
        let task = tokio::spawn(broker.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        signals.shutdown.raise();
        task.await.unwrap();

        let summary = rx.await.unwrap();
        assert!(!summary.aborted);

        let err = fabric
            .inbound()
            .send("x".into(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, venue_env::FabricError::Closed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_flushed_when_broker_dropped_without_finishing() {
        let (broker, _fabric, _signals) = broker(&[(2, 1)]);
        let (sink, rx) = OneshotStatsSink::new();
        let broker = broker.with_stats_sink(Box::new(sink));

        drop(broker);

        let summary = rx.await.unwrap();
        assert!(summary.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_seating_and_fire() {
        use crate::events::ChannelEventSink;

        let (broker, fabric, signals) = broker(&[(2, 1)]);
        let (sink, mut events) = ChannelEventSink::new();
        let broker = broker.with_events(Arc::new(sink));
        let mut reply = fabric.open_reply(ChannelId::new("e"));
        let task = tokio::spawn(broker.run());

        fabric
            .inbound()
            .send(request(&reply, 2, 1), Duration::from_millis(10))
            .await
            .unwrap();
        next_reply(&mut reply).await;
        signals.fire.raise();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        signals.shutdown.raise();
        task.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                VenueEvent::ProfitChanged { total: 20 },
                VenueEvent::TableOccupancyChanged { table_id: TableId(1), used_seats: 2, capacity: 2 },
                VenueEvent::TableOnFire { table_id: TableId(1) },
                VenueEvent::TableOccupancyChanged { table_id: TableId(1), used_seats: 0, capacity: 2 },
            ]
        );
    }
}
