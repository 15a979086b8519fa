//! Customer-group agent.
//!
//! One agent per arriving group: open a private reply channel, send a single
//! `REQUEST_SEAT`, wait for the broker's answer, and if seated let every
//! member eat concurrently before reporting `CUSTOMER_DONE`.
//!
//! ```text
//! Requesting ──SEATED──► Seated ──► Eating ──all finished──► Done
//!     │                                 └──fire/shutdown──► Abandoned
//!     ├──REJECTED──► Rejected
//!     └──LEAVE / fire / shutdown / no answer──► Fled
//! ```
//!
//! The reply channel is removed on every exit path.

use crate::config::VenueConfig;
use crate::protocol::{Envelope, Message};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use venue_env::{ChannelId, CustomerId, Fabric, RecvOutcome, ReplyChannel, Signals, TableId, VenueContext};

/// Lifecycle state of a customer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupState {
    Requesting,
    Seated,
    Eating,
    Done,
    Rejected,
    Fled,
    Abandoned,
}

impl GroupState {
    /// True for the states a group ends in.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GroupState::Done | GroupState::Rejected | GroupState::Fled | GroupState::Abandoned
        )
    }
}

/// How a group's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupOutcome {
    pub id: CustomerId,
    pub size: u32,
    pub state: GroupState,
    /// Table the group was seated at, if it ever was
    pub table: Option<TableId>,
}

/// A customer-group agent.
pub struct CustomerGroup<Ctx: VenueContext> {
    context: Arc<Ctx>,
    config: Arc<VenueConfig>,
    fabric: Fabric,
    signals: Signals,
    id: CustomerId,
    size: u32,
    state: GroupState,
    table: Option<TableId>,
}

impl<Ctx: VenueContext> CustomerGroup<Ctx> {
    pub fn new(
        context: Arc<Ctx>,
        config: Arc<VenueConfig>,
        fabric: Fabric,
        signals: Signals,
        id: CustomerId,
        size: u32,
    ) -> Self {
        Self {
            context,
            config,
            fabric,
            signals,
            id,
            size,
            state: GroupState::Requesting,
            table: None,
        }
    }

    pub fn id(&self) -> CustomerId {
        self.id
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Runs the group to a terminal state.
    pub async fn run(mut self) -> GroupOutcome {
        let mut reply = self.fabric.open_reply(ChannelId::for_customer(self.id));

        self.serve(&mut reply).await;

        if reply.close() {
            debug!("[Customer-{}] Reply channel removed.", self.id);
        }
        info!("[Customer-{}] Finished as {:?}.", self.id, self.state);

        GroupOutcome {
            id: self.id,
            size: self.size,
            state: self.state,
            table: self.table,
        }
    }

    async fn serve(&mut self, reply: &mut ReplyChannel) {
        let request = Envelope::new(
            reply.id().clone(),
            Message::RequestSeat {
                group_size: self.size,
                customer_id: self.id,
            },
        );
        let timeout = self.config.poll_interval();
        if let Err(e) = self.fabric.inbound().send(request.encode(), timeout).await {
            warn!("[Customer-{}] Could not reach the broker: {}", self.id, e);
            self.state = GroupState::Fled;
            return;
        }
        info!("[Customer-{}] Requested a seat for {}.", self.id, self.size);

        match self.await_answer(reply).await {
            Some(Message::Seated { table_id, .. }) => {
                self.state = GroupState::Seated;
                self.table = Some(table_id);
                self.dine(table_id).await;
            }
            Some(Message::Rejected { .. }) => {
                info!("[Customer-{}] Rejected. Leaving.", self.id);
                self.state = GroupState::Rejected;
            }
            Some(Message::Leave { .. }) => {
                info!("[Customer-{}] Told to leave.", self.id);
                self.state = GroupState::Fled;
            }
            Some(_) | None => self.state = GroupState::Fled,
        }
    }

    /// Polls the reply channel until an answer arrives, a flag is raised, or
    /// the poll budget runs out.
    async fn await_answer(&self, reply: &mut ReplyChannel) -> Option<Message> {
        let poll = self.config.poll_interval();
        let budget = self.config.customer_poll_budget;
        let mut empty_polls = 0;

        loop {
            if self.signals.fire.is_set() {
                info!("[Customer-{}] Fire! Fleeing while waiting.", self.id);
                return None;
            }
            if self.signals.shutdown.is_set() {
                debug!("[Customer-{}] Shutdown while waiting.", self.id);
                return None;
            }

            let outcome = tokio::select! {
                biased;
                _ = self.signals.interrupted() => continue,
                outcome = reply.recv_timeout(poll) => outcome,
            };

            match outcome {
                RecvOutcome::Record(line) => match Message::decode(&line) {
                    Ok(
                        message @ (Message::Seated { .. }
                        | Message::Rejected { .. }
                        | Message::Leave { .. }),
                    ) => return Some(message),
                    Ok(other) => {
                        warn!("[Customer-{}] Ignoring unexpected {}.", self.id, other.verb());
                    }
                    Err(e) => {
                        warn!("[Customer-{}] Ignoring malformed reply {:?}: {}", self.id, line.trim_end(), e);
                    }
                },
                RecvOutcome::Empty => {
                    empty_polls += 1;
                    if empty_polls >= budget {
                        warn!("[Customer-{}] No answer after {} polls. Giving up.", self.id, empty_polls);
                        return None;
                    }
                }
                RecvOutcome::Disconnected => {
                    warn!("[Customer-{}] Reply channel gone.", self.id);
                    return None;
                }
            }
        }
    }

    async fn dine(&mut self, table_id: TableId) {
        self.state = GroupState::Eating;
        info!(
            "[Customer-{}] Seated at table {}. {} members eating.",
            self.id, table_id, self.size
        );

        let (low, high) = self.config.eating_ms.as_durations();
        let mut members = Vec::with_capacity(self.size as usize);
        for member in 1..=self.size {
            let ctx = self.context.clone();
            let signals = self.signals.clone();
            let duration = self.context.random_duration(low, high);
            let name = format!("customer-{}-member-{}", self.id, member);

            members.push(self.context.spawn(&name, async move {
                tokio::select! {
                    biased;
                    _ = signals.interrupted() => false,
                    _ = ctx.sleep(duration) => true,
                }
            }));
        }

        let mut finished = true;
        for handle in members {
            match handle.await {
                Ok(done) => finished &= done,
                Err(e) => {
                    warn!("[Customer-{}] Member task failed: {}", self.id, e);
                    finished = false;
                }
            }
        }

        if !finished || self.signals.is_interrupted() {
            info!("[Customer-{}] Interrupted while eating. Abandoning table {}.", self.id, table_id);
            self.state = GroupState::Abandoned;
            return;
        }

        let done = Envelope::new(
            ChannelId::for_customer(self.id),
            Message::CustomerDone {
                group_size: self.size,
                table_id,
            },
        );
        if let Err(e) = self
            .fabric
            .inbound()
            .send(done.encode(), self.config.poll_interval())
            .await
        {
            warn!("[Customer-{}] CUSTOMER_DONE not delivered: {}", self.id, e);
        }
        info!("[Customer-{}] Finished eating at table {}.", self.id, table_id);
        self.state = GroupState::Done;
    }
}
