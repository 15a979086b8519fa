//! Venue Environment Abstraction Layer
//!
//! This crate provides everything the venue agents touch that is not
//! seating logic: the clock, randomness, task spawning, the broadcast
//! `fire`/`shutdown` flags, and the in-process channel fabric.
//!
//! # Core Concept: Agents Only Talk Through the Fabric
//!
//! ```text
//!  Customer #1 ──┐                                ┌──► reply "customer_fifo_1"
//!  Customer #2 ──┼──► inbound ──► Broker ──► Fabric ──► reply "customer_fifo_2"
//!  Customer #N ──┘                                └──► reply "customer_fifo_N"
//! ```
//!
//! The only shared state besides the fabric is [`Signals`]: two independent
//! flags observable by every agent.
//!
//! # Example
//!
//! ```ignore
//! use venue_env::{Fabric, Signals, TokioContext, VenueContext};
//!
//! async fn agent<Ctx: VenueContext>(ctx: &Ctx, signals: &Signals) {
//!     loop {
//!         tokio::select! {
//!             _ = signals.interrupted() => break,
//!             _ = ctx.sleep(Duration::from_millis(100)) => tick(),
//!         }
//!     }
//! }
//! ```

mod context;
mod error;
mod fabric;
mod flags;
mod tokio_impl;
mod types;

pub use context::VenueContext;
pub use error::FabricError;
pub use fabric::{Fabric, FabricController, InboundReceiver, InboundSender, RecvOutcome, ReplyChannel};
pub use flags::{Flag, Signals};
pub use tokio_impl::TokioContext;
pub use types::{ChannelId, CustomerId, TableId};
