//! Venue Core - seat allocation, broker protocol and agent lifecycles
//!
//! This library holds every piece of the venue with real invariants:
//! 1. **Seat allocation**: first-fit over a fixed table arena (`table`)
//! 2. **Broker**: request/response over the channel fabric, plus the
//!    evacuation/reopen state machine (`broker`)
//! 3. **Customer groups**: request, wait, dine concurrently, report (`customer`)
//! 4. **Hazard scheduler**: raises `fire` at random intervals (`hazard`)
//!
//! Time, randomness and channels come from `venue_env`, so all of it runs the
//! same under the production context and the seeded simulator.

pub mod broker;
pub mod config;
pub mod customer;
pub mod error;
pub mod events;
pub mod hazard;
pub mod protocol;
pub mod retry;
pub mod stats;
pub mod table;

// Re-export key types for convenience
pub use broker::{Broker, BrokerExit, BrokerState};
pub use config::{UniformRange, VenueConfig};
pub use customer::{CustomerGroup, GroupOutcome, GroupState};
pub use error::VenueError;
pub use events::{ChannelEventSink, EventSink, NullEventSink, VenueEvent};
pub use hazard::HazardScheduler;
pub use protocol::{Envelope, Message, ProtocolError};
pub use retry::{retry_bounded, RetryOutcome, RetryPolicy};
pub use stats::{OneshotStatsSink, StatsSink, StatsSummary, VenueStats};
pub use table::{SeatAssignment, Table, TableInventory};
