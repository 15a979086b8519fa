//! Venue Simulation Harness
//!
//! Runs the whole venue (broker, hazard scheduler, arriving customer groups)
//! under a supervisor, either live on the wall clock or as named scenarios on
//! a paused virtual clock.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted:
//! - **Time**: the Tokio clock is paused and advances only when every agent
//!   is blocked
//! - **Randomness**: every draw comes from one ChaCha8 generator seeded with
//!   the run's seed
//! - **Faults**: reply write failures are injected through the fabric
//!   controller, never by chance
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use venue_sim::{ScenarioRunner, ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_duration(Duration::from_secs(30));
//! let result = runner.run(ScenarioId::FireDrill);
//! assert!(result.passed);
//! ```

mod context;
mod error;
pub mod exporter;
pub mod runner;
pub mod scenarios;
pub mod supervisor;

pub use context::SimContext;
pub use error::SimError;
pub use exporter::{EventFrame, StatsLog, VenueExport};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use supervisor::{RunReport, Supervisor};
