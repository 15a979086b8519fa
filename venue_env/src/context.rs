//! Core environment context trait for venue agents.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// The central interface for environment interaction.
///
/// Broker, customer groups and the hazard scheduler never read the clock,
/// sleep, spawn or draw random numbers directly. They go through this trait
/// so that the same agent code runs against OS entropy in production and a
/// seeded generator in the simulator.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, entropy-seeded RNG
/// - **Simulation**: `SimContext` - wraps `tokio::time`, `ChaCha8Rng(seed)`
#[async_trait]
pub trait VenueContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time, used for run start/end stamps.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task and returns its handle.
    ///
    /// The name is only used for tracing.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;

    /// Draws a uniformly distributed integer in `low..=high`.
    ///
    /// If `high < low` the bounds are swapped.
    fn random_range(&self, low: u64, high: u64) -> u64;

    /// Returns the context's seed (0 when not seeded).
    fn seed(&self) -> u64;

    /// Draws a uniformly distributed duration in `low..=high`, millisecond
    /// granularity.
    fn random_duration(&self, low: Duration, high: Duration) -> Duration {
        let ms = self.random_range(low.as_millis() as u64, high.as_millis() as u64);
        Duration::from_millis(ms)
    }
}
