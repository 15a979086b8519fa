//! Production implementation of VenueContext using Tokio.

use crate::VenueContext;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Production context backed by Tokio and OS entropy.
///
/// Time comes from the Tokio clock, randomness from an entropy-seeded RNG.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Entropy-seeded generator
    rng: Mutex<StdRng>,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        trace!("spawning task {}", name);
        tokio::spawn(future)
    }

    fn random_range(&self, low: u64, high: u64) -> u64 {
        let (low, high) = if high < low { (high, low) } else { (low, high) };
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(low..=high)
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}
