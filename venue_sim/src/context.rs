//! Simulation context implementing VenueContext for deterministic runs.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;
use venue_env::VenueContext;

/// Simulation context backed by the Tokio clock and a seeded RNG.
///
/// Scenario runs drive this on a current-thread runtime with the clock
/// paused, so time only advances when every task is blocked and the whole
/// run is a pure function of the seed.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Virtual time 0
    start: Instant,

    /// Deterministic RNG shared by every agent
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Wall-clock time that virtual time 0 maps to
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start: Instant::now(),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            start: self.start,
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl VenueContext for SimContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        trace!("spawning task {} at {:?}", name, self.now());
        tokio::spawn(future)
    }

    fn random_range(&self, low: u64, high: u64) -> u64 {
        let (low, high) = if high < low { (high, low) } else { (low, high) };
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(low..=high)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.sleep(Duration::from_secs(1)).await;
        let t1 = ctx.now();
        assert!(t1 >= Duration::from_secs(1) && t1 < Duration::from_millis(1010));

        let stamp = ctx.system_time();
        let since_epoch = stamp
            .duration_since(UNIX_EPOCH + Duration::from_secs(1704067200))
            .unwrap();
        assert!(since_epoch >= t1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_deterministic_draws() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let a: Vec<u64> = (0..16).map(|_| ctx1.random_range(0, 1_000)).collect();
        let b: Vec<u64> = (0..16).map(|_| ctx2.random_range(0, 1_000)).collect();
        // Same seed = same sequence
        assert_eq!(a, b);

        let ctx3 = SimContext::new(43);
        let c: Vec<u64> = (0..16).map(|_| ctx3.random_range(0, 1_000)).collect();
        assert_ne!(a, c);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_the_generator() {
        let ctx = SimContext::new(7);
        let clone = ctx.clone();
        let reference = SimContext::new(7);

        let interleaved = [ctx.random_range(0, 99), clone.random_range(0, 99)];
        let sequential = [reference.random_range(0, 99), reference.random_range(0, 99)];
        assert_eq!(interleaved, sequential);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_seed() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn draws_stay_in_bounds(seed in any::<u64>(), a in 0u64..10_000, b in 0u64..10_000) {
                let ctx = SimContext::new(seed);
                let (low, high) = if a <= b { (a, b) } else { (b, a) };
                for _ in 0..32 {
                    let v = ctx.random_range(a, b);
                    prop_assert!(v >= low && v <= high);
                }
            }
        }
    }
}
