//! Bounded retry gated by cancellation flags.
//!
//! The first attempt always runs. A failure the caller classifies as
//! permanent ends the loop at once. Before every further attempt the gating
//! flags are checked; once any of them is raised the operation is abandoned.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use venue_env::{Flag, VenueContext};

/// How many times, and how far apart, to retry a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Pause between attempts (ms)
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            delay_ms: 10,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// How a retried operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// Succeeded on the given attempt (1-based)
    Done { value: T, attempts: u32 },
    /// A gating flag was raised before a retry
    Cancelled { attempts: u32, flag: &'static str },
    /// Every attempt failed; carries the last error
    Exhausted { attempts: u32, error: E },
    /// Failed with an error not worth retrying
    Failed { attempts: u32, error: E },
}

/// Runs `op` until it succeeds, fails with an error `retryable` rejects, the
/// attempts run out, or a flag in `cancel` is raised.
pub async fn retry_bounded<Ctx, T, E, R, F>(
    ctx: &Ctx,
    policy: &RetryPolicy,
    cancel: &[&Flag],
    retryable: R,
    mut op: F,
) -> RetryOutcome<T, E>
where
    Ctx: VenueContext,
    R: Fn(&E) -> bool,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => return RetryOutcome::Done { value, attempts: attempt },
            Err(error) if !retryable(&error) => {
                return RetryOutcome::Failed { attempts: attempt, error };
            }
            Err(error) if attempt >= max_attempts => {
                return RetryOutcome::Exhausted { attempts: attempt, error };
            }
            Err(_) => {}
        }

        ctx.sleep(policy.delay()).await;

        if let Some(flag) = cancel.iter().find(|flag| flag.is_set()) {
            return RetryOutcome::Cancelled {
                attempts: attempt,
                flag: flag.name(),
            };
        }
        attempt += 1;
    }
}
