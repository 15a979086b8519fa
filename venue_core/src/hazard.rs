//! Hazard scheduler: raises `fire` at random intervals.
//!
//! The scheduler does not wait for the evacuation to finish. If the venue is
//! still closed when the next fire is due, raising the flag is a no-op.

use crate::config::VenueConfig;
use std::sync::Arc;
use tracing::{debug, info};
use venue_env::{Signals, VenueContext};

pub struct HazardScheduler<Ctx: VenueContext> {
    context: Arc<Ctx>,
    config: Arc<VenueConfig>,
    signals: Signals,
}

impl<Ctx: VenueContext> HazardScheduler<Ctx> {
    pub fn new(context: Arc<Ctx>, config: Arc<VenueConfig>, signals: Signals) -> Self {
        Self {
            context,
            config,
            signals,
        }
    }

    /// Runs until shutdown. Returns the number of fires actually raised.
    pub async fn run(self) -> u64 {
        let (low, high) = self.config.fire_interval_ms.as_durations();
        let mut fires = 0;

        loop {
            let delay = self.context.random_duration(low, high);
            debug!("[Hazard] Next fire in {:?}.", delay);

            tokio::select! {
                biased;
                _ = self.signals.shutdown.raised() => break,
                _ = self.context.sleep(delay) => {}
            }
            if self.signals.shutdown.is_set() {
                break;
            }

            if self.signals.fire.raise() {
                fires += 1;
                info!("[Hazard] Fire!");
            } else {
                debug!("[Hazard] Fire already burning.");
            }
        }

        info!("[Hazard] Stopping after {} fires.", fires);
        fires
    }
}
