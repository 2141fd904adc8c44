//! Fixed-cadence driver for the delta collector.
//!
//! The first cycle starts as soon as the scheduler runs, then one per
//! interval. Cycles never overlap: a cycle that outlives the interval delays
//! the next tick instead of stacking another one behind it.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::worker::DeltaCollector;

/// Runs poll cycles until cancelled.
pub struct CollectionScheduler {
    collector: Arc<DeltaCollector>,
    interval: Duration,
}

impl CollectionScheduler {
    pub fn new(collector: Arc<DeltaCollector>, interval: Duration) -> Self {
        Self {
            collector,
            interval,
        }
    }

    /// Runs until `cancellation_token` fires. A cycle already in flight is
    /// allowed to finish; cycle failures are logged and never end the loop.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Collection scheduler started for {} validators (every {}s)",
            self.collector.validators().len(),
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Collection scheduler shutting down...");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.collector.run_cycle().await;
                    if !report.is_success() {
                        warn!(
                            "Poll cycle at {} finished with {} failed validators",
                            report.timestamp,
                            report.failures.len()
                        );
                    }
                }
            }
        }
    }
}
