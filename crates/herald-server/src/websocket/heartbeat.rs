//! Liveness monitor: periodic ping/pong probing of every registered
//! connection.
//!
//! A connection that has not answered the previous probe by the time the
//! next cycle runs is terminated and unregistered, so detection takes
//! between one and two probe intervals.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::ConnectionRegistry;
use crate::metrics::{LIVENESS_EVICTIONS_TOTAL, LIVENESS_PROBES_TOTAL};

/// Counts from one probe cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Connections flipped to suspect and sent a probe.
    pub probed: usize,
    /// Connections that were still suspect and got evicted.
    pub evicted: usize,
}

/// Periodic prober over a [`ConnectionRegistry`].
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor probing every `interval`.
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// The probe period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one probe cycle over a snapshot of the registry.
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for connection in self.registry.all_connections() {
            if connection.check_alive() {
                // Queue full or writer gone: the connection stays suspect
                // and is evicted next cycle.
                if !connection.probe() {
                    debug!(conn_id = %connection.id, "probe not enqueued");
                }
                report.probed += 1;
            } else {
                connection.terminate();
                let _ = self.registry.unregister(connection.user_id, &connection.id);
                info!(
                    conn_id = %connection.id,
                    user_id = %connection.user_id,
                    "evicted unresponsive connection"
                );
                report.evicted += 1;
            }
        }

        counter!(LIVENESS_PROBES_TOTAL).increment(report.probed as u64);
        counter!(LIVENESS_EVICTIONS_TOTAL).increment(report.evicted as u64);
        report
    }

    /// Run cycles until `cancel` fires.
    ///
    /// The first cycle runs one full interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle();
                    debug!(probed = report.probed, evicted = report.evicted, "liveness cycle");
                }
                () = cancel.cancelled() => {
                    debug!("liveness monitor stopped");
                    return;
                }
            }
        }
    }

    /// Spawn [`LivenessMonitor::run`] on the runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
