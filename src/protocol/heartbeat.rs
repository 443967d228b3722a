//! Heartbeat scheduling and liveness detection.
//!
//! Once a connection's world is live it sends itself a `HEARTBEAT` every
//! `heartbeat.interval` on the I/O actor. Each tick also checks how long ago
//! the peer's last heartbeat arrived; after `heartbeat.max_missed` silent
//! periods the connection is torn down exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::protocol::builders;
use crate::protocol::connection::ConnectionActor;
use crate::runtime::affinity::{self, Actor};
use crate::utils::metrics::global_metrics;

/// True once `since` exceeds `max_missed` whole periods.
pub fn is_expired(since: Duration, period: Duration, max_missed: u32) -> bool {
    since > period.saturating_mul(max_missed)
}

impl ConnectionActor {
    /// Start (or restart) the heartbeat task.
    ///
    /// Arming counts as a received beat. Any previous task is aborted before
    /// the new one is installed.
    pub fn arm_heartbeat(self: &Arc<Self>) -> Result<()> {
        let shared = self.require_shared()?;
        let handle = self.io_handle().ok_or_else(|| {
            SessionError::Custom("No runtime available for the heartbeat task".into())
        })?;

        shared.record_heartbeat();
        let period = self.config.heartbeat.interval;
        let connection = Arc::downgrade(self);

        let task = handle.spawn(affinity::scope(Actor::Io, async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(connection) = connection.upgrade() else {
                    break;
                };
                if !connection.heartbeat_tick() {
                    break;
                }
            }
        }));

        shared.replace_heartbeat_task(task.abort_handle());
        debug!(peer = %self.display_name, ?period, "Heartbeat armed");
        Ok(())
    }

    /// One heartbeat period. Returns false when the task should stop.
    pub fn heartbeat_tick(&self) -> bool {
        if self.closed.is_set() {
            return false;
        }
        let Some(shared) = self.shared.get() else {
            return false;
        };

        let heartbeat = &self.config.heartbeat;
        let since = shared.since_last_heartbeat();
        if is_expired(since, heartbeat.interval, heartbeat.max_missed) {
            global_metrics().liveness_timeout();
            warn!(peer = %self.display_name, ?since, "Peer stopped responding");
            self.fatal(&SessionError::StoppedResponding);
            return false;
        }

        self.send(builders::heartbeat()).is_ok()
    }
}
