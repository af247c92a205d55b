//! Periodic liveness signal to the hub.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::protocol::Heartbeat;
use crate::sync::lock_ignore_poison;
use crate::{log_debug, log_warn, OutboundMessage, TransportPtr};

/// Owns the heartbeat task for one client.
///
/// At most one task runs at a time; `start` replaces any running task.
pub(crate) struct HeartbeatTask {
    // ---
    transport: TransportPtr,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatTask {
    // ---
    pub(crate) fn new(transport: TransportPtr, interval: Duration) -> Self {
        Self {
            transport,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Start emitting `{serviceName}` every interval. The first beat goes out
    /// one interval after start.
    ///
    /// Does nothing when the interval is zero.
    pub(crate) fn start(&self) {
        // ---
        if self.interval.is_zero() {
            log_debug!("{}: heartbeats disabled", self.transport.service_name());
            return;
        }

        let transport = self.transport.clone();
        let period = self.interval;
        let first = Instant::now() + period;

        let task = tokio::spawn(async move {
            // ---
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let beat = OutboundMessage::Heartbeat(Heartbeat {
                    service_name: transport.service_name().to_string(),
                });
                if let Err(_err) = transport.emit(beat).await {
                    log_warn!("{}: heartbeat emit failed: {_err}", transport.service_name());
                }
            }
        });

        let previous = lock_ignore_poison(&self.task).replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        log_debug!(
            "{}: heartbeats started every {period:?}",
            self.transport.service_name()
        );
    }

    pub(crate) fn stop(&self) {
        // ---
        let task = lock_ignore_poison(&self.task).take();
        if let Some(task) = task {
            task.abort();
            log_debug!("{}: heartbeats stopped", self.transport.service_name());
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        lock_ignore_poison(&self.task)
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.stop();
    }
}
