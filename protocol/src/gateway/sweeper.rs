//! Background idle-connection sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::manager::ConnectionManager;

/// Periodically calls [`ConnectionManager::evict_idle`] until stopped.
pub struct IdleSweeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl IdleSweeper {
    /// Spawns the sweep loop. The first sweep runs one `interval` from now.
    pub fn spawn(manager: Arc<ConnectionManager>, interval: Duration, max_age: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_ms = interval.as_millis() as u64,
                max_age_ms = max_age.as_millis() as u64,
                "idle sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !manager.is_connected() {
                            break;
                        }
                        let evicted = manager.evict_idle(max_age).await;
                        debug!(evicted, cached = manager.cached_connections(), "idle sweep");
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("idle sweeper stopped");
        });

        Self { shutdown, task }
    }

    /// Spawns with the manager's configured interval and idle timeout.
    pub fn from_config(manager: Arc<ConnectionManager>) -> Self {
        let cache = manager.config().cache;
        Self::spawn(manager, cache.sweep_interval, cache.idle_timeout)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signals the loop to exit and waits for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
