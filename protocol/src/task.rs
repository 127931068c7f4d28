//! Periodic background tasks with an explicit stop handle.
//!
//! Every scheduled job in the protocol (nonce sweeps, index publication)
//! runs as a tokio task that watches a `tokio::sync::watch` channel and
//! exits at the next tick boundary once the channel flips to `true`.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a running periodic task.
pub struct BackgroundTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// Run `tick` every `period` until shut down. The first tick fires one
    /// full period after spawning.
    pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                if *rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    changed = rx.changed() => {
                        // A dropped sender is a shutdown too.
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "background task stopped");
        });

        Self {
            name,
            shutdown: tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the task and wait for it to exit. Calling this twice is fine.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
