//! API health tracking and the recovery prober.
//!
//! While the upstream is marked down, a single background task re-attempts
//! the initialize handshake on a fixed interval. The first success flips the
//! health flag back and pushes `notifications/tools/list_changed` downstream
//! so the local peer re-fetches its tool list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::mcp::protocol::{JsonRpcNotification, METHOD_INITIALIZE, METHOD_TOOLS_LIST_CHANGED};
use crate::mcp::transport::Message;
use crate::proxy::cache::ResponseCache;
use crate::upstream::UpstreamClient;

/// Interval between probe attempts while the API is down.
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 5000;

/// Shared health state.
///
/// Invariants: a prober only runs while unhealthy, and at most one prober
/// exists at any time (the slot mutex serializes activation).
#[derive(Debug)]
pub struct Health {
    healthy: AtomicBool,
    prober: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            prober: Mutex::new(None),
        }
    }
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Set the flag, returning the previous value.
    pub fn swap_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::SeqCst)
    }

    /// Whether a prober task is currently running.
    pub async fn prober_active(&self) -> bool {
        self.prober
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn a prober unless one is already running.
    pub async fn activate_prober<F>(&self, spawn: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut slot = self.prober.lock().await;
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return false;
        }
        *slot = Some(spawn());
        true
    }

    /// Abort and drop the active prober, if any.
    pub async fn deactivate_prober(&self) {
        if let Some(handle) = self.prober.lock().await.take() {
            handle.abort();
        }
    }

    /// Drop the prober slot without aborting (the prober retires itself).
    async fn clear_prober_slot(&self) {
        self.prober.lock().await.take();
    }
}

/// Prober task body: re-mint on every tick until one succeeds.
pub async fn prober_loop(
    upstream: Arc<UpstreamClient>,
    cache: Arc<ResponseCache>,
    health: Arc<Health>,
    out: mpsc::Sender<Message>,
    interval: Duration,
) {
    info!("Health prober started (interval {:?})", interval);
    loop {
        sleep(interval).await;
        match Arc::clone(&upstream).remint().await {
            Ok(body) => {
                cache.store(METHOD_INITIALIZE, &body).await;
                if !health.swap_healthy(true) {
                    info!("Upstream recovered; notifying local peer");
                    let notification = JsonRpcNotification::new(METHOD_TOOLS_LIST_CHANGED);
                    let _ = out.send(Message::Notification(notification)).await;
                }
                health.clear_prober_slot().await;
                return;
            }
            Err(e) => {
                debug!("Health probe failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_starts_healthy() {
        let health = Health::new();
        assert!(health.is_healthy());
    }

    #[test]
    fn test_swap_returns_previous() {
        let health = Health::new();
        assert!(health.swap_healthy(false));
        assert!(!health.swap_healthy(false));
        assert!(!health.swap_healthy(true));
        assert!(health.is_healthy());
    }

    #[tokio::test]
    async fn test_single_prober_invariant() {
        let health = Health::new();
        health.swap_healthy(false);

        assert!(
            health
                .activate_prober(|| tokio::spawn(async { sleep(Duration::from_secs(60)).await }))
                .await
        );
        assert!(health.prober_active().await);

        // Second activation is refused while the first runs.
        assert!(
            !health
                .activate_prober(|| tokio::spawn(async {}))
                .await
        );

        health.deactivate_prober().await;
        assert!(!health.prober_active().await);
    }

    #[tokio::test]
    async fn test_finished_prober_frees_the_slot() {
        let health = Health::new();
        health.swap_healthy(false);

        health.activate_prober(|| tokio::spawn(async {})).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!health.prober_active().await);
        assert!(health.activate_prober(|| tokio::spawn(async {})).await);
    }
}
