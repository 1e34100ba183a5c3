//! Periodic sweep of expired sessions and tokens.

use super::AuthManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest interval the worker will tick at.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Entries removed by one in-memory sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Expired sessions removed.
    pub sessions: usize,
    /// Expired API tokens removed.
    pub api_tokens: usize,
}

/// Background task that sweeps an [`AuthManager`] on a fixed interval.
///
/// Stop it with [`CleanupWorker::shutdown`]. Dropping the worker also ends
/// the loop.
#[derive(Debug)]
pub struct CleanupWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CleanupWorker {
    /// Spawn the sweep loop on the current runtime.
    #[must_use]
    pub fn spawn(manager: Arc<AuthManager>, interval: Duration) -> Self {
        Self::spawn_with_floor(manager, interval, MIN_INTERVAL)
    }

    fn spawn_with_floor(manager: Arc<AuthManager>, interval: Duration, floor: Duration) -> Self {
        let period = interval.max(floor);
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(&manager).await,
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Session cleanup worker stopped");
        });

        tracing::info!(interval_secs = period.as_secs(), "Session cleanup worker started");
        Self { shutdown, handle }
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Session cleanup worker ended abnormally");
        }
    }
}

async fn sweep(manager: &AuthManager) {
    let report = manager.cleanup();
    if report.sessions > 0 || report.api_tokens > 0 {
        tracing::debug!(
            sessions = report.sessions,
            api_tokens = report.api_tokens,
            "Removed expired entries"
        );
    }

    match manager.cleanup_persistent().await {
        Ok(0) => {}
        Ok(purged) => tracing::debug!(purged, "Purged expired rows from session store"),
        Err(e) => tracing::warn!(error = %e, "Failed to purge session store"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminCredentialsConfig, AuthConfig, PasswordConfig};
    use crate::password::PasswordHasher;

    fn manager(ttl: Duration) -> Arc<AuthManager> {
        let config = AuthConfig {
            admin: AdminCredentialsConfig {
                username: "admin".to_string(),
                ..AdminCredentialsConfig::default()
            },
            ..AuthConfig::default()
        };
        let hasher = PasswordHasher::with_params(&PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            hash_length: 32,
        })
        .unwrap();
        Arc::new(AuthManager::new(&config, hasher).with_session_duration(ttl))
    }

    #[tokio::test]
    async fn test_worker_sweeps_expired_sessions() {
        let manager = manager(Duration::from_millis(30));
        manager.create_session("admin", "ip", "ua").await.unwrap();
        assert_eq!(manager.session_count(), 1);

        let worker = CleanupWorker::spawn_with_floor(
            Arc::clone(&manager),
            Duration::from_millis(20),
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.session_count(), 0);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let manager = manager(Duration::from_secs(60));
        let worker = CleanupWorker::spawn(Arc::clone(&manager), Duration::from_secs(3600));

        tokio::time::timeout(Duration::from_secs(1), worker.shutdown())
            .await
            .unwrap();
        assert_eq!(Arc::strong_count(&manager), 1);
    }
}
