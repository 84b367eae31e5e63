//! Cached daemon-health gate.
//!
//! A background task polls a [`StatusProbe`] on an interval and caches
//! the result; the hook hot path only ever reads the cache, so an
//! inbound hook never performs I/O to decide whether the daemon is
//! ready. The poll loop checks the shutdown flag before every
//! reschedule, so `shutdown()` cannot be raced into a resurrected
//! timer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// A snapshot of daemon readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    /// Whether hooks should run at all.
    pub is_ready: bool,
    /// Optional human message.
    pub message: Option<String>,
    /// Status word ("running", "not_running", "starting", ...).
    pub status: String,
    /// Error detail when not ready.
    pub error: Option<String>,
}

impl DaemonStatus {
    /// A ready status.
    #[must_use]
    pub fn ready() -> Self {
        Self {
            is_ready: true,
            message: None,
            status: "running".to_string(),
            error: None,
        }
    }

    /// A not-ready status with an error.
    #[must_use]
    pub fn not_ready(status: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            is_ready: false,
            message: None,
            status: status.into(),
            error: Some(error.into()),
        }
    }
}

impl Default for DaemonStatus {
    fn default() -> Self {
        // Until the first probe completes, the daemon counts as down;
        // hooks fail open rather than run against a half-started daemon.
        Self::not_ready("not_running", "health probe has not run yet")
    }
}

/// Something that can report daemon readiness.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Check readiness. Must be cheap and bounded.
    async fn check(&self) -> DaemonStatus;
}

/// An always-ready probe (used inside the daemon process itself and in
/// tests).
#[derive(Debug, Clone, Default)]
pub struct AlwaysReady;

#[async_trait]
impl StatusProbe for AlwaysReady {
    async fn check(&self) -> DaemonStatus {
        DaemonStatus::ready()
    }
}

/// Background health poller with a lock-protected cache.
pub struct HealthMonitor {
    cache: Arc<Mutex<DaemonStatus>>,
    shutdown: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Start polling `probe` every `interval`. The first poll runs
    /// immediately.
    #[must_use]
    pub fn start(probe: Arc<dyn StatusProbe>, interval: Duration) -> Self {
        let cache = Arc::new(Mutex::new(DaemonStatus::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let loop_cache = Arc::clone(&cache);
        let loop_shutdown = Arc::clone(&shutdown);
        let task = tokio::spawn(async move {
            loop {
                let status = probe.check().await;
                {
                    let mut cached = loop_cache.lock().unwrap_or_else(PoisonError::into_inner);
                    *cached = status;
                }
                if loop_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(interval).await;
                // Re-check after the sleep so shutdown during the wait
                // does not schedule another probe.
                if loop_shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            debug!("health monitor loop exited");
        });

        Self {
            cache,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// A monitor that is permanently ready and never polls (tests, and
    /// in-process callers that bypass the gate).
    #[must_use]
    pub fn always_ready() -> Self {
        Self {
            cache: Arc::new(Mutex::new(DaemonStatus::ready())),
            shutdown: Arc::new(AtomicBool::new(true)),
            task: Mutex::new(None),
        }
    }

    /// Read the cached status. Never performs I/O.
    #[must_use]
    pub fn cached(&self) -> DaemonStatus {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop polling. Idempotent; no new tick is scheduled afterwards.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingProbe {
        calls: Arc<AtomicUsize>,
        ready: bool,
    }

    #[async_trait]
    impl StatusProbe for CountingProbe {
        async fn check(&self) -> DaemonStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ready {
                DaemonStatus::ready()
            } else {
                DaemonStatus::not_ready("not_running", "probe says no")
            }
        }
    }

    #[tokio::test]
    async fn test_first_poll_fills_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::start(
            Arc::new(CountingProbe {
                calls: Arc::clone(&calls),
                ready: true,
            }),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.cached().is_ready);
        assert!(calls.load(Ordering::SeqCst) >= 1);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_not_ready_is_cached() {
        let monitor = HealthMonitor::start(
            Arc::new(CountingProbe {
                calls: Arc::new(AtomicUsize::new(0)),
                ready: false,
            }),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = monitor.cached();
        assert!(!status.is_ready);
        assert_eq!(status.status, "not_running");
        assert_eq!(status.error.as_deref(), Some("probe says no"));
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::start(
            Arc::new(CountingProbe {
                calls: Arc::clone(&calls),
                ready: true,
            }),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.shutdown();
        let after_shutdown = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // No resurrection after shutdown.
        assert_eq!(calls.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn test_always_ready() {
        let monitor = HealthMonitor::always_ready();
        assert!(monitor.cached().is_ready);
    }
}
