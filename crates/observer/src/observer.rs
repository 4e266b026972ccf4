//! [`Observer`]: attaches to a sandbox manager (and, optionally, an
//! isolation manager) purely as a subscriber — it never mutates either and
//! is safe to drop and re-create at will.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use warden_core::{Clock, SandboxId, SystemClock};
use warden_isolation::IsolationManager;
use warden_sandbox::SandboxManager;
use warden_sandbox::events::SandboxEvent;

/// Default number of entries kept in the recent-events ring.
pub const DEFAULT_RING_CAPACITY: usize = 512;
/// Default count of error-severity events within the window that marks the
/// observer "unhealthy".
pub const DEFAULT_UNHEALTHY_THRESHOLD: usize = 5;
/// Default width of the unhealthy detection window.
pub const DEFAULT_UNHEALTHY_WINDOW_MILLIS: i64 = 60_000;

/// A projection of a manager or isolation-manager event, stamped with the
/// time the observer received it.
#[derive(Debug, Clone, PartialEq)]
pub enum RecentEvent {
    /// A sandbox finished booting.
    Spawned {
        /// The sandbox's id.
        id: SandboxId,
        /// Receipt time, epoch milliseconds.
        timestamp_millis: i64,
    },
    /// A sandbox was paused.
    Paused {
        /// The sandbox's id.
        id: SandboxId,
        /// Receipt time, epoch milliseconds.
        timestamp_millis: i64,
    },
    /// A sandbox was resumed.
    Resumed {
        /// The sandbox's id.
        id: SandboxId,
        /// Receipt time, epoch milliseconds.
        timestamp_millis: i64,
    },
    /// A sandbox was terminated.
    Terminated {
        /// The sandbox's id.
        id: SandboxId,
        /// Receipt time, epoch milliseconds.
        timestamp_millis: i64,
    },
    /// A task finished executing.
    TaskExecuted {
        /// The sandbox the task ran in.
        id: SandboxId,
        /// The task's correlation id.
        task_id: String,
        /// Whether the task succeeded.
        success: bool,
        /// Receipt time, epoch milliseconds.
        timestamp_millis: i64,
    },
    /// A manager-level or sandbox-level error.
    Error {
        /// The sandbox involved, if any.
        id: Option<SandboxId>,
        /// Human-readable description.
        message: String,
        /// Receipt time, epoch milliseconds.
        timestamp_millis: i64,
    },
    /// A capability was denied by the isolation manager.
    Violation {
        /// The sandbox the violation occurred in.
        id: SandboxId,
        /// The capability that was denied.
        capability: String,
        /// Receipt time, epoch milliseconds.
        timestamp_millis: i64,
    },
}

impl RecentEvent {
    /// The sandbox this event pertains to, if any.
    #[must_use]
    pub fn sandbox_id(&self) -> Option<SandboxId> {
        match self {
            Self::Spawned { id, .. }
            | Self::Paused { id, .. }
            | Self::Resumed { id, .. }
            | Self::Terminated { id, .. }
            | Self::TaskExecuted { id, .. }
            | Self::Violation { id, .. } => Some(*id),
            Self::Error { id, .. } => *id,
        }
    }

    /// `true` for events that count toward the unhealthy-density window.
    #[must_use]
    pub fn is_error_severity(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Violation { .. })
            || matches!(self, Self::TaskExecuted { success: false, .. })
    }

    /// Receipt timestamp, epoch milliseconds.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        match self {
            Self::Spawned { timestamp_millis, .. }
            | Self::Paused { timestamp_millis, .. }
            | Self::Resumed { timestamp_millis, .. }
            | Self::Terminated { timestamp_millis, .. }
            | Self::TaskExecuted { timestamp_millis, .. }
            | Self::Error { timestamp_millis, .. }
            | Self::Violation { timestamp_millis, .. } => *timestamp_millis,
        }
    }
}

/// Rollup metrics derived purely from observed events (`spec.md` §4.15).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObserverMetrics {
    /// Total sandboxes spawned since the observer attached.
    pub total_spawned: u64,
    /// Total sandboxes terminated since the observer attached.
    pub total_terminated: u64,
    /// `total_spawned - total_terminated`.
    pub currently_running: u64,
    /// Spawn counts keyed by backend kind (`"MicroVm"`, `"FullVm"`,
    /// `"Container"`).
    pub provider_breakdown: HashMap<String, u64>,
    /// Cumulative capability-denial count reported by the isolation
    /// manager, if one is attached.
    pub security_violations: u64,
}

/// Health signal emitted when the error-severity event density within the
/// window exceeds the configured threshold (`spec.md` §7: "Observers may
/// report a `health-warning` event").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// Error-severity event density crossed the threshold.
    Warning,
}

struct Inner {
    clock: Arc<dyn Clock>,
    metrics: RwLock<ObserverMetrics>,
    ring: RwLock<VecDeque<RecentEvent>>,
    ring_capacity: usize,
    error_timestamps: RwLock<VecDeque<i64>>,
    unhealthy_threshold: usize,
    unhealthy_window_millis: i64,
    health_tx: broadcast::Sender<HealthEvent>,
}

impl Inner {
    fn record(&self, event: RecentEvent) {
        match &event {
            RecentEvent::Spawned { .. } => {
                let mut m = self.metrics.write();
                m.total_spawned += 1;
                m.currently_running = m.total_spawned.saturating_sub(m.total_terminated);
            }
            RecentEvent::Terminated { .. } => {
                let mut m = self.metrics.write();
                m.total_terminated += 1;
                m.currently_running = m.total_spawned.saturating_sub(m.total_terminated);
            }
            RecentEvent::Violation { .. } => {
                self.metrics.write().security_violations += 1;
            }
            _ => {}
        }

        if event.is_error_severity() {
            let now = event.timestamp_millis();
            let mut timestamps = self.error_timestamps.write();
            timestamps.push_back(now);
            while timestamps
                .front()
                .is_some_and(|t| now - *t > self.unhealthy_window_millis)
            {
                timestamps.pop_front();
            }
            if timestamps.len() >= self.unhealthy_threshold {
                let _ = self.health_tx.send(HealthEvent::Warning);
            }
        }

        let mut ring = self.ring.write();
        ring.push_front(event);
        ring.truncate(self.ring_capacity);
    }

    fn record_provider(&self, backend: &str) {
        *self
            .metrics
            .write()
            .provider_breakdown
            .entry(backend.to_string())
            .or_insert(0) += 1;
    }

    fn is_unhealthy(&self) -> bool {
        let now = self.clock.now_millis();
        let mut timestamps = self.error_timestamps.write();
        while timestamps
            .front()
            .is_some_and(|t| now - *t > self.unhealthy_window_millis)
        {
            timestamps.pop_front();
        }
        timestamps.len() >= self.unhealthy_threshold
    }
}

/// Subscribes to a sandbox manager's (and optionally an isolation
/// manager's) event stream and derives metrics from it. Re-attaching
/// detaches whatever was previously attached to that slot.
pub struct Observer {
    inner: Arc<Inner>,
    sandbox_task: RwLock<Option<JoinHandle<()>>>,
    isolation_unsubscribe: RwLock<Option<Box<dyn FnOnce() + Send + Sync>>>,
}

impl Observer {
    /// Creates an observer with default ring capacity and unhealthy
    /// detection parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(
            DEFAULT_RING_CAPACITY,
            DEFAULT_UNHEALTHY_THRESHOLD,
            DEFAULT_UNHEALTHY_WINDOW_MILLIS,
        )
    }

    /// Creates an observer with explicit ring capacity and unhealthy
    /// detection parameters.
    #[must_use]
    pub fn with_config(
        ring_capacity: usize,
        unhealthy_threshold: usize,
        unhealthy_window_millis: i64,
    ) -> Self {
        let (health_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                clock: Arc::new(SystemClock),
                metrics: RwLock::new(ObserverMetrics::default()),
                ring: RwLock::new(VecDeque::new()),
                ring_capacity,
                error_timestamps: RwLock::new(VecDeque::new()),
                unhealthy_threshold,
                unhealthy_window_millis,
                health_tx,
            }),
            sandbox_task: RwLock::new(None),
            isolation_unsubscribe: RwLock::new(None),
        }
    }

    /// Attaches to a sandbox manager's event stream. Detaches any manager
    /// previously attached to this observer.
    pub fn attach(&self, manager: Arc<SandboxManager>) {
        if let Some(handle) = self.sandbox_task.write().take() {
            handle.abort();
        }
        let mut rx = manager.subscribe();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let now = inner.clock.now_millis();
                        match event {
                            SandboxEvent::Ready => {}
                            SandboxEvent::Spawned { id } => {
                                if let Some(instance) = manager.get(id).await {
                                    inner.record_provider(&format!("{:?}", instance.spec.backend));
                                }
                                inner.record(RecentEvent::Spawned { id, timestamp_millis: now });
                            }
                            SandboxEvent::Paused { id } => {
                                inner.record(RecentEvent::Paused { id, timestamp_millis: now });
                            }
                            SandboxEvent::Resumed { id } => {
                                inner.record(RecentEvent::Resumed { id, timestamp_millis: now });
                            }
                            SandboxEvent::Terminated { id } => {
                                inner.record(RecentEvent::Terminated { id, timestamp_millis: now });
                            }
                            SandboxEvent::TaskExecuted { id, task_id, success } => {
                                inner.record(RecentEvent::TaskExecuted {
                                    id,
                                    task_id,
                                    success,
                                    timestamp_millis: now,
                                });
                            }
                            SandboxEvent::Error { id, message } => {
                                inner.record(RecentEvent::Error { id, message, timestamp_millis: now });
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.sandbox_task.write() = Some(handle);
    }

    /// Attaches to an isolation manager's violation stream. Detaches any
    /// isolation manager previously attached to this observer.
    pub fn attach_isolation(&self, isolation: &IsolationManager) {
        if let Some(unsubscribe) = self.isolation_unsubscribe.write().take() {
            unsubscribe();
        }
        let inner = self.inner.clone();
        let unsubscribe = isolation.subscribe(Arc::new(move |violation| {
            inner.record(RecentEvent::Violation {
                id: violation.sandbox_id,
                capability: violation.capability.clone(),
                timestamp_millis: violation.timestamp_millis,
            });
        }));
        *self.isolation_unsubscribe.write() = Some(Box::new(unsubscribe));
    }

    /// Detaches from both the sandbox manager and, if attached, the
    /// isolation manager. Safe to call when nothing is attached.
    pub fn detach(&self) {
        if let Some(handle) = self.sandbox_task.write().take() {
            handle.abort();
        }
        if let Some(unsubscribe) = self.isolation_unsubscribe.write().take() {
            unsubscribe();
        }
    }

    /// Current rollup metrics.
    #[must_use]
    pub fn metrics(&self) -> ObserverMetrics {
        self.inner.metrics.read().clone()
    }

    /// The most recent events, newest-first, up to the ring capacity.
    #[must_use]
    pub fn recent_events(&self) -> Vec<RecentEvent> {
        self.inner.ring.read().iter().cloned().collect()
    }

    /// `true` if error-severity events within the window meet or exceed
    /// the unhealthy threshold.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        self.inner.is_unhealthy()
    }

    /// Subscribes to `health-warning` notifications.
    #[must_use]
    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.inner.health_tx.subscribe()
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_isolation::IsolationTier;
    use warden_network_policy::NetworkPolicyManager;
    use warden_resource_monitor::ResourceMonitor;
    use warden_sandbox::manager::SandboxManagerConfig;

    fn manager() -> Arc<SandboxManager> {
        let clock = Arc::new(SystemClock);
        let isolation = Arc::new(IsolationManager::new(clock.clone()));
        let network = Arc::new(NetworkPolicyManager::default());
        let resource_monitor = Arc::new(ResourceMonitor::default());
        let manager = SandboxManager::new(
            SandboxManagerConfig::default(),
            isolation,
            network,
            resource_monitor,
        );
        manager.initialize();
        Arc::new(manager)
    }

    #[tokio::test]
    async fn attach_counts_spawned_and_terminated() {
        let manager = manager();
        let observer = Observer::new();
        observer.attach(manager.clone());

        let spec = crate::bridge::tests::test_spec("obs-1");
        let id = manager.spawn(spec).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.terminate(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let metrics = observer.metrics();
        assert_eq!(metrics.total_spawned, 1);
        assert_eq!(metrics.total_terminated, 1);
        assert_eq!(metrics.currently_running, 0);
    }

    #[tokio::test]
    async fn isolation_violations_increment_security_counter() {
        let clock = Arc::new(SystemClock);
        let isolation = IsolationManager::new(clock);
        let observer = Observer::new();
        observer.attach_isolation(&isolation);

        let id = warden_core::SandboxId::v4();
        isolation.create_context(id, IsolationTier::Ultra);
        isolation.enforce_capability(id, "CAP_SYS_ADMIN", "test");

        assert_eq!(observer.metrics().security_violations, 1);
    }

    #[test]
    fn unhealthy_requires_threshold_within_window() {
        let observer = Observer::with_config(16, 2, 1000);
        assert!(!observer.is_unhealthy());
        observer.inner.record(RecentEvent::Error {
            id: None,
            message: "a".into(),
            timestamp_millis: 0,
        });
        assert!(!observer.is_unhealthy());
        observer.inner.record(RecentEvent::Error {
            id: None,
            message: "b".into(),
            timestamp_millis: 10,
        });
        assert!(observer.is_unhealthy());
    }

    #[test]
    fn recent_events_ring_truncates_to_capacity() {
        let observer = Observer::with_config(3, 100, 1000);
        for i in 0..5 {
            observer.inner.record(RecentEvent::Error {
                id: None,
                message: format!("e{i}"),
                timestamp_millis: i,
            });
        }
        assert_eq!(observer.recent_events().len(), 3);
    }
}
