//! # Warden Resource Monitor
//!
//! L3: a rolling buffer of resource snapshots per sandbox, with optional
//! thresholds that fan out `warning`/`critical` alerts to subscribed
//! listeners as usage approaches the ceiling.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_core::SandboxId;

/// Default number of snapshots retained per sandbox.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// A point-in-time resource usage reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Sandbox the snapshot was taken for.
    pub sandbox_id: SandboxId,
    /// CPU usage in millicores.
    pub cpu_millicores: u64,
    /// Memory usage in megabytes.
    pub memory_mb: u64,
    /// Disk usage in megabytes.
    pub disk_mb: u64,
    /// When the snapshot was recorded, in epoch milliseconds.
    pub timestamp_millis: i64,
}

/// A resource usage ceiling, same shape as [`ResourceSnapshot`] minus the
/// timestamp and sandbox id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    /// CPU ceiling in millicores.
    pub cpu_millicores: u64,
    /// Memory ceiling in megabytes.
    pub memory_mb: u64,
    /// Disk ceiling in megabytes.
    pub disk_mb: u64,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Usage ratio >= 80%.
    Warning,
    /// Usage ratio >= 95%.
    Critical,
}

/// A threshold-crossing alert for a single metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Sandbox the alert pertains to.
    pub sandbox_id: SandboxId,
    /// Metric name: `"cpu_millicores"`, `"memory_mb"`, or `"disk_mb"`.
    pub metric: &'static str,
    /// Observed value.
    pub current: u64,
    /// Configured ceiling.
    pub threshold: u64,
    /// Warning or critical.
    pub severity: AlertSeverity,
    /// When the alert fired, in epoch milliseconds.
    pub timestamp_millis: i64,
}

/// Average/peak rollup over a sandbox's retained history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rollup {
    /// Average CPU usage in millicores.
    pub avg_cpu_millicores: f64,
    /// Peak CPU usage in millicores.
    pub peak_cpu_millicores: u64,
    /// Average memory usage in megabytes.
    pub avg_memory_mb: f64,
    /// Peak memory usage in megabytes.
    pub peak_memory_mb: u64,
    /// Average disk usage in megabytes.
    pub avg_disk_mb: f64,
    /// Peak disk usage in megabytes.
    pub peak_disk_mb: u64,
}

struct SandboxState {
    history: VecDeque<ResourceSnapshot>,
    threshold: Option<Threshold>,
}

type Listener = Arc<dyn Fn(&Alert) + Send + Sync>;

/// Owns every sandbox's rolling snapshot buffer and threshold.
pub struct ResourceMonitor {
    sandboxes: RwLock<HashMap<SandboxId, SandboxState>>,
    history_capacity: usize,
    listeners: Arc<RwLock<Vec<Option<Listener>>>>,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ResourceMonitor {
    /// Creates a monitor retaining up to `history_capacity` snapshots per
    /// sandbox.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            sandboxes: RwLock::new(HashMap::new()),
            history_capacity,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Sets (or replaces) the threshold for a sandbox.
    pub fn set_threshold(&self, sandbox_id: SandboxId, threshold: Threshold) {
        let mut sandboxes = self.sandboxes.write();
        sandboxes
            .entry(sandbox_id)
            .or_insert_with(|| SandboxState {
                history: VecDeque::new(),
                threshold: None,
            })
            .threshold = Some(threshold);
    }

    /// Records a new snapshot, evicting the oldest if the history is at
    /// capacity, and emits any threshold alerts it crosses.
    pub fn record_snapshot(&self, snapshot: ResourceSnapshot) {
        let alerts = {
            let mut sandboxes = self.sandboxes.write();
            let state = sandboxes
                .entry(snapshot.sandbox_id)
                .or_insert_with(|| SandboxState {
                    history: VecDeque::new(),
                    threshold: None,
                });
            if state.history.len() >= self.history_capacity {
                state.history.pop_front();
            }
            state.history.push_back(snapshot);

            state
                .threshold
                .map(|threshold| {
                    self.compute_alerts(snapshot, threshold)
                })
                .unwrap_or_default()
        };

        for alert in &alerts {
            tracing::warn!(
                sandbox_id = %alert.sandbox_id,
                metric = alert.metric,
                current = alert.current,
                threshold = alert.threshold,
                "resource threshold alert"
            );
            for listener in self.listeners.read().iter().flatten() {
                listener(alert);
            }
        }
    }

    fn compute_alerts(&self, snapshot: ResourceSnapshot, threshold: Threshold) -> Vec<Alert> {
        let metrics: [(&'static str, u64, u64); 3] = [
            ("cpu_millicores", snapshot.cpu_millicores, threshold.cpu_millicores),
            ("memory_mb", snapshot.memory_mb, threshold.memory_mb),
            ("disk_mb", snapshot.disk_mb, threshold.disk_mb),
        ];

        metrics
            .into_iter()
            .filter_map(|(metric, current, limit)| {
                if limit == 0 {
                    return None;
                }
                let ratio = current as f64 / limit as f64;
                let severity = if ratio >= 0.95 {
                    Some(AlertSeverity::Critical)
                } else if ratio >= 0.80 {
                    Some(AlertSeverity::Warning)
                } else {
                    None
                };
                severity.map(|severity| Alert {
                    sandbox_id: snapshot.sandbox_id,
                    metric,
                    current,
                    threshold: limit,
                    severity,
                    timestamp_millis: snapshot.timestamp_millis,
                })
            })
            .collect()
    }

    /// Returns the newest `n` snapshots for a sandbox, newest first.
    #[must_use]
    pub fn snapshots(&self, sandbox_id: SandboxId, n: usize) -> Vec<ResourceSnapshot> {
        self.sandboxes
            .read()
            .get(&sandbox_id)
            .map(|state| state.history.iter().rev().take(n).copied().collect())
            .unwrap_or_default()
    }

    /// Computes the average/peak rollup over a sandbox's retained history.
    #[must_use]
    pub fn rollup(&self, sandbox_id: SandboxId) -> Option<Rollup> {
        let sandboxes = self.sandboxes.read();
        let history = &sandboxes.get(&sandbox_id)?.history;
        if history.is_empty() {
            return None;
        }
        let len = history.len() as f64;
        let (sum_cpu, peak_cpu, sum_mem, peak_mem, sum_disk, peak_disk) = history.iter().fold(
            (0u64, 0u64, 0u64, 0u64, 0u64, 0u64),
            |(sc, pc, sm, pm, sd, pd), snap| {
                (
                    sc + snap.cpu_millicores,
                    pc.max(snap.cpu_millicores),
                    sm + snap.memory_mb,
                    pm.max(snap.memory_mb),
                    sd + snap.disk_mb,
                    pd.max(snap.disk_mb),
                )
            },
        );
        Some(Rollup {
            avg_cpu_millicores: sum_cpu as f64 / len,
            peak_cpu_millicores: peak_cpu,
            avg_memory_mb: sum_mem as f64 / len,
            peak_memory_mb: peak_mem,
            avg_disk_mb: sum_disk as f64 / len,
            peak_disk_mb: peak_disk,
        })
    }

    /// Removes a sandbox's snapshots and threshold entirely.
    pub fn remove(&self, sandbox_id: SandboxId) {
        self.sandboxes.write().remove(&sandbox_id);
    }

    /// Sums the latest snapshot per sandbox across every tracked sandbox.
    #[must_use]
    pub fn aggregated_metrics(&self) -> ResourceSnapshotTotals {
        let sandboxes = self.sandboxes.read();
        sandboxes.values().fold(
            ResourceSnapshotTotals::default(),
            |mut totals, state| {
                if let Some(latest) = state.history.back() {
                    totals.cpu_millicores += latest.cpu_millicores;
                    totals.memory_mb += latest.memory_mb;
                    totals.disk_mb += latest.disk_mb;
                    totals.sandbox_count += 1;
                }
                totals
            },
        )
    }

    /// Subscribes to alert events; returns an idempotent unsubscribe
    /// closure.
    pub fn subscribe(&self, listener: Listener) -> impl FnOnce() + Send + Sync + 'static {
        let mut listeners = self.listeners.write();
        let idx = listeners.len();
        listeners.push(Some(listener));
        let listeners = self.listeners.clone();
        move || {
            if let Some(slot) = listeners.write().get_mut(idx) {
                *slot = None;
            }
        }
    }
}

/// Sum of the latest snapshot across all tracked sandboxes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSnapshotTotals {
    /// Total CPU usage in millicores.
    pub cpu_millicores: u64,
    /// Total memory usage in megabytes.
    pub memory_mb: u64,
    /// Total disk usage in megabytes.
    pub disk_mb: u64,
    /// Number of sandboxes contributing to the total.
    pub sandbox_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(sandbox_id: SandboxId, cpu: u64, mem: u64, disk: u64, ts: i64) -> ResourceSnapshot {
        ResourceSnapshot {
            sandbox_id,
            cpu_millicores: cpu,
            memory_mb: mem,
            disk_mb: disk,
            timestamp_millis: ts,
        }
    }

    #[test]
    fn snapshots_returns_newest_n_first() {
        let monitor = ResourceMonitor::default();
        let id = SandboxId::v4();
        for i in 0..5 {
            monitor.record_snapshot(snap(id, i, i, i, i as i64));
        }
        let latest = monitor.snapshots(id, 2);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].cpu_millicores, 4);
        assert_eq!(latest[1].cpu_millicores, 3);
    }

    #[test]
    fn history_is_bounded_by_capacity() {
        let monitor = ResourceMonitor::new(3);
        let id = SandboxId::v4();
        for i in 0..10 {
            monitor.record_snapshot(snap(id, i, 0, 0, i as i64));
        }
        assert_eq!(monitor.snapshots(id, 100).len(), 3);
    }

    #[test]
    fn warning_fires_at_80_percent() {
        let monitor = ResourceMonitor::default();
        let id = SandboxId::v4();
        monitor.set_threshold(
            id,
            Threshold {
                cpu_millicores: 1000,
                memory_mb: 1000,
                disk_mb: 1000,
            },
        );
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        let _unsub = monitor.subscribe(Arc::new(move |alert: &Alert| {
            fired_clone.lock().unwrap().push(alert.severity);
        }));
        monitor.record_snapshot(snap(id, 800, 100, 100, 1));
        let got = fired.lock().unwrap().clone();
        assert_eq!(got, vec![AlertSeverity::Warning]);
    }

    #[test]
    fn critical_fires_at_95_percent() {
        let monitor = ResourceMonitor::default();
        let id = SandboxId::v4();
        monitor.set_threshold(
            id,
            Threshold {
                cpu_millicores: 1000,
                memory_mb: 1000,
                disk_mb: 1000,
            },
        );
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        let _unsub = monitor.subscribe(Arc::new(move |alert: &Alert| {
            fired_clone.lock().unwrap().push(alert.severity);
        }));
        monitor.record_snapshot(snap(id, 950, 100, 100, 1));
        assert_eq!(fired.lock().unwrap().clone(), vec![AlertSeverity::Critical]);
    }

    #[test]
    fn below_80_percent_fires_no_alert() {
        let monitor = ResourceMonitor::default();
        let id = SandboxId::v4();
        monitor.set_threshold(
            id,
            Threshold {
                cpu_millicores: 1000,
                memory_mb: 1000,
                disk_mb: 1000,
            },
        );
        let fired = Arc::new(std::sync::Mutex::new(0usize));
        let fired_clone = fired.clone();
        let _unsub = monitor.subscribe(Arc::new(move |_alert: &Alert| {
            *fired_clone.lock().unwrap() += 1;
        }));
        monitor.record_snapshot(snap(id, 100, 100, 100, 1));
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn remove_clears_snapshots_and_threshold() {
        let monitor = ResourceMonitor::default();
        let id = SandboxId::v4();
        monitor.set_threshold(
            id,
            Threshold {
                cpu_millicores: 1,
                memory_mb: 1,
                disk_mb: 1,
            },
        );
        monitor.record_snapshot(snap(id, 1, 1, 1, 1));
        monitor.remove(id);
        assert!(monitor.snapshots(id, 10).is_empty());
    }

    #[test]
    fn aggregated_metrics_sums_latest_snapshot_per_sandbox() {
        let monitor = ResourceMonitor::default();
        let a = SandboxId::v4();
        let b = SandboxId::v4();
        monitor.record_snapshot(snap(a, 100, 50, 10, 1));
        monitor.record_snapshot(snap(a, 200, 60, 20, 2));
        monitor.record_snapshot(snap(b, 300, 70, 30, 1));
        let totals = monitor.aggregated_metrics();
        assert_eq!(totals.cpu_millicores, 500);
        assert_eq!(totals.memory_mb, 130);
        assert_eq!(totals.disk_mb, 50);
        assert_eq!(totals.sandbox_count, 2);
    }

    #[test]
    fn rollup_computes_average_and_peak() {
        let monitor = ResourceMonitor::default();
        let id = SandboxId::v4();
        monitor.record_snapshot(snap(id, 100, 10, 1, 1));
        monitor.record_snapshot(snap(id, 300, 30, 3, 2));
        let rollup = monitor.rollup(id).unwrap();
        assert_eq!(rollup.avg_cpu_millicores, 200.0);
        assert_eq!(rollup.peak_cpu_millicores, 300);
    }
}
