//! [`HypercoreBridge`]: wraps an [`Observer`] with an append-only event
//! store, filtered to whichever sandboxes the bridge is currently attached
//! to. Modeled on `nebula-telemetry`'s broadcast-then-project `EventBus`,
//! but durable (append-only `Vec`) rather than fire-and-forget.

use std::sync::Arc;

use parking_lot::RwLock;
use warden_core::SandboxId;
use warden_sandbox::SandboxManager;

use crate::observer::{Observer, ObserverMetrics, RecentEvent};

/// One append-only entry in the bridge's store.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEntry {
    /// Sequence number, assigned on append.
    pub sequence: u64,
    /// The projected event.
    pub event: RecentEvent,
}

/// An append-only store of observer events, filtered to sandboxes the
/// bridge has attached to. Events without a sandbox id (manager-wide
/// errors) always pass the filter.
pub struct HypercoreBridge {
    observer: Observer,
    attached: RwLock<Option<SandboxId>>,
    store: RwLock<Vec<BridgeEntry>>,
    next_sequence: RwLock<u64>,
}

impl HypercoreBridge {
    /// Creates a bridge around a fresh [`Observer`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            observer: Observer::new(),
            attached: RwLock::new(None),
            store: RwLock::new(Vec::new()),
            next_sequence: RwLock::new(0),
        }
    }

    /// Attaches to a sandbox manager, filtering the store to events for
    /// `sandbox_id` (plus sandbox-less events, which always pass).
    /// Re-attaching detaches whatever manager was previously attached.
    pub fn attach(&self, manager: Arc<SandboxManager>, sandbox_id: SandboxId) {
        self.observer.attach(manager);
        *self.attached.write() = Some(sandbox_id);
    }

    /// Detaches from the current manager. The store retains everything
    /// already appended.
    pub fn detach(&self) {
        self.observer.detach();
        *self.attached.write() = None;
    }

    /// Drains any events the observer has accumulated since the last
    /// drain and appends the ones that pass the sandbox filter. Call this
    /// periodically, or before reading the store, to keep it current.
    pub fn sync(&self) {
        let attached = *self.attached.read();
        let mut store = self.store.write();
        let mut sequence = self.next_sequence.write();
        // `recent_events()` is newest-first; walk it oldest-first so
        // sequence numbers increase with time.
        for event in self.observer.recent_events().into_iter().rev() {
            let passes = match (attached, event.sandbox_id()) {
                (Some(target), Some(id)) => target == id,
                (_, None) => true,
                (None, Some(_)) => false,
            };
            if !passes {
                continue;
            }
            if store.iter().any(|e| e.event == event) {
                continue;
            }
            store.push(BridgeEntry { sequence: *sequence, event });
            *sequence += 1;
        }
    }

    /// Every stored entry, oldest first.
    #[must_use]
    pub fn read_all(&self) -> Vec<BridgeEntry> {
        self.store.read().clone()
    }

    /// Stored entries for a specific sandbox, oldest first.
    #[must_use]
    pub fn read_by_sandbox(&self, sandbox_id: SandboxId) -> Vec<BridgeEntry> {
        self.store
            .read()
            .iter()
            .filter(|e| e.event.sandbox_id() == Some(sandbox_id))
            .cloned()
            .collect()
    }

    /// Stored entries matching a predicate over the event variant, oldest
    /// first. Used to filter by event "type" (spawned, terminated, ...).
    #[must_use]
    pub fn read_by_type(&self, matches: impl Fn(&RecentEvent) -> bool) -> Vec<BridgeEntry> {
        self.store
            .read()
            .iter()
            .filter(|e| matches(&e.event))
            .cloned()
            .collect()
    }

    /// The underlying observer's rollup metrics.
    #[must_use]
    pub fn metrics(&self) -> ObserverMetrics {
        self.observer.metrics()
    }

    /// Sync metrics: the current store size plus the observer's rollup.
    #[must_use]
    pub fn sync_metrics(&self) -> (usize, ObserverMetrics) {
        (self.store.read().len(), self.observer.metrics())
    }
}

impl Default for HypercoreBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use warden_isolation::{IsolationManager, IsolationTier};
    use warden_network_policy::{Action, NetworkPolicyManager};
    use warden_resource_monitor::ResourceMonitor;
    use warden_sandbox::manager::SandboxManagerConfig;
    use warden_sandbox::spec::{BackendKind, ResourceLimits, SandboxSpec};

    pub(crate) fn test_spec(name: &str) -> SandboxSpec {
        SandboxSpec {
            name: name.to_string(),
            backend: BackendKind::Container,
            image: "img".to_string(),
            kernel_image: None,
            isolation_level: IsolationTier::Namespace,
            resources: ResourceLimits {
                cpu_millicores: 500,
                memory_mb: 256,
                disk_mb: 1024,
                network_kbps: 1_000,
                max_processes: 16,
            },
            drives: Vec::new(),
            network_enabled: true,
            metadata: HashMap::new(),
            boot_timeout_ms: 1_000,
        }
    }

    fn manager() -> Arc<SandboxManager> {
        let isolation = Arc::new(IsolationManager::default());
        let network = Arc::new(NetworkPolicyManager::new(Action::Deny, 100));
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
    async fn sync_filters_to_attached_sandbox() {
        let manager = manager();
        let id_a = manager.spawn(test_spec("a")).await.unwrap();
        let id_b = manager.spawn(test_spec("b")).await.unwrap();

        let bridge = HypercoreBridge::new();
        bridge.attach(manager.clone(), id_a);
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge.sync();

        let entries = bridge.read_all();
        assert!(entries.iter().all(|e| e.event.sandbox_id() != Some(id_b)));
        assert!(entries.iter().any(|e| e.event.sandbox_id() == Some(id_a)));
    }

    #[tokio::test]
    async fn reattaching_detaches_previous_manager() {
        let manager_one = manager();
        let manager_two = manager();
        let id_one = manager_one.spawn(test_spec("one")).await.unwrap();
        let id_two = manager_two.spawn(test_spec("two")).await.unwrap();

        let bridge = HypercoreBridge::new();
        bridge.attach(manager_one, id_one);
        bridge.attach(manager_two, id_two);
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge.sync();

        let entries = bridge.read_all();
        assert!(entries.iter().any(|e| e.event.sandbox_id() == Some(id_two)));
    }

    #[tokio::test]
    async fn read_by_type_filters_spawned_events() {
        let manager = manager();
        let id = manager.spawn(test_spec("c")).await.unwrap();
        manager.terminate(id).await.unwrap();

        let bridge = HypercoreBridge::new();
        bridge.attach(manager, id);
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge.sync();

        let spawned = bridge.read_by_type(|e| matches!(e, RecentEvent::Spawned { .. }));
        assert_eq!(spawned.len(), 1);
    }
}
