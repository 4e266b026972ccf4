//! # Warden Isolation
//!
//! L3: per-sandbox namespace and capability enforcement. Each sandbox gets
//! an [`IsolationContext`] derived from its [`IsolationTier`] via a fixed
//! table (`spec.md` §3 "Isolation context"): higher tiers get strictly more
//! namespaces and strictly fewer capabilities. `enforce_capability` is the
//! single gate every other subsystem calls before letting a sandbox touch a
//! privileged operation; denials are recorded as [`Violation`]s and fanned
//! out to subscribed listeners, mirroring the observer pattern used by
//! `warden-resource-monitor`.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_core::{Clock, SandboxId, SystemClock};

/// Isolation strength, from least to most restrictive. Ordering matters:
/// `t2 >= t1` implies `namespaces(t2) ⊇ namespaces(t1)` and
/// `capabilities(t2) ⊆ capabilities(t1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationTier {
    /// No namespaces, every capability.
    None,
    /// `{pid}` namespace, most capabilities.
    Process,
    /// `{pid, net, ipc}` namespaces, a reduced capability set.
    Namespace,
    /// `{pid, net, ipc, mnt}` namespaces, a small capability set.
    Vm,
    /// All seven namespaces, no capabilities.
    Ultra,
}

/// A Linux-style namespace kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    /// `pid`
    Pid,
    /// `net`
    Net,
    /// `ipc`
    Ipc,
    /// `mnt`
    Mnt,
    /// `uts`
    Uts,
    /// `user`
    User,
    /// `cgroup`
    Cgroup,
}

const ALL_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_RAW",
    "CAP_SYS_CHROOT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_PTRACE",
    "CAP_MKNOD",
    "CAP_AUDIT_WRITE",
    "CAP_SETFCAP",
];

/// Namespaces granted at a given tier, per the fixed table in `spec.md` §3.
#[must_use]
pub fn namespaces_for_tier(tier: IsolationTier) -> HashSet<Namespace> {
    use Namespace::{Cgroup, Ipc, Mnt, Net, Pid, User, Uts};
    match tier {
        IsolationTier::None => HashSet::new(),
        IsolationTier::Process => HashSet::from([Pid]),
        IsolationTier::Namespace => HashSet::from([Pid, Net, Ipc]),
        IsolationTier::Vm => HashSet::from([Pid, Net, Ipc, Mnt]),
        IsolationTier::Ultra => HashSet::from([Pid, Net, Ipc, Mnt, Uts, User, Cgroup]),
    }
}

/// Capabilities granted at a given tier. Each tier's set is a strict subset
/// of the tier below it, by construction (filtering the previous tier's
/// set rather than listing independently) so the invariant cannot drift.
#[must_use]
pub fn capabilities_for_tier(tier: IsolationTier) -> HashSet<&'static str> {
    let none_caps: HashSet<&'static str> = ALL_CAPABILITIES.iter().copied().collect();
    let process_caps: HashSet<&'static str> = none_caps
        .iter()
        .copied()
        .filter(|c| {
            !matches!(
                *c,
                "CAP_SYS_ADMIN" | "CAP_SYS_PTRACE" | "CAP_SYS_CHROOT" | "CAP_NET_RAW" | "CAP_MKNOD"
            )
        })
        .collect();
    let namespace_caps: HashSet<&'static str> = process_caps
        .iter()
        .copied()
        .filter(|c| !matches!(*c, "CAP_SETPCAP" | "CAP_AUDIT_WRITE" | "CAP_SETFCAP"))
        .collect();
    let vm_caps: HashSet<&'static str> = namespace_caps
        .iter()
        .copied()
        .filter(|c| matches!(*c, "CAP_CHOWN" | "CAP_DAC_OVERRIDE" | "CAP_KILL"))
        .collect();
    let ultra_caps: HashSet<&'static str> = HashSet::new();

    match tier {
        IsolationTier::None => none_caps,
        IsolationTier::Process => process_caps,
        IsolationTier::Namespace => namespace_caps,
        IsolationTier::Vm => vm_caps,
        IsolationTier::Ultra => ultra_caps,
    }
}

/// Severity attached to a capability violation, derived from the tier that
/// denied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// `IsolationTier::None`
    Info,
    /// `IsolationTier::Process`
    Low,
    /// `IsolationTier::Namespace`
    Medium,
    /// `IsolationTier::Vm`
    High,
    /// `IsolationTier::Ultra`
    Critical,
}

#[must_use]
fn severity_for_tier(tier: IsolationTier) -> ViolationSeverity {
    match tier {
        IsolationTier::None => ViolationSeverity::Info,
        IsolationTier::Process => ViolationSeverity::Low,
        IsolationTier::Namespace => ViolationSeverity::Medium,
        IsolationTier::Vm => ViolationSeverity::High,
        IsolationTier::Ultra => ViolationSeverity::Critical,
    }
}

/// Active/suspended state of a context; capability checks always fail
/// while suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    /// Normal operation.
    Active,
    /// Enforcement is paused; every capability check returns `false`.
    Suspended,
}

/// A recorded capability denial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Sandbox the violation occurred in.
    pub sandbox_id: SandboxId,
    /// Capability that was denied.
    pub capability: String,
    /// Caller-supplied reason for the attempted access.
    pub reason: String,
    /// When the violation was recorded.
    pub timestamp_millis: i64,
    /// Severity derived from the sandbox's isolation tier.
    pub severity: ViolationSeverity,
}

/// Per-sandbox isolation state: tier, derived namespaces/capabilities, and
/// active/suspended flag.
#[derive(Debug, Clone)]
pub struct IsolationContext {
    /// Owning sandbox.
    pub sandbox_id: SandboxId,
    /// Isolation tier this context was created with.
    pub tier: IsolationTier,
    /// Namespaces enabled for this tier.
    pub namespaces: HashSet<Namespace>,
    /// Capabilities allowed for this tier.
    pub capabilities: HashSet<&'static str>,
    /// Active/suspended.
    pub state: ContextState,
}

type Listener = Arc<dyn Fn(&Violation) + Send + Sync>;

/// Owns every sandbox's isolation context and the violation log.
pub struct IsolationManager {
    clock: Arc<dyn Clock>,
    contexts: RwLock<std::collections::HashMap<SandboxId, IsolationContext>>,
    violations: RwLock<Vec<Violation>>,
    listeners: Arc<RwLock<Vec<Option<Listener>>>>,
}

impl Default for IsolationManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl IsolationManager {
    /// Creates a manager using the given clock for violation timestamps.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            contexts: RwLock::new(std::collections::HashMap::new()),
            violations: RwLock::new(Vec::new()),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Creates the isolation context for `sandbox_id` at `tier`. Idempotent:
    /// a second call for an id that already has a context returns the
    /// existing context unchanged, ignoring the `tier` argument.
    pub fn create_context(&self, sandbox_id: SandboxId, tier: IsolationTier) -> IsolationContext {
        let mut contexts = self.contexts.write();
        if let Some(existing) = contexts.get(&sandbox_id) {
            return existing.clone();
        }
        let ctx = IsolationContext {
            sandbox_id,
            tier,
            namespaces: namespaces_for_tier(tier),
            capabilities: capabilities_for_tier(tier),
            state: ContextState::Active,
        };
        contexts.insert(sandbox_id, ctx.clone());
        ctx
    }

    /// Looks up the context for a sandbox, if one exists.
    #[must_use]
    pub fn context(&self, sandbox_id: SandboxId) -> Option<IsolationContext> {
        self.contexts.read().get(&sandbox_id).cloned()
    }

    /// Removes a sandbox's isolation context entirely (called on
    /// termination).
    pub fn remove_context(&self, sandbox_id: SandboxId) {
        self.contexts.write().remove(&sandbox_id);
    }

    /// Suspends enforcement for a sandbox; returns `false` if no context
    /// exists.
    pub fn suspend_context(&self, sandbox_id: SandboxId) -> bool {
        let mut contexts = self.contexts.write();
        if let Some(ctx) = contexts.get_mut(&sandbox_id) {
            ctx.state = ContextState::Suspended;
            true
        } else {
            false
        }
    }

    /// Resumes enforcement for a sandbox; returns `false` if no context
    /// exists.
    pub fn resume_context(&self, sandbox_id: SandboxId) -> bool {
        let mut contexts = self.contexts.write();
        if let Some(ctx) = contexts.get_mut(&sandbox_id) {
            ctx.state = ContextState::Active;
            true
        } else {
            false
        }
    }

    /// Checks whether `capability` is granted to `sandbox_id`. Returns
    /// `false` (and records a [`Violation`]) if the sandbox has no context,
    /// is suspended, or simply lacks the capability.
    pub fn enforce_capability(
        &self,
        sandbox_id: SandboxId,
        capability: &str,
        reason: &str,
    ) -> bool {
        let (tier, allowed) = {
            let contexts = self.contexts.read();
            match contexts.get(&sandbox_id) {
                Some(ctx) if ctx.state == ContextState::Active => {
                    (ctx.tier, ctx.capabilities.contains(capability))
                }
                Some(ctx) => (ctx.tier, false),
                None => (IsolationTier::Ultra, false),
            }
        };

        if allowed {
            return true;
        }

        let violation = Violation {
            sandbox_id,
            capability: capability.to_string(),
            reason: reason.to_string(),
            timestamp_millis: self.clock.now_millis(),
            severity: severity_for_tier(tier),
        };
        tracing::warn!(
            sandbox_id = %sandbox_id,
            capability,
            reason,
            "capability denied"
        );
        for listener in self.listeners.read().iter().flatten() {
            listener(&violation);
        }
        self.violations.write().push(violation);
        false
    }

    /// Returns recorded violations, newest first.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        let mut v = self.violations.read().clone();
        v.reverse();
        v
    }

    /// Subscribes to violation events; returns an idempotent unsubscribe
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_namespaces_are_monotonically_non_decreasing() {
        let tiers = [
            IsolationTier::None,
            IsolationTier::Process,
            IsolationTier::Namespace,
            IsolationTier::Vm,
            IsolationTier::Ultra,
        ];
        for window in tiers.windows(2) {
            let lower = namespaces_for_tier(window[0]);
            let higher = namespaces_for_tier(window[1]);
            assert!(lower.is_subset(&higher), "{:?} -> {:?}", window[0], window[1]);
        }
    }

    #[test]
    fn tier_capabilities_are_monotonically_non_increasing() {
        let tiers = [
            IsolationTier::None,
            IsolationTier::Process,
            IsolationTier::Namespace,
            IsolationTier::Vm,
            IsolationTier::Ultra,
        ];
        for window in tiers.windows(2) {
            let lower = capabilities_for_tier(window[0]);
            let higher = capabilities_for_tier(window[1]);
            assert!(higher.is_subset(&lower), "{:?} -> {:?}", window[0], window[1]);
        }
    }

    #[test]
    fn ultra_tier_has_all_namespaces_and_no_capabilities() {
        assert_eq!(namespaces_for_tier(IsolationTier::Ultra).len(), 7);
        assert!(capabilities_for_tier(IsolationTier::Ultra).is_empty());
    }

    #[test]
    fn none_tier_has_no_namespaces_and_all_capabilities() {
        assert!(namespaces_for_tier(IsolationTier::None).is_empty());
        assert_eq!(
            capabilities_for_tier(IsolationTier::None).len(),
            ALL_CAPABILITIES.len()
        );
    }

    #[test]
    fn create_context_is_idempotent_ignoring_second_tier() {
        let mgr = IsolationManager::default();
        let id = SandboxId::v4();
        let first = mgr.create_context(id, IsolationTier::Process);
        let second = mgr.create_context(id, IsolationTier::Ultra);
        assert_eq!(first.tier, second.tier);
        assert_eq!(second.tier, IsolationTier::Process);
    }

    #[test]
    fn enforce_capability_allows_granted_capability() {
        let mgr = IsolationManager::default();
        let id = SandboxId::v4();
        mgr.create_context(id, IsolationTier::None);
        assert!(mgr.enforce_capability(id, "CAP_SYS_ADMIN", "test"));
    }

    #[test]
    fn enforce_capability_denies_and_records_violation_for_ultra() {
        let mgr = IsolationManager::default();
        let id = SandboxId::v4();
        mgr.create_context(id, IsolationTier::Ultra);
        assert!(!mgr.enforce_capability(id, "CAP_CHOWN", "needs chown"));
        let violations = mgr.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, ViolationSeverity::Critical);
    }

    #[test]
    fn suspended_context_denies_every_capability() {
        let mgr = IsolationManager::default();
        let id = SandboxId::v4();
        mgr.create_context(id, IsolationTier::None);
        assert!(mgr.enforce_capability(id, "CAP_CHOWN", "ok"));
        mgr.suspend_context(id);
        assert!(!mgr.enforce_capability(id, "CAP_CHOWN", "still ok?"));
        mgr.resume_context(id);
        assert!(mgr.enforce_capability(id, "CAP_CHOWN", "ok again"));
    }

    #[test]
    fn violations_are_newest_first() {
        let mgr = IsolationManager::default();
        let id = SandboxId::v4();
        mgr.create_context(id, IsolationTier::Ultra);
        mgr.enforce_capability(id, "CAP_A", "first");
        mgr.enforce_capability(id, "CAP_B", "second");
        let violations = mgr.violations();
        assert_eq!(violations[0].capability, "CAP_B");
        assert_eq!(violations[1].capability, "CAP_A");
    }

    #[test]
    fn subscribe_unsubscribe_is_idempotent() {
        let mgr = IsolationManager::default();
        let id = SandboxId::v4();
        mgr.create_context(id, IsolationTier::Ultra);
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = count.clone();
        let unsubscribe = mgr.subscribe(Arc::new(move |_v| {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        mgr.enforce_capability(id, "CAP_A", "one");
        unsubscribe();
        mgr.enforce_capability(id, "CAP_B", "two");
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
