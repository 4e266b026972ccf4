//! The sandbox manager (`spec.md` §4.1): the single entry point for agent
//! execution. Owns the sandbox registry, dispatches to provider backends,
//! and enforces isolation/policy/network checks before a task runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::RwLock as AsyncRwLock;
use warden_core::{Clock, SandboxId, SystemClock, generate_prefixed_id};
use warden_error::WardenError;
use warden_isolation::IsolationManager;
use warden_network_policy::{Direction, NetworkPolicyManager, PacketIntent, Protocol};
use warden_resource_monitor::ResourceMonitor;
use warden_vsock::{TaskPayload, TaskResult, VsockChannel};

use crate::events::{EventBus, SandboxEvent};
use crate::instance::{SandboxInstance, SandboxState};
use crate::policy::{AgentPolicy, PolicyRegistry};
use crate::provider::{Provider, provider_for};
use crate::spec::SandboxSpec;

/// Tunables for a [`SandboxManager`].
#[derive(Debug, Clone, Copy)]
pub struct SandboxManagerConfig {
    /// Maximum number of non-terminal sandboxes at once.
    pub max_concurrent: usize,
    /// Task timeout used when a payload does not specify its own.
    pub default_task_timeout_ms: u64,
}

impl Default for SandboxManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            default_task_timeout_ms: 30_000,
        }
    }
}

/// Result of [`SandboxManager::verify_cleanup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// `true` iff the sandbox is in a terminal state and the provider
    /// reports no residual files.
    pub cleaned: bool,
    /// Files the provider reports left over.
    pub residual_files: Vec<String>,
}

/// Maps a handful of privileged task actions onto the capability the
/// isolation manager enforces. Actions outside this table carry no
/// capability requirement of their own (policy evaluation still applies).
fn capability_for_action(action: &str) -> Option<&'static str> {
    match action {
        "network.raw" => Some("CAP_NET_RAW"),
        "fs.chroot" => Some("CAP_SYS_CHROOT"),
        "process.kill" => Some("CAP_KILL"),
        "process.ptrace" => Some("CAP_SYS_PTRACE"),
        "process.admin" => Some("CAP_SYS_ADMIN"),
        _ => None,
    }
}

fn failure_result(task_id: &str, error: impl Into<String>) -> TaskResult {
    TaskResult {
        task_id: task_id.to_string(),
        success: false,
        output: None,
        error: Some(error.into()),
        duration_ms: 0,
    }
}

/// Owns the sandbox registry and coordinates every other L3/L4 component
/// for each sandbox's lifetime.
pub struct SandboxManager {
    config: SandboxManagerConfig,
    clock: Arc<dyn Clock>,
    initialized: std::sync::atomic::AtomicBool,
    registry: AsyncRwLock<HashMap<SandboxId, SandboxInstance>>,
    providers: AsyncRwLock<HashMap<SandboxId, Box<dyn Provider>>>,
    channels: SyncRwLock<HashMap<SandboxId, Arc<VsockChannel>>>,
    isolation: Arc<IsolationManager>,
    network: Arc<NetworkPolicyManager>,
    resource_monitor: Arc<ResourceMonitor>,
    policies: PolicyRegistry,
    events: EventBus,
}

impl SandboxManager {
    /// Creates an uninitialized manager wired to the given L3 components.
    #[must_use]
    pub fn new(
        config: SandboxManagerConfig,
        isolation: Arc<IsolationManager>,
        network: Arc<NetworkPolicyManager>,
        resource_monitor: Arc<ResourceMonitor>,
    ) -> Self {
        Self::with_clock(
            config,
            Arc::new(SystemClock),
            isolation,
            network,
            resource_monitor,
        )
    }

    /// Creates a manager using an explicit clock (for deterministic tests).
    #[must_use]
    pub fn with_clock(
        config: SandboxManagerConfig,
        clock: Arc<dyn Clock>,
        isolation: Arc<IsolationManager>,
        network: Arc<NetworkPolicyManager>,
        resource_monitor: Arc<ResourceMonitor>,
    ) -> Self {
        Self {
            config,
            clock,
            initialized: std::sync::atomic::AtomicBool::new(false),
            registry: AsyncRwLock::new(HashMap::new()),
            providers: AsyncRwLock::new(HashMap::new()),
            channels: SyncRwLock::new(HashMap::new()),
            isolation,
            network,
            resource_monitor,
            policies: PolicyRegistry::new(),
            events: EventBus::default(),
        }
    }

    /// Marks the manager ready to accept `spawn` calls and emits `Ready`.
    pub fn initialize(&self) {
        self.initialized.store(true, std::sync::atomic::Ordering::SeqCst);
        self.events.emit(SandboxEvent::Ready);
    }

    fn ensure_initialized(&self) -> Result<(), WardenError> {
        if self.initialized.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WardenError::NotInitialized)
        }
    }

    /// Subscribes to manager events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }

    /// Registers (or replaces) an agent's operation policy.
    pub fn register_policy(&self, policy: AgentPolicy) {
        self.policies.register(policy);
    }

    /// Evaluates whether `agent_id` may perform `operation`.
    #[must_use]
    pub fn evaluate_policy(&self, agent_id: &str, operation: &str) -> bool {
        self.policies.evaluate(agent_id, operation)
    }

    fn install_channel(&self, id: SandboxId) {
        let channel = Arc::new(VsockChannel::new());
        channel.connect_local(Arc::new(|payload: TaskPayload| {
            Box::pin(async move {
                TaskResult {
                    task_id: payload.task_id,
                    success: true,
                    output: Some(payload.args),
                    error: None,
                    duration_ms: 0,
                }
            })
        }));
        self.channels.write().insert(id, channel);
    }

    /// Boots a new sandbox. Fails with `NotInitialized` before
    /// `initialize()`, or `TooManySandboxes` at the concurrency limit.
    /// A provider boot failure does not fail this call: the sandbox
    /// transitions to `error` and its id is still returned so observers
    /// can see the failure.
    pub async fn spawn(&self, spec: SandboxSpec) -> Result<SandboxId, WardenError> {
        self.ensure_initialized()?;

        let running = {
            let registry = self.registry.read().await;
            registry.values().filter(|i| i.state.is_non_terminal()).count()
        };
        if running >= self.config.max_concurrent {
            return Err(WardenError::TooManySandboxes {
                running,
                max: self.config.max_concurrent,
            });
        }

        let id = SandboxId::v4();
        let instance = SandboxInstance {
            id,
            spec: spec.clone(),
            state: SandboxState::Creating,
            created_at_millis: self.clock.now_millis(),
            started_at_millis: None,
            stopped_at_millis: None,
        };
        self.registry.write().await.insert(id, instance);

        let provider = provider_for(spec.backend);
        let boot_timeout = Duration::from_millis(spec.boot_timeout_ms.max(1));
        let boot_result = tokio::time::timeout(boot_timeout, provider.boot(&spec)).await;

        let mut registry = self.registry.write().await;
        let stored = registry.get_mut(&id).expect("just inserted above");

        match boot_result {
            Ok(Ok(())) => {
                stored.state = SandboxState::Running;
                stored.started_at_millis = Some(self.clock.now_millis());
                drop(registry);
                self.isolation.create_context(id, spec.isolation_level);
                self.install_channel(id);
                self.providers.write().await.insert(id, provider);
                tracing::info!(sandbox_id = %id, "sandbox spawned");
                self.events.emit(SandboxEvent::Spawned { id });
            }
            Ok(Err(error)) => {
                stored.state = SandboxState::Error;
                drop(registry);
                tracing::warn!(sandbox_id = %id, %error, "sandbox boot failed");
                self.events.emit(SandboxEvent::Error {
                    id: Some(id),
                    message: error.to_string(),
                });
            }
            Err(_elapsed) => {
                stored.state = SandboxState::Error;
                drop(registry);
                tracing::warn!(sandbox_id = %id, "sandbox boot timed out");
                self.events.emit(SandboxEvent::Error {
                    id: Some(id),
                    message: "boot timed out".to_string(),
                });
            }
        }

        Ok(id)
    }

    /// Tears a sandbox down: stops it, releases its isolation context,
    /// resource snapshots, and per-sandbox network rules. Kept in the
    /// registry afterward for audit and stats.
    pub async fn terminate(&self, id: SandboxId) -> Result<(), WardenError> {
        {
            let mut registry = self.registry.write().await;
            let instance = registry
                .get_mut(&id)
                .ok_or_else(|| WardenError::not_found("sandbox", id.to_string()))?;
            instance.state = SandboxState::Stopped;
            instance.stopped_at_millis = Some(self.clock.now_millis());
        }

        if let Some(provider) = self.providers.read().await.get(&id) {
            let _ = provider.shutdown().await;
        }
        self.resource_monitor.remove(id);
        self.isolation.remove_context(id);
        self.network.clear_rules(id);
        self.channels.write().remove(&id);

        tracing::info!(sandbox_id = %id, "sandbox terminated");
        self.events.emit(SandboxEvent::Terminated { id });
        Ok(())
    }

    /// Pauses a running sandbox. `InvalidTransition` outside `running`.
    pub async fn pause(&self, id: SandboxId) -> Result<(), WardenError> {
        {
            let mut registry = self.registry.write().await;
            let instance = registry
                .get_mut(&id)
                .ok_or_else(|| WardenError::not_found("sandbox", id.to_string()))?;
            if instance.state != SandboxState::Running {
                return Err(WardenError::InvalidTransition {
                    action: "pause",
                    from: format!("{:?}", instance.state),
                });
            }
            instance.state = SandboxState::Paused;
        }
        if let Some(provider) = self.providers.read().await.get(&id) {
            let _ = provider.pause().await;
        }
        self.events.emit(SandboxEvent::Paused { id });
        Ok(())
    }

    /// Resumes a paused sandbox. `InvalidTransition` outside `paused`.
    pub async fn resume(&self, id: SandboxId) -> Result<(), WardenError> {
        {
            let mut registry = self.registry.write().await;
            let instance = registry
                .get_mut(&id)
                .ok_or_else(|| WardenError::not_found("sandbox", id.to_string()))?;
            if instance.state != SandboxState::Paused {
                return Err(WardenError::InvalidTransition {
                    action: "resume",
                    from: format!("{:?}", instance.state),
                });
            }
            instance.state = SandboxState::Running;
        }
        if let Some(provider) = self.providers.read().await.get(&id) {
            let _ = provider.resume().await;
        }
        self.events.emit(SandboxEvent::Resumed { id });
        Ok(())
    }

    /// Executes a task inside a sandbox, enforcing capability, policy and
    /// network checks before dispatch. Structural problems (unknown id,
    /// wrong lifecycle state) surface as `Err`; every other failure mode
    /// (capability denied, policy denied, network denied, provider
    /// error) is folded into a failed [`TaskResult`] so this call never
    /// propagates a business-level failure past itself (`spec.md` §4.1).
    pub async fn execute_task(
        &self,
        id: SandboxId,
        mut payload: TaskPayload,
    ) -> Result<TaskResult, WardenError> {
        {
            let registry = self.registry.read().await;
            let instance = registry
                .get(&id)
                .ok_or_else(|| WardenError::not_found("sandbox", id.to_string()))?;
            if instance.state != SandboxState::Running {
                return Err(WardenError::InvalidTransition {
                    action: "executeTask",
                    from: format!("{:?}", instance.state),
                });
            }
        }

        if payload.task_id.is_empty() {
            payload.task_id = generate_prefixed_id("task");
        }

        if let Some(capability) = capability_for_action(&payload.action) {
            let reason = format!("task {} action {}", payload.task_id, payload.action);
            if !self.isolation.enforce_capability(id, capability, &reason) {
                return Ok(failure_result(&payload.task_id, "capability denied"));
            }
        }

        if !self.policies.evaluate(&payload.agent_id, &payload.action) {
            tracing::warn!(
                sandbox_id = %id,
                agent_id = %payload.agent_id,
                action = %payload.action,
                "policy denied task"
            );
            return Ok(failure_result(&payload.task_id, "policy denied"));
        }

        if let (Some(host), Some(port)) = (
            payload.args.get("host").and_then(serde_json::Value::as_str),
            payload.args.get("port").and_then(serde_json::Value::as_u64),
        ) {
            let intent = PacketIntent {
                sandbox_id: id,
                direction: Direction::Egress,
                protocol: Protocol::Any,
                host: host.to_string(),
                port: port as u16,
            };
            if !self.network.evaluate(&intent).allowed {
                return Ok(failure_result(&payload.task_id, "network policy denied"));
            }
        }

        let channel = self.channels.read().get(&id).cloned();
        let Some(channel) = channel else {
            return Ok(failure_result(&payload.task_id, "no channel attached"));
        };

        let timeout_ms = payload.timeout_ms.unwrap_or(self.config.default_task_timeout_ms);
        let task_id = payload.task_id.clone();
        let result = match channel.execute(payload, timeout_ms).await {
            Ok(result) => result,
            Err(error) => failure_result(&task_id, error.to_string()),
        };

        self.events.emit(SandboxEvent::TaskExecuted {
            id,
            task_id: result.task_id.clone(),
            success: result.success,
        });
        Ok(result)
    }

    /// Reports whether a sandbox's cleanup is complete.
    pub async fn verify_cleanup(&self, id: SandboxId) -> Result<CleanupReport, WardenError> {
        let terminal = {
            let registry = self.registry.read().await;
            let instance = registry
                .get(&id)
                .ok_or_else(|| WardenError::not_found("sandbox", id.to_string()))?;
            matches!(instance.state, SandboxState::Stopped | SandboxState::Destroyed)
        };
        let residual_files = self
            .providers
            .read()
            .await
            .get(&id)
            .map_or_else(Vec::new, |p| p.residual_files());
        Ok(CleanupReport {
            cleaned: terminal && residual_files.is_empty(),
            residual_files,
        })
    }

    /// Looks up a sandbox's current instance record.
    pub async fn get(&self, id: SandboxId) -> Option<SandboxInstance> {
        self.registry.read().await.get(&id).cloned()
    }

    /// Terminates every non-terminal sandbox (marking it `destroyed`
    /// rather than merely `stopped`, since this is a forced teardown),
    /// releasing every resource they held.
    pub async fn close(&self) -> Result<(), WardenError> {
        let ids: Vec<SandboxId> = {
            let registry = self.registry.read().await;
            registry
                .values()
                .filter(|i| i.state.is_non_terminal())
                .map(|i| i.id)
                .collect()
        };
        for id in ids {
            self.terminate(id).await?;
            let mut registry = self.registry.write().await;
            if let Some(instance) = registry.get_mut(&id) {
                instance.state = SandboxState::Destroyed;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BackendKind, ResourceLimits};
    use warden_core::FixedClock;
    use warden_isolation::IsolationTier;
    use warden_network_policy::Action;

    fn components() -> (Arc<IsolationManager>, Arc<NetworkPolicyManager>, Arc<ResourceMonitor>) {
        (
            Arc::new(IsolationManager::default()),
            Arc::new(NetworkPolicyManager::new(Action::Deny, 100)),
            Arc::new(ResourceMonitor::default()),
        )
    }

    fn sample_spec(backend: BackendKind) -> SandboxSpec {
        SandboxSpec {
            name: "demo".to_string(),
            backend,
            image: "img".to_string(),
            kernel_image: Some("vmlinux".to_string()),
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

    fn manager() -> SandboxManager {
        let (isolation, network, resource_monitor) = components();
        let manager = SandboxManager::with_clock(
            SandboxManagerConfig::default(),
            Arc::new(FixedClock::new(0)),
            isolation,
            network,
            resource_monitor,
        );
        manager.initialize();
        manager
    }

    #[tokio::test]
    async fn spawn_before_initialize_fails() {
        let (isolation, network, resource_monitor) = components();
        let manager = SandboxManager::new(SandboxManagerConfig::default(), isolation, network, resource_monitor);
        let err = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap_err();
        assert!(matches!(err, WardenError::NotInitialized));
    }

    #[tokio::test]
    async fn spawn_succeeds_and_transitions_to_running() {
        let manager = manager();
        let id = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap();
        let instance = manager.get(id).await.unwrap();
        assert_eq!(instance.state, SandboxState::Running);
        assert!(instance.started_at_millis.is_some());
    }

    #[tokio::test]
    async fn spawn_fails_at_concurrency_limit() {
        let (isolation, network, resource_monitor) = components();
        let manager = SandboxManager::with_clock(
            SandboxManagerConfig {
                max_concurrent: 1,
                ..SandboxManagerConfig::default()
            },
            Arc::new(FixedClock::new(0)),
            isolation,
            network,
            resource_monitor,
        );
        manager.initialize();
        manager.spawn(sample_spec(BackendKind::Container)).await.unwrap();
        let err = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap_err();
        assert!(matches!(err, WardenError::TooManySandboxes { running: 1, max: 1 }));
    }

    #[tokio::test]
    async fn spawn_with_microvm_missing_kernel_image_transitions_to_error() {
        let manager = manager();
        let mut spec = sample_spec(BackendKind::MicroVm);
        spec.kernel_image = None;
        let id = manager.spawn(spec).await.unwrap();
        let instance = manager.get(id).await.unwrap();
        assert_eq!(instance.state, SandboxState::Error);
    }

    #[tokio::test]
    async fn terminate_unknown_sandbox_fails_with_not_found() {
        let manager = manager();
        let err = manager.terminate(SandboxId::v4()).await.unwrap_err();
        assert!(matches!(err, WardenError::NotFound { .. }));
    }

    #[tokio::test]
    async fn pause_resume_round_trip() {
        let manager = manager();
        let id = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap();
        manager.pause(id).await.unwrap();
        assert_eq!(manager.get(id).await.unwrap().state, SandboxState::Paused);
        manager.resume(id).await.unwrap();
        assert_eq!(manager.get(id).await.unwrap().state, SandboxState::Running);
    }

    #[tokio::test]
    async fn pause_from_non_running_state_is_invalid_transition() {
        let manager = manager();
        let id = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap();
        manager.terminate(id).await.unwrap();
        let err = manager.pause(id).await.unwrap_err();
        assert!(matches!(err, WardenError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn execute_task_denied_without_registered_policy() {
        let manager = manager();
        let id = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap();
        let result = manager
            .execute_task(
                id,
                TaskPayload {
                    task_id: "t1".to_string(),
                    agent_id: "agent-a".to_string(),
                    action: "read".to_string(),
                    args: serde_json::json!({}),
                    timeout_ms: Some(1_000),
                },
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("policy denied"));
    }

    #[tokio::test]
    async fn execute_task_succeeds_with_allowed_policy() {
        let manager = manager();
        let id = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap();
        manager.register_policy(AgentPolicy {
            agent_id: "agent-a".to_string(),
            allowed_operations: std::collections::HashSet::from(["read".to_string()]),
            blocked_operations: std::collections::HashSet::new(),
            network_access: true,
            filesystem_access: true,
            max_memory_mb: 512,
            min_isolation: IsolationTier::Namespace,
        });
        let result = manager
            .execute_task(
                id,
                TaskPayload {
                    task_id: "t1".to_string(),
                    agent_id: "agent-a".to_string(),
                    action: "read".to_string(),
                    args: serde_json::json!({"x": 1}),
                    timeout_ms: Some(1_000),
                },
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, Some(serde_json::json!({"x": 1})));
    }

    #[tokio::test]
    async fn verify_cleanup_reports_clean_after_terminate() {
        let manager = manager();
        let id = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap();
        manager.terminate(id).await.unwrap();
        let report = manager.verify_cleanup(id).await.unwrap();
        assert!(report.cleaned);
        assert!(report.residual_files.is_empty());
    }

    #[tokio::test]
    async fn close_terminates_and_destroys_every_non_terminal_sandbox() {
        let manager = manager();
        let a = manager.spawn(sample_spec(BackendKind::Container)).await.unwrap();
        let b = manager.spawn(sample_spec(BackendKind::FullVm)).await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(manager.get(a).await.unwrap().state, SandboxState::Destroyed);
        assert_eq!(manager.get(b).await.unwrap().state, SandboxState::Destroyed);
    }
}
