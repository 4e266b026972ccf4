//! Provider backends (`spec.md` §9 Design Notes: "dynamic/duck-typed
//! provider dispatch → tagged variants"). Each [`BackendKind`] gets a
//! concrete [`Provider`] implementation; the manager holds `Box<dyn
//! Provider>` and never inspects which variant it got. Production
//! implementations of real namespaces/virtualization are a documented
//! non-goal (`spec.md` §1) — these stubs simulate boot/shutdown/pause/
//! resume over an in-memory model only.

use async_trait::async_trait;
use warden_error::WardenError;

use crate::spec::{BackendKind, SandboxSpec};

/// Lifecycle operations the sandbox manager drives a backend through.
/// Implemented once per [`BackendKind`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Boots the backend for `spec`. Returning `Err` leaves the sandbox in
    /// `error` state; the manager never retries automatically.
    async fn boot(&self, spec: &SandboxSpec) -> Result<(), WardenError>;

    /// Shuts the backend down. Idempotent: called even if `boot` never
    /// succeeded.
    async fn shutdown(&self) -> Result<(), WardenError>;

    /// Pauses a running backend.
    async fn pause(&self) -> Result<(), WardenError>;

    /// Resumes a paused backend.
    async fn resume(&self) -> Result<(), WardenError>;

    /// Files the provider reports left over after `shutdown`. An empty
    /// vec means cleanup is confirmed complete.
    fn residual_files(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Stub micro-VM backend (firecracker-like).
#[derive(Debug, Default)]
pub struct MicroVmProvider;

#[async_trait]
impl Provider for MicroVmProvider {
    async fn boot(&self, spec: &SandboxSpec) -> Result<(), WardenError> {
        if spec.kernel_image.is_none() {
            return Err(WardenError::Other(
                "microVM backend requires a kernel_image".to_string(),
            ));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), WardenError> {
        Ok(())
    }

    async fn pause(&self) -> Result<(), WardenError> {
        Ok(())
    }

    async fn resume(&self) -> Result<(), WardenError> {
        Ok(())
    }
}

/// Stub full-VM backend.
#[derive(Debug, Default)]
pub struct FullVmProvider;

#[async_trait]
impl Provider for FullVmProvider {
    async fn boot(&self, _spec: &SandboxSpec) -> Result<(), WardenError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), WardenError> {
        Ok(())
    }

    async fn pause(&self) -> Result<(), WardenError> {
        Ok(())
    }

    async fn resume(&self) -> Result<(), WardenError> {
        Ok(())
    }
}

/// Stub OS-container backend.
#[derive(Debug, Default)]
pub struct ContainerProvider;

#[async_trait]
impl Provider for ContainerProvider {
    async fn boot(&self, _spec: &SandboxSpec) -> Result<(), WardenError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), WardenError> {
        Ok(())
    }

    async fn pause(&self) -> Result<(), WardenError> {
        Ok(())
    }

    async fn resume(&self) -> Result<(), WardenError> {
        Ok(())
    }
}

/// Selects the stock provider implementation for a backend kind.
#[must_use]
pub fn provider_for(backend: BackendKind) -> Box<dyn Provider> {
    match backend {
        BackendKind::MicroVm => Box::new(MicroVmProvider),
        BackendKind::FullVm => Box::new(FullVmProvider),
        BackendKind::Container => Box::new(ContainerProvider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Drive, ResourceLimits};
    use std::collections::HashMap;
    use warden_isolation::IsolationTier;

    fn spec_without_kernel() -> SandboxSpec {
        SandboxSpec {
            name: "test".to_string(),
            backend: BackendKind::MicroVm,
            image: "img".to_string(),
            kernel_image: None,
            isolation_level: IsolationTier::Vm,
            resources: ResourceLimits {
                cpu_millicores: 100,
                memory_mb: 128,
                disk_mb: 256,
                network_kbps: 100,
                max_processes: 8,
            },
            drives: Vec::<Drive>::new(),
            network_enabled: true,
            metadata: HashMap::new(),
            boot_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn microvm_boot_fails_without_kernel_image() {
        let provider = MicroVmProvider;
        let err = provider.boot(&spec_without_kernel()).await.unwrap_err();
        assert!(matches!(err, WardenError::Other(_)));
    }

    #[tokio::test]
    async fn microvm_boot_succeeds_with_kernel_image() {
        let provider = MicroVmProvider;
        let mut spec = spec_without_kernel();
        spec.kernel_image = Some("vmlinux".to_string());
        assert!(provider.boot(&spec).await.is_ok());
    }

    #[tokio::test]
    async fn container_provider_has_no_residual_files_by_default() {
        let provider = provider_for(BackendKind::Container);
        assert!(provider.residual_files().is_empty());
    }
}
