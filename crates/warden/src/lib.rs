//! # Warden
//!
//! The agent-execution hypervisor described in `spec.md`: sandbox
//! lifecycle management, process isolation and capability enforcement, a
//! network policy engine, a resource monitor, a framed host/sandbox task
//! channel, image/manifest verification, a skill runtime, error
//! classification and recovery, a hash-chained compliance audit log, and
//! an offline-first local engine.
//!
//! This crate is a thin facade: every layer lives in its own `warden-*`
//! crate (`crates/*` in this workspace) and is re-exported here, one
//! module per layer, so a downstream consumer can depend on `warden`
//! alone instead of tracking each layer's path dependency individually —
//! the same aggregation role `nebula-sdk` plays for the teacher
//! workspace's action/workflow/schema/credential stack.
//!
//! Re-exports are grouped by layer, matching the L0-L7 table in
//! `SPEC_FULL.md`:
//!
//! - L0-L1: [`core`], [`error`], [`log`], [`redact`]
//! - L2: [`offline`], [`audit`], [`trajectory`]
//! - L3: [`isolation`], [`network_policy`], [`resource_monitor`], [`image_verify`]
//! - L4: [`vsock`]
//! - L4-L5: [`sandbox`], [`skill`]
//! - L6: [`resilience`]
//! - L7: [`observer`]

pub use warden_core as core;
pub use warden_error as error;
pub use warden_log as log;
pub use warden_redact as redact;

pub use warden_audit as audit;
pub use warden_offline as offline;
pub use warden_trajectory as trajectory;

pub use warden_image_verify as image_verify;
pub use warden_isolation as isolation;
pub use warden_network_policy as network_policy;
pub use warden_resource_monitor as resource_monitor;

pub use warden_vsock as vsock;

pub use warden_sandbox as sandbox;
pub use warden_skill as skill;

pub use warden_resilience as resilience;

pub use warden_observer as observer;

// The handful of types almost every caller needs regardless of which
// layer they're working in.
pub use warden_core::{Clock, SystemClock};
pub use warden_error::{Result, WardenError};
pub use warden_sandbox::{SandboxManager, SandboxManagerConfig, SandboxSpec};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_reexports_resolve_to_the_same_types_as_their_crates() {
        fn assert_same<T>(_: T) {}
        assert_same::<fn() -> WardenError>(|| WardenError::NotInitialized);
        assert_same::<fn() -> warden_error::WardenError>(|| WardenError::NotInitialized);
    }

    #[tokio::test]
    async fn sandbox_manager_is_reachable_through_the_facade() {
        let isolation = std::sync::Arc::new(isolation::IsolationManager::default());
        let network = std::sync::Arc::new(network_policy::NetworkPolicyManager::new(network_policy::Action::Deny, 10));
        let resource_monitor = std::sync::Arc::new(resource_monitor::ResourceMonitor::default());
        let manager = SandboxManager::new(SandboxManagerConfig::default(), isolation, network, resource_monitor);
        manager.initialize();
    }
}
