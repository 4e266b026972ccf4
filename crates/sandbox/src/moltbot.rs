//! Named-agent to sandbox binding registry (`SPEC_FULL.md` §C "Moltbot
//! deployer"), grounded on the teacher's registry-by-key pattern in
//! `nebula-plugin`. Sits between the skill runtime and the sandbox
//! manager: callers address a deployment by agent name rather than
//! tracking sandbox ids themselves.

use std::collections::HashMap;

use parking_lot::RwLock;
use warden_core::SandboxId;
use warden_error::WardenError;

use crate::manager::SandboxManager;
use crate::spec::SandboxSpec;

/// Binds agent names to the sandbox currently running them.
pub struct MoltbotDeployer<'a> {
    manager: &'a SandboxManager,
    bindings: RwLock<HashMap<String, SandboxId>>,
}

impl<'a> MoltbotDeployer<'a> {
    /// Creates a deployer backed by `manager`.
    #[must_use]
    pub fn new(manager: &'a SandboxManager) -> Self {
        Self {
            manager,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Spawns a sandbox for `agent_name` and records the binding.
    /// Replaces (without tearing down) any previous binding for the same
    /// name, matching `nebula-plugin`'s last-registration-wins registry.
    pub async fn deploy(
        &self,
        agent_name: &str,
        spec: SandboxSpec,
    ) -> Result<SandboxId, WardenError> {
        let id = self.manager.spawn(spec).await?;
        self.bindings.write().insert(agent_name.to_string(), id);
        Ok(id)
    }

    /// Tears down the sandbox bound to `agent_name` and removes the
    /// binding. `NotFound` if no such binding exists.
    pub async fn undeploy(&self, agent_name: &str) -> Result<(), WardenError> {
        let id = self
            .bindings
            .write()
            .remove(agent_name)
            .ok_or_else(|| WardenError::not_found("moltbot binding", agent_name.to_string()))?;
        self.manager.terminate(id).await
    }

    /// Looks up the sandbox currently bound to `agent_name`.
    #[must_use]
    pub fn sandbox_for(&self, agent_name: &str) -> Option<SandboxId> {
        self.bindings.read().get(agent_name).copied()
    }
}
