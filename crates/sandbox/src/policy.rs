//! Per-agent operation policy (`spec.md` §4.1 `registerPolicy` /
//! `evaluatePolicy`). Lookup is by agent id; `deny` wins over `allow`, and
//! an agent with no registered policy is denied everything.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_isolation::IsolationTier;

/// What one agent is permitted to do across every sandbox it touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPolicy {
    /// Agent this policy governs.
    pub agent_id: String,
    /// Explicitly allowed operation names.
    pub allowed_operations: HashSet<String>,
    /// Explicitly blocked operation names. Wins over `allowed_operations`.
    pub blocked_operations: HashSet<String>,
    /// Whether the agent may use the network at all.
    pub network_access: bool,
    /// Whether the agent may touch the filesystem at all.
    pub filesystem_access: bool,
    /// Memory ceiling in megabytes for sandboxes this agent drives.
    pub max_memory_mb: u64,
    /// Minimum isolation tier this agent's sandboxes must run at.
    pub min_isolation: IsolationTier,
}

/// Owns the per-agent policy table.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, AgentPolicy>>,
}

impl PolicyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an agent's policy.
    pub fn register(&self, policy: AgentPolicy) {
        self.policies.write().insert(policy.agent_id.clone(), policy);
    }

    /// Looks up an agent's policy.
    #[must_use]
    pub fn policy_for(&self, agent_id: &str) -> Option<AgentPolicy> {
        self.policies.read().get(agent_id).cloned()
    }

    /// Evaluates whether `agent_id` may perform `operation`. No policy
    /// registered, or the operation absent from both lists, denies.
    /// `blocked_operations` always wins over `allowed_operations`.
    #[must_use]
    pub fn evaluate(&self, agent_id: &str, operation: &str) -> bool {
        let policies = self.policies.read();
        let Some(policy) = policies.get(agent_id) else {
            return false;
        };
        if policy.blocked_operations.contains(operation) {
            return false;
        }
        policy.allowed_operations.contains(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allowed: &[&str], blocked: &[&str]) -> AgentPolicy {
        AgentPolicy {
            agent_id: "agent-a".to_string(),
            allowed_operations: allowed.iter().map(|s| s.to_string()).collect(),
            blocked_operations: blocked.iter().map(|s| s.to_string()).collect(),
            network_access: true,
            filesystem_access: true,
            max_memory_mb: 512,
            min_isolation: IsolationTier::Process,
        }
    }

    #[test]
    fn unknown_agent_is_denied() {
        let registry = PolicyRegistry::new();
        assert!(!registry.evaluate("ghost", "read"));
    }

    #[test]
    fn unlisted_operation_is_denied() {
        let registry = PolicyRegistry::new();
        registry.register(policy(&["read"], &[]));
        assert!(!registry.evaluate("agent-a", "write"));
    }

    #[test]
    fn allowed_operation_is_permitted() {
        let registry = PolicyRegistry::new();
        registry.register(policy(&["read"], &[]));
        assert!(registry.evaluate("agent-a", "read"));
    }

    #[test]
    fn blocked_wins_over_allowed() {
        let registry = PolicyRegistry::new();
        registry.register(policy(&["read"], &["read"]));
        assert!(!registry.evaluate("agent-a", "read"));
    }

    #[test]
    fn re_registering_overwrites_the_previous_policy() {
        let registry = PolicyRegistry::new();
        registry.register(policy(&["read"], &[]));
        registry.register(policy(&["write"], &[]));
        assert!(!registry.evaluate("agent-a", "read"));
        assert!(registry.evaluate("agent-a", "write"));
    }
}
