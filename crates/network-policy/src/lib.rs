//! # Warden Network Policy
//!
//! L3: a priority-ordered allow/deny rule evaluator. Rules are scoped
//! either to one sandbox or globally (`*`); `evaluate` merges both sets,
//! sorts by priority (lower wins, ties broken by insertion order) and
//! returns the first match. No match falls through to a configurable
//! default action.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_core::{NetworkRuleId, SandboxId};

/// Packet direction a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Inbound to the sandbox.
    Ingress,
    /// Outbound from the sandbox.
    Egress,
}

/// Effect of a matched rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Permit the packet intent.
    Allow,
    /// Reject the packet intent.
    Deny,
}

/// Transport protocol a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP only.
    Tcp,
    /// UDP only.
    Udp,
    /// Matches any protocol.
    Any,
}

impl Protocol {
    fn matches(self, other: Protocol) -> bool {
        self == Protocol::Any || self == other
    }
}

/// Which sandbox(es) a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// A single sandbox.
    Sandbox(SandboxId),
    /// Every sandbox (the `*` global rule set).
    Wildcard,
}

/// A single allow/deny rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRule {
    /// Unique rule id.
    pub id: NetworkRuleId,
    /// Sandbox(es) this rule governs.
    pub applies_to: Target,
    /// Ingress or egress.
    pub direction: Direction,
    /// Allow or deny.
    pub action: Action,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Host pattern; `None` or `Some("*")` matches any host.
    pub host_pattern: Option<String>,
    /// Inclusive port range `[lo, hi]`; `None` matches any port.
    pub port_range: Option<(u16, u16)>,
    /// Lower priority values are evaluated first.
    pub priority: u32,
    /// Monotonic insertion sequence, used as a tie-break for equal
    /// priorities.
    pub sequence: u64,
}

/// A request to evaluate against the rule set.
#[derive(Debug, Clone)]
pub struct PacketIntent {
    /// Sandbox originating or receiving the packet.
    pub sandbox_id: SandboxId,
    /// Direction of travel.
    pub direction: Direction,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
}

/// Result of evaluating a [`PacketIntent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    /// Whether the packet is allowed.
    pub allowed: bool,
    /// The rule that decided the outcome, if any matched.
    pub matched_rule_id: Option<NetworkRuleId>,
}

fn host_matches(pattern: &Option<String>, host: &str) -> bool {
    match pattern {
        None => true,
        Some(p) if p == "*" => true,
        Some(p) => p == host,
    }
}

fn port_matches(range: Option<(u16, u16)>, port: u16) -> bool {
    match range {
        None => true,
        Some((lo, hi)) => port >= lo && port <= hi,
    }
}

/// Priority value used by `block_all`/`allow_all`'s synthetic wildcard
/// rule, placing it behind every explicitly prioritized rule.
pub const LOWEST_PRIORITY: u32 = u32::MAX;

/// Owns the per-sandbox and global rule lists plus a bounded diagnostic
/// log of past evaluations.
pub struct NetworkPolicyManager {
    per_sandbox: RwLock<HashMap<SandboxId, Vec<NetworkRule>>>,
    global: RwLock<Vec<NetworkRule>>,
    sequence: RwLock<u64>,
    default_action: Action,
    log: RwLock<Vec<EvaluationResult>>,
    log_capacity: usize,
}

impl Default for NetworkPolicyManager {
    fn default() -> Self {
        Self::new(Action::Deny, 1_000)
    }
}

impl NetworkPolicyManager {
    /// Creates a manager with the given default action and diagnostic log
    /// capacity.
    #[must_use]
    pub fn new(default_action: Action, log_capacity: usize) -> Self {
        Self {
            per_sandbox: RwLock::new(HashMap::new()),
            global: RwLock::new(Vec::new()),
            sequence: RwLock::new(0),
            default_action,
            log: RwLock::new(Vec::new()),
            log_capacity,
        }
    }

    fn next_sequence(&self) -> u64 {
        let mut seq = self.sequence.write();
        *seq += 1;
        *seq
    }

    /// Adds a rule, assigning it an insertion sequence for tie-breaking.
    pub fn add_rule(&self, mut rule: NetworkRule) -> NetworkRuleId {
        rule.sequence = self.next_sequence();
        let id = rule.id;
        match &rule.applies_to {
            Target::Sandbox(sandbox_id) => {
                self.per_sandbox
                    .write()
                    .entry(*sandbox_id)
                    .or_default()
                    .push(rule);
            }
            Target::Wildcard => {
                self.global.write().push(rule);
            }
        }
        id
    }

    /// Removes every rule scoped to `sandbox_id`; global rules are
    /// untouched.
    pub fn clear_rules(&self, sandbox_id: SandboxId) {
        self.per_sandbox.write().remove(&sandbox_id);
    }

    /// Installs a single wildcard `deny` rule at [`LOWEST_PRIORITY`] for
    /// `sandbox_id`.
    pub fn block_all(&self, sandbox_id: SandboxId) -> NetworkRuleId {
        self.add_rule(NetworkRule {
            id: NetworkRuleId::v4(),
            applies_to: Target::Sandbox(sandbox_id),
            direction: Direction::Egress,
            action: Action::Deny,
            protocol: Protocol::Any,
            host_pattern: Some("*".to_string()),
            port_range: None,
            priority: LOWEST_PRIORITY,
            sequence: 0,
        })
    }

    /// Installs a single wildcard `allow` rule at [`LOWEST_PRIORITY`] for
    /// `sandbox_id`.
    pub fn allow_all(&self, sandbox_id: SandboxId) -> NetworkRuleId {
        self.add_rule(NetworkRule {
            id: NetworkRuleId::v4(),
            applies_to: Target::Sandbox(sandbox_id),
            direction: Direction::Egress,
            action: Action::Allow,
            protocol: Protocol::Any,
            host_pattern: Some("*".to_string()),
            port_range: None,
            priority: LOWEST_PRIORITY,
            sequence: 0,
        })
    }

    /// Evaluates a packet intent against the merged per-sandbox + global
    /// rule set, returning the first match by priority (ties broken by
    /// insertion order) or the default action if nothing matches.
    pub fn evaluate(&self, intent: &PacketIntent) -> EvaluationResult {
        let mut candidates: Vec<NetworkRule> = self
            .per_sandbox
            .read()
            .get(&intent.sandbox_id)
            .cloned()
            .unwrap_or_default();
        candidates.extend(self.global.read().iter().cloned());

        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.sequence.cmp(&b.sequence)));

        let matched = candidates.into_iter().find(|rule| {
            rule.direction == intent.direction
                && rule.protocol.matches(intent.protocol)
                && host_matches(&rule.host_pattern, &intent.host)
                && port_matches(rule.port_range, intent.port)
        });

        let result = match matched {
            Some(rule) => EvaluationResult {
                allowed: rule.action == Action::Allow,
                matched_rule_id: Some(rule.id),
            },
            None => EvaluationResult {
                allowed: self.default_action == Action::Allow,
                matched_rule_id: None,
            },
        };

        tracing::debug!(
            sandbox_id = %intent.sandbox_id,
            host = %intent.host,
            port = intent.port,
            allowed = result.allowed,
            "network policy evaluated"
        );

        let mut log = self.log.write();
        log.insert(0, result.clone());
        log.truncate(self.log_capacity);

        result
    }

    /// Returns the diagnostic log, newest first.
    #[must_use]
    pub fn evaluation_log(&self) -> Vec<EvaluationResult> {
        self.log.read().clone()
    }
}
