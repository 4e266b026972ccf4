//! Skill definitions and the registry skills are looked up from
//! (`spec.md` §4.7). A skill is an ordered, named sequence of tool
//! invocations; a step's arguments and success criteria are supplied as
//! callbacks over the accumulated execution context, the same shape the
//! teacher gives action handlers in `nebula-action::handler`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Everything a step's `build_args`/`validate_result` callbacks can see:
/// the caller's inputs, the sandbox working directory, and every prior
/// step's output keyed by step name.
#[derive(Debug, Clone)]
pub struct SkillContext {
    /// Caller-supplied inputs for this run.
    pub inputs: Value,
    /// Working directory inside the sandbox the skill runs against.
    pub working_dir: String,
    /// Output of every step that has completed so far, keyed by step name.
    pub step_outputs: HashMap<String, Value>,
}

impl SkillContext {
    /// Starts a context with no steps yet completed.
    #[must_use]
    pub fn new(inputs: Value, working_dir: impl Into<String>) -> Self {
        Self {
            inputs,
            working_dir: working_dir.into(),
            step_outputs: HashMap::new(),
        }
    }
}

/// One step in a skill: which tool to call, how to build its arguments
/// from the running context, and an optional post-hoc validator.
pub struct Step {
    /// Step name; used as the key other steps see its output under.
    pub name: String,
    /// Name of the tool this step invokes.
    pub tool: String,
    /// Builds the tool call's arguments from the accumulated context.
    pub build_args: Arc<dyn Fn(&SkillContext) -> Value + Send + Sync>,
    /// Optional extra pass/fail check over the tool's raw output, run in
    /// addition to the tool's own `success` flag.
    pub validate_result: Option<Arc<dyn Fn(&Value) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("tool", &self.tool)
            .field("has_validator", &self.validate_result.is_some())
            .finish()
    }
}

/// A named, versioned, ordered sequence of tool invocations.
#[derive(Debug)]
pub struct Skill {
    /// Unique skill name; also the registry key.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Agent names this skill is available to. Empty means every agent.
    pub agents: Vec<String>,
    /// Tool names that must resolve in the tool registry before step 1.
    pub required_tools: Vec<String>,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// Skill version.
    pub version: String,
}

impl Skill {
    /// Whether `agent_id` may run this skill.
    #[must_use]
    pub fn available_to(&self, agent_id: &str) -> bool {
        self.agents.is_empty() || self.agents.iter().any(|a| a == agent_id)
    }
}

/// Registry of skills by name. Duplicate registration overwrites.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<Skill>>,
}

impl SkillRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a skill, replacing any previous skill of the same name.
    pub fn register(&mut self, skill: Skill) {
        self.skills.insert(skill.name.clone(), Arc::new(skill));
    }

    /// Looks a skill up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.get(name).cloned()
    }

    /// Lists every skill available to `agent_id`.
    #[must_use]
    pub fn available_to(&self, agent_id: &str) -> Vec<Arc<Skill>> {
        self.skills
            .values()
            .filter(|s| s.available_to(agent_id))
            .cloned()
            .collect()
    }

    /// Number of registered skills.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Whether the registry holds no skills.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}
