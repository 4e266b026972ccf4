//! Tool registry (`spec.md` §4.7): the set of callable primitives a skill's
//! steps invoke. Grounded on the teacher's `nebula-action` `ActionRegistry`
//! — a type-erased, overwrite-on-register map from string key to
//! `Arc<dyn Trait>` — generalized from actions to tools.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// What a tool invocation reports back to the skill runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Tool output, present on success.
    pub output: Option<Value>,
    /// Error message, present on failure.
    pub error: Option<String>,
}

impl ToolOutcome {
    /// Builds a successful outcome.
    #[must_use]
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    /// Builds a failed outcome.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// A callable primitive a skill's steps invoke. Implementors must not
/// panic: a step that fails should return a failed [`ToolOutcome`], not
/// unwind.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// The key skills reference this tool by.
    fn name(&self) -> &str;

    /// Runs the tool against `args`, returning whether it succeeded.
    async fn invoke(&self, args: Value) -> ToolOutcome;
}

/// Type-erased registry for discovering and invoking tools by name.
/// Duplicate registration overwrites, matching the teacher's action
/// registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous tool under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Looks a tool up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry holds no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("count", &self.tools.len())
            .field("names", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}
