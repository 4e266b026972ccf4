//! Skill execution (`spec.md` §4.7 "Runner execution"): fail-fast on
//! missing tools, walk steps in order, stop at the first failure.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::{Clock, SystemClock};

use crate::skill::{Skill, SkillContext};
use crate::tool::ToolRegistry;

const PROMPT_TRUNCATION_LIMIT: usize = 1000;

/// Outcome of running a skill to completion or to its first failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillResult {
    /// `true` iff every step ran and passed validation.
    pub success: bool,
    /// Number of steps that completed successfully before the result was
    /// decided.
    pub steps_completed: usize,
    /// Name of the step that failed, if any.
    pub failed_step: Option<String>,
    /// Failure description, if any.
    pub error: Option<String>,
    /// Wall-clock duration of the run. `0` for skills that fail before
    /// entering the step loop (missing required tools).
    pub duration_ms: u64,
}

/// Truncates a skill result's JSON rendering to at most
/// [`PROMPT_TRUNCATION_LIMIT`] characters, for embedding in an agent
/// prompt without risking runaway context growth.
#[must_use]
pub fn format_result_for_prompt(result: &SkillResult) -> String {
    let rendered = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
    if rendered.chars().count() <= PROMPT_TRUNCATION_LIMIT {
        rendered
    } else {
        rendered.chars().take(PROMPT_TRUNCATION_LIMIT).collect()
    }
}

/// Runs [`Skill`]s against a [`ToolRegistry`].
pub struct SkillRunner {
    clock: Arc<dyn Clock>,
}

impl Default for SkillRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRunner {
    /// Creates a runner using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a runner using an explicit clock (for deterministic tests).
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Executes `skill`'s steps in order against `registry`, threading
    /// `context` through so each step's `build_args` sees every prior
    /// step's output. Never panics past this call: a panicking
    /// `build_args`/`validate_result` closure is caught and folded into a
    /// failed result, matching the "runner must never throw" contract.
    pub async fn execute(
        &self,
        skill: &Skill,
        registry: &ToolRegistry,
        mut context: SkillContext,
    ) -> SkillResult {
        let start = self.clock.now_millis();
        let elapsed = |clock: &Arc<dyn Clock>| (clock.now_millis() - start).max(0) as u64;

        let missing: Vec<&str> = skill
            .required_tools
            .iter()
            .map(String::as_str)
            .filter(|name| !registry.contains(name))
            .collect();
        if !missing.is_empty() {
            return SkillResult {
                success: false,
                steps_completed: 0,
                failed_step: None,
                error: Some(format!("Missing required tools: {}", missing.join(", "))),
                duration_ms: 0,
            };
        }

        let mut steps_completed = 0usize;
        for step in &skill.steps {
            let Some(tool) = registry.get(&step.tool).cloned() else {
                return SkillResult {
                    success: false,
                    steps_completed,
                    failed_step: Some(step.name.clone()),
                    error: Some(format!("tool '{}' not found", step.tool)),
                    duration_ms: elapsed(&self.clock),
                };
            };

            let build_args = step.build_args.clone();
            let args = match std::panic::catch_unwind(AssertUnwindSafe(|| build_args(&context))) {
                Ok(args) => args,
                Err(payload) => {
                    return SkillResult {
                        success: false,
                        steps_completed: 0,
                        failed_step: Some(step.name.clone()),
                        error: Some(panic_message(&payload)),
                        duration_ms: elapsed(&self.clock),
                    };
                }
            };

            let outcome = tool.invoke(args).await;
            if !outcome.success {
                return SkillResult {
                    success: false,
                    steps_completed,
                    failed_step: Some(step.name.clone()),
                    error: Some(outcome.error.unwrap_or_else(|| "tool reported failure".to_string())),
                    duration_ms: elapsed(&self.clock),
                };
            }

            let output: Value = outcome.output.unwrap_or(Value::Null);
            if let Some(validator) = step.validate_result.clone() {
                let output_for_validator = output.clone();
                let valid = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                    validator(&output_for_validator)
                })) {
                    Ok(valid) => valid,
                    Err(payload) => {
                        return SkillResult {
                            success: false,
                            steps_completed: 0,
                            failed_step: Some(step.name.clone()),
                            error: Some(panic_message(&payload)),
                            duration_ms: elapsed(&self.clock),
                        };
                    }
                };
                if !valid {
                    return SkillResult {
                        success: false,
                        steps_completed,
                        failed_step: Some(step.name.clone()),
                        error: Some(format!("step '{}' failed result validation", step.name)),
                        duration_ms: elapsed(&self.clock),
                    };
                }
            }

            context.step_outputs.insert(step.name.clone(), output);
            steps_completed += 1;
            tracing::debug!(skill = %skill.name, step = %step.name, "skill step completed");
        }

        SkillResult {
            success: true,
            steps_completed,
            failed_step: None,
            error: None,
            duration_ms: elapsed(&self.clock),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
