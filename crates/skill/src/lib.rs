//! # Warden Skill
//!
//! L5: a per-agent tool registry and the ordered, validated multi-step
//! skill runner described in `spec.md` §4.7. A [`Skill`] names the tools
//! and agents it requires; [`SkillRunner`] fails fast if any required
//! tool is unregistered, then walks its steps in order, stopping at the
//! first failing step or validator.

pub mod runner;
pub mod skill;
pub mod tool;

pub use runner::{SkillResult, SkillRunner, format_result_for_prompt};
pub use skill::{Skill, SkillContext, SkillRegistry, Step};
pub use tool::{Tool, ToolOutcome, ToolRegistry};
