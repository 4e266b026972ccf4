//! # Warden Trajectory
//!
//! L2: records the ordered sequence of agent decisions that make up one
//! workflow run (`spec.md` §4.13), scores it for compliance on
//! completion, and explains it back in prose at three depths.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_core::{AuditLogId, Clock, TrajectoryId};
use warden_error::WardenError;

/// One recorded step within a trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryStep {
    /// Agent that performed the step.
    pub agent: String,
    /// Action name.
    pub action: String,
    /// Correlates this step with its audit-log entry.
    pub decision_log_id: AuditLogId,
    /// Tokens consumed producing this step.
    pub tokens_used: u64,
    /// Influence of the "taste vault" on this decision, in `[0, 1]`.
    pub taste_vault_influence: f64,
    /// When the step occurred, epoch milliseconds.
    pub timestamp_millis: i64,
}

/// A named, ordered sequence of agent decisions against a root intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    /// Unique id.
    pub id: TrajectoryId,
    /// The root intent text this trajectory pursues.
    pub root_intent: String,
    /// Steps in record order.
    pub steps: Vec<TrajectoryStep>,
    /// Set by `complete()`.
    pub final_outcome: Option<String>,
    /// `last_step.timestamp - first_step.timestamp`; `None` until
    /// completed.
    pub total_duration_millis: Option<i64>,
    /// `0..=100`; `None` until completed.
    pub compliance_score: Option<u8>,
    /// When the trajectory was started, epoch milliseconds.
    pub started_at_millis: i64,
}

impl Trajectory {
    /// Whether `complete()` has been called.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.final_outcome.is_some()
    }
}

const STEP_COUNT_THRESHOLD: usize = 10;
const TOKEN_THRESHOLD: u64 = 10_000;
const LOW_INFLUENCE_THRESHOLD: f64 = 0.5;

fn compute_compliance_score(steps: &[TrajectoryStep]) -> u8 {
    let mut score: i32 = 100;

    if steps.len() > STEP_COUNT_THRESHOLD {
        score -= 5;
    }

    let total_tokens: u64 = steps.iter().map(|s| s.tokens_used).sum();
    if total_tokens > TOKEN_THRESHOLD {
        score -= 5;
    }

    if !steps.is_empty() {
        let avg_influence: f64 =
            steps.iter().map(|s| s.taste_vault_influence).sum::<f64>() / steps.len() as f64;
        if avg_influence < LOW_INFLUENCE_THRESHOLD {
            score -= 10;
        }
    }

    score.max(0) as u8
}

/// Owns the active and completed trajectory sets; the two are always
/// disjoint.
pub struct TrajectoryRecorder {
    clock: std::sync::Arc<dyn Clock>,
    active: RwLock<HashMap<TrajectoryId, Trajectory>>,
    completed: RwLock<HashMap<TrajectoryId, Trajectory>>,
}

impl TrajectoryRecorder {
    /// Creates an empty recorder using `clock` for step/start timestamps.
    #[must_use]
    pub fn new(clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            clock,
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a new active trajectory, returning its id.
    pub fn start(&self, root_intent: impl Into<String>) -> TrajectoryId {
        let id = TrajectoryId::v4();
        let trajectory = Trajectory {
            id,
            root_intent: root_intent.into(),
            steps: Vec::new(),
            final_outcome: None,
            total_duration_millis: None,
            compliance_score: None,
            started_at_millis: self.clock.now_millis(),
        };
        self.active.write().insert(id, trajectory);
        id
    }

    /// Appends a step to an active trajectory. Fails with `NotFound` for
    /// an unknown or already-completed id.
    pub fn record_step(&self, id: TrajectoryId, step: TrajectoryStep) -> Result<(), WardenError> {
        let mut active = self.active.write();
        let trajectory = active
            .get_mut(&id)
            .ok_or_else(|| WardenError::not_found("trajectory", id.to_string()))?;
        tracing::debug!(trajectory_id = %id, agent = %step.agent, action = %step.action, "trajectory step recorded");
        trajectory.steps.push(step);
        Ok(())
    }

    /// Completes a trajectory: stamps the outcome, computes duration and
    /// compliance score, and atomically moves it from active to
    /// completed.
    pub fn complete(&self, id: TrajectoryId, outcome: impl Into<String>) -> Result<Trajectory, WardenError> {
        let mut trajectory = {
            let mut active = self.active.write();
            active
                .remove(&id)
                .ok_or_else(|| WardenError::not_found("trajectory", id.to_string()))?
        };

        trajectory.final_outcome = Some(outcome.into());
        trajectory.total_duration_millis = match (trajectory.steps.first(), trajectory.steps.last()) {
            (Some(first), Some(last)) => Some(last.timestamp_millis - first.timestamp_millis),
            _ => Some(0),
        };
        trajectory.compliance_score = Some(compute_compliance_score(&trajectory.steps));

        self.completed.write().insert(id, trajectory.clone());
        Ok(trajectory)
    }

    /// Looks up a trajectory in either set.
    #[must_use]
    pub fn get(&self, id: TrajectoryId) -> Option<Trajectory> {
        self.active
            .read()
            .get(&id)
            .cloned()
            .or_else(|| self.completed.read().get(&id).cloned())
    }

    /// Every currently active trajectory.
    #[must_use]
    pub fn active_trajectories(&self) -> Vec<Trajectory> {
        self.active.read().values().cloned().collect()
    }

    /// Every completed trajectory.
    #[must_use]
    pub fn completed_trajectories(&self) -> Vec<Trajectory> {
        self.completed.read().values().cloned().collect()
    }
}

/// Depth of narrative produced by the explanation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplanationDepth {
    /// A one- or two-sentence overview.
    Summary,
    /// Per-step prose.
    Detailed,
    /// Raw numeric detail (tokens, influence, timestamps).
    Technical,
}

/// Strength bucket for the "taste vault"'s aggregate influence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfluenceStrength {
    /// Average influence `> 0.8`.
    Strong,
    /// Average influence in `0.5..=0.8`.
    Moderate,
    /// Average influence `< 0.5`.
    Low,
}

/// Extracted taste-vault influence summary for a trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TasteVaultFactors {
    /// Bucketed average influence across all steps.
    pub strength: InfluenceStrength,
    /// Average influence value.
    pub average_influence: f64,
    /// The single agent with the highest per-step influence, if any
    /// steps were recorded.
    pub highest_influence_agent: Option<String>,
}

/// A structured, whole-trajectory explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryExplanation {
    /// The root intent.
    pub objective: String,
    /// Step count per agent.
    pub steps_per_agent: HashMap<String, usize>,
    /// The final outcome, if completed.
    pub outcome: Option<String>,
}

/// Produces narratives, taste-vault summaries and structured explanations
/// for a [`Trajectory`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ExplanationEngine;

impl ExplanationEngine {
    /// Produces a narrative at the given depth.
    #[must_use]
    pub fn narrate(&self, trajectory: &Trajectory, depth: ExplanationDepth) -> String {
        match depth {
            ExplanationDepth::Summary => format!(
                "Pursued \"{}\" across {} step(s); {}.",
                trajectory.root_intent,
                trajectory.steps.len(),
                trajectory
                    .final_outcome
                    .as_deref()
                    .unwrap_or("still in progress")
            ),
            ExplanationDepth::Detailed => {
                let mut lines = vec![format!("Objective: {}", trajectory.root_intent)];
                for (i, step) in trajectory.steps.iter().enumerate() {
                    lines.push(format!(
                        "{}. {} performed '{}'",
                        i + 1,
                        step.agent,
                        step.action
                    ));
                }
                if let Some(outcome) = &trajectory.final_outcome {
                    lines.push(format!("Outcome: {outcome}"));
                }
                lines.join("\n")
            }
            ExplanationDepth::Technical => {
                let total_tokens: u64 = trajectory.steps.iter().map(|s| s.tokens_used).sum();
                format!(
                    "steps={} total_tokens={} duration_ms={:?} compliance_score={:?}",
                    trajectory.steps.len(),
                    total_tokens,
                    trajectory.total_duration_millis,
                    trajectory.compliance_score
                )
            }
        }
    }

    /// Buckets the trajectory's taste-vault influence.
    #[must_use]
    pub fn taste_vault_factors(&self, trajectory: &Trajectory) -> TasteVaultFactors {
        if trajectory.steps.is_empty() {
            return TasteVaultFactors {
                strength: InfluenceStrength::Low,
                average_influence: 0.0,
                highest_influence_agent: None,
            };
        }

        let average_influence = trajectory
            .steps
            .iter()
            .map(|s| s.taste_vault_influence)
            .sum::<f64>()
            / trajectory.steps.len() as f64;

        let strength = if average_influence > 0.8 {
            InfluenceStrength::Strong
        } else if average_influence >= 0.5 {
            InfluenceStrength::Moderate
        } else {
            InfluenceStrength::Low
        };

        let highest_influence_agent = trajectory
            .steps
            .iter()
            .max_by(|a, b| {
                a.taste_vault_influence
                    .partial_cmp(&b.taste_vault_influence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|s| s.agent.clone());

        TasteVaultFactors {
            strength,
            average_influence,
            highest_influence_agent,
        }
    }

    /// Produces a structured explanation for the whole trajectory.
    #[must_use]
    pub fn explain(&self, trajectory: &Trajectory) -> TrajectoryExplanation {
        let mut steps_per_agent: HashMap<String, usize> = HashMap::new();
        for step in &trajectory.steps {
            *steps_per_agent.entry(step.agent.clone()).or_insert(0) += 1;
        }
        TrajectoryExplanation {
            objective: trajectory.root_intent.clone(),
            steps_per_agent,
            outcome: trajectory.final_outcome.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::FixedClock;

    fn step(agent: &str, tokens: u64, influence: f64, ts: i64) -> TrajectoryStep {
        TrajectoryStep {
            agent: agent.to_string(),
            action: "act".to_string(),
            decision_log_id: AuditLogId::v4(),
            tokens_used: tokens,
            taste_vault_influence: influence,
            timestamp_millis: ts,
        }
    }

    #[test]
    fn complete_moves_trajectory_from_active_to_completed() {
        let recorder = TrajectoryRecorder::new(std::sync::Arc::new(FixedClock::new(0)));
        let id = recorder.start("ship the feature");
        recorder.record_step(id, step("agent-a", 100, 0.9, 100)).unwrap();
        recorder.record_step(id, step("agent-b", 200, 0.8, 300)).unwrap();

        assert_eq!(recorder.active_trajectories().len(), 1);
        let completed = recorder.complete(id, "done").unwrap();
        assert_eq!(recorder.active_trajectories().len(), 0);
        assert_eq!(recorder.completed_trajectories().len(), 1);
        assert_eq!(completed.total_duration_millis, Some(200));
        assert_eq!(completed.compliance_score, Some(100));
    }

    #[test]
    fn record_step_on_unknown_trajectory_fails() {
        let recorder = TrajectoryRecorder::new(std::sync::Arc::new(FixedClock::new(0)));
        let err = recorder
            .record_step(TrajectoryId::v4(), step("a", 1, 1.0, 0))
            .unwrap_err();
        assert!(matches!(err, WardenError::NotFound { .. }));
    }

    #[test]
    fn compliance_score_deducts_for_many_steps() {
        let recorder = TrajectoryRecorder::new(std::sync::Arc::new(FixedClock::new(0)));
        let id = recorder.start("loop");
        for i in 0..11 {
            recorder.record_step(id, step("a", 10, 0.9, i)).unwrap();
        }
        let completed = recorder.complete(id, "done").unwrap();
        assert_eq!(completed.compliance_score, Some(95));
    }

    #[test]
    fn compliance_score_deducts_for_high_token_use() {
        let recorder = TrajectoryRecorder::new(std::sync::Arc::new(FixedClock::new(0)));
        let id = recorder.start("burn tokens");
        recorder.record_step(id, step("a", 11_000, 0.9, 0)).unwrap();
        let completed = recorder.complete(id, "done").unwrap();
        assert_eq!(completed.compliance_score, Some(95));
    }

    #[test]
    fn compliance_score_deducts_for_low_average_influence() {
        let recorder = TrajectoryRecorder::new(std::sync::Arc::new(FixedClock::new(0)));
        let id = recorder.start("low influence");
        recorder.record_step(id, step("a", 10, 0.1, 0)).unwrap();
        let completed = recorder.complete(id, "done").unwrap();
        assert_eq!(completed.compliance_score, Some(90));
    }

    #[test]
    fn compliance_score_never_goes_below_zero() {
        let recorder = TrajectoryRecorder::new(std::sync::Arc::new(FixedClock::new(0)));
        let id = recorder.start("worst case");
        for i in 0..20 {
            recorder.record_step(id, step("a", 5_000, 0.0, i)).unwrap();
        }
        let completed = recorder.complete(id, "done").unwrap();
        assert_eq!(completed.compliance_score, Some(80));
        assert!(completed.compliance_score.unwrap() <= 100);
    }

    #[test]
    fn taste_vault_factors_bucket_correctly() {
        let engine = ExplanationEngine;
        let recorder = TrajectoryRecorder::new(std::sync::Arc::new(FixedClock::new(0)));
        let id = recorder.start("x");
        recorder.record_step(id, step("agent-a", 10, 0.95, 0)).unwrap();
        recorder.record_step(id, step("agent-b", 10, 0.9, 1)).unwrap();
        let trajectory = recorder.get(id).unwrap();
        let factors = engine.taste_vault_factors(&trajectory);
        assert_eq!(factors.strength, InfluenceStrength::Strong);
        assert_eq!(factors.highest_influence_agent, Some("agent-a".to_string()));
    }

    #[test]
    fn explain_counts_steps_per_agent() {
        let engine = ExplanationEngine;
        let recorder = TrajectoryRecorder::new(std::sync::Arc::new(FixedClock::new(0)));
        let id = recorder.start("x");
        recorder.record_step(id, step("agent-a", 1, 0.5, 0)).unwrap();
        recorder.record_step(id, step("agent-a", 1, 0.5, 1)).unwrap();
        recorder.record_step(id, step("agent-b", 1, 0.5, 2)).unwrap();
        let trajectory = recorder.complete(id, "done").unwrap();
        let explanation = engine.explain(&trajectory);
        assert_eq!(explanation.steps_per_agent.get("agent-a"), Some(&2));
        assert_eq!(explanation.steps_per_agent.get("agent-b"), Some(&1));
        assert_eq!(explanation.outcome, Some("done".to_string()));
    }
}
