//! Recovery orchestrator (`spec.md` §4.11): picks a recovery strategy for
//! a classified error and drives its retry loop. The backoff formula is
//! grounded on `nebula-error::retry::RetryStrategy::calculate_delay`,
//! adapted to the spec's exact jitter shape (additive, never negative,
//! rather than centered on zero).

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_core::Clock;

use crate::classifier::{ClassifiedError, ErrorClass};

/// One entry in the fixed strategy table, or an injected custom one.
#[derive(Debug, Clone)]
pub struct Strategy {
    /// Stable name (`"retry-transient"`, ...).
    pub name: String,
    /// Error classes this strategy applies to.
    pub applicable_classes: Vec<ErrorClass>,
    /// Lower priority is preferred when several strategies apply.
    pub priority: u32,
    /// Maximum attempts this strategy will make on its own.
    pub max_attempts: u32,
}

/// Tunables for [`RecoveryOrchestrator::compute_backoff`] and the overall
/// retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryOrchestratorConfig {
    /// Delay before the first retry.
    pub base_backoff_millis: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Hard cap on any single computed delay.
    pub max_backoff_millis: u64,
    /// Whether to add random jitter on top of the capped delay.
    pub jitter: bool,
    /// Upper bound on attempts regardless of what the strategy allows.
    pub max_retries: u32,
}

impl Default for RecoveryOrchestratorConfig {
    fn default() -> Self {
        Self {
            base_backoff_millis: 200,
            backoff_multiplier: 2.0,
            max_backoff_millis: 30_000,
            jitter: true,
            max_retries: 5,
        }
    }
}

/// The outcome of a single attempt within a strategy execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Zero-based attempt index.
    pub attempt: u32,
    /// Whether this attempt succeeded.
    pub success: bool,
    /// The error message, if the attempt failed.
    pub error: Option<String>,
}

/// The result of one [`RecoveryOrchestrator::orchestrate`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// The strategy that was selected, `None` if nothing applied.
    pub strategy_name: Option<String>,
    /// Whether the orchestrated action ultimately succeeded.
    pub succeeded: bool,
    /// Every attempt made, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Explanatory error when nothing applied or every attempt failed.
    pub error: Option<String>,
}

fn built_in_strategies() -> Vec<Strategy> {
    vec![
        Strategy {
            name: "retry-transient".to_string(),
            applicable_classes: vec![ErrorClass::Network, ErrorClass::Timeout, ErrorClass::RateLimit],
            priority: 1,
            max_attempts: 3,
        },
        Strategy {
            name: "retry-model".to_string(),
            applicable_classes: vec![ErrorClass::Model],
            priority: 2,
            max_attempts: 2,
        },
        Strategy {
            name: "fallback-model".to_string(),
            applicable_classes: vec![ErrorClass::Model],
            priority: 3,
            max_attempts: 1,
        },
        Strategy {
            name: "checkpoint-resume".to_string(),
            applicable_classes: vec![ErrorClass::Resource],
            priority: 4,
            max_attempts: 1,
        },
        Strategy {
            name: "skip-task".to_string(),
            applicable_classes: vec![ErrorClass::Validation],
            priority: 5,
            max_attempts: 1,
        },
        Strategy {
            name: "graceful-degrade".to_string(),
            applicable_classes: vec![ErrorClass::Filesystem, ErrorClass::Resource],
            priority: 6,
            max_attempts: 1,
        },
        Strategy {
            name: "abort".to_string(),
            applicable_classes: vec![ErrorClass::Unknown, ErrorClass::Auth],
            priority: 7,
            max_attempts: 1,
        },
    ]
}

/// Selects a strategy and drives its retry loop against an error classifier's
/// output. Maintains an append-only history of every orchestration.
pub struct RecoveryOrchestrator {
    strategies: Vec<Strategy>,
    config: RecoveryOrchestratorConfig,
    clock: Arc<dyn Clock>,
    history: RwLock<Vec<OrchestrationResult>>,
}

impl RecoveryOrchestrator {
    /// Creates an orchestrator with the 7 built-in strategies and default
    /// config.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_strategies(built_in_strategies(), RecoveryOrchestratorConfig::default(), clock)
    }

    /// Creates an orchestrator with an explicit strategy table (built-ins
    /// plus any injected extras) and config.
    #[must_use]
    pub fn with_strategies(
        mut strategies: Vec<Strategy>,
        config: RecoveryOrchestratorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        strategies.sort_by_key(|s| s.priority);
        Self { strategies, config, clock, history: RwLock::new(Vec::new()) }
    }

    /// Appends `extra` to the strategy table and re-sorts by priority.
    pub fn register_strategy(&mut self, extra: Strategy) {
        self.strategies.push(extra);
        self.strategies.sort_by_key(|s| s.priority);
    }

    /// The first (lowest-priority-value) strategy applicable to `class`,
    /// `None` if nothing applies.
    #[must_use]
    pub fn select_strategy(&self, class: ErrorClass) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.applicable_classes.contains(&class))
    }

    /// `min(base * multiplier^attempt, max_backoff_millis)`, with additive
    /// jitter of `random() * capped * 0.5` when jitter is enabled.
    #[must_use]
    pub fn compute_backoff(&self, attempt: u32) -> u64 {
        let raw = self.config.base_backoff_millis as f64 * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.config.max_backoff_millis as f64);
        let delay = if self.config.jitter {
            capped + fastrand::f64() * capped * 0.5
        } else {
            capped
        };
        delay.round() as u64
    }

    /// Retries `action` up to `min(strategy.max_attempts, config.max_retries)`
    /// times, sleeping `compute_backoff(i)` between attempts. Returns once
    /// an attempt succeeds or the budget is exhausted.
    pub async fn execute_strategy<F, Fut, T, E>(&self, strategy: &Strategy, mut action: F) -> (Option<T>, Vec<AttemptRecord>)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts_budget = strategy.max_attempts.min(self.config.max_retries).max(1);
        let mut records = Vec::with_capacity(attempts_budget as usize);

        for attempt in 0..attempts_budget {
            if attempt > 0 {
                let delay = self.compute_backoff(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            match action(attempt).await {
                Ok(value) => {
                    records.push(AttemptRecord { attempt, success: true, error: None });
                    return (Some(value), records);
                }
                Err(e) => {
                    records.push(AttemptRecord { attempt, success: false, error: Some(e.to_string()) });
                }
            }
        }
        (None, records)
    }

    /// Selects a strategy for `err.class` then executes it; if nothing
    /// applies, records and returns an abort-typed result without
    /// invoking `action`. Every call is appended to [`Self::history`].
    pub async fn orchestrate<F, Fut, T, E>(&self, err: &ClassifiedError, action: F) -> OrchestrationResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let _ = self.clock.now_millis();
        let Some(strategy) = self.select_strategy(err.class).cloned() else {
            let result = OrchestrationResult {
                strategy_name: None,
                succeeded: false,
                attempts: Vec::new(),
                error: Some(format!("no recovery strategy applies to error class {:?}", err.class)),
            };
            self.history.write().push(result.clone());
            return result;
        };

        let (value, attempts) = self.execute_strategy(&strategy, action).await;
        let succeeded = value.is_some();
        let result = OrchestrationResult {
            strategy_name: Some(strategy.name.clone()),
            succeeded,
            error: if succeeded {
                None
            } else {
                attempts.last().and_then(|a| a.error.clone())
            },
            attempts,
        };
        self.history.write().push(result.clone());
        result
    }

    /// Every orchestration performed so far, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<OrchestrationResult> {
        self.history.read().clone()
    }
}
