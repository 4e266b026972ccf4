//! # Warden Resilience
//!
//! Error classification, circuit breaking, build snapshots and recovery
//! orchestration (`spec.md` §4.8-4.11, layer L6). Sits above the sandbox
//! and policy layers: it never spawns or inspects a sandbox directly, only
//! reacts to errors surfaced by the layers that do.

pub mod circuit_breaker;
pub mod classifier;
pub mod orchestrator;
pub mod snapshot;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, State as CircuitBreakerState, Stats as CircuitBreakerStats};
pub use classifier::{ClassifiedError, Correlation, ErrorClass, ErrorClassifier, Pattern, Severity};
pub use orchestrator::{
    AttemptRecord, OrchestrationResult, RecoveryOrchestrator, RecoveryOrchestratorConfig, Strategy,
};
pub use snapshot::{
    BuildSnapshot, BuildSnapshotManager, DependencyChange, FsSnapshotStorage, SnapshotDiff, SnapshotStorage,
    VersionBump,
};
