//! The sandbox instance record (`spec.md` §3 "Sandbox instance"): a spec
//! plus the lifecycle state the manager owns and advances.

use serde::{Deserialize, Serialize};
use warden_core::SandboxId;

use crate::spec::SandboxSpec;

/// Lifecycle state of a sandbox instance. Monotonic except the
/// `running ⇄ paused` toggle; `destroyed` is terminal. Any state may
/// transition to `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxState {
    /// Provider boot is in flight.
    Creating,
    /// Boot succeeded; task execution is permitted.
    Running,
    /// Suspended via `pause()`.
    Paused,
    /// Torn down via `terminate()`; kept in the registry for audit/stats.
    Stopped,
    /// Permanently removed. Terminal.
    Destroyed,
    /// The provider failed to boot, or another unrecoverable fault
    /// occurred.
    Error,
}

impl SandboxState {
    /// `true` for states that count against `maxConcurrent` and are
    /// eligible for `close()`'s teardown sweep.
    #[must_use]
    pub fn is_non_terminal(self) -> bool {
        matches!(self, Self::Creating | Self::Running | Self::Paused)
    }
}

/// A sandbox's full lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInstance {
    /// Unique id assigned at `spawn` time.
    pub id: SandboxId,
    /// The immutable spec this instance was created from.
    pub spec: SandboxSpec,
    /// Current lifecycle state.
    pub state: SandboxState,
    /// When `spawn` was called, epoch milliseconds.
    pub created_at_millis: i64,
    /// When the provider finished booting, if it ever did.
    pub started_at_millis: Option<i64>,
    /// When `terminate` was called, if it ever was.
    pub stopped_at_millis: Option<i64>,
}
