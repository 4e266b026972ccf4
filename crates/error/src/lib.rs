//! # Warden Error
//!
//! The structural error taxonomy named in `spec.md` §7: errors that
//! identify *which contract* was violated (a sandbox wasn't found, a
//! circuit was open, a frame was malformed) rather than *why an external
//! call failed* — that finer-grained classification lives in
//! [`warden-resilience`](https://docs.rs/warden-resilience)'s error
//! classifier, which wraps a `Box<dyn std::error::Error>` and never reaches
//! back into this enum.
//!
//! Every other crate in the workspace converts its leaf errors into
//! [`WardenError`] at its public boundary, the same layering
//! `nebula-error`'s `kinds` module uses for the teacher workspace.

use thiserror::Error;

/// Structural errors shared by the sandbox, channel, audit and policy
/// subsystems.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WardenError {
    /// Requested entity (sandbox, skill, trajectory, snapshot, ...) does not
    /// exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Human-readable entity kind, e.g. `"sandbox"`.
        kind: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// Operation attempted before `initialize()` was called.
    #[error("component not initialized")]
    NotInitialized,

    /// Concurrency limit reached.
    #[error("too many sandboxes: {running} running, limit is {max}")]
    TooManySandboxes {
        /// Count of currently non-terminal sandboxes.
        running: usize,
        /// Configured `maxConcurrent`.
        max: usize,
    },

    /// Lifecycle operation not valid from the current state.
    #[error("invalid transition: cannot {action} from state '{from}'")]
    InvalidTransition {
        /// The action that was attempted (e.g. `"pause"`).
        action: &'static str,
        /// The state it was attempted from.
        from: String,
    },

    /// Circuit breaker is open and rejecting calls.
    #[error("circuit '{name}' is open")]
    CircuitOpen {
        /// Breaker name.
        name: String,
    },

    /// VSOCK channel operation attempted before `connect()`.
    #[error("channel not connected")]
    NotConnected,

    /// A VSOCK frame was shorter than the 8-byte header.
    #[error("frame too short: {len} bytes, need at least 8")]
    FrameTooShort {
        /// Observed byte length.
        len: usize,
    },

    /// A VSOCK frame declared a message type outside `{1, 2}`.
    #[error("unknown frame message type: {type_tag}")]
    UnknownType {
        /// The raw type tag read from the frame.
        type_tag: u32,
    },

    /// A write was attempted against a disabled audit trail.
    #[error("audit trail is disabled")]
    AuditDisabled,

    /// The VSOCK channel was disconnected while a receive was pending.
    #[error("channel disconnected")]
    ChannelDisconnected,

    /// An operation with a `timeout_ms` argument did not complete in time.
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// A policy denied an operation (deny-listed, or no allow rule matched).
    #[error("policy denied operation '{operation}' for agent '{agent_id}'")]
    PolicyDenied {
        /// The agent whose request was denied.
        agent_id: String,
        /// The operation that was denied.
        operation: String,
    },

    /// Image, kernel, or plugin checksum did not match the trusted manifest.
    #[error("manifest mismatch for '{path}': expected {expected}, got {actual}")]
    ManifestMismatch {
        /// Path or name looked up in the manifest.
        path: String,
        /// Expected hex hash.
        expected: String,
        /// Actual computed hex hash.
        actual: String,
    },

    /// Catch-all for provider/backend failures that don't fit another
    /// variant; always carries a human-readable message.
    #[error("{0}")]
    Other(String),
}

impl WardenError {
    /// Shorthand for [`WardenError::NotFound`].
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, WardenError>;
