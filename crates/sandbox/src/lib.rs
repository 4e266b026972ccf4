//! # Warden Sandbox
//!
//! L4-L5: the sandbox lifecycle manager, its provider backends, the hac
//! configuration document sandboxes can be described in, the per-agent
//! policy registry, and the moltbot named-agent deployment registry.
//!
//! [`SandboxManager`] is the entry point for agent execution (`spec.md`
//! §2): it spawns sandboxes against a [`Provider`] backend, attaches an
//! isolation context, registers network rules, and dispatches tasks over a
//! per-sandbox VSOCK channel after capability and policy checks pass.

pub mod config;
pub mod events;
pub mod instance;
pub mod manager;
pub mod moltbot;
pub mod policy;
pub mod provider;
pub mod spec;

pub use config::{HacConfig, HacDrive, HacResources, ValidationReport};
pub use events::{EventBus, SandboxEvent};
pub use instance::{SandboxInstance, SandboxState};
pub use manager::{CleanupReport, SandboxManager, SandboxManagerConfig};
pub use moltbot::MoltbotDeployer;
pub use policy::{AgentPolicy, PolicyRegistry};
pub use provider::{ContainerProvider, FullVmProvider, MicroVmProvider, Provider, provider_for};
pub use spec::{BackendKind, Drive, ResourceLimits, SandboxSpec};
