//! The immutable sandbox spec supplied by callers (`spec.md` §3 "Sandbox
//! spec") and the hac (§6) configuration document it can be parsed from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use warden_isolation::IsolationTier;

/// Hypervisor backend a sandbox boots on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// A lightweight, firecracker-like micro virtual machine.
    #[serde(rename = "microVM")]
    MicroVm,
    /// A full virtual machine with a general-purpose kernel.
    #[serde(rename = "full-VM")]
    FullVm,
    /// An OS-container backend (namespaces + cgroups, no kernel of its own).
    #[serde(rename = "container")]
    Container,
}

/// One additional block device attached to the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    /// Identifier for the drive, unique within the spec.
    pub drive_id: String,
    /// Host-side path backing the drive.
    pub path_on_host: String,
    /// Whether this drive is mounted as the root filesystem.
    pub is_root_device: bool,
    /// Whether the drive is mounted read-only.
    pub is_read_only: bool,
}

/// Resource ceilings enforced for the sandbox's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU budget in millicores.
    pub cpu_millicores: u64,
    /// Memory budget in megabytes.
    pub memory_mb: u64,
    /// Disk budget in megabytes.
    pub disk_mb: u64,
    /// Network throughput budget in Kbps.
    pub network_kbps: u64,
    /// Maximum number of processes permitted inside the sandbox.
    pub max_processes: u32,
}

/// An immutable sandbox creation request. Consumed by the provider and
/// policy layers; never mutated after the sandbox is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Human-assigned sandbox name.
    pub name: String,
    /// Backend to boot on.
    pub backend: BackendKind,
    /// Base image reference (path or registry ref, opaque to this crate).
    pub image: String,
    /// Kernel image reference, required by microVM-style backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_image: Option<String>,
    /// Isolation tier to attach once the sandbox is running.
    pub isolation_level: IsolationTier,
    /// Resource ceilings.
    pub resources: ResourceLimits,
    /// Additional block devices.
    #[serde(default)]
    pub drives: Vec<Drive>,
    /// Whether the sandbox may originate or receive network traffic at
    /// all, independent of the network policy rules governing what.
    pub network_enabled: bool,
    /// Free-form caller metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// How long `spawn` waits for the provider to report boot completion.
    pub boot_timeout_ms: u64,
}
