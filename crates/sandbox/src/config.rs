//! The "hac" sandbox configuration document (`spec.md` §6): a TOML-shaped
//! serialization of a [`SandboxSpec`] meant for hand-authored config files.
//! `parse(format(spec)) ≡ spec` is a required round-trip law (§8).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use warden_error::WardenError;
use warden_isolation::IsolationTier;

use crate::spec::{BackendKind, Drive, ResourceLimits, SandboxSpec};

/// The `[resources]` table of a hac document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HacResources {
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

impl From<ResourceLimits> for HacResources {
    fn from(r: ResourceLimits) -> Self {
        Self {
            cpu_millicores: r.cpu_millicores,
            memory_mb: r.memory_mb,
            disk_mb: r.disk_mb,
            network_kbps: r.network_kbps,
            max_processes: r.max_processes,
        }
    }
}

impl From<HacResources> for ResourceLimits {
    fn from(r: HacResources) -> Self {
        Self {
            cpu_millicores: r.cpu_millicores,
            memory_mb: r.memory_mb,
            disk_mb: r.disk_mb,
            network_kbps: r.network_kbps,
            max_processes: r.max_processes,
        }
    }
}

/// A single `[[drives]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HacDrive {
    /// Drive identifier.
    pub drive_id: String,
    /// Host-side backing path.
    pub path_on_host: String,
    /// Whether this drive is the root filesystem.
    pub is_root_device: bool,
    /// Whether the drive is read-only.
    pub is_read_only: bool,
}

impl From<Drive> for HacDrive {
    fn from(d: Drive) -> Self {
        Self {
            drive_id: d.drive_id,
            path_on_host: d.path_on_host,
            is_root_device: d.is_root_device,
            is_read_only: d.is_read_only,
        }
    }
}

impl From<HacDrive> for Drive {
    fn from(d: HacDrive) -> Self {
        Self {
            drive_id: d.drive_id,
            path_on_host: d.path_on_host,
            is_root_device: d.is_root_device,
            is_read_only: d.is_read_only,
        }
    }
}

/// The top-level hac document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HacConfig {
    /// Sandbox name.
    pub name: String,
    /// Backend selector.
    pub provider: BackendKind,
    /// Base image reference.
    pub image: String,
    /// Kernel image reference, required by microVM-like providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_image: Option<String>,
    /// Isolation tier.
    pub isolation_level: IsolationTier,
    /// Whether networking is enabled at all.
    pub network_enabled: bool,
    /// Boot timeout in milliseconds.
    pub boot_timeout_ms: u64,
    /// Resource ceilings.
    pub resources: HacResources,
    /// Additional block devices.
    #[serde(default, rename = "drives")]
    pub drives: Vec<HacDrive>,
    /// Free-form metadata table.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl From<SandboxSpec> for HacConfig {
    fn from(spec: SandboxSpec) -> Self {
        Self {
            name: spec.name,
            provider: spec.backend,
            image: spec.image,
            kernel_image: spec.kernel_image,
            isolation_level: spec.isolation_level,
            network_enabled: spec.network_enabled,
            boot_timeout_ms: spec.boot_timeout_ms,
            resources: spec.resources.into(),
            drives: spec.drives.into_iter().map(Into::into).collect(),
            metadata: spec.metadata,
        }
    }
}

impl From<HacConfig> for SandboxSpec {
    fn from(config: HacConfig) -> Self {
        Self {
            name: config.name,
            backend: config.provider,
            image: config.image,
            kernel_image: config.kernel_image,
            isolation_level: config.isolation_level,
            resources: config.resources.into(),
            drives: config.drives.into_iter().map(Into::into).collect(),
            network_enabled: config.network_enabled,
            metadata: config.metadata,
            boot_timeout_ms: config.boot_timeout_ms,
        }
    }
}

/// Serializes a [`HacConfig`] to its TOML document form.
pub fn format_hac(config: &HacConfig) -> Result<String, WardenError> {
    toml::to_string_pretty(config).map_err(|e| WardenError::Other(e.to_string()))
}

/// Parses a TOML document into a [`HacConfig`].
pub fn parse_hac(document: &str) -> Result<HacConfig, WardenError> {
    toml::from_str(document).map_err(|e| WardenError::Other(e.to_string()))
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// `true` iff `errors` is empty.
    pub valid: bool,
    /// Hard violations against `capacity`.
    pub errors: Vec<String>,
    /// Soft concerns that do not block creation.
    pub warnings: Vec<String>,
}

const CPU_WARNING_RATIO: f64 = 0.85;

/// Validates a hac document's resource requests against the host's spare
/// `capacity`, per `spec.md` §6 plus the supplemented warnings in
/// `SPEC_FULL.md` §C.
///
/// `preregistered_network_rule_names` lists sandbox names that already
/// have network rules installed (the caller knows this; this crate does
/// not depend on `warden-network-policy` for this check only).
#[must_use]
pub fn validate(
    config: &HacConfig,
    capacity: &ResourceLimits,
    preregistered_network_rule_names: &[String],
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.resources.cpu_millicores > capacity.cpu_millicores {
        errors.push(format!(
            "cpu_millicores {} exceeds capacity {}",
            config.resources.cpu_millicores, capacity.cpu_millicores
        ));
    }
    if config.resources.memory_mb > capacity.memory_mb {
        errors.push(format!(
            "memory_mb {} exceeds capacity {}",
            config.resources.memory_mb, capacity.memory_mb
        ));
    }
    if config.resources.disk_mb > capacity.disk_mb {
        errors.push(format!(
            "disk_mb {} exceeds capacity {}",
            config.resources.disk_mb, capacity.disk_mb
        ));
    }
    if config.resources.network_kbps > capacity.network_kbps {
        errors.push(format!(
            "network_kbps {} exceeds capacity {}",
            config.resources.network_kbps, capacity.network_kbps
        ));
    }
    if config.resources.max_processes > capacity.max_processes {
        errors.push(format!(
            "max_processes {} exceeds capacity {}",
            config.resources.max_processes, capacity.max_processes
        ));
    }

    if config.provider == BackendKind::MicroVm && config.kernel_image.is_none() {
        warnings.push("firecracker-like provider has no kernel_image configured".to_string());
    }

    if capacity.cpu_millicores > 0 {
        let ratio = config.resources.cpu_millicores as f64 / capacity.cpu_millicores as f64;
        if ratio >= CPU_WARNING_RATIO {
            warnings.push(format!(
                "cpu usage at {:.0}% of capacity",
                ratio * 100.0
            ));
        }
    }

    if !config.network_enabled && preregistered_network_rule_names.contains(&config.name) {
        warnings.push(format!(
            "network_enabled is false but rules are pre-registered for '{}'",
            config.name
        ));
    }

    if config.resources.max_processes == 0 {
        warnings.push("max_processes is 0; the sandbox cannot run anything".to_string());
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HacConfig {
        HacConfig {
            name: "demo".to_string(),
            provider: BackendKind::Container,
            image: "images/demo.img".to_string(),
            kernel_image: None,
            isolation_level: IsolationTier::Namespace,
            network_enabled: true,
            boot_timeout_ms: 5_000,
            resources: HacResources {
                cpu_millicores: 500,
                memory_mb: 256,
                disk_mb: 1024,
                network_kbps: 1_000,
                max_processes: 16,
            },
            drives: vec![HacDrive {
                drive_id: "root".to_string(),
                path_on_host: "/var/lib/warden/root.img".to_string(),
                is_root_device: true,
                is_read_only: false,
            }],
            metadata: HashMap::from([("owner".to_string(), "agent-a".to_string())]),
        }
    }

    #[test]
    fn parse_format_round_trips() {
        let config = sample();
        let document = format_hac(&config).unwrap();
        let parsed = parse_hac(&document).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn validate_flags_resources_exceeding_capacity() {
        let config = sample();
        let capacity = ResourceLimits {
            cpu_millicores: 100,
            memory_mb: 128,
            disk_mb: 100,
            network_kbps: 100,
            max_processes: 4,
        };
        let report = validate(&config, &capacity, &[]);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 5);
    }

    #[test]
    fn validate_warns_on_missing_kernel_image_for_microvm() {
        let mut config = sample();
        config.provider = BackendKind::MicroVm;
        let capacity = ResourceLimits {
            cpu_millicores: 10_000,
            memory_mb: 10_000,
            disk_mb: 10_000,
            network_kbps: 10_000,
            max_processes: 1_000,
        };
        let report = validate(&config, &capacity, &[]);
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("kernel_image")));
    }

    #[test]
    fn validate_warns_at_85_percent_cpu() {
        let mut config = sample();
        config.resources.cpu_millicores = 850;
        let capacity = ResourceLimits {
            cpu_millicores: 1_000,
            memory_mb: 10_000,
            disk_mb: 10_000,
            network_kbps: 10_000,
            max_processes: 1_000,
        };
        let report = validate(&config, &capacity, &[]);
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("cpu usage")));
    }

    #[test]
    fn validate_warns_when_network_disabled_but_rules_preregistered() {
        let mut config = sample();
        config.network_enabled = false;
        let capacity = ResourceLimits {
            cpu_millicores: 10_000,
            memory_mb: 10_000,
            disk_mb: 10_000,
            network_kbps: 10_000,
            max_processes: 1_000,
        };
        let report = validate(&config, &capacity, &["demo".to_string()]);
        assert!(report.warnings.iter().any(|w| w.contains("pre-registered")));
    }

    #[test]
    fn validate_warns_on_zero_max_processes() {
        let mut config = sample();
        config.resources.max_processes = 0;
        let capacity = ResourceLimits {
            cpu_millicores: 10_000,
            memory_mb: 10_000,
            disk_mb: 10_000,
            network_kbps: 10_000,
            max_processes: 1_000,
        };
        let report = validate(&config, &capacity, &[]);
        assert!(report.warnings.iter().any(|w| w.contains("max_processes is 0")));
    }
}
