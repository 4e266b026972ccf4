//! # Warden Image Verify
//!
//! L3: gates sandbox boot on a content-addressed checksum match against a
//! [`TrustedManifest`]. Only hash comparison is in scope — cryptographic
//! signing of the manifest itself is a documented non-goal (`spec.md` §1).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_redact::sha256_hex;

/// A signed (out of scope: only hash-checked) manifest binding image,
/// kernel, and plugin names to their expected SHA-256 hex digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedManifest {
    /// Manifest schema version.
    pub version: String,
    /// Image path -> expected hex hash.
    pub images: HashMap<String, String>,
    /// Kernel path -> expected hex hash.
    pub kernels: HashMap<String, String>,
    /// Plugin name -> expected hex hash.
    pub plugins: HashMap<String, String>,
    /// ISO 8601 timestamp the manifest was generated.
    pub updated_at: String,
}

/// Outcome of a single verification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the computed hash matched the manifest entry.
    pub verified: bool,
    /// The computed hash, present whether verification succeeded or
    /// failed (absent only when there was no manifest/entry to compare
    /// against).
    pub actual_hash: Option<String>,
    /// Human-readable failure reason, if any.
    pub error: Option<String>,
}

enum Section {
    Image,
    Kernel,
    Plugin,
}

/// Loads a manifest and verifies image/kernel/plugin buffers against it.
#[derive(Default)]
pub struct ImageVerifier {
    manifest: RwLock<Option<TrustedManifest>>,
}

impl ImageVerifier {
    /// Creates a verifier with no manifest loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads (or replaces) the trusted manifest.
    pub fn load_manifest(&self, manifest: TrustedManifest) {
        *self.manifest.write() = Some(manifest);
    }

    /// Clears the loaded manifest.
    pub fn clear_manifest(&self) {
        *self.manifest.write() = None;
    }

    fn verify(&self, section: Section, key: &str, data: &[u8]) -> VerificationResult {
        let manifest_guard = self.manifest.read();
        let Some(manifest) = manifest_guard.as_ref() else {
            return VerificationResult {
                verified: false,
                actual_hash: None,
                error: Some("No manifest loaded".to_string()),
            };
        };

        let table = match section {
            Section::Image => &manifest.images,
            Section::Kernel => &manifest.kernels,
            Section::Plugin => &manifest.plugins,
        };

        let Some(expected) = table.get(key) else {
            return VerificationResult {
                verified: false,
                actual_hash: None,
                error: Some(format!("'{key}' not found in manifest")),
            };
        };

        let actual = sha256_hex(data);
        if &actual == expected {
            VerificationResult {
                verified: true,
                actual_hash: Some(actual),
                error: None,
            }
        } else {
            VerificationResult {
                verified: false,
                actual_hash: Some(actual),
                error: Some(format!(
                    "checksum mismatch for '{key}': expected {expected}, got hash does not match"
                )),
            }
        }
    }

    /// Verifies an image buffer against the manifest's `images` section.
    #[must_use]
    pub fn verify_image(&self, path: &str, data: &[u8]) -> VerificationResult {
        self.verify(Section::Image, path, data)
    }

    /// Verifies a kernel buffer against the manifest's `kernels` section.
    #[must_use]
    pub fn verify_kernel(&self, path: &str, data: &[u8]) -> VerificationResult {
        self.verify(Section::Kernel, path, data)
    }

    /// Verifies a plugin buffer against the manifest's `plugins` section.
    #[must_use]
    pub fn verify_plugin(&self, name: &str, data: &[u8]) -> VerificationResult {
        self.verify(Section::Plugin, name, data)
    }
}
