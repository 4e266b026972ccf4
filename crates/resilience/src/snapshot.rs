//! Build snapshot manager (`spec.md` §4.10): content-hash file-set
//! snapshots used by the recovery orchestrator's checkpoint-resume
//! strategy. Disk I/O is behind an injected [`SnapshotStorage`] trait so
//! tests never need a real filesystem, the same dependency-injection shape
//! `warden-sandbox`'s manager uses for its L3 components.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use warden_core::{BuildSnapshotId, Clock, SystemClock};
use warden_error::WardenError;

/// Injected filesystem operations a [`BuildSnapshotManager`] needs:
/// create a directory tree, write a file, read a file back.
pub trait SnapshotStorage: Send + Sync {
    /// Creates `path` and all missing parent directories.
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
    /// Writes `contents` to `path`, creating or truncating it.
    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
    /// Reads the full contents of `path`.
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// Real filesystem-backed [`SnapshotStorage`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSnapshotStorage;

impl SnapshotStorage for FsSnapshotStorage {
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        std::fs::write(path, contents)
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// A content-addressed record of a build's file set and dependencies at a
/// moment in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSnapshot {
    /// Unique id assigned at creation.
    pub id: BuildSnapshotId,
    /// The build this snapshot was taken for.
    pub build_id: String,
    /// Creation time as an ISO 8601 string.
    pub created_at: String,
    /// File path to content hash.
    pub files: BTreeMap<String, String>,
    /// Dependency name to version.
    pub dependencies: BTreeMap<String, String>,
    /// Deterministic hash of the sorted `name@version` dependency pairs.
    pub environment_hash: String,
    /// Free-form caller metadata.
    pub metadata: HashMap<String, String>,
}

impl BuildSnapshot {
    fn created_at_millis(&self) -> i64 {
        chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0)
    }
}

/// Computes the environment hash: sorted `name@version` pairs joined by
/// `|`, SHA-256 hex of the result.
#[must_use]
pub fn environment_hash(dependencies: &BTreeMap<String, String>) -> String {
    let joined = dependencies
        .iter()
        .map(|(name, version)| format!("{name}@{version}"))
        .collect::<Vec<_>>()
        .join("|");
    warden_redact::sha256_hex(joined.as_bytes())
}

/// The result of [`BuildSnapshotManager::compare_snapshots`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Paths present in `b` but not `a`.
    pub added: Vec<String>,
    /// Paths present in `a` but not `b`.
    pub removed: Vec<String>,
    /// Paths present in both with a different content hash.
    pub modified: Vec<String>,
    /// Paths present in both with an identical content hash.
    pub unchanged_count: usize,
}

/// How a dependency's version changed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBump {
    /// Major component increased (or either side failed to parse as semver).
    Major,
    /// Only the minor component increased.
    Minor,
    /// Only the patch component increased.
    Patch,
    /// The version string is identical, or differs only in build metadata.
    Unchanged,
}

/// One dependency's change between two snapshots, from
/// [`BuildSnapshotManager::diff_dependencies`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyChange {
    /// Dependency name.
    pub name: String,
    /// Version in the first snapshot, `None` if newly added.
    pub from: Option<String>,
    /// Version in the second snapshot, `None` if removed.
    pub to: Option<String>,
    /// Bump classification, best-effort semver parse.
    pub bump: VersionBump,
}

fn classify_bump(from: &str, to: &str) -> VersionBump {
    match (semver::Version::parse(from), semver::Version::parse(to)) {
        (Ok(a), Ok(b)) if a == b => VersionBump::Unchanged,
        (Ok(a), Ok(b)) if a.major != b.major => VersionBump::Major,
        (Ok(a), Ok(b)) if a.minor != b.minor => VersionBump::Minor,
        (Ok(_), Ok(_)) => VersionBump::Patch,
        _ if from == to => VersionBump::Unchanged,
        _ => VersionBump::Major,
    }
}

/// Owns every cached [`BuildSnapshot`] and persists new ones to disk.
pub struct BuildSnapshotManager {
    storage: Arc<dyn SnapshotStorage>,
    base_dir: PathBuf,
    max_snapshots: usize,
    clock: Arc<dyn Clock>,
    cache: RwLock<Vec<BuildSnapshot>>,
}

impl BuildSnapshotManager {
    /// Creates a manager writing under `base_dir`, retaining at most
    /// `max_snapshots` after a prune.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, max_snapshots: usize) -> Self {
        Self::with_storage(base_dir, max_snapshots, Arc::new(FsSnapshotStorage), Arc::new(SystemClock))
    }

    /// Creates a manager with an injected storage backend and clock, for
    /// deterministic tests.
    #[must_use]
    pub fn with_storage(
        base_dir: impl Into<PathBuf>,
        max_snapshots: usize,
        storage: Arc<dyn SnapshotStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            base_dir: base_dir.into(),
            max_snapshots,
            clock,
            cache: RwLock::new(Vec::new()),
        }
    }

    fn path_for(&self, id: BuildSnapshotId) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    /// Allocates a new snapshot, writes it to disk, and caches it in
    /// memory.
    pub fn create_snapshot(
        &self,
        build_id: impl Into<String>,
        files: BTreeMap<String, String>,
        dependencies: BTreeMap<String, String>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<BuildSnapshot, WardenError> {
        let snapshot = BuildSnapshot {
            id: BuildSnapshotId::v4(),
            build_id: build_id.into(),
            created_at: chrono::DateTime::from_timestamp_millis(self.clock.now_millis())
                .unwrap_or_else(Utc::now)
                .to_rfc3339(),
            environment_hash: environment_hash(&dependencies),
            files,
            dependencies,
            metadata: metadata.unwrap_or_default(),
        };

        self.storage
            .create_dir_all(&self.base_dir)
            .map_err(|e| WardenError::Other(format!("snapshot mkdir failed: {e}")))?;
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| WardenError::Other(format!("snapshot serialize failed: {e}")))?;
        self.storage
            .write(&self.path_for(snapshot.id), &json)
            .map_err(|e| WardenError::Other(format!("snapshot write failed: {e}")))?;

        self.cache.write().push(snapshot.clone());
        tracing::info!(snapshot_id = %snapshot.id, build_id = %snapshot.build_id, "build snapshot created");
        Ok(snapshot)
    }

    /// Looks a snapshot up by id, checking the in-memory cache before
    /// falling back to disk.
    pub fn load_snapshot(&self, id: BuildSnapshotId) -> Result<Option<BuildSnapshot>, WardenError> {
        if let Some(found) = self.cache.read().iter().find(|s| s.id == id) {
            return Ok(Some(found.clone()));
        }
        match self.storage.read(&self.path_for(id)) {
            Ok(bytes) => {
                let snapshot: BuildSnapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| WardenError::Other(format!("snapshot parse failed: {e}")))?;
                self.cache.write().push(snapshot.clone());
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WardenError::Other(format!("snapshot read failed: {e}"))),
        }
    }

    /// The most recent cached snapshot, optionally filtered to one build.
    #[must_use]
    pub fn latest_snapshot(&self, build_id: Option<&str>) -> Option<BuildSnapshot> {
        self.cache
            .read()
            .iter()
            .filter(|s| build_id.is_none_or(|b| s.build_id == b))
            .max_by_key(|s| s.created_at_millis())
            .cloned()
    }

    /// Diffs two snapshots' file sets by path presence and hash equality.
    #[must_use]
    pub fn compare_snapshots(a: &BuildSnapshot, b: &BuildSnapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();
        for (path, hash_b) in &b.files {
            match a.files.get(path) {
                None => diff.added.push(path.clone()),
                Some(hash_a) if hash_a != hash_b => diff.modified.push(path.clone()),
                Some(_) => diff.unchanged_count += 1,
            }
        }
        for path in a.files.keys() {
            if !b.files.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }
        diff.added.sort();
        diff.removed.sort();
        diff.modified.sort();
        diff
    }

    /// `true` iff both snapshots' environment hashes are equal.
    #[must_use]
    pub fn is_compatible(a: &BuildSnapshot, b: &BuildSnapshot) -> bool {
        a.environment_hash == b.environment_hash
    }

    /// Diffs two snapshots' dependency maps, classifying each changed
    /// entry's version bump with best-effort semver parsing.
    #[must_use]
    pub fn diff_dependencies(a: &BuildSnapshot, b: &BuildSnapshot) -> Vec<DependencyChange> {
        let mut names: std::collections::BTreeSet<&str> =
            a.dependencies.keys().map(String::as_str).collect();
        names.extend(b.dependencies.keys().map(String::as_str));

        names
            .into_iter()
            .filter_map(|name| {
                let from = a.dependencies.get(name);
                let to = b.dependencies.get(name);
                match (from, to) {
                    (Some(f), Some(t)) if f == t => None,
                    (Some(f), Some(t)) => Some(DependencyChange {
                        name: name.to_string(),
                        from: Some(f.clone()),
                        to: Some(t.clone()),
                        bump: classify_bump(f, t),
                    }),
                    (Some(f), None) => Some(DependencyChange {
                        name: name.to_string(),
                        from: Some(f.clone()),
                        to: None,
                        bump: VersionBump::Major,
                    }),
                    (None, Some(t)) => Some(DependencyChange {
                        name: name.to_string(),
                        from: None,
                        to: Some(t.clone()),
                        bump: VersionBump::Major,
                    }),
                    (None, None) => None,
                }
            })
            .collect()
    }

    /// Drops cached snapshots older than `max_age_millis` (if given), then
    /// drops the oldest excess beyond `max_snapshots`. Returns the total
    /// number pruned. Disk copies are left untouched — pruning only
    /// affects what the manager keeps in memory and reports via
    /// `latest_snapshot`.
    pub fn prune_old_snapshots(&self, max_age_millis: Option<i64>) -> usize {
        let mut cache = self.cache.write();
        let before = cache.len();

        if let Some(max_age) = max_age_millis {
            let now = self.clock.now_millis();
            cache.retain(|s| now - s.created_at_millis() <= max_age);
        }

        if cache.len() > self.max_snapshots {
            cache.sort_by_key(BuildSnapshot::created_at_millis);
            let excess = cache.len() - self.max_snapshots;
            cache.drain(0..excess);
        }

        before - cache.len()
    }
}
