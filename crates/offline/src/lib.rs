//! # Warden Offline
//!
//! L2: local-first durability. When the control plane is unreachable,
//! mutations are enqueued into a durable SQLite-backed [`SyncQueue`] and
//! replayed in order once [`OfflineEngine::check_connectivity`] observes a
//! transition back online. A [`KvStore`] gives callers a local cache keyed
//! by `(namespace, key)` for reads that must succeed offline.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use warden_core::SyncQueueEntryId;
use warden_error::WardenError;

/// Status of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Not yet attempted.
    Pending,
    /// Attempted at least once, will retry.
    Retrying,
    /// Exhausted retry budget; terminal.
    Failed,
    /// Delivered successfully; terminal.
    Synced,
}

impl SyncStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Synced => "synced",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "retrying" => Self::Retrying,
            "failed" => Self::Failed,
            "synced" => Self::Synced,
            _ => Self::Pending,
        }
    }
}

/// A queued mutation awaiting delivery to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Unique id.
    pub id: SyncQueueEntryId,
    /// Mutation RPC path, e.g. `"workflow/create"`.
    pub mutation_path: String,
    /// Arguments as a JSON object.
    pub args: serde_json::Value,
    /// When the mutation was enqueued, epoch milliseconds.
    pub enqueued_at: i64,
    /// Number of delivery attempts made so far.
    pub attempt_count: u32,
    /// Timestamp of the last attempt, if any.
    pub last_attempt_at: Option<i64>,
    /// Current status.
    pub status: SyncStatus,
    /// Error from the most recent failed attempt, if any.
    pub error_message: Option<String>,
}

/// A local durable key-value store plus mutation sync queue, backed by
/// SQLite.
pub struct OfflineStore {
    conn: Mutex<Connection>,
}

impl OfflineStore {
    /// Opens (creating if necessary) a store at `path`.
    pub fn open(path: &Path) -> Result<Self, WardenError> {
        let conn = Connection::open(path).map_err(|e| WardenError::Other(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory store, useful for tests.
    pub fn open_in_memory() -> Result<Self, WardenError> {
        let conn = Connection::open_in_memory().map_err(|e| WardenError::Other(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, WardenError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                mutation_path TEXT NOT NULL,
                args TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_attempt_at INTEGER,
                status TEXT NOT NULL,
                error_message TEXT
            );",
        )
        .map_err(|e| WardenError::Other(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Upserts a value under `(namespace, key)`.
    pub fn kv_set(
        &self,
        namespace: &str,
        key: &str,
        value: &serde_json::Value,
        updated_at: i64,
    ) -> Result<(), WardenError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_store (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![namespace, key, value.to_string(), updated_at],
        )
        .map_err(|e| WardenError::Other(e.to_string()))?;
        Ok(())
    }

    /// Reads a value, if present.
    pub fn kv_get(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>, WardenError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT value FROM kv_store WHERE namespace = ?1 AND key = ?2")
            .map_err(|e| WardenError::Other(e.to_string()))?;
        let mut rows = stmt
            .query(params![namespace, key])
            .map_err(|e| WardenError::Other(e.to_string()))?;
        if let Some(row) = rows.next().map_err(|e| WardenError::Other(e.to_string()))? {
            let raw: String = row.get(0).map_err(|e| WardenError::Other(e.to_string()))?;
            let value = serde_json::from_str(&raw).map_err(|e| WardenError::Other(e.to_string()))?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    /// Inserts a pending sync-queue entry.
    pub fn enqueue(
        &self,
        mutation_path: &str,
        args: &serde_json::Value,
        enqueued_at: i64,
    ) -> Result<SyncQueueEntryId, WardenError> {
        let id = SyncQueueEntryId::v4();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sync_queue (id, mutation_path, args, enqueued_at, attempt_count, status)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                id.to_string(),
                mutation_path,
                args.to_string(),
                enqueued_at,
                SyncStatus::Pending.as_str()
            ],
        )
        .map_err(|e| WardenError::Other(e.to_string()))?;
        Ok(id)
    }

    /// Returns every non-terminal (`pending`, `retrying`) or `failed`
    /// entry in `enqueued_at` order, oldest first.
    pub fn list_non_synced(&self) -> Result<Vec<SyncQueueEntry>, WardenError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, mutation_path, args, enqueued_at, attempt_count, last_attempt_at, status, error_message
                 FROM sync_queue WHERE status != 'synced' ORDER BY enqueued_at ASC",
            )
            .map_err(|e| WardenError::Other(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let id_str: String = row.get(0)?;
                let args_str: String = row.get(2)?;
                let status_str: String = row.get(6)?;
                Ok((
                    id_str,
                    row.get::<_, String>(1)?,
                    args_str,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    status_str,
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .map_err(|e| WardenError::Other(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id_str, mutation_path, args_str, enqueued_at, attempt_count, last_attempt_at, status_str, error_message) =
                row.map_err(|e| WardenError::Other(e.to_string()))?;
            entries.push(SyncQueueEntry {
                id: SyncQueueEntryId::parse(&id_str).map_err(|e| WardenError::Other(e.to_string()))?,
                mutation_path,
                args: serde_json::from_str(&args_str).unwrap_or(serde_json::Value::Null),
                enqueued_at,
                attempt_count: attempt_count as u32,
                last_attempt_at,
                status: SyncStatus::parse(&status_str),
                error_message,
            });
        }
        Ok(entries)
    }

    /// Updates an entry's status, attempt bookkeeping and error message.
    pub fn update_status(
        &self,
        id: SyncQueueEntryId,
        status: SyncStatus,
        attempt_count: u32,
        last_attempt_at: i64,
        error_message: Option<&str>,
    ) -> Result<(), WardenError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sync_queue SET status = ?1, attempt_count = ?2, last_attempt_at = ?3, error_message = ?4 WHERE id = ?5",
            params![
                status.as_str(),
                attempt_count,
                last_attempt_at,
                error_message,
                id.to_string()
            ],
        )
        .map_err(|e| WardenError::Other(e.to_string()))?;
        Ok(())
    }

    /// Counts entries currently `pending` or `retrying`.
    pub fn pending_count(&self) -> Result<usize, WardenError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'retrying')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| WardenError::Other(e.to_string()))?;
        Ok(count as usize)
    }

    /// Counts entries that are terminally `failed`.
    pub fn failed_count(&self) -> Result<usize, WardenError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sync_queue WHERE status = 'failed'", [], |row| {
                row.get(0)
            })
            .map_err(|e| WardenError::Other(e.to_string()))?;
        Ok(count as usize)
    }
}

/// Probes whether the control plane is currently reachable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns `true` if the control plane answered within the probe's
    /// timeout with a 2xx/3xx status.
    async fn check(&self) -> bool;
}

/// HTTP HEAD-based probe against a configured endpoint, 3-second timeout.
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpConnectivityProbe {
    /// Creates a probe targeting `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(3))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.endpoint).send().await {
            Ok(response) => response.status().is_success() || response.status().is_redirection(),
            Err(_) => false,
        }
    }
}

/// Delivers a queued mutation to the control plane.
#[async_trait]
pub trait MutationSink: Send + Sync {
    /// Applies `path(args)` remotely; `Err` triggers a retry.
    async fn apply(&self, path: &str, args: &serde_json::Value) -> Result<(), WardenError>;
}

/// Connectivity state tracked by [`OfflineEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Control plane unreachable.
    Offline,
    /// Control plane reachable.
    Online,
}

/// Result of a `flush()` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Entries delivered successfully this pass.
    pub succeeded: usize,
    /// Entries newly marked `failed` this pass.
    pub failed: usize,
    /// Entries that were already terminally `failed` before this pass and
    /// were not re-attempted.
    pub skipped: usize,
}

/// Resolves a local/remote conflict for a given entity type, per
/// `spec.md` §4.14.
#[must_use]
pub fn resolve_conflict(
    entity_type: &str,
    local: &serde_json::Value,
    remote: &serde_json::Value,
) -> serde_json::Value {
    match entity_type {
        "computed-fields" => remote.clone(),
        "tags-metadata" => merge_tags_metadata(local, remote),
        _ => local.clone(),
    }
}

fn merge_tags_metadata(local: &serde_json::Value, remote: &serde_json::Value) -> serde_json::Value {
    let (Some(local_obj), Some(remote_obj)) = (local.as_object(), remote.as_object()) else {
        return local.clone();
    };

    let mut merged = local_obj.clone();
    for (key, remote_value) in remote_obj {
        match (merged.get(key).cloned(), remote_value.as_array()) {
            (Some(serde_json::Value::Array(local_items)), Some(remote_items)) => {
                let mut union: Vec<serde_json::Value> = local_items;
                for item in remote_items {
                    if !union.contains(item) {
                        union.push(item.clone());
                    }
                }
                merged.insert(key.clone(), serde_json::Value::Array(union));
            }
            (None, Some(remote_items)) => {
                merged.insert(key.clone(), serde_json::Value::Array(remote_items.clone()));
            }
            // Non-array fields: local wins (already present from `merged`'s
            // initial clone), nothing to do.
            _ => {}
        }
    }
    serde_json::Value::Object(merged)
}

/// A feature's offline/online availability contract.
#[derive(Debug, Clone)]
pub struct Feature {
    /// Feature name.
    pub name: String,
    /// Whether the feature needs connectivity at all (informational).
    pub requires_connectivity: bool,
    /// Whether the feature works with no connectivity.
    pub available_offline: bool,
    /// User-visible message shown when the feature is unavailable.
    pub degraded_message: String,
}

/// A registry of feature availability contracts.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    features: Vec<Feature>,
}

impl FeatureMatrix {
    /// Registers a feature.
    pub fn register(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Looks up a feature by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Returns whether `name` is available given the current connectivity
    /// state. Unknown features are treated as unavailable offline.
    #[must_use]
    pub fn is_available(&self, name: &str, state: ConnectivityState) -> bool {
        match self.get(name) {
            Some(feature) if feature.available_offline => true,
            Some(_) => state == ConnectivityState::Online,
            None => state == ConnectivityState::Online,
        }
    }
}

/// Coordinates the store, connectivity probe and mutation sink.
pub struct OfflineEngine {
    store: Arc<OfflineStore>,
    probe: Arc<dyn ConnectivityProbe>,
    sink: Arc<dyn MutationSink>,
    clock: Arc<dyn warden_core::Clock>,
    max_retry_attempts: u32,
    online: AtomicBool,
    connected_listeners: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl OfflineEngine {
    /// Creates an engine starting in the `Offline` state.
    #[must_use]
    pub fn new(
        store: Arc<OfflineStore>,
        probe: Arc<dyn ConnectivityProbe>,
        sink: Arc<dyn MutationSink>,
        clock: Arc<dyn warden_core::Clock>,
        max_retry_attempts: u32,
    ) -> Self {
        Self {
            store,
            probe,
            sink,
            clock,
            max_retry_attempts,
            online: AtomicBool::new(false),
            connected_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Current connectivity state.
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        if self.online.load(Ordering::SeqCst) {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    /// Subscribes to the `connected` event, fired on an offline->online
    /// transition.
    pub fn on_connected(&self, listener: Arc<dyn Fn() + Send + Sync>) {
        self.connected_listeners.lock().push(listener);
    }

    /// Probes connectivity; on an offline->online transition, fires
    /// `connected` listeners and flushes the queue.
    pub async fn check_connectivity(&self) -> ConnectivityState {
        let reachable = self.probe.check().await;
        let was_online = self.online.swap(reachable, Ordering::SeqCst);

        if reachable && !was_online {
            tracing::info!("offline engine reconnected");
            for listener in self.connected_listeners.lock().iter() {
                listener();
            }
            let _ = self.flush().await;
        }

        self.state()
    }

    /// Enqueues a mutation; if currently online, triggers a non-blocking
    /// background flush so the mutation is delivered without waiting for
    /// the next connectivity tick.
    pub fn enqueue(&self, path: &str, args: &serde_json::Value) -> Result<SyncQueueEntryId, WardenError> {
        let id = self.store.enqueue(path, args, self.clock.now_millis())?;

        if self.online.load(Ordering::SeqCst) {
            let store = self.store.clone();
            let sink = self.sink.clone();
            let clock = self.clock.clone();
            let max_retry_attempts = self.max_retry_attempts;
            tokio::spawn(async move {
                if let Err(error) = Self::run_flush(&store, &sink, &clock, max_retry_attempts).await {
                    tracing::warn!(%error, "background flush after enqueue failed");
                }
            });
        }

        Ok(id)
    }

    /// Drains pending + retrying entries in `enqueued_at` order.
    pub async fn flush(&self) -> Result<FlushStats, WardenError> {
        Self::run_flush(&self.store, &self.sink, &self.clock, self.max_retry_attempts).await
    }

    /// Shared flush body, free of any `&self` borrow so it can run inside
    /// a detached `tokio::spawn`ed task (from `enqueue`) as well as
    /// synchronously from `flush`.
    async fn run_flush(
        store: &Arc<OfflineStore>,
        sink: &Arc<dyn MutationSink>,
        clock: &Arc<dyn warden_core::Clock>,
        max_retry_attempts: u32,
    ) -> Result<FlushStats, WardenError> {
        let entries = store.list_non_synced()?;
        let mut stats = FlushStats::default();

        for entry in entries {
            if entry.status == SyncStatus::Failed {
                stats.skipped += 1;
                continue;
            }

            let now = clock.now_millis();
            match sink.apply(&entry.mutation_path, &entry.args).await {
                Ok(()) => {
                    store.update_status(entry.id, SyncStatus::Synced, entry.attempt_count, now, None)?;
                    stats.succeeded += 1;
                }
                Err(e) => {
                    let attempts = entry.attempt_count + 1;
                    let status = if attempts >= max_retry_attempts {
                        stats.failed += 1;
                        SyncStatus::Failed
                    } else {
                        SyncStatus::Retrying
                    };
                    store.update_status(entry.id, status, attempts, now, Some(&e.to_string()))?;
                }
            }
        }

        Ok(stats)
    }

    /// Number of entries still awaiting delivery.
    pub fn pending_count(&self) -> Result<usize, WardenError> {
        self.store.pending_count()
    }

    /// Number of entries that exhausted their retry budget.
    pub fn failed_count(&self) -> Result<usize, WardenError> {
        self.store.failed_count()
    }
}
