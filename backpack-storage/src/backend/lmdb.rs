//! LMDB-backed file storage with namespace isolation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide
//! [`StorageMode::File`]: a memory-mapped key-value store on local disk.
//!
//! # Namespace Isolation
//!
//! Every record is addressed by a [`NamespaceScopedKey`], so records for
//! different namespaces live under different key prefixes and purging one
//! namespace never touches another.
//!
//! # Record Format
//!
//! `[stored_at: 8 bytes, i64 millis LE][serde_json Container]`
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses read transactions for
//! loads and write transactions for stores, deletes and purges. All heed
//! work happens synchronously inside the async methods, so no transaction is
//! ever held across an await point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, RwLock};

use async_trait::async_trait;
use backpack_core::{
    BackpackConfig, BackpackError, BackpackResult, Container, EntityId, EntityRef, NamespaceId,
    StorageError, StorageMode,
};
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::{debug, info};

use super::scoped_key::NamespaceScopedKey;
use super::traits::StorageBackend;

/// Width of the timestamp header in front of every record.
const HEADER_LEN: usize = 8;

/// Error type for LMDB backend operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend was used before `setup`.
    #[error("LMDB backend used before setup")]
    NotInitialized,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbBackendError to BackpackError.
impl From<LmdbBackendError> for BackpackError {
    fn from(e: LmdbBackendError) -> Self {
        match e {
            LmdbBackendError::NotInitialized => BackpackError::Storage(StorageError::NotInitialized {
                mode: StorageMode::File,
            }),
            other => BackpackError::Storage(StorageError::Backend {
                mode: StorageMode::File,
                reason: other.to_string(),
            }),
        }
    }
}

/// Backend usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Loads that found a record.
    pub hits: u64,
    /// Loads that found nothing.
    pub misses: u64,
    /// Successful stores.
    pub writes: u64,
    /// Records currently stored.
    pub entry_count: u64,
    /// Bytes written by stores (not reclaimed on delete).
    pub bytes_written: u64,
}

struct LmdbHandle {
    env: Env,
    db: Database<Bytes, Bytes>,
}

/// LMDB-backed file storage.
///
/// # Example
///
/// ```ignore
/// let backend = LmdbBackend::new("/var/lib/backpack", 64);
/// backend.setup().await?;
///
/// backend.store_container(&alice, overworld, &container).await?;
/// let loaded = backend.load_container(&alice, overworld).await?;
/// ```
pub struct LmdbBackend {
    path: PathBuf,
    map_size_mb: usize,
    handle: OnceLock<LmdbHandle>,
    setup_lock: Mutex<()>,
    namespace_stats: RwLock<HashMap<NamespaceId, BackendStats>>,
    global_stats: RwLock<BackendStats>,
}

impl LmdbBackend {
    /// Describe a backend rooted at `path`. Nothing is opened until
    /// [`setup`](StorageBackend::setup).
    pub fn new<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            map_size_mb,
            handle: OnceLock::new(),
            setup_lock: Mutex::new(()),
            namespace_stats: RwLock::new(HashMap::new()),
            global_stats: RwLock::new(BackendStats::default()),
        }
    }

    pub fn from_config(config: &BackpackConfig) -> Self {
        Self::new(&config.data_dir, config.map_size_mb)
    }

    /// Create and immediately open a backend.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbBackendError> {
        let backend = Self::new(path, map_size_mb);
        backend.open_handle()?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the environment once; later calls are no-ops.
    fn open_handle(&self) -> Result<(), LmdbBackendError> {
        let _guard = self
            .setup_lock
            .lock()
            .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;
        if self.handle.get().is_some() {
            return Ok(());
        }

        let map_size = self.map_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbBackendError::EnvOpen(format!("map size of {} MiB overflows", self.map_size_mb))
        })?;

        std::fs::create_dir_all(&self.path)?;

        // SAFETY: the environment is opened once per backend and the path is
        // not opened elsewhere with different flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(&self.path)
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        let (entries, per_namespace) = count_entries(&env, &db)?;
        if let Ok(mut stats) = self.global_stats.write() {
            stats.entry_count = entries;
        }
        if let Ok(mut stats) = self.namespace_stats.write() {
            for (namespace, count) in per_namespace {
                stats.entry(namespace).or_default().entry_count = count;
            }
        }

        // Guarded by setup_lock, so the cell is still empty here.
        let _ = self.handle.set(LmdbHandle { env, db });
        info!(path = %self.path.display(), entries, "LMDB backend opened");
        Ok(())
    }

    fn handle(&self) -> Result<&LmdbHandle, LmdbBackendError> {
        self.handle.get().ok_or(LmdbBackendError::NotInitialized)
    }

    /// Read and decode the record at `key`.
    fn read_record(
        &self,
        key: &NamespaceScopedKey,
    ) -> BackpackResult<Option<(Container, DateTime<Utc>)>> {
        let handle = self.handle()?;
        let rtxn = handle
            .env
            .read_txn()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        let bytes = match handle.db.get(&rtxn, &key.encode()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => return Err(LmdbBackendError::Transaction(e.to_string()).into()),
        };

        if bytes.len() < HEADER_LEN {
            return Err(corrupt(key, "record shorter than header"));
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        let stored_at = DateTime::from_timestamp_millis(i64::from_le_bytes(header))
            .ok_or_else(|| corrupt(key, "timestamp out of range"))?;

        let container: Container = serde_json::from_slice(&bytes[HEADER_LEN..])
            .map_err(|e| corrupt(key, &e.to_string()))?;

        Ok(Some((container, stored_at)))
    }

    fn write_record(&self, key: &NamespaceScopedKey, container: &Container) -> BackpackResult<()> {
        let handle = self.handle()?;
        let encoded_key = key.encode();

        let value_bytes = serde_json::to_vec(container)
            .map_err(|e| LmdbBackendError::Serialization(e.to_string()))?;
        let mut full_bytes = Vec::with_capacity(HEADER_LEN + value_bytes.len());
        full_bytes.extend_from_slice(&Utc::now().timestamp_millis().to_le_bytes());
        full_bytes.extend_from_slice(&value_bytes);

        let mut wtxn = handle
            .env
            .write_txn()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        // Checked inside the write transaction so concurrent stores agree.
        let is_new = handle
            .db
            .get(&wtxn, &encoded_key)
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?
            .is_none();

        handle
            .db
            .put(&mut wtxn, &encoded_key, &full_bytes)
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        self.record_write(key.namespace(), full_bytes.len(), is_new);
        Ok(())
    }

    /// When the record for `(entity, namespace)` was last stored.
    pub fn stored_at(
        &self,
        entity: EntityId,
        namespace: NamespaceId,
    ) -> BackpackResult<Option<DateTime<Utc>>> {
        let key = NamespaceScopedKey::new(namespace, entity);
        Ok(self.read_record(&key)?.map(|(_, stored_at)| stored_at))
    }

    /// Remove the record for `(entity, namespace)`. Returns whether one existed.
    pub fn delete_container(&self, entity: EntityId, namespace: NamespaceId) -> BackpackResult<bool> {
        let handle = self.handle()?;
        let encoded_key = NamespaceScopedKey::new(namespace, entity).encode();

        let mut wtxn = handle
            .env
            .write_txn()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        let deleted = handle
            .db
            .delete(&mut wtxn, &encoded_key)
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        if deleted {
            self.record_deletes(namespace, 1);
        }
        Ok(deleted)
    }

    /// Entities with a stored record in `namespace`.
    pub fn stored_entities(&self, namespace: NamespaceId) -> BackpackResult<Vec<EntityId>> {
        Ok(self
            .collect_keys_with_prefix(&NamespaceScopedKey::namespace_prefix(namespace))?
            .iter()
            .filter_map(|key| NamespaceScopedKey::decode(key))
            .map(|key| key.entity())
            .collect())
    }

    /// Delete every record in `namespace`. Returns how many were removed.
    pub fn purge_namespace(&self, namespace: NamespaceId) -> BackpackResult<u64> {
        let handle = self.handle()?;
        let prefix = NamespaceScopedKey::namespace_prefix(namespace);
        let keys_to_delete = self.collect_keys_with_prefix(&prefix)?;

        let mut wtxn = handle
            .env
            .write_txn()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &keys_to_delete {
            if handle
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        self.record_deletes(namespace, deleted);
        debug!(%namespace, deleted, "namespace purged");
        Ok(deleted)
    }

    /// Counters for one namespace.
    pub fn namespace_stats(&self, namespace: NamespaceId) -> BackendStats {
        self.namespace_stats
            .read()
            .ok()
            .and_then(|stats| stats.get(&namespace).cloned())
            .unwrap_or_default()
    }

    /// Counters across all namespaces.
    pub fn stats(&self) -> BackendStats {
        self.global_stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Iterate over keys matching a prefix and collect them.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbBackendError> {
        let handle = self.handle()?;
        let rtxn = handle
            .env
            .read_txn()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        let iter = handle
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, _) = result.map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;
            if key.starts_with(prefix) {
                keys.push(key.to_vec());
            }
        }

        Ok(keys)
    }

    fn record_load(&self, namespace: NamespaceId, found: bool) {
        let bump = |stats: &mut BackendStats| {
            if found {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        };
        if let Ok(mut stats) = self.namespace_stats.write() {
            bump(stats.entry(namespace).or_default());
        }
        if let Ok(mut stats) = self.global_stats.write() {
            bump(&mut stats);
        }
    }

    fn record_write(&self, namespace: NamespaceId, size_bytes: usize, is_new: bool) {
        let bump = |stats: &mut BackendStats| {
            stats.writes += 1;
            stats.bytes_written += size_bytes as u64;
            if is_new {
                stats.entry_count += 1;
            }
        };
        if let Ok(mut stats) = self.namespace_stats.write() {
            bump(stats.entry(namespace).or_default());
        }
        if let Ok(mut stats) = self.global_stats.write() {
            bump(&mut stats);
        }
    }

    fn record_deletes(&self, namespace: NamespaceId, deleted: u64) {
        if let Ok(mut stats) = self.namespace_stats.write() {
            if let Some(ns_stats) = stats.get_mut(&namespace) {
                ns_stats.entry_count = ns_stats.entry_count.saturating_sub(deleted);
            }
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.entry_count = stats.entry_count.saturating_sub(deleted);
        }
    }
}

#[async_trait]
impl StorageBackend for LmdbBackend {
    fn mode(&self) -> StorageMode {
        StorageMode::File
    }

    async fn setup(&self) -> BackpackResult<()> {
        self.open_handle()?;
        Ok(())
    }

    async fn load_container(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
    ) -> BackpackResult<Option<Container>> {
        let key = NamespaceScopedKey::new(namespace, entity.id);
        let record = self.read_record(&key)?;
        self.record_load(namespace, record.is_some());
        Ok(record.map(|(container, _)| container))
    }

    async fn store_container(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
        container: &Container,
    ) -> BackpackResult<()> {
        let key = NamespaceScopedKey::new(namespace, entity.id);
        self.write_record(&key, container)?;
        debug!(entity = %entity.id, %namespace, capacity = container.capacity(), "container stored");
        Ok(())
    }
}

impl std::fmt::Debug for LmdbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbBackend")
            .field("path", &self.path)
            .field("map_size_mb", &self.map_size_mb)
            .field("open", &self.handle.get().is_some())
            .finish()
    }
}

fn corrupt(key: &NamespaceScopedKey, reason: &str) -> BackpackError {
    BackpackError::Storage(StorageError::CorruptRecord {
        entity: key.entity().to_string(),
        namespace: key.namespace().to_string(),
        reason: reason.to_string(),
    })
}

/// Count stored records, in total and per namespace.
fn count_entries(
    env: &Env,
    db: &Database<Bytes, Bytes>,
) -> Result<(u64, HashMap<NamespaceId, u64>), LmdbBackendError> {
    let rtxn = env
        .read_txn()
        .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;
    let iter = db
        .iter(&rtxn)
        .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

    let mut entries = 0u64;
    let mut per_namespace: HashMap<NamespaceId, u64> = HashMap::new();
    for result in iter {
        let (key, _) = result.map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;
        entries += 1;
        if let Some(scoped) = NamespaceScopedKey::decode(key) {
            *per_namespace.entry(scoped.namespace()).or_default() += 1;
        }
    }
    Ok((entries, per_namespace))
}
