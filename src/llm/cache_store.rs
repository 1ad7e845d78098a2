//! Durable key-value backends for the response cache.
//!
//! The cache treats the durable tier as best-effort: every method returns
//! [`CacheIoError`] and the caller logs and moves on. Backends only store
//! and enumerate; byte-budget enforcement is driven by the cache through
//! [`DurableStore::total_bytes`] and [`DurableStore::pop_oldest`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CacheIoError;
use crate::llm::response_cache::CacheEntry;

/// Pluggable persistence for the durable cache tier.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheIoError>;

    /// Insert or replace the entry stored under `entry.key`.
    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheIoError>;

    async fn remove(&self, key: &str) -> Result<(), CacheIoError>;

    async fn clear(&self) -> Result<(), CacheIoError>;

    /// Sum of `size_bytes` over stored entries.
    async fn total_bytes(&self) -> Result<u64, CacheIoError>;

    /// Remove the entry with the oldest `created_at`, returning its key.
    async fn pop_oldest(&self) -> Result<Option<String>, CacheIoError>;

    async fn len(&self) -> Result<usize, CacheIoError>;
}

// ==================== In-process ====================

/// Process-local store. Survives cache instances, not restarts.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheIoError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheIoError> {
        self.lock().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheIoError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheIoError> {
        self.lock().clear();
        Ok(())
    }

    async fn total_bytes(&self) -> Result<u64, CacheIoError> {
        Ok(self.lock().values().map(|e| e.size_bytes).sum())
    }

    async fn pop_oldest(&self) -> Result<Option<String>, CacheIoError> {
        let mut entries = self.lock();
        let oldest = entries
            .values()
            .min_by_key(|e| e.created_at)
            .map(|e| e.key.clone());
        if let Some(key) = &oldest {
            entries.remove(key);
        }
        Ok(oldest)
    }

    async fn len(&self) -> Result<usize, CacheIoError> {
        Ok(self.lock().len())
    }
}

// ==================== Flat files ====================

#[derive(Debug, Clone, Copy)]
struct FileMeta {
    created_at: DateTime<Utc>,
    size_bytes: u64,
}

/// One JSON file per entry in a directory, with an in-memory index of
/// creation times and sizes rebuilt on open.
pub struct FileStore {
    dir: PathBuf,
    index: Mutex<HashMap<String, FileMeta>>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`. Unreadable or
    /// corrupt entry files are deleted.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheIoError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = HashMap::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = read_dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_entry(&path).await {
                Ok(entry) => {
                    index.insert(
                        entry.key.clone(),
                        FileMeta {
                            created_at: entry.created_at,
                            size_bytes: entry.size_bytes,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "dropping unreadable cache file");
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }

        tracing::debug!(dir = %dir.display(), entries = index.len(), "opened file cache store");
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheIoError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(CacheIoError::Backend(format!("invalid cache key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FileMeta>> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn read_entry(path: &Path) -> Result<CacheEntry, CacheIoError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn remove_if_present(path: &Path) -> Result<(), CacheIoError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DurableStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheIoError> {
        if !self.lock().contains_key(key) {
            return Ok(None);
        }
        let path = self.path_for(key)?;
        match read_entry(&path).await {
            Ok(entry) => Ok(Some(entry)),
            Err(CacheIoError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.lock().remove(key);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheIoError> {
        let path = self.path_for(&entry.key)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(entry)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        self.lock().insert(
            entry.key.clone(),
            FileMeta {
                created_at: entry.created_at,
                size_bytes: entry.size_bytes,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheIoError> {
        let path = self.path_for(key)?;
        self.lock().remove(key);
        remove_if_present(&path).await
    }

    async fn clear(&self) -> Result<(), CacheIoError> {
        let keys: Vec<String> = self.lock().drain().map(|(k, _)| k).collect();
        for key in keys {
            remove_if_present(&self.path_for(&key)?).await?;
        }
        Ok(())
    }

    async fn total_bytes(&self) -> Result<u64, CacheIoError> {
        Ok(self.lock().values().map(|m| m.size_bytes).sum())
    }

    async fn pop_oldest(&self) -> Result<Option<String>, CacheIoError> {
        let oldest = {
            let mut index = self.lock();
            let oldest = index
                .iter()
                .min_by_key(|(_, m)| m.created_at)
                .map(|(k, _)| k.clone());
            if let Some(key) = &oldest {
                index.remove(key);
            }
            oldest
        };
        if let Some(key) = &oldest {
            remove_if_present(&self.path_for(key)?).await?;
        }
        Ok(oldest)
    }

    async fn len(&self) -> Result<usize, CacheIoError> {
        Ok(self.lock().len())
    }
}

// ==================== libSQL ====================

#[cfg(feature = "libsql")]
pub use self::libsql_store::LibSqlStore;

#[cfg(feature = "libsql")]
mod libsql_store {
    use std::path::Path;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use libsql::params;

    use super::DurableStore;
    use crate::error::CacheIoError;
    use crate::llm::response_cache::{CacheEntry, CacheTier};

    const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS response_cache (\
         key TEXT PRIMARY KEY, \
         value TEXT NOT NULL, \
         operation TEXT NOT NULL, \
         created_at INTEGER NOT NULL, \
         expires_at INTEGER NOT NULL, \
         size_bytes INTEGER NOT NULL)";

    /// Embedded libSQL database holding one row per entry.
    pub struct LibSqlStore {
        _db: libsql::Database,
        conn: libsql::Connection,
    }

    impl LibSqlStore {
        /// Open (creating if needed) a local database file.
        pub async fn open(path: &Path) -> Result<Self, CacheIoError> {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let db = libsql::Builder::new_local(path).build().await?;
            Self::init(db).await
        }

        /// Private in-memory database.
        pub async fn in_memory() -> Result<Self, CacheIoError> {
            let db = libsql::Builder::new_local(":memory:").build().await?;
            Self::init(db).await
        }

        async fn init(db: libsql::Database) -> Result<Self, CacheIoError> {
            let conn = db.connect()?;
            conn.execute(SCHEMA, ()).await?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_response_cache_created ON response_cache (created_at)",
                (),
            )
            .await?;
            Ok(Self { _db: db, conn })
        }
    }

    fn from_millis(ms: i64) -> Result<DateTime<Utc>, CacheIoError> {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| CacheIoError::Backend(format!("invalid timestamp {ms}")))
    }

    #[async_trait]
    impl DurableStore for LibSqlStore {
        fn name(&self) -> &'static str {
            "libsql"
        }

        async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheIoError> {
            let mut rows = self
                .conn
                .query(
                    "SELECT key, value, operation, created_at, expires_at, size_bytes \
                     FROM response_cache WHERE key = ?1",
                    params![key],
                )
                .await?;
            let Some(row) = rows.next().await? else {
                return Ok(None);
            };
            let operation: String = row.get(2)?;
            Ok(Some(CacheEntry {
                key: row.get(0)?,
                value: row.get(1)?,
                operation: operation.parse().map_err(CacheIoError::Backend)?,
                created_at: from_millis(row.get(3)?)?,
                expires_at: from_millis(row.get(4)?)?,
                size_bytes: row.get::<i64>(5)?.max(0) as u64,
                tier: CacheTier::Disk,
            }))
        }

        async fn store(&self, entry: &CacheEntry) -> Result<(), CacheIoError> {
            self.conn
                .execute(
                    "INSERT INTO response_cache (key, value, operation, created_at, expires_at, size_bytes) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                     operation = excluded.operation, created_at = excluded.created_at, \
                     expires_at = excluded.expires_at, size_bytes = excluded.size_bytes",
                    params![
                        entry.key.as_str(),
                        entry.value.as_str(),
                        entry.operation.as_str(),
                        entry.created_at.timestamp_millis(),
                        entry.expires_at.timestamp_millis(),
                        entry.size_bytes as i64
                    ],
                )
                .await?;
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<(), CacheIoError> {
            self.conn
                .execute("DELETE FROM response_cache WHERE key = ?1", params![key])
                .await?;
            Ok(())
        }

        async fn clear(&self) -> Result<(), CacheIoError> {
            self.conn.execute("DELETE FROM response_cache", ()).await?;
            Ok(())
        }

        async fn total_bytes(&self) -> Result<u64, CacheIoError> {
            let mut rows = self
                .conn
                .query("SELECT COALESCE(SUM(size_bytes), 0) FROM response_cache", ())
                .await?;
            match rows.next().await? {
                Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
                None => Ok(0),
            }
        }

        async fn pop_oldest(&self) -> Result<Option<String>, CacheIoError> {
            let mut rows = self
                .conn
                .query(
                    "SELECT key FROM response_cache ORDER BY created_at ASC LIMIT 1",
                    (),
                )
                .await?;
            let Some(row) = rows.next().await? else {
                return Ok(None);
            };
            let key: String = row.get(0)?;
            drop(rows);
            self.remove(&key).await?;
            Ok(Some(key))
        }

        async fn len(&self) -> Result<usize, CacheIoError> {
            let mut rows = self
                .conn
                .query("SELECT COUNT(*) FROM response_cache", ())
                .await?;
            match rows.next().await? {
                Some(row) => Ok(row.get::<i64>(0)?.max(0) as usize),
                None => Ok(0),
            }
        }
    }
}
