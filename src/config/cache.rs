use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;
use crate::llm::request::OperationType;
use crate::llm::response_cache::{ResponseCacheConfig, TtlPolicy};
use crate::settings::base_dir;

/// Where the durable cache tier lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableBackend {
    /// Memory tier only.
    None,
    /// Process-local map; handy for tests and the CLI.
    Memory,
    /// Directory of JSON files.
    File,
    /// Embedded libSQL database.
    LibSql,
}

impl Default for DurableBackend {
    fn default() -> Self {
        if cfg!(feature = "libsql") {
            Self::LibSql
        } else {
            Self::File
        }
    }
}

impl std::str::FromStr for DurableBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "memory" | "mem" => Ok(Self::Memory),
            "file" | "files" | "disk" => Ok(Self::File),
            "libsql" | "sqlite" => Ok(Self::LibSql),
            _ => Err(format!(
                "invalid cache backend '{}', expected one of: none, memory, file, libsql",
                s
            )),
        }
    }
}

impl std::fmt::Display for DurableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
            Self::LibSql => write!(f, "libsql"),
        }
    }
}

/// Response cache sizing, TTLs and durable backend.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub durable_budget_bytes: u64,
    pub backend: DurableBackend,
    /// Directory (file backend) or database file (libsql backend).
    pub path: PathBuf,
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let backend = DurableBackend::default();
        Self {
            max_entries: 500,
            durable_budget_bytes: 10 * 1024 * 1024,
            backend,
            path: default_cache_path(backend),
            ttl: TtlPolicy::default(),
        }
    }
}

fn default_cache_path(backend: DurableBackend) -> PathBuf {
    match backend {
        DurableBackend::LibSql => base_dir().join("cache.db"),
        _ => base_dir().join("cache"),
    }
}

impl CacheConfig {
    pub fn response_cache_config(&self) -> ResponseCacheConfig {
        ResponseCacheConfig {
            max_entries: self.max_entries,
            durable_budget_bytes: self.durable_budget_bytes,
            ttl: self.ttl.clone(),
        }
    }

    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let backend: DurableBackend = parse_optional_env("CACHE_BACKEND", defaults.backend)?;

        // A TTL of 0 disables caching for that operation.
        let mut ttl = TtlPolicy::new();
        for op in OperationType::ALL {
            let default_secs = defaults.ttl.ttl_for(op).map(|d| d.as_secs()).unwrap_or(0);
            let secs: u64 = parse_optional_env(&format!("CACHE_TTL_{}_SECS", op.env_stem()), default_secs)?;
            ttl.set(op, (secs > 0).then(|| Duration::from_secs(secs)));
        }

        Ok(Self {
            max_entries: parse_optional_env("CACHE_MAX_ENTRIES", defaults.max_entries)?,
            durable_budget_bytes: parse_optional_env("CACHE_DURABLE_BYTES", defaults.durable_budget_bytes)?,
            backend,
            path: optional_env("CACHE_PATH")?
                .map(PathBuf::from)
                .unwrap_or_else(|| default_cache_path(backend)),
            ttl,
        })
    }
}
