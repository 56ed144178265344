//! Content-addressed response cache.
//!
//! Successful vendor responses are memoized under a [`Fingerprint`] of the fully
//! built outbound request. The cache is advisory: a miss only costs latency, and
//! failed calls are never stored.
//!
//! Two logically concurrent calls with the same fingerprint may both miss and both
//! perform the underlying call. Either result is a valid cache value, so the
//! later write simply replaces the earlier one.
//!
//! The storage backend is chosen by [`CacheConfig`], resolved (in priority order)
//! from explicit values, then `UNI_INVOKE_CACHE_*` environment variables, then
//! defaults.

use crate::context::EnvSource;
use crate::error::{ProviderError, Result};
use crate::http::RequestDescriptor;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// `false` or `0` disables the cache at startup.
pub const CACHE_ENABLED_ENV: &str = "UNI_INVOKE_CACHE_ENABLED";
/// `memory` (default) or `disk`.
pub const CACHE_TYPE_ENV: &str = "UNI_INVOKE_CACHE_TYPE";
/// Root directory of the disk backend.
pub const CACHE_PATH_ENV: &str = "UNI_INVOKE_CACHE_PATH";
/// Entry lifetime in seconds.
pub const CACHE_TTL_ENV: &str = "UNI_INVOKE_CACHE_TTL";
/// Capacity of the memory backend.
pub const CACHE_MAX_ENTRIES_ENV: &str = "UNI_INVOKE_CACHE_MAX_ENTRIES";

/// Default disk cache directory name (relative to CWD).
const DEFAULT_CACHE_ROOT: &str = ".uni_invoke_cache";
const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 14);
const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Canonical request fingerprint: hex-encoded SHA-256 of a key-order-independent
/// walk of a JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(value: &Value) -> Self {
        let mut hasher = Sha256::new();
        hash_json_value(value, &mut hasher);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recursively feed a JSON value into `hasher` in a deterministic,
/// key-order-independent way.
///
/// Each variant is prefixed with a discriminant byte and every variable-length
/// item with its length, so structurally different values cannot collide
/// (`null` vs `false`, `["ab"]` vs `["a","b"]`). Object keys are sorted so that
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the same digest.
fn hash_json_value(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Null => hasher.update([0u8]),
        Value::Bool(v) => hasher.update([1u8, *v as u8]),
        Value::Number(v) => {
            hasher.update([2u8]);
            hash_str(&v.to_string(), hasher);
        }
        Value::String(v) => {
            hasher.update([3u8]);
            hash_str(v, hasher);
        }
        Value::Array(values) => {
            hasher.update([4u8]);
            hasher.update((values.len() as u64).to_le_bytes());
            for v in values {
                hash_json_value(v, hasher);
            }
        }
        Value::Object(map) => {
            hasher.update([5u8]);
            hasher.update((map.len() as u64).to_le_bytes());

            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            for (k, v) in entries {
                hash_str(k, hasher);
                hash_json_value(v, hasher);
            }
        }
    }
}

fn hash_str(s: &str, hasher: &mut Sha256) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// A value together with whether it was served from cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: T,
    pub cached: bool,
}

/// Storage behind a [`ResponseCache`].
///
/// Implementations must make a single-key write atomic with respect to readers;
/// no other synchronization is required. Failures are swallowed (logged) because
/// the cache is lossy-safe.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &Fingerprint) -> Option<Value>;
    async fn set(&self, key: &Fingerprint, value: Value);
    async fn clear(&self);
}

/// In-process backend with capacity bound and TTL.
pub struct MemoryBackend {
    entries: moka::future::Cache<Fingerprint, Arc<Value>>,
}

impl MemoryBackend {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            entries: moka::future::Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &Fingerprint) -> Option<Value> {
        self.entries.get(key).await.map(|v| v.as_ref().clone())
    }

    async fn set(&self, key: &Fingerprint, value: Value) {
        self.entries.insert(key.clone(), Arc::new(value)).await;
    }

    async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }
}

/// One JSON file per fingerprint under a root directory.
///
/// Writes go to a temporary file that is renamed into place, so a reader sees
/// either the old entry or the new one.
pub struct DiskBackend {
    dir: PathBuf,
    ttl: Duration,
    tmp_counter: AtomicU64,
}

impl DiskBackend {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            ProviderError::Config(format!(
                "Failed to create cache directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            ttl,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn get(&self, key: &Fingerprint) -> Option<Value> {
        let path = self.entry_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cache read failed");
                return None;
            }
        };
        let mut entry: Value = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt cache entry ignored");
                return None;
            }
        };
        let stored_at = entry.get("storedAt").and_then(|v| v.as_u64()).unwrap_or(0);
        if now_secs().saturating_sub(stored_at) > self.ttl.as_secs() {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        entry.get_mut("value").map(Value::take)
    }

    async fn set(&self, key: &Fingerprint, value: Value) {
        let path = self.entry_path(key);
        let tmp = self.dir.join(format!(
            "{}.{}.{}.tmp",
            key,
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let entry = json!({ "storedAt": now_secs(), "value": value });
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Cache entry serialization failed");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            tracing::warn!(path = %tmp.display(), error = %e, "Cache write failed");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            tracing::warn!(path = %path.display(), error = %e, "Cache write failed");
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }

    async fn clear(&self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Cache clear failed");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_entry = path
                .extension()
                .is_some_and(|ext| ext == "json" || ext == "tmp");
            if is_entry {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }
}

/// Which [`CacheBackend`] to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Disk,
}

/// Cache construction settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    /// Disk root. `None` falls back to `UNI_INVOKE_CACHE_PATH`, then
    /// `.uni_invoke_cache/`.
    pub path: Option<PathBuf>,
    pub ttl: Duration,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            path: None,
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    /// Read `UNI_INVOKE_CACHE_*` settings. Unparsable numbers fall back to the
    /// defaults with a warning.
    pub fn from_env(env: &EnvSource) -> Self {
        let mut config = Self::default();
        if let Some(enabled) = env.var(CACHE_ENABLED_ENV) {
            config.enabled = !matches!(enabled.to_ascii_lowercase().as_str(), "false" | "0");
        }
        if let Some(kind) = env.var(CACHE_TYPE_ENV) {
            config.backend = match kind.to_ascii_lowercase().as_str() {
                "disk" => CacheBackendKind::Disk,
                "memory" => CacheBackendKind::Memory,
                other => {
                    tracing::warn!(value = other, "Unknown cache type, using memory");
                    CacheBackendKind::Memory
                }
            };
        }
        config.path = env.var(CACHE_PATH_ENV).map(PathBuf::from);
        if let Some(ttl) = env.var(CACHE_TTL_ENV) {
            match ttl.parse::<u64>() {
                Ok(secs) => config.ttl = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %ttl, "Invalid cache TTL, using default"),
            }
        }
        if let Some(max) = env.var(CACHE_MAX_ENTRIES_ENV) {
            match max.parse::<u64>() {
                Ok(n) => config.max_entries = n,
                Err(_) => tracing::warn!(value = %max, "Invalid cache capacity, using default"),
            }
        }
        config
    }

    /// Resolve the disk root directory.
    ///
    /// Priority (highest first):
    /// 1. `path` set on this config
    /// 2. `.uni_invoke_cache/` relative to the working directory
    ///
    /// (`from_env` already folds `UNI_INVOKE_CACHE_PATH` into `path`.)
    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT))
    }
}

struct CacheInner {
    enabled: AtomicBool,
    backend: Box<dyn CacheBackend>,
}

/// Lifecycle-scoped handle to the response cache.
///
/// Clones share state: disabling through one clone disables it for every
/// provider built from the same [`ProviderContext`](crate::context::ProviderContext).
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        let backend: Box<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Memory => Box::new(MemoryBackend::new(config.max_entries, config.ttl)),
            CacheBackendKind::Disk => {
                Box::new(DiskBackend::new(config.resolve_cache_dir(), config.ttl)?)
            }
        };
        Ok(Self::with_backend(backend, config.enabled))
    }

    /// Enabled in-memory cache with default capacity and TTL.
    pub fn in_memory() -> Self {
        Self::with_backend(
            Box::new(MemoryBackend::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)),
            true,
        )
    }

    pub fn with_backend(backend: Box<dyn CacheBackend>, enabled: bool) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                enabled: AtomicBool::new(enabled),
                backend,
            }),
        }
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::SeqCst);
    }

    /// While disabled, entries are neither read nor written.
    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub async fn clear(&self) {
        self.inner.backend.clear().await;
    }

    /// Return the entry for `key`, or run `fetch` and store its result when it
    /// succeeds.
    ///
    /// On a miss the fetch runs as a detached task that also performs the store,
    /// so a caller that drops this future (a timeout, a cancelled request) does
    /// not lose the vendor call it already paid for. Errors from `fetch` are
    /// returned unchanged and never cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &Fingerprint, fetch: F) -> Result<Cached<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if !self.is_enabled() {
            metrics::counter!("response_cache.total", "result" => "bypass").increment(1);
            let data = fetch().await?;
            return Ok(Cached {
                data,
                cached: false,
            });
        }

        if let Some(data) = self.inner.backend.get(key).await {
            tracing::debug!(fingerprint = %key, "Response cache hit");
            metrics::counter!("response_cache.total", "result" => "hit").increment(1);
            return Ok(Cached { data, cached: true });
        }

        metrics::counter!("response_cache.total", "result" => "miss").increment(1);
        let cache = self.clone();
        let key = key.clone();
        let pending = fetch();
        let task = tokio::spawn(async move {
            let data = pending.await?;
            // A disable that lands while the call is in flight still wins.
            if cache.is_enabled() {
                cache.inner.backend.set(&key, data.clone()).await;
            }
            Ok::<_, ProviderError>(data)
        });
        let data = task.await.map_err(|e| {
            ProviderError::Transport(format!("cached fetch task failed: {}", e))
        })??;
        Ok(Cached {
            data,
            cached: false,
        })
    }

    /// Perform `request` through the cache.
    pub async fn fetch_with_cache(
        &self,
        client: &Client,
        request: &RequestDescriptor,
    ) -> Result<Cached<Value>> {
        let key = request.fingerprint();
        let client = client.clone();
        let request = request.clone();
        self.get_or_fetch(&key, move || async move { request.send(&client).await })
            .await
    }
}
