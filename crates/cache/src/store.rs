//! Response cache with per-key locking and read-time validation

use crate::{CacheError, CacheKey, Error, Result};
use chrono::{DateTime, Utc};
use dirs::{cache_dir, home_dir};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

const METADATA_EXTENSION: &str = "metadata";

type LockTable = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

/// Per-entry locks shared by every store in the process, keyed by the
/// absolute payload path
static ENTRY_LOCKS: LazyLock<LockTable> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Metadata stored next to every cached payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Format version declared by the request when the entry was written
    pub version: i64,
    /// Caller-supplied description of context outside the URL and argument
    pub sensitive_data: Option<String>,
    /// Application version that wrote the entry
    pub app_version: String,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// HTTP status of the cached response
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Response headers of the cached response
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// SHA-256 of the payload, used to detect torn or corrupt blobs
    #[serde(default)]
    pub payload_sha256: Option<String>,
}

impl CacheMetadata {
    /// Metadata for a payload written now, without response details
    #[must_use]
    pub fn new(
        version: i64,
        sensitive_data: Option<String>,
        app_version: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version,
            sensitive_data,
            app_version: app_version.into(),
            created_at,
            status_code: None,
            headers: BTreeMap::new(),
            payload_sha256: None,
        }
    }

    /// Attach the response status and headers
    #[must_use]
    pub fn with_response(mut self, status_code: u16, headers: BTreeMap<String, String>) -> Self {
        self.status_code = Some(status_code);
        self.headers = headers;
        self
    }
}

/// What the current request expects a usable entry to look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheExpectation {
    /// Maximum age in seconds; zero or less disables reads
    pub max_age_seconds: i64,
    /// Declared format version
    pub version: i64,
    /// Current sensitive-data description
    pub sensitive_data: Option<String>,
    /// Current application version
    pub app_version: String,
}

/// A validated cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,
    /// Metadata read back from disk
    pub metadata: CacheMetadata,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    netkit_cache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) NETKIT_CACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/netkit/responses
    // 3) OS cache dir/netkit/responses
    // 4) ~/.netkit/cache/responses
    // 5) TMPDIR/netkit/cache/responses (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.netkit_cache_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("netkit/responses"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("netkit/responses"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".netkit/cache/responses"));
    }
    candidates.push(inputs.temp_dir.join("netkit/cache/responses"));

    for path in candidates {
        // A regular file squatting on the directory path is replaced
        if path.is_file() && fs::remove_file(&path).is_err() {
            continue;
        }
        if path.exists() {
            let probe = path.join(".write_probe");
            match fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration("Failed to determine a writable cache directory"))
}

/// Resolve the default cache root from the environment
pub fn cache_root() -> Result<PathBuf> {
    let inputs = CacheInputs {
        netkit_cache_dir: std::env::var("NETKIT_CACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        xdg_cache_home: std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        os_cache_dir: cache_dir(),
        home_dir: home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    cache_root_from_inputs(inputs)
}

/// On-disk response cache.
///
/// Layout:
/// ```text
/// <root>/
/// ├── <key>           # raw payload
/// └── <key>.metadata  # CacheMetadata as JSON
/// ```
///
/// Cloning is cheap. Every store in the process shares one lock table, so
/// two stores over the same root never write an entry at the same time.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store at the default root (see [`cache_root`])
    pub fn with_default_root() -> Result<Self> {
        Ok(Self::new(cache_root()?))
    }

    /// The cache root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the payload blob for `key`
    #[must_use]
    pub fn payload_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Path of the metadata record for `key`
    #[must_use]
    pub fn metadata_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{METADATA_EXTENSION}", key.as_str()))
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let path = self.payload_path(key);
        let path = std::path::absolute(&path).unwrap_or(path);
        let mut locks = ENTRY_LOCKS.lock();
        // Drop lock slots nobody else is holding
        locks.retain(|p, slot| *p == path || Arc::strong_count(slot) > 1);
        Arc::clone(locks.entry(path).or_default())
    }

    /// Load and validate the entry for `key`.
    ///
    /// Checks run in a fixed order and stop at the first failure:
    /// cache time, metadata, version, sensitive data, app version, expiry,
    /// payload.
    pub fn load(
        &self,
        key: &CacheKey,
        expectation: &CacheExpectation,
        now: DateTime<Utc>,
    ) -> std::result::Result<CacheEntry, CacheError> {
        if expectation.max_age_seconds <= 0 {
            return Err(CacheError::InvalidCacheTime {
                seconds: expectation.max_age_seconds,
            });
        }

        let slot = self.key_lock(key);
        let _guard = slot.lock();

        let metadata_path = self.metadata_path(key);
        let raw = fs::read(&metadata_path).map_err(|e| {
            trace!(%key, error = %e, "No readable cache metadata");
            CacheError::invalid_metadata(format!("{}: {e}", metadata_path.display()))
        })?;
        let metadata: CacheMetadata = serde_json::from_slice(&raw)
            .map_err(|e| CacheError::invalid_metadata(format!("unparseable metadata: {e}")))?;

        if metadata.version != expectation.version {
            return Err(CacheError::VersionMismatch {
                expected: expectation.version,
                found: metadata.version,
            });
        }
        if metadata.sensitive_data != expectation.sensitive_data {
            return Err(CacheError::SensitiveDataMismatch {
                expected: expectation.sensitive_data.clone(),
                found: metadata.sensitive_data,
            });
        }
        if metadata.app_version != expectation.app_version {
            return Err(CacheError::AppVersionMismatch {
                expected: expectation.app_version.clone(),
                found: metadata.app_version,
            });
        }

        let age = now.signed_duration_since(metadata.created_at);
        if age < chrono::Duration::zero()
            || age > chrono::Duration::seconds(expectation.max_age_seconds)
        {
            return Err(CacheError::Expired {
                age_seconds: age.num_seconds(),
                max_age_seconds: expectation.max_age_seconds,
            });
        }

        let payload_path = self.payload_path(key);
        let payload = fs::read(&payload_path)
            .map_err(|e| CacheError::invalid_data(format!("{}: {e}", payload_path.display())))?;
        if let Some(expected) = metadata.payload_sha256.as_deref() {
            let actual = hex::encode(Sha256::digest(&payload));
            if actual != expected {
                return Err(CacheError::invalid_data("payload checksum mismatch"));
            }
        }

        debug!(%key, bytes = payload.len(), "Cache hit");
        Ok(CacheEntry {
            key: key.clone(),
            metadata,
            payload,
        })
    }

    /// Persist `payload` and `metadata` for `key`, replacing any previous entry.
    ///
    /// Both files are written to temporaries and renamed into place while the
    /// per-key lock is held, so a concurrent [`load`](Self::load) never sees a
    /// partial entry. The payload checksum is filled in here.
    pub fn save(&self, key: &CacheKey, payload: &[u8], metadata: &CacheMetadata) -> Result<()> {
        self.ensure_root()?;

        let mut metadata = metadata.clone();
        metadata.payload_sha256 = Some(hex::encode(Sha256::digest(payload)));
        let json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| Error::serialization(format!("Failed to serialize metadata: {e}")))?;

        let slot = self.key_lock(key);
        let _guard = slot.lock();

        write_atomic(&self.root, &self.payload_path(key), payload)?;
        write_atomic(&self.root, &self.metadata_path(key), &json)?;

        debug!(%key, bytes = payload.len(), "Saved response to cache");
        Ok(())
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.is_file() {
            warn!(root = %self.root.display(), "Cache root is a file, replacing it");
            fs::remove_file(&self.root).map_err(|e| Error::io(e, &self.root, "remove_file"))?;
        }
        fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root, "create_dir_all"))
    }
}

/// Write `contents` to a uniquely named temporary in `dir`, then rename it
/// over `path`. The temporary is removed if anything fails.
fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::io(e, dir, "create_temp"))?;
    temp.write_all(contents).map_err(|e| Error::io(e, temp.path(), "write"))?;
    temp.persist(path).map_err(|e| Error::io(e.error, path, "rename"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheKeyEnvelope;
    use tempfile::TempDir;

    fn key() -> CacheKey {
        CacheKey::derive(&CacheKeyEnvelope {
            method: "GET".into(),
            host: "https://example.com".into(),
            url: "/items".into(),
            argument: None,
        })
        .unwrap()
    }

    fn expectation() -> CacheExpectation {
        CacheExpectation {
            max_age_seconds: 60,
            version: 1,
            sensitive_data: None,
            app_version: "1.0.0".into(),
        }
    }

    fn write_entry(store: &CacheStore, created_at: DateTime<Utc>) {
        let meta = CacheMetadata::new(1, None, "1.0.0", created_at);
        store.save(&key(), b"payload", &meta).unwrap();
    }

    #[test]
    fn test_cache_root_prefers_explicit_override() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("explicit");
        let root = cache_root_from_inputs(CacheInputs {
            netkit_cache_dir: Some(explicit.clone()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        })
        .unwrap();
        assert_eq!(root, explicit);
        assert!(explicit.is_dir());
    }

    #[test]
    fn test_cache_root_falls_back_to_xdg() {
        let tmp = TempDir::new().unwrap();
        let root = cache_root_from_inputs(CacheInputs {
            netkit_cache_dir: Some(PathBuf::new()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        })
        .unwrap();
        assert_eq!(root, tmp.path().join("xdg/netkit/responses"));
    }

    #[test]
    fn test_round_trip_within_window() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let t0 = Utc::now();
        write_entry(&store, t0);

        let entry = store
            .load(&key(), &expectation(), t0 + chrono::Duration::seconds(30))
            .unwrap();
        assert_eq!(entry.payload, b"payload");
        assert_eq!(entry.metadata.version, 1);
        assert!(entry.metadata.payload_sha256.is_some());
    }

    #[test]
    fn test_non_positive_cache_time_skips_disk() {
        // Root does not exist; the check must short-circuit before any read
        let store = CacheStore::new("/nonexistent/netkit-cache");
        let mut exp = expectation();
        exp.max_age_seconds = 0;
        let err = store.load(&key(), &exp, Utc::now()).unwrap_err();
        assert_eq!(err, CacheError::InvalidCacheTime { seconds: 0 });
    }

    #[test]
    fn test_missing_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let err = store.load(&key(), &expectation(), Utc::now()).unwrap_err();
        assert!(matches!(err, CacheError::InvalidMetadata { .. }));
    }

    #[test]
    fn test_garbage_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        fs::write(store.metadata_path(&key()), b"{not json").unwrap();
        let err = store.load(&key(), &expectation(), Utc::now()).unwrap_err();
        assert!(matches!(err, CacheError::InvalidMetadata { .. }));
    }

    #[test]
    fn test_version_checked_before_expiry() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let t0 = Utc::now();
        write_entry(&store, t0);

        let mut exp = expectation();
        exp.version = 2;
        let err = store
            .load(&key(), &exp, t0 + chrono::Duration::seconds(600))
            .unwrap_err();
        assert_eq!(
            err,
            CacheError::VersionMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_sensitive_data_mismatch() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let t0 = Utc::now();
        write_entry(&store, t0);

        let mut exp = expectation();
        exp.sensitive_data = Some("user-42".into());
        let err = store.load(&key(), &exp, t0).unwrap_err();
        assert!(matches!(err, CacheError::SensitiveDataMismatch { .. }));
    }

    #[test]
    fn test_app_version_mismatch() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let t0 = Utc::now();
        write_entry(&store, t0);

        let mut exp = expectation();
        exp.app_version = "2.0.0".into();
        let err = store.load(&key(), &exp, t0).unwrap_err();
        assert_eq!(err.code(), -4);
    }

    #[test]
    fn test_expired_and_future_entries() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let t0 = Utc::now();
        write_entry(&store, t0);

        let err = store
            .load(&key(), &expectation(), t0 + chrono::Duration::seconds(90))
            .unwrap_err();
        assert!(matches!(err, CacheError::Expired { age_seconds: 90, .. }));

        let err = store
            .load(&key(), &expectation(), t0 - chrono::Duration::seconds(5))
            .unwrap_err();
        assert!(matches!(err, CacheError::Expired { .. }));
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let t0 = Utc::now();
        write_entry(&store, t0);
        fs::write(store.payload_path(&key()), b"tampered").unwrap();

        let err = store.load(&key(), &expectation(), t0).unwrap_err();
        assert!(matches!(err, CacheError::InvalidCacheData { .. }));
    }

    #[test]
    fn test_missing_payload() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let t0 = Utc::now();
        write_entry(&store, t0);
        fs::remove_file(store.payload_path(&key())).unwrap();

        let err = store.load(&key(), &expectation(), t0).unwrap_err();
        assert_eq!(err.code(), -7);
    }

    #[test]
    fn test_save_overwrites_previous_entry() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let t0 = Utc::now();
        write_entry(&store, t0);

        let meta = CacheMetadata::new(1, None, "1.0.0", t0).with_response(201, BTreeMap::new());
        store.save(&key(), b"fresh", &meta).unwrap();

        let entry = store.load(&key(), &expectation(), t0).unwrap();
        assert_eq!(entry.payload, b"fresh");
        assert_eq!(entry.metadata.status_code, Some(201));
        // No temporaries left behind
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_lock_table_does_not_grow_unbounded() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        for i in 0..32 {
            let k = CacheKey::derive(&CacheKeyEnvelope {
                method: "GET".into(),
                host: String::new(),
                url: format!("/{i}"),
                argument: None,
            })
            .unwrap();
            let meta = CacheMetadata::new(0, None, "1", Utc::now());
            store.save(&k, b"x", &meta).unwrap();
        }
        let root = std::path::absolute(tmp.path()).unwrap();
        let held = ENTRY_LOCKS
            .lock()
            .keys()
            .filter(|p| p.starts_with(&root))
            .count();
        assert!(held <= 1);
    }

    #[test]
    fn test_stores_over_one_root_share_entry_locks() {
        let tmp = TempDir::new().unwrap();
        let first = CacheStore::new(tmp.path());
        let second = CacheStore::new(tmp.path());
        let a = first.key_lock(&key());
        let b = second.key_lock(&key());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
