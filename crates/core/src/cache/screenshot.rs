//! Screenshot bytes in memory and on disk.
//!
//! Two tiers:
//!
//! - an LRU of recent screenshots keyed by URL hash
//! - files on disk: temp files under the store's `temp_dir` (named
//!   `<hash>.<ext>`, reaped after `ttl`) and persistent companions under a
//!   cache directory (named `<hash>_screenshot.bin`, never reaped here)
//!
//! All writes land in a unique scratch file first and are renamed into place,
//! so readers never observe a partial image.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::hash::url_hash;
use crate::Error;
use crate::config::{CaptureFormat, ScreenshotConfig};

const COMPANION_SUFFIX: &str = "_screenshot.bin";

/// Settings the store needs from [`ScreenshotConfig`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub temp_dir: PathBuf,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    pub memory_capacity: usize,
    pub format: CaptureFormat,
}

impl From<&ScreenshotConfig> for StoreSettings {
    fn from(config: &ScreenshotConfig) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            ttl: config.ttl(),
            cleanup_interval: config.cleanup_interval(),
            memory_capacity: config.memory_cache_size,
            format: config.format,
        }
    }
}

#[derive(Debug, Clone)]
struct TempRecord {
    path: PathBuf,
    created_at: Instant,
}

#[derive(Debug)]
struct StoreInner {
    files: HashMap<String, TempRecord>,
    memory: LruCache<String, Bytes>,
}

/// Counters reported by [`ScreenshotStore::stats`].
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ScreenshotStats {
    pub temp_dir: String,
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub active_files: usize,
    pub total_files: usize,
    pub ttl_secs: u64,
}

/// Screenshot cache with a TTL reaper for temp files.
#[derive(Debug)]
pub struct ScreenshotStore {
    inner: Arc<Mutex<StoreInner>>,
    settings: StoreSettings,
    scratch_counter: AtomicU64,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ScreenshotStore {
    /// Create a store. The reaper is not started; see [`Self::spawn_reaper`].
    pub fn new(settings: StoreSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.memory_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                files: HashMap::new(),
                memory: LruCache::new(capacity),
            })),
            settings,
            scratch_counter: AtomicU64::new(0),
            reaper: std::sync::Mutex::new(None),
        }
    }

    pub fn from_config(config: &ScreenshotConfig) -> Self {
        Self::new(StoreSettings::from(config))
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn temp_path(&self, hash: &str) -> PathBuf {
        self.settings.temp_dir.join(format!("{hash}.{}", self.settings.format.extension()))
    }

    /// Path of the persistent companion file for `url` under `cache_dir`.
    pub fn companion_path(url: &str, cache_dir: &Path) -> PathBuf {
        cache_dir.join(format!("{}{COMPANION_SUFFIX}", url_hash(url)))
    }

    pub async fn get_from_memory(&self, url: &str) -> Option<Bytes> {
        let hash = url_hash(url);
        self.inner.lock().await.memory.get(&hash).cloned()
    }

    /// Insert into the LRU, evicting the least recently used entry first when full.
    pub async fn put_to_memory(&self, url: &str, bytes: Bytes) {
        let hash = url_hash(url);
        let mut inner = self.inner.lock().await;
        Self::put_locked(&mut inner, hash, bytes);
    }

    fn put_locked(inner: &mut StoreInner, hash: String, bytes: Bytes) {
        if !inner.memory.contains(&hash)
            && inner.memory.len() >= inner.memory.cap().get()
            && let Some((evicted, _)) = inner.memory.pop_lru()
        {
            tracing::debug!(hash = %evicted, "Evicted screenshot from memory");
        }
        inner.memory.put(hash, bytes);
    }

    /// Return a file path holding the screenshot for `url`.
    ///
    /// Without `cache_dir` the file is a tracked temp file under the store's
    /// `temp_dir`; with one it is the `<hash>_screenshot.bin` companion there.
    /// An existing (and, for temp files, unexpired) file is reused. Otherwise
    /// `bytes` is written; with no bytes the result is `None`.
    pub async fn get_or_create_temp_path(
        &self,
        url: &str,
        bytes: Option<Bytes>,
        cache_dir: Option<&Path>,
    ) -> Result<Option<PathBuf>, Error> {
        let hash = url_hash(url);

        let existing = match cache_dir {
            Some(dir) => {
                let path = Self::companion_path(url, dir);
                tokio::fs::try_exists(&path).await.unwrap_or(false).then_some(path)
            }
            None => self.fresh_temp_file(&hash).await,
        };

        if let Some(path) = existing {
            if let Some(bytes) = bytes {
                Self::put_locked(&mut *self.inner.lock().await, hash, bytes);
            }
            return Ok(Some(path));
        }

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let path = match cache_dir {
            Some(dir) => Self::companion_path(url, dir),
            None => self.temp_path(&hash),
        };
        self.write_atomic(&path, &bytes).await?;

        let mut inner = self.inner.lock().await;
        if cache_dir.is_none() {
            let record = TempRecord { path: path.clone(), created_at: Instant::now() };
            inner.files.insert(hash.clone(), record);
        }
        Self::put_locked(&mut inner, hash, bytes);
        drop(inner);

        tracing::debug!(path = %path.display(), "Wrote screenshot file");
        Ok(Some(path))
    }

    async fn fresh_temp_file(&self, hash: &str) -> Option<PathBuf> {
        let record = {
            let inner = self.inner.lock().await;
            inner.files.get(hash).cloned()
        }?;
        if record.created_at.elapsed() > self.settings.ttl {
            return None;
        }
        tokio::fs::try_exists(&record.path).await.unwrap_or(false).then_some(record.path)
    }

    /// Overwrite the companion file for `url` under `cache_dir`.
    pub async fn write_companion(
        &self,
        url: &str,
        bytes: &Bytes,
        cache_dir: &Path,
    ) -> Result<PathBuf, Error> {
        let path = Self::companion_path(url, cache_dir);
        self.write_atomic(&path, bytes).await?;
        Ok(path)
    }

    /// Read the companion file for `url`, if present.
    pub async fn load_from_disk(
        &self,
        url: &str,
        cache_dir: &Path,
    ) -> Result<Option<Bytes>, Error> {
        let path = Self::companion_path(url, cache_dir);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::CacheRead(format!("{}: {e}", path.display()))),
        }
    }

    /// Delete the companion file for `url`. Returns whether a file was removed.
    pub async fn remove_companion(&self, url: &str, cache_dir: &Path) -> Result<bool, Error> {
        let path = Self::companion_path(url, cache_dir);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::CacheWrite(format!("{}: {e}", path.display()))),
        }
    }

    /// Resolve a temp file path for handing a screenshot to the host.
    ///
    /// Order: memory, then an unexpired temp file, then the disk companion.
    pub async fn path_for_send(
        &self,
        url: &str,
        cache_dir: Option<&Path>,
    ) -> Result<Option<PathBuf>, Error> {
        if let Some(bytes) = self.get_from_memory(url).await {
            return self.get_or_create_temp_path(url, Some(bytes), None).await;
        }

        if let Some(path) = self.fresh_temp_file(&url_hash(url)).await {
            return Ok(Some(path));
        }

        let Some(dir) = cache_dir else {
            return Ok(None);
        };
        match self.load_from_disk(url, dir).await? {
            Some(bytes) => self.get_or_create_temp_path(url, Some(bytes), None).await,
            None => Ok(None),
        }
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), Error> {
        let write_err = |e: std::io::Error| Error::CacheWrite(format!("{}: {e}", path.display()));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let n = self.scratch_counter.fetch_add(1, Ordering::Relaxed);
        let scratch = path.with_extension(format!("tmp.{}.{n}", std::process::id()));

        if let Err(e) = tokio::fs::write(&scratch, bytes).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(write_err(e));
        }
        if let Err(e) = tokio::fs::rename(&scratch, path).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(write_err(e));
        }
        Ok(())
    }

    /// Remove expired temp files from the map, the LRU, and disk.
    ///
    /// Returns the number of records dropped.
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.inner, self.settings.ttl).await
    }

    /// Drop every temp file and the whole memory tier.
    pub async fn clear_all(&self) {
        let records: Vec<TempRecord> = {
            let mut inner = self.inner.lock().await;
            inner.memory.clear();
            inner.files.drain().map(|(_, record)| record).collect()
        };

        for record in &records {
            unlink(&record.path).await;
        }
        tracing::info!(files = records.len(), "Cleared screenshot store");
    }

    pub async fn stats(&self) -> ScreenshotStats {
        let inner = self.inner.lock().await;
        let ttl = self.settings.ttl;
        let active_files = inner.files.values().filter(|r| r.created_at.elapsed() <= ttl).count();
        ScreenshotStats {
            temp_dir: self.settings.temp_dir.display().to_string(),
            memory_entries: inner.memory.len(),
            memory_capacity: inner.memory.cap().get(),
            active_files,
            total_files: inner.files.len(),
            ttl_secs: self.settings.ttl.as_secs(),
        }
    }

    /// Start the periodic reaper. Calling it again while one runs is a no-op.
    pub fn spawn_reaper(&self) {
        let mut slot = self.reaper.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let ttl = self.settings.ttl;
        let period = self.settings.cleanup_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = sweep(&inner, ttl).await;
                if removed > 0 {
                    tracing::debug!(removed, "Reaped expired screenshots");
                }
            }
        }));
        tracing::info!(interval_secs = period.as_secs(), "Screenshot reaper started");
    }

    /// Stop the reaper and wait for it to finish.
    pub async fn shutdown(&self) {
        let handle = self.reaper.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            tracing::info!("Screenshot reaper stopped");
        }
    }

    #[cfg(test)]
    async fn backdate(&self, url: &str, by: Duration) {
        let hash = url_hash(url);
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.files.get_mut(&hash) {
            record.created_at = Instant::now().checked_sub(by).unwrap();
        }
    }

    #[cfg(test)]
    fn reaper_running(&self) -> bool {
        self.reaper.lock().unwrap().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ScreenshotStore {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reaper.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }
}

async fn sweep(inner: &Mutex<StoreInner>, ttl: Duration) -> usize {
    let expired: Vec<TempRecord> = {
        let mut guard = inner.lock().await;
        let hashes: Vec<String> = guard
            .files
            .iter()
            .filter(|(_, record)| record.created_at.elapsed() > ttl)
            .map(|(hash, _)| hash.clone())
            .collect();

        hashes
            .into_iter()
            .filter_map(|hash| {
                guard.memory.pop(&hash);
                guard.files.remove(&hash)
            })
            .collect()
    };

    for record in &expired {
        unlink(&record.path).await;
    }
    expired.len()
}

async fn unlink(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove screenshot file")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path, capacity: usize) -> ScreenshotStore {
        ScreenshotStore::new(StoreSettings {
            temp_dir: dir.join("temp"),
            ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_millis(20),
            memory_capacity: capacity,
            format: CaptureFormat::Jpeg,
        })
    }

    #[tokio::test]
    async fn test_memory_lru_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 2);

        store.put_to_memory("https://a.test/", Bytes::from_static(b"a")).await;
        store.put_to_memory("https://b.test/", Bytes::from_static(b"b")).await;
        // Touch "a" so "b" is least recently used.
        assert!(store.get_from_memory("https://a.test/").await.is_some());
        store.put_to_memory("https://c.test/", Bytes::from_static(b"c")).await;

        assert!(store.get_from_memory("https://a.test/").await.is_some());
        assert!(store.get_from_memory("https://b.test/").await.is_none());
        assert!(store.get_from_memory("https://c.test/").await.is_some());
    }

    #[tokio::test]
    async fn test_temp_path_written_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let url = "https://example.com/";

        let bytes = Some(Bytes::from_static(b"img"));
        let path = store.get_or_create_temp_path(url, bytes, None).await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("temp").join(format!("{}.jpg", url_hash(url))));
        assert_eq!(std::fs::read(&path).unwrap(), b"img");

        let again = store.get_or_create_temp_path(url, None, None).await.unwrap();
        assert_eq!(again, Some(path));
        assert_eq!(store.stats().await.total_files, 1);
    }

    #[tokio::test]
    async fn test_no_bytes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let path = store.get_or_create_temp_path("https://x.test/", None, None).await.unwrap();
        assert_eq!(path, None);
    }

    #[tokio::test]
    async fn test_companion_round_trip_not_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let cache_dir = dir.path().join("cache");
        let url = "https://example.com/page";

        let bytes = Bytes::from_static(b"png");
        let path = store.write_companion(url, &bytes, &cache_dir).await.unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_screenshot.bin"));
        let loaded = store.load_from_disk(url, &cache_dir).await.unwrap();
        assert_eq!(loaded.as_deref(), Some(&b"png"[..]));
        assert_eq!(store.stats().await.total_files, 0);

        assert!(store.remove_companion(url, &cache_dir).await.unwrap());
        assert!(!store.remove_companion(url, &cache_dir).await.unwrap());
        assert_eq!(store.load_from_disk(url, &cache_dir).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_path_for_send_falls_back_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let cache_dir = dir.path().join("cache");
        let url = "https://example.com/";

        assert_eq!(store.path_for_send(url, Some(&cache_dir)).await.unwrap(), None);

        store.write_companion(url, &Bytes::from_static(b"disk"), &cache_dir).await.unwrap();
        let path = store.path_for_send(url, Some(&cache_dir)).await.unwrap().unwrap();
        assert!(path.starts_with(dir.path().join("temp")));
        assert_eq!(std::fs::read(&path).unwrap(), b"disk");
        assert!(store.get_from_memory(url).await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let old = "https://old.test/";
        let new = "https://new.test/";

        let old_bytes = Some(Bytes::from_static(b"o"));
        let old_path = store.get_or_create_temp_path(old, old_bytes, None).await.unwrap().unwrap();
        let new_bytes = Some(Bytes::from_static(b"n"));
        let new_path = store.get_or_create_temp_path(new, new_bytes, None).await.unwrap().unwrap();
        store.backdate(old, Duration::from_secs(120)).await;

        assert_eq!(store.sweep_expired().await, 1);
        assert!(!old_path.exists());
        assert!(new_path.exists());
        assert!(store.get_from_memory(old).await.is_none());
        assert!(store.get_from_memory(new).await.is_some());

        let stats = store.stats().await;
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.active_files, 1);
    }

    #[tokio::test]
    async fn test_sweep_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let url = "https://gone.test/";

        let bytes = Some(Bytes::from_static(b"x"));
        let path = store.get_or_create_temp_path(url, bytes, None).await.unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();
        store.backdate(url, Duration::from_secs(120)).await;

        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(store.stats().await.total_files, 0);
    }

    #[tokio::test]
    async fn test_reaper_runs_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let url = "https://reap.test/";

        let bytes = Some(Bytes::from_static(b"r"));
        let path = store.get_or_create_temp_path(url, bytes, None).await.unwrap().unwrap();
        store.backdate(url, Duration::from_secs(120)).await;

        store.spawn_reaper();
        assert!(store.reaper_running());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!path.exists());

        store.shutdown().await;
        assert!(!store.reaper_running());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);

        let path = store
            .get_or_create_temp_path("https://a.test/", Some(Bytes::from_static(b"a")), None)
            .await
            .unwrap()
            .unwrap();
        store.clear_all().await;

        assert!(!path.exists());
        let stats = store.stats().await;
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.total_files, 0);
    }

    #[tokio::test]
    async fn test_concurrent_writes_same_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(dir.path(), 4));
        let url = "https://race.test/";

        let tasks: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let dir = store.settings().temp_dir.join("c");
                    store.write_companion(url, &Bytes::from(vec![i; 4096]), &dir).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let dir = store.settings().temp_dir.join("c");
        let data = store.load_from_disk(url, &dir).await.unwrap().unwrap();
        assert_eq!(data.len(), 4096);
        assert!(data.iter().all(|b| *b == data[0]));
    }
}
