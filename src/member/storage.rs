//! Per-member message storage
//!
//! Layout: one file per key, `<dir>/<percent-encoded key>.msg`. Bodies are
//! written through the [`WriteStrategy`] chosen at open time into a `.tmp`
//! sibling, then renamed over the message file, so a failed write leaves the
//! previous body in place. Bodies are cached in memory after the first
//! successful put or read.

use crate::common::{decode_key, encode_key, validate_key, Error, Result};
use crate::member::io_mode::{IoMode, WriteStrategy};
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const MESSAGE_EXT: &str = "msg";
const TMP_EXT: &str = "msg.tmp";
const KEY_LOCK_STRIPES: usize = 64;

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub message_count: usize,
    pub cached: usize,
    pub io_mode: IoMode,
}

/// Key-addressed file store with a read-through cache
pub struct DiskStorage {
    dir: PathBuf,
    strategy: Box<dyn WriteStrategy>,
    cache: DashMap<String, Bytes>,
    keys: DashSet<String>,
    locks: Vec<Mutex<()>>,
}

impl DiskStorage {
    /// Open or create storage under `dir`, counting the messages already there.
    pub fn open(dir: impl AsRef<Path>, mode: IoMode) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let keys = Self::scan_keys(&dir)?;

        tracing::info!(
            "DiskStorage opened: {} messages in {}, io mode {}",
            keys.len(),
            dir.display(),
            mode
        );

        Ok(Self {
            dir,
            strategy: mode.strategy(),
            cache: DashMap::new(),
            keys,
            locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    /// Store `body` under `key`, replacing any previous body.
    pub fn put(&self, key: &str, body: Bytes) -> Result<()> {
        validate_key(key)?;
        let _guard = self.lock_key(key);

        let path = self.path_for(key);
        let tmp = path.with_extension(TMP_EXT);
        let written = self
            .strategy
            .write(&tmp, &body)
            .and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            tracing::error!("Failed to write {}: {}", key, e);
            return Err(e.into());
        }

        if self.keys.insert(key.to_string()) {
            tracing::debug!("Stored new message {} ({})", key, self.strategy.mode());
        }
        self.cache.insert(key.to_string(), body);
        Ok(())
    }

    /// Fetch the body stored under `key`.
    pub fn get(&self, key: &str) -> Result<Bytes> {
        validate_key(key)?;
        if let Some(body) = self.cache.get(key) {
            return Ok(body.clone());
        }

        let _guard = self.lock_key(key);
        if let Some(body) = self.cache.get(key) {
            return Ok(body.clone());
        }

        match self.strategy.read(&self.path_for(key)) {
            Ok(body) => {
                self.keys.insert(key.to_string());
                self.cache.insert(key.to_string(), body.clone());
                Ok(body)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `key` from disk and cache.
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let _guard = self.lock_key(key);

        let removed = fs::remove_file(self.path_for(key));
        match removed {
            Ok(()) => {
                self.keys.remove(key);
                self.cache.remove(key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.keys.remove(key);
                self.cache.remove(key);
                Err(Error::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Number of stored messages
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Drop every cached body; subsequent reads go to disk.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn io_mode(&self) -> IoMode {
        self.strategy.mode()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            message_count: self.count(),
            cached: self.cache.len(),
            io_mode: self.io_mode(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), MESSAGE_EXT))
    }

    fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.locks.len();
        self.locks[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn scan_keys(dir: &Path) -> Result<DashSet<String>> {
        let keys = DashSet::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match path.extension().and_then(|s| s.to_str()) {
                Some(MESSAGE_EXT) => {}
                // Left behind by a write that never completed.
                Some("tmp") => {
                    if let Err(e) = fs::remove_file(&path) {
                        tracing::warn!("Could not remove {}: {}", path.display(), e);
                    }
                    continue;
                }
                _ => continue,
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_key(stem) {
                Ok(key) => {
                    keys.insert(key);
                }
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::open(dir.path(), IoMode::Buffered).unwrap();

        store.put("key1", Bytes::from_static(b"value1")).unwrap();
        store.put("key2", Bytes::from_static(b"value2")).unwrap();

        assert_eq!(store.get("key1").unwrap(), &b"value1"[..]);
        assert_eq!(store.get("key2").unwrap(), &b"value2"[..]);
        assert!(matches!(store.get("nonexistent"), Err(Error::NotFound(_))));
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_overwrite_keeps_count() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::open(dir.path(), IoMode::Unbuffered).unwrap();

        store.put("k", Bytes::from_static(b"first body")).unwrap();
        store.put("k", Bytes::from_static(b"second")).unwrap();

        assert_eq!(store.count(), 1);
        store.clear_cache();
        assert_eq!(store.get("k").unwrap(), &b"second"[..]);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::open(dir.path(), IoMode::ZeroCopy).unwrap();

        store.put("key1", Bytes::from_static(b"value1")).unwrap();
        store.delete("key1").unwrap();

        assert_eq!(store.count(), 0);
        assert!(matches!(store.get("key1"), Err(Error::NotFound(_))));
        assert!(matches!(store.delete("key1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_count_reconciled_on_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = DiskStorage::open(dir.path(), IoMode::MemoryMapped).unwrap();
            store.put("a", Bytes::from_static(b"1")).unwrap();
            store.put("b/c", Bytes::from_static(b"2")).unwrap();
            store.put("d", Bytes::from_static(b"3")).unwrap();
            store.delete("d").unwrap();
        }

        let store = DiskStorage::open(dir.path(), IoMode::Buffered).unwrap();
        assert_eq!(store.count(), 2);
        assert!(store.contains("b/c"));
        assert_eq!(store.get("b/c").unwrap(), &b"2"[..]);
    }

    #[test]
    fn test_read_through_cache() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::open(dir.path(), IoMode::Buffered).unwrap();

        store.put("k", Bytes::from_static(b"cached")).unwrap();
        store.clear_cache();
        assert_eq!(store.stats().cached, 0);

        assert_eq!(store.get("k").unwrap(), &b"cached"[..]);
        assert_eq!(store.stats().cached, 1);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::open(dir.path(), IoMode::Buffered).unwrap();

        assert!(matches!(
            store.put("", Bytes::from_static(b"x")),
            Err(Error::InvalidKey(_))
        ));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_put_failure_surfaces_io_error() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::open(dir.path().join("data"), IoMode::Unbuffered).unwrap();
        fs::remove_dir_all(dir.path().join("data")).unwrap();

        assert!(matches!(
            store.put("k", Bytes::from_static(b"x")),
            Err(Error::Io(_))
        ));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_failed_overwrite_keeps_previous_body() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::open(dir.path(), IoMode::MemoryMapped).unwrap();
        store.put("k", Bytes::from_static(b"original body")).unwrap();

        // A directory in the temp file's place makes the next write fail.
        let tmp = store.path_for("k").with_extension(TMP_EXT);
        fs::create_dir(&tmp).unwrap();
        assert!(matches!(
            store.put("k", Bytes::from_static(b"replacement")),
            Err(Error::Io(_))
        ));
        fs::remove_dir(&tmp).unwrap();

        store.clear_cache();
        assert_eq!(store.get("k").unwrap(), &b"original body"[..]);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_stale_temp_files_removed_on_open() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("half.msg.tmp"), b"partial").unwrap();

        let store = DiskStorage::open(dir.path(), IoMode::Buffered).unwrap();
        assert_eq!(store.count(), 0);
        assert!(!dir.path().join("half.msg.tmp").exists());
    }
}
