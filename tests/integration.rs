//! Integration tests for member storage

use bytes::Bytes;
use hatokuse::{DiskStorage, Error, IoMode};
use tempfile::TempDir;

fn payload(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

#[test]
fn test_round_trip_all_modes() {
    for mode in IoMode::ALL {
        let dir = TempDir::new().unwrap();
        let store = DiskStorage::open(dir.path(), mode).unwrap();

        for (i, len) in [1usize, 100, 8 * 1024, 8 * 1024 + 1, 64 * 1024].iter().enumerate() {
            let key = format!("msg-{}", i);
            let body = payload(*len);
            store.put(&key, body.clone()).unwrap();

            // Once from the cache, once from disk
            assert_eq!(store.get(&key).unwrap(), body, "{} cached {}", mode, len);
            store.clear_cache();
            assert_eq!(store.get(&key).unwrap(), body, "{} disk {}", mode, len);
        }
    }
}

#[test]
fn test_files_identical_across_modes() {
    let body = payload(20_000);
    let mut files = Vec::new();

    for mode in IoMode::ALL {
        let dir = TempDir::new().unwrap();
        let store = DiskStorage::open(dir.path(), mode).unwrap();
        store.put("same/key", body.clone()).unwrap();

        let entry = std::fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        files.push((entry.file_name(), std::fs::read(entry.path()).unwrap()));
    }

    for (name, contents) in &files[1..] {
        assert_eq!(name, &files[0].0);
        assert_eq!(contents, &files[0].1);
    }
}

#[test]
fn test_persistence_and_count_reconciliation() {
    let dir = TempDir::new().unwrap();

    {
        let store = DiskStorage::open(dir.path(), IoMode::Unbuffered).unwrap();
        store.put("key1", Bytes::from_static(b"value1")).unwrap();
        store.put("key2", Bytes::from_static(b"value2")).unwrap();
        store.put("key 3", Bytes::from_static(b"value3")).unwrap();
        store.delete("key2").unwrap();
        assert_eq!(store.count(), 2);
    }

    // Reopen with a different strategy; the files are the same format
    {
        let store = DiskStorage::open(dir.path(), IoMode::MemoryMapped).unwrap();
        assert_eq!(store.count(), 2);
        assert!(store.contains("key 3"));
        assert_eq!(store.get("key1").unwrap(), &b"value1"[..]);
        assert!(matches!(store.get("key2"), Err(Error::NotFound(_))));
    }
}

#[test]
fn test_overwrite_replaces_body() {
    let dir = TempDir::new().unwrap();
    let store = DiskStorage::open(dir.path(), IoMode::ZeroCopy).unwrap();

    store.put("k", payload(10_000)).unwrap();
    store.put("k", Bytes::from_static(b"short")).unwrap();
    store.clear_cache();

    assert_eq!(store.get("k").unwrap(), &b"short"[..]);
    assert_eq!(store.count(), 1);
}

#[test]
fn test_foreign_files_ignored() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not a message").unwrap();
    std::fs::create_dir(dir.path().join("nested.msg")).unwrap();

    let store = DiskStorage::open(dir.path(), IoMode::Buffered).unwrap();
    assert_eq!(store.count(), 0);
}

#[cfg(unix)]
#[test]
fn test_write_failure_is_reported() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = DiskStorage::open(dir.path(), IoMode::Unbuffered).unwrap();
    std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o500)).unwrap();

    let result = store.put("k", Bytes::from_static(b"v"));
    std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).unwrap();

    // Root ignores directory permissions, so only check the non-root outcome.
    if let Err(e) = result {
        assert!(matches!(e, Error::Io(_)));
        assert_eq!(store.count(), 0);
    }
}
