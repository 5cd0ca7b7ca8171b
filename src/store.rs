//! Backing stores for rendered cache entries.
//!
//! A store maps a cache key (the path produced by
//! [`pathname::generate`](crate::pathname::generate)) to encoded bytes plus
//! the modification time they were stamped with. The freshness policy lives
//! in the [`Responder`](crate::responder::Responder); stores only persist.
//!
//! - [`FilesystemStore`]: one file per key below the render directory, mtime
//!   kept in the file's own modification time.
//! - [`MemoryStore`]: an in-process key/value map.

use crate::filesystem::Filesystem;
use std::collections::BTreeMap;
use std::io;
use std::sync::RwLock;

/// Persistence capability shared by every cache backend.
pub trait CacheStore: Send + Sync {
    /// Bytes stored under `key`, if any.
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key` and stamp the entry with `mtime`.
    /// Readers never observe a partially written entry.
    fn put(&self, key: &str, bytes: &[u8], mtime: i64) -> io::Result<()>;

    fn exists(&self, key: &str) -> bool;

    /// Stamped modification time, `None` when the key is absent.
    fn mtime(&self, key: &str) -> io::Result<Option<i64>>;

    /// Missing keys are not an error.
    fn remove(&self, key: &str) -> io::Result<()>;

    /// Remove every key below a directory-style prefix.
    fn remove_prefix(&self, prefix: &str) -> io::Result<()>;

    /// Sorted keys, optionally restricted to a directory-style prefix.
    fn keys(&self, prefix: Option<&str>) -> io::Result<Vec<String>>;
}

/// Path-addressed store on disk.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    fs: Filesystem,
}

impl FilesystemStore {
    pub fn new(fs: Filesystem) -> Self {
        Self { fs }
    }

    pub fn filesystem(&self) -> &Filesystem {
        &self.fs
    }
}

impl CacheStore for FilesystemStore {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match self.fs.read(key) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: &str, bytes: &[u8], mtime: i64) -> io::Result<()> {
        self.fs.dump_file_stamped(key, bytes, mtime)
    }

    fn exists(&self, key: &str) -> bool {
        self.fs.exists(key)
    }

    fn mtime(&self, key: &str) -> io::Result<Option<i64>> {
        match self.fs.mtime(key) {
            Ok(mtime) => Ok(Some(mtime)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.fs.remove(key)
    }

    fn remove_prefix(&self, prefix: &str) -> io::Result<()> {
        self.fs.remove(prefix)
    }

    fn keys(&self, prefix: Option<&str>) -> io::Result<Vec<String>> {
        Ok(self
            .fs
            .files(prefix)?
            .into_iter()
            .map(|f| f.relative)
            .collect())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    mtime: i64,
}

/// Key/value store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

fn poisoned<T>(_: T) -> io::Error {
    io::Error::other("memory store lock poisoned")
}

fn under(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty()
        || key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).map(|e| e.bytes.clone()))
    }

    fn put(&self, key: &str, bytes: &[u8], mtime: i64) -> io::Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(
            key.to_string(),
            Entry {
                bytes: bytes.to_vec(),
                mtime,
            },
        );
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.entries
            .read()
            .is_ok_and(|entries| entries.contains_key(key))
    }

    fn mtime(&self, key: &str) -> io::Result<Option<i64>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).map(|e| e.mtime))
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> io::Result<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .retain(|key, _| !under(key, prefix));
        Ok(())
    }

    fn keys(&self, prefix: Option<&str>) -> io::Result<Vec<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .keys()
            .filter(|key| prefix.is_none_or(|p| under(key, p)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn CacheStore) {
        assert!(!store.exists("thumb/jpg/a.webp"));
        assert_eq!(store.get("thumb/jpg/a.webp").unwrap(), None);
        assert_eq!(store.mtime("thumb/jpg/a.webp").unwrap(), None);

        store.put("thumb/jpg/a.webp", b"one", 1_600_000_000).unwrap();
        store.put("thumb/jpg/blog/b.webp", b"two", 1_600_000_001).unwrap();
        store.put("thumbnail/jpg/c.webp", b"three", 5).unwrap();

        assert!(store.exists("thumb/jpg/a.webp"));
        assert_eq!(store.get("thumb/jpg/a.webp").unwrap().unwrap(), b"one");
        assert_eq!(
            store.mtime("thumb/jpg/blog/b.webp").unwrap(),
            Some(1_600_000_001)
        );
        assert_eq!(
            store.keys(Some("thumb")).unwrap(),
            vec!["thumb/jpg/a.webp", "thumb/jpg/blog/b.webp"]
        );
        assert_eq!(store.keys(None).unwrap().len(), 3);

        store.remove("thumb/jpg/a.webp").unwrap();
        store.remove("thumb/jpg/a.webp").unwrap();
        assert!(!store.exists("thumb/jpg/a.webp"));

        store.remove_prefix("thumb").unwrap();
        assert_eq!(store.keys(None).unwrap(), vec!["thumbnail/jpg/c.webp"]);
    }

    // =========================================================================
    // Shared contract
    // =========================================================================

    #[test]
    fn filesystem_store_contract() {
        let tmp = TempDir::new().unwrap();
        exercise(&FilesystemStore::new(Filesystem::new(tmp.path())));
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    // =========================================================================
    // Filesystem specifics
    // =========================================================================

    #[test]
    fn put_overwrites_and_restamps() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(Filesystem::new(tmp.path()));
        store.put("r/png/x.webp", b"old", 100).unwrap();
        store.put("r/png/x.webp", b"new", 50).unwrap();
        assert_eq!(store.get("r/png/x.webp").unwrap().unwrap(), b"new");
        assert_eq!(store.mtime("r/png/x.webp").unwrap(), Some(50));
    }

    #[test]
    fn put_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(Filesystem::new(tmp.path()));
        store.put("r/png/x.webp", b"data", 100).unwrap();
        let names: Vec<_> = std::fs::read_dir(tmp.path().join("r/png"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["x.webp"]);
    }

    #[test]
    fn memory_store_len() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.put("a/b/c", b"x", 0).unwrap();
        assert_eq!(store.len(), 1);
    }
}
