// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Storage collaborator interfaces.

The mirroring engine treats persistence as opaque collaborators specified
at the interface boundary: a package store resolving reference keys to
package metadata, a checksum store recording what the pool is known to
hold, and a transactional key-value state store for durable entity state.

In-memory implementations back tests; file backed implementations give the
command line tool durable state without dragging in a database engine.
*/

use {
    crate::{
        checksum::FileChecksums,
        error::{MirrorError, Result},
        package::{Package, PackageRef},
    },
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::{Arc, RwLock},
    },
};

/// A set of writes applied atomically.
///
/// Operations are buffered until [Batch::write] is called. Dropping a batch
/// without writing discards it.
pub trait Batch: Send {
    /// Buffer a deletion.
    fn delete(&mut self, key: &str);

    /// Buffer a write.
    fn put(&mut self, key: &str, value: &[u8]);

    /// Apply all buffered operations.
    fn write(&mut self) -> Result<()>;
}

/// An opaque transactional key-value store for durable entity state.
pub trait StateStore: Send + Sync {
    /// Fetch the value at a key, if present.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value at a key.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a key. Missing keys are not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// List all keys beginning with a prefix, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Create a batch for atomic multi-key updates.
    fn create_batch(&self) -> Box<dyn Batch>;
}

/// Resolves package reference keys to full package metadata.
pub trait PackageStore: Send + Sync {
    /// Resolve a reference to a package.
    fn by_key(&self, r: &PackageRef) -> Result<Package>;

    /// Insert or replace a package record.
    fn update(&self, package: &Package) -> Result<()>;

    /// Buffer deletion of a package record into a batch.
    fn delete_by_key(&self, r: &PackageRef, batch: &mut dyn Batch) -> Result<()>;
}

/// Records checksums of files known to exist, keyed by pool path.
pub trait ChecksumStore: Send + Sync {
    /// Look up recorded checksums for a pool path.
    fn get(&self, pool_path: &str) -> Result<Option<FileChecksums>>;

    /// Record checksums for a pool path.
    fn update(&self, pool_path: &str, checksums: &FileChecksums) -> Result<()>;
}

type SharedMap = Arc<RwLock<HashMap<String, Vec<u8>>>>;

/// In-memory [StateStore].
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    entries: SharedMap,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .read()
            .expect("state store lock poisoned")
            .get(key)
            .cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .expect("state store lock poisoned")
            .insert(key.to_string(), value.to_vec());

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .expect("state store lock poisoned")
            .remove(key);

        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .expect("state store lock poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();

        Ok(keys)
    }

    fn create_batch(&self) -> Box<dyn Batch> {
        Box::new(MemoryBatch {
            entries: self.entries.clone(),
            operations: vec![],
        })
    }
}

enum BatchOperation {
    Put(String, Vec<u8>),
    Delete(String),
}

struct MemoryBatch {
    entries: SharedMap,
    operations: Vec<BatchOperation>,
}

impl Batch for MemoryBatch {
    fn delete(&mut self, key: &str) {
        self.operations.push(BatchOperation::Delete(key.to_string()));
    }

    fn put(&mut self, key: &str, value: &[u8]) {
        self.operations
            .push(BatchOperation::Put(key.to_string(), value.to_vec()));
    }

    fn write(&mut self) -> Result<()> {
        let mut entries = self.entries.write().expect("state store lock poisoned");

        for op in self.operations.drain(..) {
            match op {
                BatchOperation::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOperation::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }

        Ok(())
    }
}

/// In-memory [PackageStore].
#[derive(Clone, Default)]
pub struct MemoryPackageStore {
    packages: Arc<RwLock<HashMap<String, Package>>>,
}

impl MemoryPackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a package directly.
    pub fn insert(&self, package: Package) {
        self.packages
            .write()
            .expect("package store lock poisoned")
            .insert(package.key().as_str().to_string(), package);
    }
}

impl PackageStore for MemoryPackageStore {
    fn by_key(&self, r: &PackageRef) -> Result<Package> {
        self.packages
            .read()
            .expect("package store lock poisoned")
            .get(r.as_str())
            .cloned()
            .ok_or_else(|| MirrorError::PackageNotFound(r.as_str().to_string()))
    }

    fn update(&self, package: &Package) -> Result<()> {
        self.insert(package.clone());

        Ok(())
    }

    fn delete_by_key(&self, r: &PackageRef, batch: &mut dyn Batch) -> Result<()> {
        batch.delete(r.as_str());

        Ok(())
    }
}

/// In-memory [ChecksumStore].
#[derive(Clone, Default)]
pub struct MemoryChecksumStore {
    entries: Arc<RwLock<HashMap<String, FileChecksums>>>,
}

impl MemoryChecksumStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChecksumStore for MemoryChecksumStore {
    fn get(&self, pool_path: &str) -> Result<Option<FileChecksums>> {
        Ok(self
            .entries
            .read()
            .expect("checksum store lock poisoned")
            .get(pool_path)
            .cloned())
    }

    fn update(&self, pool_path: &str, checksums: &FileChecksums) -> Result<()> {
        self.entries
            .write()
            .expect("checksum store lock poisoned")
            .insert(pool_path.to_string(), checksums.clone());

        Ok(())
    }
}

/// A [StateStore] persisting each key as a file under a root directory.
///
/// Key path separators map to sub-directories. Batches write sequentially;
/// atomicity is per key (write to temp file, then rename), which is
/// sufficient for the small entity blobs stored here.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Construct an instance rooted at the given directory, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| MirrorError::IoPath(format!("{}", root.display()), e))?;

        Ok(Self { root })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/') {
            path.push(part);
        }
        path
    }

    fn write_key(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.key_path(key);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MirrorError::IoPath(format!("{}", parent.display()), e))?;
        }

        // Suffix the whole filename rather than swapping the extension,
        // so keys differing only after their last dot get distinct temp
        // files.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| MirrorError::Other(format!("key resolves to no filename: {}", key)))?;
        let temp_path = path.with_file_name(format!("{}.tmp", file_name));

        std::fs::write(&temp_path, value)
            .map_err(|e| MirrorError::IoPath(format!("{}", temp_path.display()), e))?;
        std::fs::rename(&temp_path, &path)
            .map_err(|e| MirrorError::IoPath(format!("{}", path.display()), e))?;

        Ok(())
    }

    fn collect_keys(&self, dir: &Path, prefix: &str, acc: &mut Vec<String>) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| MirrorError::IoPath(format!("{}", dir.display()), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| MirrorError::IoPath(format!("{}", dir.display()), e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();

            let key = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            if path.is_dir() {
                self.collect_keys(&path, &key, acc)?;
            } else if !key.ends_with(".tmp") {
                // Temp files from an interrupted write are not keys.
                acc.push(key);
            }
        }

        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key);

        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MirrorError::IoPath(format!("{}", path.display()), e)),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write_key(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MirrorError::IoPath(format!("{}", path.display()), e)),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(vec![]);
        }

        let mut keys = vec![];
        self.collect_keys(&self.root, "", &mut keys)?;

        keys.retain(|k| k.starts_with(prefix));
        keys.sort();

        Ok(keys)
    }

    fn create_batch(&self) -> Box<dyn Batch> {
        Box::new(FileBatch {
            root: self.root.clone(),
            operations: vec![],
        })
    }
}

struct FileBatch {
    root: PathBuf,
    operations: Vec<BatchOperation>,
}

impl Batch for FileBatch {
    fn delete(&mut self, key: &str) {
        self.operations.push(BatchOperation::Delete(key.to_string()));
    }

    fn put(&mut self, key: &str, value: &[u8]) {
        self.operations
            .push(BatchOperation::Put(key.to_string(), value.to_vec()));
    }

    fn write(&mut self) -> Result<()> {
        let store = FileStateStore {
            root: self.root.clone(),
        };

        for op in self.operations.drain(..) {
            match op {
                BatchOperation::Put(key, value) => store.write_key(&key, &value)?,
                BatchOperation::Delete(key) => store.delete(&key)?,
            }
        }

        Ok(())
    }
}

/// A [PackageStore] layered on a [StateStore], serializing packages as JSON.
pub struct StatePackageStore<S> {
    state: S,
}

impl<S: StateStore> StatePackageStore<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }

    fn state_key(r: &PackageRef) -> String {
        format!("package/{}", r.as_str())
    }

    /// References of every package record held, sorted.
    pub fn known_refs(&self) -> Result<crate::reflist::RefList> {
        let refs = self
            .state
            .keys("package/")?
            .into_iter()
            .map(|key| {
                PackageRef::from_key(key.strip_prefix("package/").unwrap_or(&key))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(crate::reflist::RefList::from_refs(refs))
    }
}

impl<S: StateStore> PackageStore for StatePackageStore<S> {
    fn by_key(&self, r: &PackageRef) -> Result<Package> {
        let data = self
            .state
            .get(&Self::state_key(r))?
            .ok_or_else(|| MirrorError::PackageNotFound(r.as_str().to_string()))?;

        Ok(serde_json::from_slice(&data)?)
    }

    fn update(&self, package: &Package) -> Result<()> {
        let data = serde_json::to_vec(package)?;

        self.state.put(&Self::state_key(&package.key()), &data)
    }

    fn delete_by_key(&self, r: &PackageRef, batch: &mut dyn Batch) -> Result<()> {
        batch.delete(&Self::state_key(r));

        Ok(())
    }
}

/// A [ChecksumStore] layered on a [StateStore].
pub struct StateChecksumStore<S> {
    state: S,
}

impl<S: StateStore> StateChecksumStore<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }

    fn state_key(pool_path: &str) -> String {
        format!("checksum/{}", pool_path)
    }
}

impl<S: StateStore> ChecksumStore for StateChecksumStore<S> {
    fn get(&self, pool_path: &str) -> Result<Option<FileChecksums>> {
        match self.state.get(&Self::state_key(pool_path))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn update(&self, pool_path: &str, checksums: &FileChecksums) -> Result<()> {
        let data = serde_json::to_vec(checksums)?;

        self.state.put(&Self::state_key(pool_path), &data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_state_store_round_trip() -> Result<()> {
        let store = MemoryStateStore::new();

        assert!(store.get("missing")?.is_none());

        store.put("mirror/test", b"hello")?;
        assert_eq!(store.get("mirror/test")?.as_deref(), Some(&b"hello"[..]));

        store.delete("mirror/test")?;
        assert!(store.get("mirror/test")?.is_none());

        Ok(())
    }

    #[test]
    fn batch_applies_atomically_on_write() -> Result<()> {
        let store = MemoryStateStore::new();
        store.put("a", b"1")?;

        let mut batch = store.create_batch();
        batch.put("b", b"2");
        batch.delete("a");

        // Nothing applied until write.
        assert!(store.get("b")?.is_none());
        assert!(store.get("a")?.is_some());

        batch.write()?;
        assert!(store.get("a")?.is_none());
        assert_eq!(store.get("b")?.as_deref(), Some(&b"2"[..]));

        Ok(())
    }

    #[test]
    fn package_store_lookup_error_carries_key() {
        let store = MemoryPackageStore::new();
        let r = PackageRef::new("amd64", "ghost", "1.0");

        match store.by_key(&r) {
            Err(MirrorError::PackageNotFound(key)) => {
                assert_eq!(key, "Pamd64 ghost 1.0");
            }
            other => panic!("unexpected result: {:?}", other.map(|p| p.name)),
        }
    }

    #[test]
    fn keys_filter_by_prefix() -> Result<()> {
        let store = MemoryStateStore::new();
        store.put("mirror/a", b"1")?;
        store.put("package/Pamd64 bash 1.0", b"2")?;
        store.put("package/Pamd64 zsh 1.0", b"3")?;

        assert_eq!(
            store.keys("package/")?,
            vec!["package/Pamd64 bash 1.0", "package/Pamd64 zsh 1.0"]
        );
        assert_eq!(store.keys("mirror/")?.len(), 1);
        assert!(store.keys("snapshot/")?.is_empty());

        let dir = tempfile::tempdir()?;
        let store = FileStateStore::new(dir.path())?;
        store.put("mirror/a", b"1")?;
        store.put("package/Pamd64 bash 1.0", b"2")?;

        assert_eq!(store.keys("package/")?, vec!["package/Pamd64 bash 1.0"]);

        Ok(())
    }

    #[test]
    fn known_refs_lists_package_records() -> Result<()> {
        let store = StatePackageStore::new(MemoryStateStore::new());
        store.update(&Package::new("bash", "5.1", "amd64")?)?;
        store.update(&Package::new("zsh", "5.8", "amd64")?)?;

        let refs = store.known_refs()?;
        assert_eq!(refs.len(), 2);
        assert!(refs.has(&PackageRef::new("amd64", "bash", "5.1")));

        Ok(())
    }

    #[test]
    fn file_state_store_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStateStore::new(dir.path())?;

        store.put("mirror/primary", b"{}")?;
        assert_eq!(store.get("mirror/primary")?.as_deref(), Some(&b"{}"[..]));

        let mut batch = store.create_batch();
        batch.delete("mirror/primary");
        batch.write()?;
        assert!(store.get("mirror/primary")?.is_none());

        Ok(())
    }

    #[test]
    fn writes_distinct_for_keys_sharing_a_stem() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStateStore::new(dir.path())?;

        // Version strings make keys that differ only after the last dot.
        store.put("package/Pamd64 bash 1.0", b"one")?;
        store.put("package/Pamd64 bash 1.1", b"two")?;

        assert_eq!(
            store.get("package/Pamd64 bash 1.0")?.as_deref(),
            Some(&b"one"[..])
        );
        assert_eq!(
            store.get("package/Pamd64 bash 1.1")?.as_deref(),
            Some(&b"two"[..])
        );
        assert_eq!(store.keys("package/")?.len(), 2);

        Ok(())
    }

    #[test]
    fn stale_temp_files_not_enumerated_as_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStateStore::new(dir.path())?;
        store.put("package/Pamd64 bash 5.1", b"{}")?;

        // A crash between write and rename leaves the temp file behind.
        std::fs::write(
            dir.path().join("package").join("Pamd64 zsh 5.8.tmp"),
            b"partial",
        )?;

        assert_eq!(store.keys("package/")?, vec!["package/Pamd64 bash 5.1"]);

        // A store layered on top only sees real records.
        let packages = StatePackageStore::new(store);
        let refs = packages.known_refs()?;
        assert_eq!(refs.len(), 1);
        assert!(refs.has(&PackageRef::new("amd64", "bash", "5.1")));

        Ok(())
    }

    #[test]
    fn state_package_store_round_trip() -> Result<()> {
        let store = StatePackageStore::new(MemoryStateStore::new());
        let package = Package::new("nginx", "1.18.0-6.1", "amd64")?;

        store.update(&package)?;
        let loaded = store.by_key(&package.key())?;
        assert_eq!(loaded, package);

        let state = MemoryStateStore::new();
        let store = StatePackageStore::new(state.clone());
        store.update(&package)?;

        let mut batch = state.create_batch();
        store.delete_by_key(&package.key(), batch.as_mut())?;
        batch.write()?;
        assert!(store.by_key(&package.key()).is_err());

        Ok(())
    }
}
