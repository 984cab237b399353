// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package pool storage.

The pool is a content-addressed blob store for downloaded package files.
Files land in temporary locations first and are imported into their final
pool location only after checksum verification, so a partially written
download can never be observed at a pool path.
*/

use {
    crate::{
        checksum::{FileChecksums, MultiDigester},
        error::{MirrorError, Result},
        progress::Progress,
        store::ChecksumStore,
    },
    std::{
        io::Read,
        path::{Path, PathBuf},
        sync::atomic::{AtomicU64, Ordering},
    },
};

/// Content-addressed storage for package files.
pub trait PackagePool: Send + Sync {
    /// Allocate a temporary path for downloading the named file into.
    ///
    /// Every call yields a distinct path, so concurrent downloads of
    /// files sharing a basename never write over each other.
    fn generate_temp_path(&self, filename: &str) -> Result<PathBuf>;

    /// Import a verified temporary file into the pool.
    ///
    /// Computed checksums are validated against `checksums` and recorded
    /// into the checksum store. Returns the pool relative path. With
    /// `move_file` the temporary file is consumed; otherwise it is copied.
    fn import(
        &self,
        temp_path: &Path,
        filename: &str,
        checksums: &FileChecksums,
        move_file: bool,
        checksum_store: &dyn ChecksumStore,
    ) -> Result<String>;

    /// Whether the pool already holds the named file with matching checksums.
    ///
    /// Returns the pool path when the file is provably present, consulting
    /// the checksum store before falling back to hashing the file.
    fn verify(
        &self,
        filename: &str,
        checksums: &FileChecksums,
        checksum_store: &dyn ChecksumStore,
    ) -> Result<Option<String>>;

    /// Remove a file from the pool, returning the bytes freed.
    fn remove(&self, pool_path: &str) -> Result<u64>;

    /// List all pool relative file paths, sorted.
    fn filepath_list(&self, progress: &dyn Progress) -> Result<Vec<String>>;
}

/// A [PackagePool] storing files under a filesystem root.
///
/// Layout is `<aa>/<bb>/<filename>` where `aa`/`bb` are the leading bytes
/// of the file's SHA-256 digest, mirroring hash-prefixed pool layouts.
/// Temporary downloads live under `_tmp/`.
pub struct FilesystemPool {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl FilesystemPool {
    /// Construct an instance rooted at the given directory.
    ///
    /// The directory is created lazily on first use.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            temp_counter: AtomicU64::new(0),
        }
    }

    fn relative_path(checksums: &FileChecksums, filename: &str) -> Result<String> {
        let sha256 = checksums
            .sha256
            .as_deref()
            .ok_or_else(|| MirrorError::Other(format!("no SHA-256 recorded for {}", filename)))?;

        if sha256.len() < 4 {
            return Err(MirrorError::Other(format!(
                "truncated SHA-256 for {}",
                filename
            )));
        }

        Ok(format!("{}/{}/{}", &sha256[0..2], &sha256[2..4], filename))
    }

    fn digest_file(path: &Path) -> Result<(FileChecksums, u64)> {
        let mut f = std::fs::File::open(path)
            .map_err(|e| MirrorError::IoPath(format!("{}", path.display()), e))?;

        let mut digester = MultiDigester::default();
        let mut size = 0u64;
        let mut buf = [0u8; 16384];

        loop {
            let count = f
                .read(&mut buf[..])
                .map_err(|e| MirrorError::IoPath(format!("{}", path.display()), e))?;
            if count == 0 {
                break;
            }

            digester.update(&buf[0..count]);
            size += count as u64;
        }

        Ok((digester.finish().as_checksums(size), size))
    }

    fn collect_files(&self, dir: &Path, prefix: &str, acc: &mut Vec<String>) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| MirrorError::IoPath(format!("{}", dir.display()), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| MirrorError::IoPath(format!("{}", dir.display()), e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();

            let relative = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };

            if path.is_dir() {
                self.collect_files(&path, &relative, acc)?;
            } else {
                acc.push(relative);
            }
        }

        Ok(())
    }
}

impl PackagePool for FilesystemPool {
    fn generate_temp_path(&self, filename: &str) -> Result<PathBuf> {
        let temp_dir = self.root.join("_tmp");
        std::fs::create_dir_all(&temp_dir)
            .map_err(|e| MirrorError::IoPath(format!("{}", temp_dir.display()), e))?;

        // Counter + pid keep paths unique across calls and processes.
        let serial = self.temp_counter.fetch_add(1, Ordering::SeqCst);

        Ok(temp_dir.join(format!("{}-{}-{}", std::process::id(), serial, filename)))
    }

    fn import(
        &self,
        temp_path: &Path,
        filename: &str,
        checksums: &FileChecksums,
        move_file: bool,
        checksum_store: &dyn ChecksumStore,
    ) -> Result<String> {
        let (computed, size) = Self::digest_file(temp_path)?;

        let mut verified = checksums.clone();
        if verified.size != size {
            return Err(MirrorError::SizeMismatch {
                path: format!("{}", temp_path.display()),
                expected: verified.size,
                got: size,
            });
        }

        if verified.sha256.as_deref().is_some()
                && verified.sha256.as_deref() != computed.sha256.as_deref()
            || verified.sha1.as_deref().is_some()
                && verified.sha1.as_deref() != computed.sha1.as_deref()
            || verified.md5.as_deref().is_some() && verified.md5.as_deref() != computed.md5.as_deref()
        {
            return Err(MirrorError::ChecksumMismatch {
                path: format!("{}", temp_path.display()),
                expected: verified
                    .sha256
                    .clone()
                    .unwrap_or_else(|| format!("size {}", verified.size)),
                got: computed
                    .sha256
                    .clone()
                    .unwrap_or_else(|| format!("size {}", size)),
            });
        }

        // Fill in flavors the index did not advertise.
        verified.md5 = computed.md5.clone();
        verified.sha1 = computed.sha1.clone();
        verified.sha256 = computed.sha256.clone();

        let relative = Self::relative_path(&verified, filename)?;
        let dest = self.root.join(&relative);

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MirrorError::IoPath(format!("{}", parent.display()), e))?;
        }

        if dest.exists() {
            // Content-addressed path already holds identical content.
            if move_file {
                std::fs::remove_file(temp_path)
                    .map_err(|e| MirrorError::IoPath(format!("{}", temp_path.display()), e))?;
            }
        } else if move_file {
            std::fs::rename(temp_path, &dest)
                .map_err(|e| MirrorError::IoPath(format!("{}", dest.display()), e))?;
        } else {
            std::fs::copy(temp_path, &dest)
                .map_err(|e| MirrorError::IoPath(format!("{}", dest.display()), e))?;
        }

        checksum_store.update(&relative, &verified)?;

        Ok(relative)
    }

    fn verify(
        &self,
        filename: &str,
        checksums: &FileChecksums,
        checksum_store: &dyn ChecksumStore,
    ) -> Result<Option<String>> {
        let relative = match Self::relative_path(checksums, filename) {
            Ok(relative) => relative,
            // Without a SHA-256 we cannot address the file; treat as absent.
            Err(_) => return Ok(None),
        };

        if let Some(recorded) = checksum_store.get(&relative)? {
            if recorded.size == checksums.size
                && recorded.sha256.as_deref() == checksums.sha256.as_deref()
            {
                return Ok(Some(relative));
            }
        }

        let path = self.root.join(&relative);
        if !path.is_file() {
            return Ok(None);
        }

        let (computed, size) = Self::digest_file(&path)?;
        if checksums.size == size && checksums.sha256.as_deref() == computed.sha256.as_deref() {
            checksum_store.update(&relative, &computed)?;

            Ok(Some(relative))
        } else {
            Ok(None)
        }
    }

    fn remove(&self, pool_path: &str) -> Result<u64> {
        let path = self.root.join(pool_path);

        let metadata = std::fs::metadata(&path)
            .map_err(|e| MirrorError::IoPath(format!("{}", path.display()), e))?;
        std::fs::remove_file(&path)
            .map_err(|e| MirrorError::IoPath(format!("{}", path.display()), e))?;

        Ok(metadata.len())
    }

    fn filepath_list(&self, progress: &dyn Progress) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(vec![]);
        }

        let mut files = vec![];
        self.collect_files(&self.root, "", &mut files)?;

        files.retain(|f| !f.starts_with("_tmp/"));
        files.sort();

        progress.printf(&format!("found {} pool file(s)", files.len()));

        Ok(files)
    }
}
