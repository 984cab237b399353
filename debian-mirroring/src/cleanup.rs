// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Garbage collection of unreferenced packages and pool files.

A package is garbage once no mirror's reference list names it. Its
metadata record is deleted and its pool files are removed, unless a
surviving package still shares the file. Metadata deletions are buffered
into one batch so readers never observe a half-deleted state.
*/

use {
    crate::{
        error::Result,
        pool::PackagePool,
        progress::Progress,
        reflist::RefList,
        store::{PackageStore, StateStore},
    },
    std::collections::HashSet,
};

/// Outcome of a cleanup run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CleanupReport {
    /// Package records deleted (or that would be, in dry run).
    pub packages_removed: usize,
    /// Pool files removed (or that would be, in dry run).
    pub files_removed: usize,
    /// Bytes freed from the pool. Zero in dry run.
    pub bytes_freed: u64,
}

/// Delete packages in `known` that `referenced` no longer names.
///
/// `referenced` should be the merged reference lists of every live mirror.
/// Pool files shared with a surviving package are kept. With `dry_run`,
/// nothing is deleted; the report describes what a real run would do.
pub fn cleanup_unreferenced(
    known: &RefList,
    referenced: &RefList,
    package_store: &dyn PackageStore,
    state_store: &dyn StateStore,
    pool: &dyn PackagePool,
    dry_run: bool,
    progress: &dyn Progress,
) -> Result<CleanupReport> {
    let orphans = known.subtract(referenced);

    if orphans.is_empty() {
        progress.printf("nothing to clean up");
        return Ok(CleanupReport::default());
    }

    // Pool paths still needed by surviving packages.
    let mut live_files: HashSet<String> = HashSet::new();
    referenced.for_each(|r| {
        let package = package_store.by_key(r)?;
        live_files.extend(package.files.iter().filter_map(|f| f.pool_path.clone()));

        Ok(())
    })?;

    let mut report = CleanupReport::default();
    let mut batch = state_store.create_batch();
    let mut removable: Vec<String> = vec![];

    orphans.for_each(|r| {
        let package = package_store.by_key(r)?;

        progress.printf(&format!("removing {}", package));

        for file in &package.files {
            if let Some(pool_path) = &file.pool_path {
                if !live_files.contains(pool_path) {
                    removable.push(pool_path.clone());
                }
            }
        }

        package_store.delete_by_key(r, batch.as_mut())?;
        report.packages_removed += 1;

        Ok(())
    })?;

    removable.sort();
    removable.dedup();
    report.files_removed = removable.len();

    if dry_run {
        progress.printf(&format!(
            "dry run: would remove {} package(s) and {} pool file(s)",
            report.packages_removed, report.files_removed
        ));
        return Ok(report);
    }

    batch.write()?;

    for pool_path in &removable {
        report.bytes_freed += pool.remove(pool_path)?;
    }

    progress.colored_printf(&format!(
        "removed {} package(s), {} pool file(s), {} byte(s) freed",
        report.packages_removed, report.files_removed, report.bytes_freed
    ));

    Ok(report)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            checksum::MultiDigester,
            package::{Package, PackageFile},
            pool::FilesystemPool,
            progress::NullProgress,
            store::{MemoryChecksumStore, MemoryStateStore, StatePackageStore},
        },
    };

    fn import_file(
        pool: &FilesystemPool,
        checksum_store: &MemoryChecksumStore,
        filename: &str,
        data: &[u8],
    ) -> Result<(String, crate::checksum::FileChecksums)> {
        let mut digester = MultiDigester::default();
        digester.update(data);
        let checksums = digester.finish().as_checksums(data.len() as u64);

        let temp = pool.generate_temp_path(filename)?;
        std::fs::write(&temp, data)?;
        let pool_path = pool.import(&temp, filename, &checksums, true, checksum_store)?;

        Ok((pool_path, checksums))
    }

    fn package_with_pool_file(
        name: &str,
        filename: &str,
        pool_path: &str,
        checksums: &crate::checksum::FileChecksums,
    ) -> Package {
        let mut p = Package::new(name, "1.0", "amd64").unwrap();
        p.files.push(PackageFile {
            filename: filename.to_string(),
            download_path: format!("pool/main/{}", filename),
            checksums: checksums.clone(),
            pool_path: Some(pool_path.to_string()),
        });
        p
    }

    #[test]
    fn removes_orphans_but_keeps_shared_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = FilesystemPool::new(dir.path());
        let checksum_store = MemoryChecksumStore::new();
        let state_store = MemoryStateStore::new();
        let package_store = StatePackageStore::new(state_store.clone());

        let (shared_path, shared_sums) =
            import_file(&pool, &checksum_store, "shared_1.0_all.deb", b"shared")?;
        let (orphan_path, orphan_sums) =
            import_file(&pool, &checksum_store, "orphan_1.0_amd64.deb", b"orphan")?;

        let keeper = package_with_pool_file("keeper", "shared_1.0_all.deb", &shared_path, &shared_sums);
        // The orphan references both the shared file and its own file.
        let mut orphan =
            package_with_pool_file("orphan", "orphan_1.0_amd64.deb", &orphan_path, &orphan_sums);
        orphan.files.push(keeper.files[0].clone());

        package_store.update(&keeper)?;
        package_store.update(&orphan)?;

        let known = RefList::from_refs(vec![keeper.key(), orphan.key()]);
        let referenced = RefList::from_refs(vec![keeper.key()]);

        let report = cleanup_unreferenced(
            &known,
            &referenced,
            &package_store,
            &state_store,
            &pool,
            false,
            &NullProgress,
        )?;

        assert_eq!(report.packages_removed, 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.bytes_freed, b"orphan".len() as u64);

        // The orphan's record is gone, the keeper's survives.
        assert!(package_store.by_key(&orphan.key()).is_err());
        assert!(package_store.by_key(&keeper.key()).is_ok());

        // The shared pool file survives, the orphan's own file does not.
        assert!(dir.path().join(&shared_path).is_file());
        assert!(!dir.path().join(&orphan_path).is_file());

        Ok(())
    }

    #[test]
    fn dry_run_deletes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = FilesystemPool::new(dir.path());
        let checksum_store = MemoryChecksumStore::new();
        let state_store = MemoryStateStore::new();
        let package_store = StatePackageStore::new(state_store.clone());

        let (pool_path, checksums) =
            import_file(&pool, &checksum_store, "orphan_1.0_amd64.deb", b"orphan")?;
        let orphan =
            package_with_pool_file("orphan", "orphan_1.0_amd64.deb", &pool_path, &checksums);
        package_store.update(&orphan)?;

        let known = RefList::from_refs(vec![orphan.key()]);

        let report = cleanup_unreferenced(
            &known,
            &RefList::new(),
            &package_store,
            &state_store,
            &pool,
            true,
            &NullProgress,
        )?;

        assert_eq!(report.packages_removed, 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.bytes_freed, 0);

        assert!(package_store.by_key(&orphan.key()).is_ok());
        assert!(dir.path().join(&pool_path).is_file());

        Ok(())
    }

    #[test]
    fn empty_orphan_set_is_a_no_op() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = FilesystemPool::new(dir.path());
        let state_store = MemoryStateStore::new();
        let package_store = StatePackageStore::new(state_store.clone());

        let refs = RefList::new();
        let report = cleanup_unreferenced(
            &refs,
            &refs,
            &package_store,
            &state_store,
            &pool,
            false,
            &NullProgress,
        )?;

        assert_eq!(report, CleanupReport::default());

        Ok(())
    }
}
