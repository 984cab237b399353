// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Remote mirror entities and the update workflow.

A [RemoteMirror] records what to mirror (archive root, distribution,
components, architectures, optional package filter) together with its
current [MirrorStatus] and the reference list of packages fetched so far.
The whole entity persists as one JSON document in the state store.

Updates run under a persisted lock: the status flips to
[MirrorStatus::Updating] before any network work and back to
[MirrorStatus::Idle] on every return path. A crash mid-update therefore
leaves the persisted status as `Updating`, and a later update must be
forced to take over the stale lock.
*/

use {
    crate::{
        download::{build_download_queue, run_download_queue, CancelFlag, Downloader},
        error::{MirrorError, Result},
        index::PackageIndexSource,
        package_list::{DependencyOptions, PackageList},
        pool::PackagePool,
        progress::Progress,
        reflist::RefList,
        store::{ChecksumStore, PackageStore, StateStore},
    },
    serde::{Deserialize, Serialize},
    url::Url,
};

/// Lifecycle state of a mirror, persisted alongside the mirror itself.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MirrorStatus {
    /// No update in progress.
    Idle,
    /// An update is (or was, if the worker died) in progress.
    Updating { worker_pid: u32 },
}

impl Default for MirrorStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Tunables for one update run.
#[derive(Clone, Copy, Debug)]
pub struct UpdateOptions {
    /// Take over a mirror whose persisted status is `Updating`.
    pub force: bool,
    /// Skip fetching files already present and verified in the pool.
    pub skip_existing_packages: bool,
    /// Maximum concurrent downloads.
    pub concurrency: usize,
    /// Relationship fields followed when a filter expands dependencies.
    pub dependency_options: DependencyOptions,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            force: false,
            skip_existing_packages: true,
            concurrency: 4,
            dependency_options: DependencyOptions::default(),
        }
    }
}

/// A mirror of (part of) a remote Debian repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteMirror {
    /// Unique mirror name, doubling as its state store identity.
    pub name: String,
    /// Repository root URL, e.g. `http://deb.debian.org/debian/`.
    pub archive_root: String,
    /// Distribution under `dists/`, e.g. `bullseye`.
    pub distribution: String,
    /// Components to mirror, e.g. `main`, `contrib`.
    pub components: Vec<String>,
    /// Binary architectures to mirror.
    pub architectures: Vec<String>,
    /// Package query expressions restricting what is mirrored. Empty
    /// means everything.
    pub filter: Vec<String>,
    /// Whether the filter pulls in dependency closures.
    pub filter_with_deps: bool,
    /// Current lifecycle state.
    pub status: MirrorStatus,
    /// References of packages currently held by the mirror.
    pub ref_list: RefList,
}

impl RemoteMirror {
    pub fn new(
        name: &str,
        archive_root: &str,
        distribution: &str,
        components: Vec<String>,
        architectures: Vec<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            archive_root: archive_root.to_string(),
            distribution: distribution.to_string(),
            components,
            architectures,
            filter: vec![],
            filter_with_deps: false,
            status: MirrorStatus::Idle,
            ref_list: RefList::new(),
        }
    }

    fn state_key(name: &str) -> String {
        format!("mirror/{}", name)
    }

    /// The archive root parsed as a URL, with a guaranteed trailing slash
    /// so relative joins resolve under it.
    pub fn archive_url(&self) -> Result<Url> {
        if self.archive_root.ends_with('/') {
            Ok(Url::parse(&self.archive_root)?)
        } else {
            Ok(Url::parse(&format!("{}/", self.archive_root))?)
        }
    }

    /// Load a mirror from the state store.
    pub fn load(name: &str, store: &dyn StateStore) -> Result<Self> {
        let raw = store
            .get(&Self::state_key(name))?
            .ok_or_else(|| MirrorError::MirrorNotFound(name.to_string()))?;

        Ok(serde_json::from_slice(&raw)?)
    }

    /// Persist the mirror to the state store.
    pub fn save(&self, store: &dyn StateStore) -> Result<()> {
        store.put(&Self::state_key(&self.name), &serde_json::to_vec(self)?)
    }

    /// Remove the mirror from the state store.
    pub fn delete(&self, store: &dyn StateStore) -> Result<()> {
        store.delete(&Self::state_key(&self.name))
    }

    /// Transition to `Updating` and persist, claiming the update lock.
    ///
    /// Refuses if the persisted status is already `Updating`, unless
    /// `force` takes over a lock left behind by a dead worker.
    pub fn mark_as_updating(&mut self, store: &dyn StateStore, force: bool) -> Result<()> {
        if matches!(self.status, MirrorStatus::Updating { .. }) && !force {
            return Err(MirrorError::StateConflict(self.name.clone()));
        }

        self.status = MirrorStatus::Updating {
            worker_pid: std::process::id(),
        };
        self.save(store)
    }

    /// Transition to `Idle` and persist, releasing the update lock.
    ///
    /// Unconditional: releasing an already idle mirror is harmless.
    pub fn mark_as_idle(&mut self, store: &dyn StateStore) -> Result<()> {
        self.status = MirrorStatus::Idle;
        self.save(store)
    }

    /// Run a full update: fetch indices, filter, download missing files
    /// into the pool, then persist metadata and the new reference list.
    ///
    /// The update lock is released on every return path. Download failures
    /// leave the previous reference list untouched; files already imported
    /// stay in the pool, so a retry with `skip_existing_packages` resumes
    /// where this run stopped.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &mut self,
        index_source: &dyn PackageIndexSource,
        downloader: &dyn Downloader,
        pool: &dyn PackagePool,
        package_store: &dyn PackageStore,
        checksum_store: &dyn ChecksumStore,
        state_store: &dyn StateStore,
        options: &UpdateOptions,
        cancel: &CancelFlag,
        progress: &dyn Progress,
    ) -> Result<()> {
        self.mark_as_updating(state_store, options.force)?;

        let res = self
            .update_inner(
                index_source,
                downloader,
                pool,
                package_store,
                checksum_store,
                state_store,
                options,
                cancel,
                progress,
            )
            .await;

        let idle = self.mark_as_idle(state_store);

        res.and(idle)
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_inner(
        &mut self,
        index_source: &dyn PackageIndexSource,
        downloader: &dyn Downloader,
        pool: &dyn PackagePool,
        package_store: &dyn PackageStore,
        checksum_store: &dyn ChecksumStore,
        state_store: &dyn StateStore,
        options: &UpdateOptions,
        cancel: &CancelFlag,
        progress: &dyn Progress,
    ) -> Result<()> {
        progress.printf(&format!(
            "updating mirror {}: {} {}",
            self.name, self.archive_root, self.distribution
        ));

        let mut list = PackageList::new();

        for component in &self.components {
            for architecture in &self.architectures {
                let packages = index_source
                    .fetch_packages(&self.distribution, component, architecture, progress)
                    .await?;

                for package in packages {
                    list.add(package);
                }
            }
        }

        list.prepare_index(&self.architectures)?;
        progress.printf(&format!("fetched metadata for {} package(s)", list.len()));

        if !self.filter.is_empty() {
            let queries = self
                .filter
                .iter()
                .map(|q| crate::dependency::SingleDependency::parse(q))
                .collect::<Result<Vec<_>>>()?;

            list = list.filter(
                &queries,
                self.filter_with_deps,
                None,
                options.dependency_options,
                &self.architectures,
                progress,
            )?;
            list.prepare_index(&self.architectures)?;

            progress.printf(&format!("{} package(s) after filtering", list.len()));
        }

        let (mut queue, total_size) = build_download_queue(
            &list,
            pool,
            checksum_store,
            options.skip_existing_packages,
        )?;

        progress.printf(&format!(
            "downloading {} file(s), {} byte(s)",
            queue.len(),
            total_size
        ));
        progress.init_bar(total_size, true);

        let download_res = run_download_queue(
            &mut queue,
            &self.archive_url()?,
            downloader,
            pool,
            checksum_store,
            options.concurrency,
            cancel,
            progress,
        )
        .await;

        progress.shutdown_bar();
        download_res?;

        // Record pool locations and persist package metadata.
        for package in list.iter() {
            let mut package = package.clone();
            for file in &mut package.files {
                file.pool_path = pool.verify(&file.filename, &file.checksums, checksum_store)?;
            }
            package_store.update(&package)?;
        }

        self.ref_list = self.ref_list.merge(&list.to_ref_list(), true, true);
        self.save(state_store)?;

        progress.colored_printf(&format!(
            "mirror {} updated: {} package(s)",
            self.name,
            self.ref_list.len()
        ));

        Ok(())
    }
}
