// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Download planning and execution.

Downloads happen in two phases. [build_download_queue] turns a package
list into a deduplicated plan of fetch tasks without touching the network.
[run_download_queue] executes a plan with bounded concurrency, then imports
completed files into the pool sequentially, in plan order.

Failures do not abort the run: every task settles, and the accumulated
failures come back as one aggregate error. Cancellation is cooperative and
checked at task start, so in-flight transfers finish and no file is left in
a partially imported state.
*/

use {
    crate::{
        checksum::FileChecksums,
        error::{MirrorError, Result},
        package_list::PackageList,
        pool::PackagePool,
        progress::Progress,
        store::ChecksumStore,
    },
    async_trait::async_trait,
    futures::StreamExt,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
    url::Url,
};

/// Fetches a single URL to a local path, verifying content checksums.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest`.
    ///
    /// The downloaded bytes are verified against `expected`; a mismatch
    /// removes the destination file and fails, unless `ignore_mismatch`.
    async fn download_with_checksum(
        &self,
        url: Url,
        dest: &Path,
        expected: &FileChecksums,
        ignore_mismatch: bool,
    ) -> Result<()>;
}

/// Cooperative cancellation signal shared with an in-flight download run.
///
/// Cheaply cloneable. Setting the flag stops new tasks from starting;
/// tasks already transferring run to completion.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A file sharing content with the primary fetch of its task.
///
/// Carbon copies are not fetched; they receive the primary's pool path
/// once it imports.
#[derive(Clone, Debug)]
pub struct AdditionalDownloadTask {
    pub filename: String,
    pub checksums: FileChecksums,
    pub pool_path: Option<String>,
}

/// One planned fetch.
#[derive(Clone, Debug)]
pub struct PackageDownloadTask {
    /// Repository root relative path to fetch.
    pub download_path: String,
    /// Basename within the pool.
    pub filename: String,
    /// Expected size and checksums.
    pub checksums: FileChecksums,
    /// Where the downloaded bytes landed, set once the fetch succeeds.
    pub temp_path: Option<PathBuf>,
    /// Whether the fetch succeeded.
    pub done: bool,
    /// Pool location, set once import succeeds.
    pub pool_path: Option<String>,
    /// Files satisfied by this fetch without their own transfer.
    pub additional: Vec<AdditionalDownloadTask>,
}

/// Plan the downloads needed to materialize a package list in the pool.
///
/// Files already present and verified in the pool are skipped when
/// `skip_existing` is set. Files appearing multiple times with identical
/// name and checksums collapse into a single fetch; the extra occurrences
/// ride along as [AdditionalDownloadTask] entries. Returns the plan and
/// the total bytes to transfer.
pub fn build_download_queue(
    list: &PackageList,
    pool: &dyn PackagePool,
    checksum_store: &dyn ChecksumStore,
    skip_existing: bool,
) -> Result<(Vec<PackageDownloadTask>, u64)> {
    let mut queue: Vec<PackageDownloadTask> = vec![];
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    let mut total_size = 0u64;

    for package in list.iter() {
        for file in &package.files {
            if skip_existing
                && pool
                    .verify(&file.filename, &file.checksums, checksum_store)?
                    .is_some()
            {
                continue;
            }

            let digest = file
                .checksums
                .best_digest()
                .map(|d| d.digest_hex())
                .unwrap_or_else(|| format!("size:{}", file.checksums.size));
            let dedup_key = (file.filename.clone(), digest);

            if let Some(index) = seen.get(&dedup_key) {
                queue[*index].additional.push(AdditionalDownloadTask {
                    filename: file.filename.clone(),
                    checksums: file.checksums.clone(),
                    pool_path: None,
                });
                continue;
            }

            seen.insert(dedup_key, queue.len());
            total_size += file.checksums.size;
            queue.push(PackageDownloadTask {
                download_path: file.download_path.clone(),
                filename: file.filename.clone(),
                checksums: file.checksums.clone(),
                temp_path: None,
                done: false,
                pool_path: None,
                additional: vec![],
            });
        }
    }

    Ok((queue, total_size))
}

/// Execute a download plan.
///
/// Fetches run with at most `concurrency` in flight. Once all fetches
/// settle, completed files are imported into the pool one at a time, in
/// plan order. Tasks record their outcome in place, so partial progress
/// survives an error return.
///
/// Returns [MirrorError::Interrupted] if cancellation was observed,
/// otherwise [MirrorError::AggregateDownload] carrying every per-task
/// failure, otherwise success.
pub async fn run_download_queue(
    queue: &mut [PackageDownloadTask],
    base_url: &Url,
    downloader: &dyn Downloader,
    pool: &dyn PackagePool,
    checksum_store: &dyn ChecksumStore,
    concurrency: usize,
    cancel: &CancelFlag,
    progress: &dyn Progress,
) -> Result<()> {
    let concurrency = concurrency.max(1);

    let fetches = queue.iter().enumerate().map(|(index, task)| async move {
        if cancel.is_cancelled() {
            return (index, Err(MirrorError::Interrupted));
        }

        let res = async {
            let url = base_url.join(&task.download_path)?;
            let temp_path = pool.generate_temp_path(&task.filename)?;
            downloader
                .download_with_checksum(url, &temp_path, &task.checksums, false)
                .await?;

            Ok(temp_path)
        }
        .await;

        (index, res)
    });

    let settled: Vec<(usize, Result<PathBuf>)> = futures::stream::iter(fetches)
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut interrupted = false;
    let mut errors: Vec<String> = vec![];

    for (index, res) in settled {
        match res {
            Ok(temp_path) => {
                queue[index].done = true;
                queue[index].temp_path = Some(temp_path);
                progress.add_bar(queue[index].checksums.size);
            }
            Err(MirrorError::Interrupted) => {
                interrupted = true;
            }
            Err(e) => {
                errors.push(format!("{}: {}", queue[index].download_path, e));
            }
        }
    }

    // Import in plan order. Import is filesystem work and mutates shared
    // pool state, so it stays single-threaded.
    for task in queue.iter_mut() {
        if !task.done {
            continue;
        }

        let temp_path = task
            .temp_path
            .take()
            .expect("completed task without a temp path");

        match pool.import(&temp_path, &task.filename, &task.checksums, true, checksum_store) {
            Ok(pool_path) => {
                for additional in &mut task.additional {
                    additional.pool_path = Some(pool_path.clone());
                }
                task.pool_path = Some(pool_path);
            }
            Err(e) => {
                task.done = false;
                errors.push(format!("{}: {}", task.download_path, e));
            }
        }
    }

    if interrupted {
        Err(MirrorError::Interrupted)
    } else if !errors.is_empty() {
        Err(MirrorError::AggregateDownload(errors))
    } else {
        Ok(())
    }
}
