// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP client for Debian repositories. */

use {
    crate::{
        checksum::{FileChecksums, MultiDigester},
        download::Downloader,
        error::{MirrorError, Result},
    },
    async_trait::async_trait,
    futures::StreamExt,
    std::path::Path,
    tokio::io::AsyncWriteExt,
    url::Url,
};

/// A [Downloader] fetching over HTTP(S) via [reqwest].
///
/// Bytes are streamed to disk and digested incrementally, so large package
/// files are never buffered in memory.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch a URL fully into memory.
    ///
    /// Intended for index files, which are small relative to packages.
    pub async fn get_bytes(&self, url: Url) -> Result<Vec<u8>> {
        let res = self.client.get(url).send().await?.error_for_status()?;

        Ok(res.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download_with_checksum(
        &self,
        url: Url,
        dest: &Path,
        expected: &FileChecksums,
        ignore_mismatch: bool,
    ) -> Result<()> {
        let res = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = res.bytes_stream();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| MirrorError::IoPath(format!("{}", dest.display()), e))?;

        let mut digester = MultiDigester::default();
        let mut size = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            digester.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| MirrorError::IoPath(format!("{}", dest.display()), e))?;
        }

        file.flush()
            .await
            .map_err(|e| MirrorError::IoPath(format!("{}", dest.display()), e))?;
        drop(file);

        let digest = digester.finish();

        if !expected.matches_digest(&digest, size) && !ignore_mismatch {
            let err = expected.mismatch_error(&format!("{}", dest.display()), &digest, size);

            // Leave nothing behind that failed verification.
            let _ = std::fs::remove_file(dest);

            return Err(err);
        }

        Ok(())
    }
}
