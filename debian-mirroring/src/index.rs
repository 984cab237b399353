// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package index handling.

`Packages` index files are sequences of control paragraphs separated by
blank lines, each paragraph describing one binary package as `Field: value`
lines with whitespace-indented continuations. Parsing extracts the fields
the mirroring engine needs and ignores the rest.
*/

use {
    crate::{
        checksum::{ChecksumType, FileChecksums},
        error::{MirrorError, Result},
        package::{Package, PackageFile},
        package_version::PackageVersion,
        progress::Progress,
    },
    async_trait::async_trait,
    std::collections::HashMap,
};

#[cfg(feature = "http")]
use {crate::http::HttpDownloader, url::Url};

/// Fetches the package entries for one (component, architecture) index.
#[async_trait]
pub trait PackageIndexSource: Send + Sync {
    async fn fetch_packages(
        &self,
        distribution: &str,
        component: &str,
        architecture: &str,
        progress: &dyn Progress,
    ) -> Result<Vec<Package>>;
}

fn split_paragraphs(content: &str) -> Vec<Vec<(String, String)>> {
    let mut paragraphs = vec![];
    let mut fields: Vec<(String, String)> = vec![];

    for line in content.lines() {
        if line.trim().is_empty() {
            if !fields.is_empty() {
                paragraphs.push(std::mem::take(&mut fields));
            }
        } else if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation of the previous field.
            if let Some((_, value)) = fields.last_mut() {
                value.push('\n');
                value.push_str(line.trim_start());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            fields.push((name.to_string(), value.trim().to_string()));
        }
    }

    if !fields.is_empty() {
        paragraphs.push(fields);
    }

    paragraphs
}

fn required<'a>(
    fields: &HashMap<&'a str, &'a str>,
    name: &'static str,
) -> Result<&'a str> {
    fields
        .get(name)
        .copied()
        .ok_or(MirrorError::IndexRequiredFieldMissing(name))
}

fn parse_paragraph(fields: Vec<(String, String)>) -> Result<Package> {
    let lookup: HashMap<&str, &str> = fields
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();

    let name = required(&lookup, "Package")?;
    let version = PackageVersion::parse(required(&lookup, "Version")?)?;
    let architecture = required(&lookup, "Architecture")?;
    let download_path = required(&lookup, "Filename")?;
    let size: u64 = required(&lookup, "Size")?.parse()?;

    let filename = download_path
        .rsplit('/')
        .next()
        .unwrap_or(download_path)
        .to_string();

    let provides = lookup
        .get("Provides")
        .map(|value| {
            value
                .split(',')
                .map(|entry| {
                    // Versioned provides carry a qualifier we do not track.
                    entry
                        .split('(')
                        .next()
                        .unwrap_or(entry)
                        .trim()
                        .to_string()
                })
                .filter(|entry| !entry.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let optional = |name: &str| lookup.get(name).map(|v| v.to_string());

    Ok(Package {
        name: name.to_string(),
        version,
        architecture: architecture.to_string(),
        source: optional("Source"),
        depends: optional("Depends"),
        pre_depends: optional("Pre-Depends"),
        recommends: optional("Recommends"),
        suggests: optional("Suggests"),
        provides,
        files: vec![PackageFile {
            filename,
            download_path: download_path.to_string(),
            checksums: FileChecksums {
                size,
                md5: optional(ChecksumType::Md5.field_name()),
                sha1: optional(ChecksumType::Sha1.field_name()),
                sha256: optional(ChecksumType::Sha256.field_name()),
            },
            pool_path: None,
        }],
    })
}

/// Parse the contents of a `Packages` index file.
pub fn parse_packages_index(content: &str) -> Result<Vec<Package>> {
    split_paragraphs(content)
        .into_iter()
        .map(parse_paragraph)
        .collect()
}

/// A [PackageIndexSource] fetching plain `Packages` indices over HTTP(S).
#[cfg(feature = "http")]
pub struct HttpPackageIndexSource {
    archive_root: Url,
    downloader: HttpDownloader,
}

#[cfg(feature = "http")]
impl HttpPackageIndexSource {
    pub fn new(archive_root: Url) -> Self {
        Self {
            archive_root,
            downloader: HttpDownloader::default(),
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl PackageIndexSource for HttpPackageIndexSource {
    async fn fetch_packages(
        &self,
        distribution: &str,
        component: &str,
        architecture: &str,
        progress: &dyn Progress,
    ) -> Result<Vec<Package>> {
        let url = self.archive_root.join(&format!(
            "dists/{}/{}/binary-{}/Packages",
            distribution, component, architecture
        ))?;

        progress.printf(&format!("downloading {}", url));

        let content = self.downloader.get_bytes(url).await?;
        let content = String::from_utf8(content)
            .map_err(|e| MirrorError::IndexParse(format!("invalid UTF-8: {}", e)))?;

        parse_packages_index(&content)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const INDEX: &str = "\
Package: nginx
Version: 1.18.0-6.1
Architecture: amd64
Depends: libc6 (>= 2.14), nginx-core (<< 1.18.0-6.1.1) | nginx-full (<< 1.18.0-6.1.1)
Description: small, powerful, scalable web/proxy server
 Nginx (\"engine X\") is a high-performance web and reverse proxy server.
Filename: pool/main/n/nginx/nginx_1.18.0-6.1_amd64.deb
Size: 88316
MD5sum: 7e2f7f484c0b64b05180087d2e3a3c06
SHA256: 2ad6d5da365303a2e9ee6aaee0f0b14e0a62f210ac00aa5b1c63a4e83f12b156

Package: mta-dummy
Version: 1.0
Architecture: all
Provides: mail-transport-agent, mta (= 1.0)
Filename: pool/main/m/mta-dummy/mta-dummy_1.0_all.deb
Size: 1024
SHA256: ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad
";

    #[test]
    fn parses_paragraphs() -> Result<()> {
        let packages = parse_packages_index(INDEX)?;
        assert_eq!(packages.len(), 2);

        let nginx = &packages[0];
        assert_eq!(nginx.name, "nginx");
        assert_eq!(nginx.version.to_string(), "1.18.0-6.1");
        assert_eq!(nginx.architecture, "amd64");
        assert!(nginx.depends.as_deref().unwrap().contains("nginx-core"));

        let file = &nginx.files[0];
        assert_eq!(file.filename, "nginx_1.18.0-6.1_amd64.deb");
        assert_eq!(file.download_path, "pool/main/n/nginx/nginx_1.18.0-6.1_amd64.deb");
        assert_eq!(file.checksums.size, 88316);
        assert!(file.checksums.sha1.is_none());
        assert!(file.checksums.sha256.is_some());

        Ok(())
    }

    #[test]
    fn provides_drops_version_qualifiers() -> Result<()> {
        let packages = parse_packages_index(INDEX)?;

        assert_eq!(
            packages[1].provides,
            vec!["mail-transport-agent".to_string(), "mta".to_string()]
        );

        Ok(())
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let res = parse_packages_index("Package: incomplete\nVersion: 1.0\n");

        assert!(matches!(
            res,
            Err(MirrorError::IndexRequiredFieldMissing("Architecture"))
        ));
    }

    #[test]
    fn empty_index_yields_no_packages() -> Result<()> {
        assert!(parse_packages_index("")?.is_empty());
        assert!(parse_packages_index("\n\n")?.is_empty());

        Ok(())
    }
}
