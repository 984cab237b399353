// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content checksum primitives.

Debian repositories advertise file integrity through MD5, SHA-1, and SHA-256
checksums. This module defines types for representing individual digests,
for carrying the full set of checksums attached to a file entry, and for
computing all digest flavors in a single pass over content.
*/

use {
    crate::error::{MirrorError, Result},
    digest::Digest,
    md5::Md5,
    serde::{Deserialize, Serialize},
    sha1::Sha1,
    sha2::Sha256,
    std::fmt::Formatter,
};

/// A flavor of checksum used by Debian repository metadata.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChecksumType {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl ChecksumType {
    /// Name of the index field conveying this checksum flavor.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Iterate over checksum flavors, strongest first.
    pub fn preferred_order() -> impl Iterator<Item = ChecksumType> {
        [Self::Sha256, Self::Sha1, Self::Md5].into_iter()
    }
}

/// Represents a single content digest.
#[derive(Clone, Eq, PartialEq)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)?;

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// Obtain the digest bytes.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }
}

/// The full set of checksums recorded for a single file.
///
/// Index entries rarely advertise every flavor, so individual digests are
/// optional. The size is always known.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileChecksums {
    /// Expected size of the file, in bytes.
    pub size: u64,
    /// Hex encoded MD5 digest, if known.
    pub md5: Option<String>,
    /// Hex encoded SHA-1 digest, if known.
    pub sha1: Option<String>,
    /// Hex encoded SHA-256 digest, if known.
    pub sha256: Option<String>,
}

impl FileChecksums {
    /// The recorded hex digest for a checksum flavor, if known.
    pub fn hex_digest(&self, checksum: ChecksumType) -> Option<&str> {
        match checksum {
            ChecksumType::Md5 => self.md5.as_deref(),
            ChecksumType::Sha1 => self.sha1.as_deref(),
            ChecksumType::Sha256 => self.sha256.as_deref(),
        }
    }

    /// Obtain the strongest known digest, if any digest is recorded.
    pub fn best_digest(&self) -> Option<ContentDigest> {
        ChecksumType::preferred_order().find_map(|checksum| {
            let hex_digest = self.hex_digest(checksum)?;

            ContentDigest::from_hex_digest(checksum, hex_digest).ok()
        })
    }

    /// Whether a computed [MultiContentDigest] and byte count satisfy these checksums.
    ///
    /// Every recorded digest flavor must match. Unknown flavors are not checked.
    pub fn matches_digest(&self, digest: &MultiContentDigest, size: u64) -> bool {
        if self.size != size {
            return false;
        }

        if let Some(md5) = &self.md5 {
            if *md5 != digest.md5.digest_hex() {
                return false;
            }
        }
        if let Some(sha1) = &self.sha1 {
            if *sha1 != digest.sha1.digest_hex() {
                return false;
            }
        }
        if let Some(sha256) = &self.sha256 {
            if *sha256 != digest.sha256.digest_hex() {
                return false;
            }
        }

        true
    }

    /// Produce an error describing how `digest` fails to satisfy these checksums.
    pub fn mismatch_error(&self, path: &str, digest: &MultiContentDigest, size: u64) -> MirrorError {
        if self.size != size {
            return MirrorError::SizeMismatch {
                path: path.to_string(),
                expected: self.size,
                got: size,
            };
        }

        let (expected, got) = if let Some(sha256) = &self.sha256 {
            (sha256.clone(), digest.sha256.digest_hex())
        } else if let Some(sha1) = &self.sha1 {
            (sha1.clone(), digest.sha1.digest_hex())
        } else if let Some(md5) = &self.md5 {
            (md5.clone(), digest.md5.digest_hex())
        } else {
            ("<none>".to_string(), digest.sha256.digest_hex())
        };

        MirrorError::ChecksumMismatch {
            path: path.to_string(),
            expected,
            got,
        }
    }
}

/// Holds one digest of each supported flavor.
#[derive(Clone, Debug)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha1: ContentDigest,
    pub sha256: ContentDigest,
}

impl MultiContentDigest {
    /// Express this digest as a [FileChecksums] with every flavor populated.
    pub fn as_checksums(&self, size: u64) -> FileChecksums {
        FileChecksums {
            size,
            md5: Some(self.md5.digest_hex()),
            sha1: Some(self.sha1.digest_hex()),
            sha256: Some(self.sha256.digest_hex()),
        }
    }
}

/// A content digester that simultaneously computes multiple digest types.
pub struct MultiDigester {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
}

impl Default for MultiDigester {
    fn default() -> Self {
        Self {
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
        }
    }
}

impl MultiDigester {
    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    /// Finish digesting content.
    ///
    /// Consumes the instance and returns a [MultiContentDigest] holding all the digests.
    pub fn finish(self) -> MultiContentDigest {
        MultiContentDigest {
            md5: ContentDigest::Md5(self.md5.finalize().to_vec()),
            sha1: ContentDigest::Sha1(self.sha1.finalize().to_vec()),
            sha256: ContentDigest::Sha256(self.sha256.finalize().to_vec()),
        }
    }
}
