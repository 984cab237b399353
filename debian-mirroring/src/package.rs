// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package entities and reference keys.

A [Package] is the resolved, in-memory form of one binary package: identity
fields, relationship fields, and the repository files backing it. A
[PackageRef] is the compact, durable key for a package; reference lists
store and manipulate keys only and resolve them through a package store
when full metadata is needed.
*/

use {
    crate::{
        checksum::FileChecksums,
        dependency::DependencyList,
        error::{MirrorError, Result},
        package_version::PackageVersion,
    },
    serde::{Deserialize, Serialize},
    std::fmt::{Display, Formatter},
};

/// An opaque, ordered key uniquely identifying one package.
///
/// Keys have the form `P<architecture> <name> <version>`. Byte-wise key
/// ordering therefore groups entries of one architecture+name together,
/// which reference list operations rely on. Treat the inner layout as an
/// implementation detail; use the accessors.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRef(String);

impl PackageRef {
    /// Construct a key from its identity fields.
    pub fn new(architecture: &str, name: &str, version: &str) -> Self {
        Self(format!("P{} {} {}", architecture, name, version))
    }

    /// Reconstruct a key from its raw string form, validating the layout.
    pub fn from_key(key: &str) -> Result<Self> {
        let r = Self(key.to_string());
        r.parse()?;

        Ok(r)
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the key into `(architecture, name, version)`.
    pub fn parse(&self) -> Result<(&str, &str, &str)> {
        let rest = self
            .0
            .strip_prefix('P')
            .ok_or_else(|| MirrorError::MalformedRef(self.0.clone()))?;

        let mut parts = rest.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(architecture), Some(name), Some(version))
                if !architecture.is_empty() && !name.is_empty() && !version.is_empty() =>
            {
                Ok((architecture, name, version))
            }
            _ => Err(MirrorError::MalformedRef(self.0.clone())),
        }
    }

    /// The `(architecture, name)` portion of the key, as a raw prefix.
    ///
    /// Two keys with equal group prefixes refer to versions of the same
    /// package on the same architecture.
    pub fn group_key(&self) -> &str {
        match self.0.rfind(' ') {
            Some(pos) => &self.0[0..pos],
            None => &self.0,
        }
    }

    /// The package version component, parsed.
    pub fn version(&self) -> Result<PackageVersion> {
        let (_, _, version) = self.parse()?;

        PackageVersion::parse(version)
    }
}

impl Display for PackageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One repository file belonging to a package.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageFile {
    /// Basename of the file within the package pool.
    pub filename: String,
    /// Repository root relative path to fetch the file from.
    ///
    /// Corresponds to the `Filename` index field.
    pub download_path: String,
    /// Expected size and checksums.
    pub checksums: FileChecksums,
    /// Location within the local pool, once imported.
    pub pool_path: Option<String>,
}

/// A resolved binary package.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// The `Package` field.
    pub name: String,
    /// The `Version` field, parsed.
    #[serde(with = "version_string")]
    pub version: PackageVersion,
    /// The `Architecture` field.
    pub architecture: String,
    /// The `Source` field, if present.
    pub source: Option<String>,
    /// Raw `Depends` field value.
    pub depends: Option<String>,
    /// Raw `Pre-Depends` field value.
    pub pre_depends: Option<String>,
    /// Raw `Recommends` field value.
    pub recommends: Option<String>,
    /// Raw `Suggests` field value.
    pub suggests: Option<String>,
    /// Names advertised by the `Provides` field.
    pub provides: Vec<String>,
    /// Files backing this package.
    pub files: Vec<PackageFile>,
}

mod version_string {
    use {
        super::PackageVersion,
        serde::{de::Error, Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(v: &PackageVersion, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PackageVersion, D::Error> {
        let s = String::deserialize(d)?;

        PackageVersion::parse(&s).map_err(D::Error::custom)
    }
}

impl Package {
    /// Construct a minimal package from its identity fields.
    pub fn new(name: &str, version: &str, architecture: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            version: PackageVersion::parse(version)?,
            architecture: architecture.to_string(),
            source: None,
            depends: None,
            pre_depends: None,
            recommends: None,
            suggests: None,
            provides: vec![],
            files: vec![],
        })
    }

    /// The canonical reference key for this package.
    pub fn key(&self) -> PackageRef {
        PackageRef::new(&self.architecture, &self.name, &self.version.to_string())
    }

    /// The `Depends` field, parsed.
    pub fn depends_list(&self) -> Option<Result<DependencyList>> {
        self.depends.as_deref().map(DependencyList::parse)
    }

    /// The `Pre-Depends` field, parsed.
    pub fn pre_depends_list(&self) -> Option<Result<DependencyList>> {
        self.pre_depends.as_deref().map(DependencyList::parse)
    }

    /// The `Recommends` field, parsed.
    pub fn recommends_list(&self) -> Option<Result<DependencyList>> {
        self.recommends.as_deref().map(DependencyList::parse)
    }

    /// The `Suggests` field, parsed.
    pub fn suggests_list(&self) -> Option<Result<DependencyList>> {
        self.suggests.as_deref().map(DependencyList::parse)
    }
}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.name, self.version, self.architecture)
    }
}
