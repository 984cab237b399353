// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("state serialization error: {0:?}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("unable to resolve package reference {key}: {source}")]
    RefLookup {
        key: String,
        #[source]
        source: Box<MirrorError>,
    },

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("mirror not found: {0}")]
    MirrorNotFound(String),

    #[error("checksum mismatch for {path}: expected {expected}, got {got}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("size mismatch for {path}: expected {expected} bytes, got {got}")]
    SizeMismatch { path: String, expected: u64, got: u64 },

    #[error("unable to update: interrupted")]
    Interrupted,

    #[error("{} download error(s): {}", .0.len(), .0.join("; "))]
    AggregateDownload(Vec<String>),

    #[error("mirror {0} is locked by another update operation")]
    StateConflict(String),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),

    #[error("failed to parse dependency expression: {0}")]
    DependencyParse(String),

    #[error("malformed package reference key: {0}")]
    MalformedRef(String),

    #[error("malformed index paragraph: {0}")]
    IndexParse(String),

    #[error("required field missing in index paragraph: {0}")]
    IndexRequiredFieldMissing(&'static str),

    #[error("package {package} has architecture {architecture} outside the configured set")]
    UnexpectedArchitecture {
        package: String,
        architecture: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, MirrorError>;
