// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use thiserror::Error;

use crate::summary::KnownFile;
use crate::version::VersionNumber;

#[derive(Error, Debug)]
pub enum EskyError {
    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    #[error(transparent)]
    VersionError(#[from] VersionError),

    #[error(transparent)]
    SummaryError(#[from] SummaryError),

    #[error(transparent)]
    TransportError(#[from] TransportError),

    #[error(transparent)]
    DownloadError(#[from] DownloadError),

    #[error(transparent)]
    PrepareError(#[from] PrepareError),

    #[error(transparent)]
    LockError(#[from] LockError),

    #[error("could not access the update directory")]
    WorkdirError(#[from] vfs::VfsError),

    #[error("no valid path from '{from}' to '{target}'")]
    NoPath {
        from: VersionNumber,
        target: VersionNumber,
    },
}

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("invalid version number '{text}'")]
    Unparseable { text: String },

    #[error("can't compare empty version numbers")]
    EmptyComparison,

    #[error("can't compare wildcard version numbers")]
    WildcardComparison,

    #[error("can't compare unrecognized qualifier '{name}'")]
    UnknownQualifier { name: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no configuration file")]
    NoConfig { source: vfs::VfsError },

    #[error("invalid configuration")]
    InvalidConfig { source: serde_yaml::Error },

    #[error("invalid version in configuration")]
    InvalidVersion { source: VersionError },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    HTTPError(#[from] reqwest::Error),

    #[error("could not access local file")]
    FileError(#[from] vfs::VfsError),

    #[error("interrupted transfer")]
    IoError(#[from] std::io::Error),

    #[error("no local root configured for '{scheme}' URLs")]
    UnsupportedScheme { scheme: String },
}

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error(transparent)]
    TransportError(#[from] TransportError),

    #[error("could not read summary data")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SummaryRowError {
    #[error("expected at least 5 fields")]
    MissingFields,

    #[error("unexpected trailing fields")]
    TrailingFields,

    #[error(transparent)]
    VersionError(#[from] VersionError),

    #[error("artifact version must be concrete, got '{text}'")]
    UnusableVersion { text: String },

    #[error("invalid url")]
    UrlError(#[from] url::ParseError),

    #[error("invalid size")]
    SizeError(#[from] std::num::ParseIntError),
}

#[derive(Error, Debug)]
#[error("unable to download '{}'", .file.url)]
pub struct DownloadError {
    pub file: KnownFile,
}

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("unable to extract '{}'", .file.url)]
    ExtractError { file: KnownFile, source: CodecError },

    #[error("unable to apply patch '{}'", .file.url)]
    PatchError { file: KnownFile, source: CodecError },

    #[error("could not stage version data")]
    FileError(#[from] vfs::VfsError),
}

/// Error reported by an injected zip or patch collaborator.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct CodecError {
    message: String,
}

impl CodecError {
    pub fn new<S: Into<String>>(message: S) -> CodecError {
        CodecError {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error(transparent)]
    LockError(#[from] named_lock::Error),
}
