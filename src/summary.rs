// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use std::io::Read;

use log::{info, warn};
use sha2::{Digest, Sha256};
use url::Url;
use vfs::VfsPath;

use crate::errors::{SummaryError, SummaryRowError};
use crate::transport::Transport;
use crate::types::Application;
use crate::version::VersionNumber;

const LOGNAME: &str = "esky::summary";

pub(crate) const KB: u64 = 1024;
pub(crate) const MB: u64 = KB * 1024;

/// One row of the summary file: a downloadable artifact that produces
/// `version` when applied to any version matching `from_versions`. A
/// pattern matching the empty version marks a full installer; anything
/// else is a binary patch.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct KnownFile {
    pub(crate) app_name: String,
    pub(crate) platform: String,
    pub(crate) version: VersionNumber,
    pub(crate) from_versions: Vec<VersionNumber>,
    pub(crate) url: Url,
    pub(crate) size: u64,
    pub(crate) hash: Option<String>,
}

impl KnownFile {
    pub(crate) fn parse_row(line: &str) -> Result<KnownFile, SummaryRowError> {
        let mut fields = line.split_whitespace();
        let mut next = || fields.next().ok_or(SummaryRowError::MissingFields);

        let app_name = next()?.to_string();
        let platform = next()?.to_string();
        let version: VersionNumber = next()?.parse()?;
        let from_versions = next()?
            .split(',')
            .map(VersionNumber::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let url: Url = next()?.parse()?;

        if version.is_wildcard() || version.is_empty() {
            return Err(SummaryRowError::UnusableVersion {
                text: version.to_string(),
            });
        }

        let size = match fields.next() {
            Some(field) => field.parse::<u64>()?,
            None => 0,
        };
        let hash = fields.next().map(str::to_string);
        if fields.next().is_some() {
            return Err(SummaryRowError::TrailingFields);
        }

        Ok(KnownFile {
            app_name,
            platform,
            version,
            from_versions,
            url,
            size,
            hash,
        })
    }

    pub fn version(&self) -> &VersionNumber {
        &self.version
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Basename the artifact is stored under in the downloads directory.
    pub fn filename(&self) -> String {
        let path = self.url.path();
        path.rsplit('/').next().unwrap_or(path).to_string()
    }

    pub(crate) fn full_path(&self, app: &Application) -> Result<VfsPath, vfs::VfsError> {
        app.workdir("downloads")?.join(&self.filename())
    }

    /// True when this artifact can be applied with no source version at
    /// all, i.e. it is a full installer rather than a patch.
    pub(crate) fn is_full_install(&self) -> bool {
        VersionNumber::empty().in_any(&self.from_versions)
    }

    /// Integrity verdict on the local copy of this artifact. With a
    /// declared hash the first `size` bytes are digested (the whole file
    /// when no size was declared); with only a size the lengths must
    /// match; with neither, any non-empty file passes. `actual_size` and
    /// `precomputed` skip re-reading when the caller already knows them.
    pub(crate) fn check_hash(
        &self,
        app: &Application,
        actual_size: Option<u64>,
        precomputed: Option<&str>,
    ) -> bool {
        let verdict = self
            .full_path(app)
            .and_then(|path| self.verdict(&path, actual_size, precomputed));

        match verdict {
            Ok(good) => good,
            Err(err) => {
                warn!(
                    target: LOGNAME,
                    "could not verify '{}': {}",
                    self.filename(),
                    err
                );
                false
            }
        }
    }

    fn verdict(
        &self,
        path: &VfsPath,
        actual_size: Option<u64>,
        precomputed: Option<&str>,
    ) -> Result<bool, vfs::VfsError> {
        if !path.is_file()? {
            return Ok(false);
        }

        let actual_size = match actual_size {
            Some(n) => n,
            None => path.metadata()?.len,
        };

        match &self.hash {
            None if self.size == 0 => Ok(actual_size != 0),
            None => Ok(actual_size == self.size),
            Some(expected) => {
                let digest = match precomputed {
                    Some(digest) => digest.to_string(),
                    None => hash_file(path, self.size)?,
                };
                Ok(&digest == expected)
            }
        }
    }

    /// Heuristic planner weight: the declared size when present, otherwise
    /// 10 MiB for a full install and 2 MiB for a patch. An artifact whose
    /// local copy already verifies costs 1/1024th of that (installing it
    /// still takes time proportional to its size), with a floor of 1.
    pub(crate) fn cost(&self, app: &Application) -> u64 {
        let size = if self.size > 0 {
            self.size
        } else if self.is_full_install() {
            10 * MB
        } else {
            2 * MB
        };

        if self.check_hash(app, None, None) {
            (size / KB).max(1)
        } else {
            size
        }
    }
}

/// SHA-256 of the first `limit` bytes of a file (the whole file when
/// `limit` is 0), as lowercase hex. Junk past the limit is ignored; if it
/// mattered, the digest wouldn't match anyway.
pub(crate) fn hash_file(path: &VfsPath, limit: u64) -> Result<String, vfs::VfsError> {
    let mut file = path.open_file()?;
    let mut hasher = Sha256::new();
    let mut remaining = if limit == 0 { u64::MAX } else { limit };
    let mut buffer = [0u8; 8192];

    while remaining > 0 {
        let want = (buffer.len() as u64).min(remaining) as usize;
        let count = file.read(&mut buffer[..want])?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
        remaining -= count as u64;
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fetch and parse the summary document. Malformed rows are logged and
/// skipped; a transport failure aborts the whole load so the caller can
/// keep whatever state it already had.
pub(crate) fn fetch_summary(
    transport: &dyn Transport,
    url: &Url,
) -> Result<Vec<KnownFile>, SummaryError> {
    info!(target: LOGNAME, "fetching summary from '{}'", url);

    let mut body = transport.get(url, None)?;
    let mut text = String::new();
    body.read_to_string(&mut text)?;

    Ok(parse_summary(&text))
}

pub(crate) fn parse_summary(text: &str) -> Vec<KnownFile> {
    let mut files = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match KnownFile::parse_row(line) {
            Ok(file) => files.push(file),
            Err(err) => warn!(
                target: LOGNAME,
                "skipping line {} of summary: {}",
                number + 1,
                err
            ),
        }
    }

    files
}
