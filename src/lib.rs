// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

//! Planning and fetching core for a self-updating application.
//!
//! A published summary file lists every downloadable artifact, one per
//! line, whitespace separated:
//!
//! ```text
//! <app_name> <platform> <version> <from_versions> <url> [<size> [<sha256>]]
//!
//! example win32 0.1 *     http://host/example-0.1.win32.zip
//! example win32 0.2 0.1   http://host/example-0.1-to-0.2.win32.esky 32
//! example win32 1.0 0.*   http://host/example-0.x-to-1.0.win32.esky 1043
//! example win32 1.0 *     http://host/example-1.0.win32.zip 20004
//! ```
//!
//! `from_versions` is a comma-separated list of version patterns; `*`
//! marks a full installer usable from any version. From those records the
//! [`Updater`] builds a graph of versions, plans the cheapest sequence of
//! downloads from the running version to a requested target, fetches them
//! with resume and integrity checking, and stages the assembled version
//! tree under `ready/` for an external swap step. Lines whose first
//! non-blank character is `#` are comments.
//!
//! The zip extractor and binary patcher are deliberately not part of this
//! crate; callers inject them through the [`Codecs`] trait.

use indexmap::IndexSet;
use log::{info, warn};
use url::Url;
use vfs::VfsPath;

mod config;
mod errors;
mod fetch;
mod graph;
mod lock;
mod prepare;
mod progress;
mod summary;
mod transport;
mod types;
mod version;

pub use crate::config::Config;
pub use crate::errors::{
    CodecError, ConfigError, DownloadError, EskyError, LockError, PrepareError, SummaryError,
    SummaryRowError, TransportError, VersionError,
};
pub use crate::prepare::Codecs;
pub use crate::summary::KnownFile;
pub use crate::transport::{HttpTransport, Transport};
pub use crate::types::Application;
pub use crate::version::{Qualifier, VersionNumber};

// Both crates appear in the public API (Transport takes a url::Url,
// Codecs works on vfs::VfsPath).
pub use url;
pub use vfs;

use crate::fetch::Fetcher;
use crate::graph::UpgradeGraph;
use crate::lock::UpdateLock;
use crate::prepare::Preparer;
use crate::progress::Progress;

const LOGNAME: &str = "esky";

/// The update engine for one installed application.
///
/// `find_versions` loads the summary and reports which versions are
/// reachable from the running one; `fetch_version` downloads and stages a
/// chosen target. Artifacts that fail to download or apply are dropped
/// from the graph and planning retries with what remains.
pub struct Updater<'p> {
    app: Application,
    summary_url: Url,
    transport: Box<dyn Transport>,
    codecs: Box<dyn Codecs>,
    known_files: Vec<KnownFile>,
    graph: Option<UpgradeGraph>,
    lock: UpdateLock,
    progress: Progress<'p>,
}

impl<'p> Updater<'p> {
    /// `rid` uniquely identifies the installation on this machine (the
    /// canonical application directory path is a good choice); it keys
    /// the cross-process lock that serializes update work.
    pub fn new(
        config: Config,
        fs: VfsPath,
        rid: &str,
        codecs: Box<dyn Codecs>,
    ) -> Result<Updater<'p>, EskyError> {
        let app = Application::from_config(&config, fs)?;
        let transport = Box::new(HttpTransport::new()?);
        let lock = UpdateLock::new(rid)?;

        Ok(Updater {
            app,
            summary_url: config.summary().clone(),
            transport,
            codecs,
            known_files: Vec::new(),
            graph: None,
            lock,
            progress: Progress::new(),
        })
    }

    /// Replace the HTTP transport, e.g. to serve `file://` feeds.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Updater<'p> {
        self.transport = transport;
        self
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn with_progress_start(&mut self, cb: impl Fn(&str, u64) + 'p) {
        self.progress.on_start(cb);
    }

    pub fn with_progress_update(&mut self, cb: impl Fn(&str, u64) + 'p) {
        self.progress.on_update(cb);
    }

    pub fn with_progress_finish(&mut self, cb: impl Fn(&str) + 'p) {
        self.progress.on_finish(cb);
    }

    /// Reload the summary and report every version reachable from the
    /// running one, itself included. On a summary failure the previously
    /// loaded graph is left untouched.
    pub fn find_versions(&mut self) -> Result<IndexSet<VersionNumber>, EskyError> {
        let files = summary::fetch_summary(self.transport.as_ref(), &self.summary_url)?;
        self.known_files = files;

        let mut graph = UpgradeGraph::new(&self.known_files, &self.app);
        let versions = graph.get_versions(self.app.version());
        self.graph = Some(graph);

        Ok(versions)
    }

    /// Download and stage `target`, returning the ready directory that
    /// the external applier can swap into place. Failed artifacts are
    /// removed from the graph and planning retries; when no path is left,
    /// the attempt fails with [`EskyError::NoPath`].
    pub fn fetch_version(&mut self, target: &VersionNumber) -> Result<VfsPath, EskyError> {
        let _guard = self.lock.acquire()?;

        // Field-by-field here: the guard keeps self.lock borrowed for the
        // rest of the function, so nothing below may take &mut self as a
        // whole.
        let mut graph = match self.graph.take() {
            Some(graph) => graph,
            None => {
                let files = summary::fetch_summary(self.transport.as_ref(), &self.summary_url)?;
                self.known_files = files;
                UpgradeGraph::new(&self.known_files, &self.app)
            }
        };
        let result = self.run_update(&mut graph, target);
        self.graph = Some(graph);

        result
    }

    /// True when a prepared tree for `version` is already staged.
    pub fn has_version(&self, version: &VersionNumber) -> Result<bool, EskyError> {
        Ok(self.app.ready_path(version)?.is_dir()?)
    }

    /// Reconcile on-disk state with the summary: downloads that no longer
    /// correspond to a known artifact, or that fail their integrity
    /// check, are deleted; the unpack and ready directories are cleared.
    /// A summary failure aborts without touching anything.
    pub fn cleanup(&mut self) -> Result<(), EskyError> {
        let _guard = self.lock.acquire()?;

        let files = summary::fetch_summary(self.transport.as_ref(), &self.summary_url)?;
        self.known_files = files;
        self.graph = Some(UpgradeGraph::new(&self.known_files, &self.app));

        let downloads = self.app.workdir("downloads")?;
        for entry in downloads.read_dir()?.collect::<Vec<_>>() {
            let filename = entry.filename();
            let keep = match self.identify_file(&filename) {
                Some(file) => file.check_hash(&self.app, None, None),
                None => false,
            };
            if !keep {
                info!(target: LOGNAME, "removing stale download '{}'", filename);
                entry.remove_file()?;
            }
        }

        for name in ["unpack", "ready"] {
            let dir = self.app.workdir(name)?;
            dir.remove_dir_all()?;
            dir.create_dir()?;
        }

        Ok(())
    }

    /// Attribute an on-disk download to a summary record. When several
    /// records share the basename, the one whose integrity check passes
    /// wins; failing that, the most recently listed record is blamed, so
    /// the file gets treated as its bad download.
    fn identify_file(&self, filename: &str) -> Option<&KnownFile> {
        let matches: Vec<&KnownFile> = self
            .known_files
            .iter()
            .filter(|file| file.filename() == filename)
            .collect();

        if matches.len() > 1 {
            for &file in matches.iter().rev() {
                if file.check_hash(&self.app, None, None) {
                    return Some(file);
                }
            }
        }

        matches.last().copied()
    }

    fn run_update(
        &self,
        graph: &mut UpgradeGraph,
        target: &VersionNumber,
    ) -> Result<VfsPath, EskyError> {
        let current = self.app.version().clone();
        graph.ensure_version(&current);
        info!(
            target: LOGNAME,
            "updating {} from '{}' to '{}'",
            self.app.name(),
            current,
            target
        );

        // A download can be corrupt at the source, a patch can fail to
        // apply. Either way the offending artifact is dropped and we
        // plan again with what's left, until we succeed or run out of
        // graph.
        loop {
            let path = graph.get_best_path(&current, target)?;

            let fetcher = Fetcher::new(&self.app, self.transport.as_ref(), &self.progress);
            let mut failed = None;
            for file in &path {
                match fetcher.fetch(file) {
                    Ok(()) => {}
                    Err(EskyError::DownloadError(err)) => {
                        warn!(target: LOGNAME, "{}", err);
                        failed = Some(err.file);
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
            if let Some(file) = failed {
                graph.remove_file(&file);
                continue;
            }

            let preparer = Preparer::new(&self.app, self.codecs.as_ref());
            match preparer.prepare(target, &path) {
                Ok(()) => return Ok(self.app.ready_path(target)?),
                Err(PrepareError::PatchError { file, source }) => {
                    warn!(
                        target: LOGNAME,
                        "patch '{}' failed to apply: {}",
                        file.filename(),
                        source
                    );
                    graph.remove_file(&file);
                }
                Err(PrepareError::ExtractError { file, source }) => {
                    warn!(
                        target: LOGNAME,
                        "archive '{}' failed to extract: {}",
                        file.filename(),
                        source
                    );
                    graph.remove_file(&file);
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}
