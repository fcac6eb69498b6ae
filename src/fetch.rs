// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use std::io::{Read, Write};

use log::{info, warn};
use vfs::VfsPath;

use crate::errors::{DownloadError, EskyError, TransportError};
use crate::progress::Progress;
use crate::summary::KnownFile;
use crate::transport::Transport;
use crate::types::Application;

const LOGNAME: &str = "esky::fetch";
const CHUNK: usize = 64 * 1024;

/// Downloads one artifact into the downloads directory, resuming partial
/// files with a range request and verifying the result against the
/// declared size and hash. Two attempts are budgeted per call; an attempt
/// that resumes from the same offset as the previous one has stalled and
/// is charged as a failure.
pub(crate) struct Fetcher<'a> {
    app: &'a Application,
    transport: &'a dyn Transport,
    progress: &'a Progress<'a>,
}

impl<'a> Fetcher<'a> {
    pub(crate) fn new(
        app: &'a Application,
        transport: &'a dyn Transport,
        progress: &'a Progress<'a>,
    ) -> Fetcher<'a> {
        Fetcher {
            app,
            transport,
            progress,
        }
    }

    pub(crate) fn fetch(&self, file: &KnownFile) -> Result<(), EskyError> {
        let path = file.full_path(self.app)?;
        let mut tries_left: u32 = 2;
        let mut resumed_from: Option<u64> = None;

        while tries_left > 0 {
            let seek_to = if path.is_file()? {
                let actual_size = path.metadata()?.len;
                if file.size == 0 {
                    if actual_size > 0 {
                        // Nothing to verify against; anything non-empty
                        // is accepted.
                        return Ok(());
                    }
                    0
                } else if actual_size < file.size {
                    actual_size
                } else {
                    if file.check_hash(self.app, Some(actual_size), None) {
                        return Ok(());
                    }
                    warn!(
                        target: LOGNAME,
                        "integrity check failed for '{}', discarding",
                        file.filename()
                    );
                    tries_left -= 1;
                    resumed_from = None;
                    path.remove_file()?;
                    continue;
                }
            } else {
                0
            };

            if resumed_from == Some(seek_to) {
                // No progress since the last attempt, e.g. the declared
                // size is larger than what the server will ever send.
                warn!(
                    target: LOGNAME,
                    "download of '{}' stalled at {} bytes",
                    file.filename(),
                    seek_to
                );
                tries_left -= 1;
                resumed_from = None;
                if path.is_file()? {
                    path.remove_file()?;
                }
                continue;
            }

            resumed_from = Some(seek_to);
            if let Err(err) = self.transfer(file, &path, seek_to) {
                warn!(
                    target: LOGNAME,
                    "download attempt for '{}' failed: {}",
                    file.url,
                    err
                );
                tries_left -= 1;
            }
        }

        Err(DownloadError { file: file.clone() }.into())
    }

    fn transfer(
        &self,
        file: &KnownFile,
        path: &VfsPath,
        seek_to: u64,
    ) -> Result<(), TransportError> {
        info!(
            target: LOGNAME,
            "downloading '{}' from offset {}",
            file.url,
            seek_to
        );

        let offset = if seek_to > 0 { Some(seek_to) } else { None };
        let mut body = self.transport.get(&file.url, offset)?;
        let mut output = if seek_to > 0 {
            path.append_file()?
        } else {
            path.create_file()?
        };

        let id = file.filename();
        self.progress.start(&id, file.size);
        let result = self.stream(&mut body, &mut output, &id);
        self.progress.finish(&id);

        result
    }

    fn stream(
        &self,
        body: &mut Box<dyn Read>,
        output: &mut Box<dyn Write>,
        id: &str,
    ) -> Result<(), TransportError> {
        let mut buffer = [0u8; CHUNK];
        loop {
            let count = body.read(&mut buffer)?;
            if count == 0 {
                return Ok(());
            }
            output.write_all(&buffer[..count])?;
            self.progress.update(id, count as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;

    use sha2::{Digest, Sha256};
    use url::Url;
    use vfs::MemoryFS;

    use super::*;

    /// Scripted stand-in for the network: each `get` consumes the next
    /// behavior and records the requested offset.
    struct ScriptedTransport {
        body: Vec<u8>,
        script: RefCell<Vec<Behavior>>,
        calls: RefCell<Vec<Option<u64>>>,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        /// Serve everything from the requested offset.
        Full,
        /// Serve only the first n bytes past the offset, then hang up.
        Truncate(usize),
        /// Serve the wrong bytes entirely.
        Corrupt,
        /// Fail before any bytes are sent.
        Fail,
    }

    impl ScriptedTransport {
        fn new(body: &[u8], script: Vec<Behavior>) -> ScriptedTransport {
            ScriptedTransport {
                body: body.to_vec(),
                script: RefCell::new(script),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Option<u64>> {
            self.calls.borrow().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, _url: &Url, offset: Option<u64>) -> Result<Box<dyn Read>, TransportError> {
            self.calls.borrow_mut().push(offset);
            let behavior = if self.script.borrow().is_empty() {
                Behavior::Full
            } else {
                self.script.borrow_mut().remove(0)
            };

            let start = offset.unwrap_or(0) as usize;
            let rest = self.body.get(start..).unwrap_or(&[]).to_vec();
            match behavior {
                Behavior::Full => Ok(Box::new(Cursor::new(rest))),
                Behavior::Truncate(n) => {
                    let n = n.min(rest.len());
                    Ok(Box::new(Cursor::new(rest[..n].to_vec())))
                }
                Behavior::Corrupt => Ok(Box::new(Cursor::new(vec![0u8; rest.len()]))),
                Behavior::Fail => Err(TransportError::UnsupportedScheme {
                    scheme: "scripted failure".to_string(),
                }),
            }
        }
    }

    const BODY: &[u8] = b"the artifact contents, long enough to resume";

    fn app() -> Application {
        let root: VfsPath = MemoryFS::new().into();
        Application::new("example", "0.1".parse().unwrap(), "win32", root).unwrap()
    }

    fn known_file(app_name: &str, with_hash: bool) -> KnownFile {
        let mut row = format!(
            "{} win32 1.0 0.1 http://host/artifact.esky {}",
            app_name,
            BODY.len()
        );
        if with_hash {
            row.push(' ');
            row.push_str(&hex::encode(Sha256::digest(BODY)));
        }
        KnownFile::parse_row(&row).unwrap()
    }

    fn read_download(app: &Application, file: &KnownFile) -> Vec<u8> {
        let mut data = Vec::new();
        file.full_path(app)
            .unwrap()
            .open_file()
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        data
    }

    fn write_download(app: &Application, file: &KnownFile, data: &[u8]) {
        let path = file.full_path(app).unwrap();
        let mut out = path.create_file().unwrap();
        std::io::Write::write_all(&mut out, data).unwrap();
    }

    #[test]
    fn downloads_in_one_pass() {
        let app = app();
        let file = known_file("example", true);
        let transport = ScriptedTransport::new(BODY, vec![Behavior::Full]);
        let progress = Progress::new();

        Fetcher::new(&app, &transport, &progress).fetch(&file).unwrap();
        assert_eq!(read_download(&app, &file), BODY);
        assert_eq!(transport.calls(), vec![None]);
    }

    #[test]
    fn a_valid_local_file_never_touches_the_network() {
        let app = app();
        let file = known_file("example", true);
        write_download(&app, &file, BODY);

        let transport = ScriptedTransport::new(BODY, vec![]);
        let progress = Progress::new();
        Fetcher::new(&app, &transport, &progress).fetch(&file).unwrap();
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn partial_files_resume_with_a_range_request() {
        let app = app();
        let file = known_file("example", true);
        write_download(&app, &file, &BODY[..10]);

        let transport = ScriptedTransport::new(BODY, vec![Behavior::Full]);
        let progress = Progress::new();
        Fetcher::new(&app, &transport, &progress).fetch(&file).unwrap();

        assert_eq!(transport.calls(), vec![Some(10)]);
        assert_eq!(read_download(&app, &file), BODY);
    }

    #[test]
    fn a_bad_download_is_deleted_and_refetched() {
        let app = app();
        let file = known_file("example", true);
        let transport =
            ScriptedTransport::new(BODY, vec![Behavior::Corrupt, Behavior::Full]);
        let progress = Progress::new();

        Fetcher::new(&app, &transport, &progress).fetch(&file).unwrap();
        // Both transfers started from scratch; the corrupt file was
        // deleted in between, not resumed.
        assert_eq!(transport.calls(), vec![None, None]);
        assert_eq!(read_download(&app, &file), BODY);
    }

    #[test]
    fn a_stalled_resume_is_charged_and_restarted() {
        let app = app();
        let file = known_file("example", false);
        write_download(&app, &file, &BODY[..10]);

        // The first attempt delivers nothing at offset 10; the second
        // starts over and completes.
        let transport =
            ScriptedTransport::new(BODY, vec![Behavior::Truncate(0), Behavior::Full]);
        let progress = Progress::new();
        Fetcher::new(&app, &transport, &progress).fetch(&file).unwrap();

        assert_eq!(transport.calls(), vec![Some(10), None]);
        assert_eq!(read_download(&app, &file), BODY);
    }

    #[test]
    fn the_attempt_budget_is_two() {
        let app = app();
        let file = known_file("example", true);
        let transport = ScriptedTransport::new(
            BODY,
            vec![Behavior::Corrupt, Behavior::Corrupt, Behavior::Full],
        );
        let progress = Progress::new();

        let err = Fetcher::new(&app, &transport, &progress)
            .fetch(&file)
            .unwrap_err();
        match err {
            EskyError::DownloadError(e) => assert_eq!(e.file, file),
            other => panic!("expected a download error, got {other:?}"),
        }
        // The third, working behavior was never reached.
        assert_eq!(transport.calls(), vec![None, None]);
    }

    #[test]
    fn transport_failures_consume_the_budget() {
        let app = app();
        let file = known_file("example", true);
        let transport = ScriptedTransport::new(BODY, vec![Behavior::Fail, Behavior::Fail]);
        let progress = Progress::new();

        let err = Fetcher::new(&app, &transport, &progress)
            .fetch(&file)
            .unwrap_err();
        assert!(matches!(err, EskyError::DownloadError(_)));
    }

    #[test]
    fn undeclared_sizes_accept_any_nonempty_file() {
        let app = app();
        let file = KnownFile::parse_row("example win32 1.0 0.1 http://host/artifact.esky")
            .unwrap();
        write_download(&app, &file, b"x");

        let transport = ScriptedTransport::new(BODY, vec![]);
        let progress = Progress::new();
        Fetcher::new(&app, &transport, &progress).fetch(&file).unwrap();
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn progress_reports_the_streamed_bytes() {
        let app = app();
        let file = known_file("example", true);
        let transport = ScriptedTransport::new(BODY, vec![Behavior::Full]);

        let seen = RefCell::new(0u64);
        let mut progress = Progress::new();
        progress.on_update(|_id, delta| *seen.borrow_mut() += delta);

        Fetcher::new(&app, &transport, &progress).fetch(&file).unwrap();
        assert_eq!(*seen.borrow(), BODY.len() as u64);
    }
}
