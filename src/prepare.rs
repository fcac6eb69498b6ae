// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use std::io::Read;

use log::info;
use vfs::VfsPath;

use crate::errors::{CodecError, PrepareError};
use crate::summary::KnownFile;
use crate::types::Application;
use crate::version::VersionNumber;

const LOGNAME: &str = "esky::prepare";
const BOOTSTRAP_DIR: &str = "esky-bootstrap";
const BOOTSTRAP_MANIFEST: &str = "esky-bootstrap.txt";

/// The artifact codecs this crate deliberately does not implement: a zip
/// extractor for full installers and an in-place patcher for upgrade
/// files. Implementations must either complete or fail without leaving
/// the destination half-written in a way a retry can't recover from.
pub trait Codecs {
    fn extract_zipfile(&self, archive: &VfsPath, dest: &VfsPath) -> Result<(), CodecError>;

    fn apply_patch(&self, target: &VfsPath, patch: &mut dyn Read) -> Result<(), CodecError>;
}

/// Turns a planned path into a staged version tree under `ready/`.
pub(crate) struct Preparer<'a> {
    app: &'a Application,
    codecs: &'a dyn Codecs,
}

impl<'a> Preparer<'a> {
    pub(crate) fn new(app: &'a Application, codecs: &'a dyn Codecs) -> Preparer<'a> {
        Preparer { app, codecs }
    }

    pub(crate) fn prepare(
        &self,
        version: &VersionNumber,
        path: &[KnownFile],
    ) -> Result<(), PrepareError> {
        if path.is_empty() {
            // The current version is already prepared, or it wouldn't
            // be running.
            return Ok(());
        }

        let unpack_dir = fresh_subdir(&self.app.workdir("unpack")?)?;

        let mut patches = path;
        if path[0].is_full_install() {
            let base = &path[0];
            patches = &path[1..];
            info!(
                target: LOGNAME,
                "extracting '{}' as the install base",
                base.filename()
            );
            let archive = base.full_path(self.app)?;
            self.codecs
                .extract_zipfile(&archive, &unpack_dir)
                .map_err(|source| PrepareError::ExtractError {
                    file: base.clone(),
                    source,
                })?;
        } else {
            info!(target: LOGNAME, "upgrading from the running version");
            self.copy_current_version(&unpack_dir)?;
        }

        for patch_file in patches {
            info!(target: LOGNAME, "applying '{}'", patch_file.filename());
            let mut stream = patch_file.full_path(self.app)?.open_file()?;
            self.codecs
                .apply_patch(&unpack_dir, &mut stream)
                .map_err(|source| PrepareError::PatchError {
                    file: patch_file.clone(),
                    source,
                })?;
        }

        self.stage(version, &unpack_dir)
    }

    /// Seed the unpack directory with a copy of the running version tree
    /// plus everything its bootstrap manifest names. Manifest entries can
    /// be single files inside a directory, so intermediate directories
    /// are created as needed.
    fn copy_current_version(&self, unpack_dir: &VfsPath) -> Result<(), PrepareError> {
        let current = self.app.version_dirname(self.app.version());
        let source = self.app.appdir().join(&current)?;
        source.copy_dir(&unpack_dir.join(&current)?)?;

        let manifest = source.join(BOOTSTRAP_MANIFEST)?.read_to_string()?;
        for item in manifest.lines() {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let bootstrap_path = self.app.appdir().join(item)?;
            let dest_path = unpack_dir.join(item)?;
            if bootstrap_path.is_dir()? {
                bootstrap_path.copy_dir(&dest_path)?;
            } else {
                if let Some((parent, _)) = item.rsplit_once('/') {
                    unpack_dir.join(parent)?.create_dir_all()?;
                }
                bootstrap_path.copy_file(&dest_path)?;
            }
        }

        Ok(())
    }

    /// Normalize the unpack layout and move the result into `ready/`.
    /// Anything that isn't the version tree itself travels along inside
    /// `esky-bootstrap/`, where the swap step expects it.
    fn stage(&self, version: &VersionNumber, unpack_dir: &VfsPath) -> Result<(), PrepareError> {
        let dirname = self.app.version_dirname(version);
        let version_dir = unpack_dir.join(&dirname)?;
        let bootstrap_dir = version_dir.join(BOOTSTRAP_DIR)?;
        if !bootstrap_dir.is_dir()? {
            bootstrap_dir.create_dir_all()?;
        }

        let entries: Vec<VfsPath> = unpack_dir.read_dir()?.collect();
        for entry in entries {
            if entry.filename() == dirname {
                continue;
            }
            let dest = bootstrap_dir.join(&entry.filename())?;
            if entry.is_dir()? {
                entry.move_dir(&dest)?;
            } else {
                entry.move_file(&dest)?;
            }
        }

        let ready = self.app.ready_path(version)?;
        if ready.is_dir()? {
            ready.remove_dir_all()?;
        }
        version_dir.move_dir(&ready)?;
        info!(target: LOGNAME, "staged '{}' for swapping", dirname);

        Ok(())
    }
}

/// A scratch directory of its own for each prepare attempt, so a failed
/// run never contaminates the next one.
fn fresh_subdir(root: &VfsPath) -> Result<VfsPath, vfs::VfsError> {
    let mut attempt = 0u32;
    loop {
        let candidate = root.join(&format!("unpack-{}", attempt))?;
        if !candidate.is_dir()? && !candidate.is_file()? {
            candidate.create_dir()?;
            return Ok(candidate);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use vfs::MemoryFS;

    use super::*;
    use crate::summary::parse_summary;

    /// Fake codecs driven by the artifact bytes themselves. Archives are
    /// `write:path:contents` lines; patches additionally understand
    /// `move:old:new` (the version-directory rename a real patch
    /// performs) and `fail:reason`.
    struct FakeCodecs;

    fn run_script(target: &VfsPath, script: &str) -> Result<(), CodecError> {
        for line in script.lines() {
            let mut fields = line.splitn(3, ':');
            let command = fields.next().unwrap_or("");
            match command {
                "" => continue,
                "write" => {
                    let path = fields.next().ok_or_else(|| CodecError::new("bad script"))?;
                    let contents = fields.next().unwrap_or("");
                    if let Some((parent, _)) = path.rsplit_once('/') {
                        target
                            .join(parent)
                            .and_then(|dir| dir.create_dir_all())
                            .map_err(|err| CodecError::new(err.to_string()))?;
                    }
                    target
                        .join(path)
                        .and_then(|p| p.create_file())
                        .map_err(|err| CodecError::new(err.to_string()))?
                        .write_all(contents.as_bytes())
                        .map_err(|err| CodecError::new(err.to_string()))?;
                }
                "move" => {
                    let old = fields.next().ok_or_else(|| CodecError::new("bad script"))?;
                    let new = fields.next().ok_or_else(|| CodecError::new("bad script"))?;
                    let from = target.join(old).map_err(|e| CodecError::new(e.to_string()))?;
                    let to = target.join(new).map_err(|e| CodecError::new(e.to_string()))?;
                    from.move_dir(&to).map_err(|e| CodecError::new(e.to_string()))?;
                }
                "fail" => {
                    return Err(CodecError::new(
                        fields.next().unwrap_or("scripted failure").to_string(),
                    ))
                }
                other => return Err(CodecError::new(format!("unknown command '{other}'"))),
            }
        }
        Ok(())
    }

    impl Codecs for FakeCodecs {
        fn extract_zipfile(&self, archive: &VfsPath, dest: &VfsPath) -> Result<(), CodecError> {
            let script = archive
                .read_to_string()
                .map_err(|err| CodecError::new(err.to_string()))?;
            run_script(dest, &script)
        }

        fn apply_patch(&self, target: &VfsPath, patch: &mut dyn Read) -> Result<(), CodecError> {
            let mut script = String::new();
            patch
                .read_to_string(&mut script)
                .map_err(|err| CodecError::new(err.to_string()))?;
            run_script(target, &script)
        }
    }

    fn app(version: &str) -> (Application, VfsPath) {
        let root: VfsPath = MemoryFS::new().into();
        let app =
            Application::new("example", version.parse().unwrap(), "win32", root.clone()).unwrap();
        (app, root)
    }

    fn write_file(root: &VfsPath, path: &str, contents: &str) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            root.join(parent).unwrap().create_dir_all().unwrap();
        }
        root.join(path)
            .unwrap()
            .create_file()
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
    }

    fn write_download(app: &Application, name: &str, contents: &str) {
        let path = app.workdir("downloads").unwrap().join(name).unwrap();
        let mut file = path.create_file().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    fn read_file(root: &VfsPath, path: &str) -> String {
        root.join(path).unwrap().read_to_string().unwrap()
    }

    #[test]
    fn an_empty_path_is_already_prepared() {
        let (app, root) = app("0.1");
        Preparer::new(&app, &FakeCodecs)
            .prepare(&"0.1".parse().unwrap(), &[])
            .unwrap();
        // Nothing was staged or even created.
        assert!(!root.join("updates").unwrap().is_dir().unwrap());
    }

    #[test]
    fn a_full_install_is_extracted_and_staged() {
        let (app, root) = app("");
        let files = parse_summary("example win32 1.0 * http://host/full-1.0.zip\n");
        write_download(
            &app,
            "full-1.0.zip",
            "write:example-1.0.win32/program.bin:v1\nwrite:launcher.exe:boot\n",
        );

        Preparer::new(&app, &FakeCodecs)
            .prepare(&"1.0".parse().unwrap(), &files)
            .unwrap();

        let ready = "updates/ready/example-1.0.win32";
        assert_eq!(read_file(&root, &format!("{ready}/program.bin")), "v1");
        // Loose archive content travels in esky-bootstrap.
        assert_eq!(
            read_file(&root, &format!("{ready}/esky-bootstrap/launcher.exe")),
            "boot"
        );
    }

    #[test]
    fn patches_apply_on_top_of_the_running_version() {
        let (app, root) = app("0.1");
        write_file(&root, "example-0.1.win32/program.bin", "v0.1");
        write_file(
            &root,
            "example-0.1.win32/esky-bootstrap.txt",
            "launcher.exe\ndata/settings.ini\n",
        );
        write_file(&root, "launcher.exe", "boot");
        write_file(&root, "data/settings.ini", "keep me");
        write_file(&root, "data/cache.bin", "not listed");

        let files = parse_summary(
            "example win32 0.2 0.1 http://host/patch-0.1-to-0.2.esky\n",
        );
        write_download(
            &app,
            "patch-0.1-to-0.2.esky",
            "move:example-0.1.win32:example-0.2.win32\nwrite:example-0.2.win32/program.bin:v0.2\n",
        );

        Preparer::new(&app, &FakeCodecs)
            .prepare(&"0.2".parse().unwrap(), &files)
            .unwrap();

        let ready = "updates/ready/example-0.2.win32";
        assert_eq!(read_file(&root, &format!("{ready}/program.bin")), "v0.2");
        assert_eq!(
            read_file(&root, &format!("{ready}/esky-bootstrap/launcher.exe")),
            "boot"
        );
        assert_eq!(
            read_file(
                &root,
                &format!("{ready}/esky-bootstrap/data/settings.ini")
            ),
            "keep me"
        );
        // Only manifest entries travel.
        assert!(!root
            .join(&format!("{ready}/esky-bootstrap/data/cache.bin"))
            .unwrap()
            .is_file()
            .unwrap());
    }

    #[test]
    fn a_chain_applies_in_order() {
        let (app, root) = app("");
        let files = parse_summary(
            "example win32 0.1 * http://host/full-0.1.zip\n\
             example win32 0.2 0.1 http://host/patch-1.esky\n\
             example win32 0.3 0.2 http://host/patch-2.esky\n",
        );
        write_download(&app, "full-0.1.zip", "write:example-0.1.win32/program.bin:v1\n");
        write_download(
            &app,
            "patch-1.esky",
            "move:example-0.1.win32:example-0.2.win32\nwrite:example-0.2.win32/program.bin:v2\n",
        );
        write_download(
            &app,
            "patch-2.esky",
            "move:example-0.2.win32:example-0.3.win32\nwrite:example-0.3.win32/program.bin:v3\n",
        );

        Preparer::new(&app, &FakeCodecs)
            .prepare(&"0.3".parse().unwrap(), &files)
            .unwrap();
        assert_eq!(
            read_file(&root, "updates/ready/example-0.3.win32/program.bin"),
            "v3"
        );
    }

    #[test]
    fn patch_failures_name_the_offending_file() {
        let (app, _root) = app("");
        let files = parse_summary(
            "example win32 0.1 * http://host/full-0.1.zip\n\
             example win32 0.2 0.1 http://host/patch-bad.esky\n",
        );
        write_download(&app, "full-0.1.zip", "write:example-0.1.win32/program.bin:v1\n");
        write_download(&app, "patch-bad.esky", "fail:target mismatch\n");

        let err = Preparer::new(&app, &FakeCodecs)
            .prepare(&"0.2".parse().unwrap(), &files)
            .unwrap_err();
        match err {
            PrepareError::PatchError { file, .. } => {
                assert_eq!(file.filename(), "patch-bad.esky");
            }
            other => panic!("expected a patch error, got {other:?}"),
        }
    }

    #[test]
    fn staging_replaces_a_previous_attempt() {
        let (app, root) = app("");
        write_file(
            &root,
            "updates/ready/example-1.0.win32/program.bin",
            "stale",
        );

        let files = parse_summary("example win32 1.0 * http://host/full-1.0.zip\n");
        write_download(&app, "full-1.0.zip", "write:example-1.0.win32/program.bin:fresh\n");

        Preparer::new(&app, &FakeCodecs)
            .prepare(&"1.0".parse().unwrap(), &files)
            .unwrap();
        assert_eq!(
            read_file(&root, "updates/ready/example-1.0.win32/program.bin"),
            "fresh"
        );
    }

    #[test]
    fn unpack_attempts_get_fresh_directories() {
        let root: VfsPath = MemoryFS::new().into();
        let unpack = root.join("unpack").unwrap();
        unpack.create_dir().unwrap();

        let first = fresh_subdir(&unpack).unwrap();
        let second = fresh_subdir(&unpack).unwrap();
        assert_eq!(first.filename(), "unpack-0");
        assert_eq!(second.filename(), "unpack-1");
    }
}
