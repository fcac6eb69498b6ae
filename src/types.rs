// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use vfs::VfsPath;

use crate::config::Config;
use crate::errors::{ConfigError, EskyError};
use crate::version::VersionNumber;

const UPDATE_DIR: &str = "updates";

/// The running application being updated: its identity, the directory it
/// lives in, and the per-app working root under which `downloads/`,
/// `unpack/` and `ready/` are kept.
#[derive(Clone, Debug)]
pub struct Application {
    name: String,
    version: VersionNumber,
    platform: String,
    appdir: VfsPath,
    update_dir: VfsPath,
}

impl Application {
    pub fn new(
        name: &str,
        version: VersionNumber,
        platform: &str,
        appdir: VfsPath,
    ) -> Result<Application, vfs::VfsError> {
        let update_dir = appdir.join(UPDATE_DIR)?;

        Ok(Application {
            name: name.to_string(),
            version,
            platform: platform.to_string(),
            appdir,
            update_dir,
        })
    }

    pub fn from_config(config: &Config, appdir: VfsPath) -> Result<Application, EskyError> {
        let version = config
            .version()
            .parse()
            .map_err(|source| ConfigError::InvalidVersion { source })?;

        Ok(Application::new(
            config.name(),
            version,
            config.platform(),
            appdir,
        )?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &VersionNumber {
        &self.version
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn appdir(&self) -> &VfsPath {
        &self.appdir
    }

    /// Full path of a named working directory, created on first use.
    pub(crate) fn workdir(&self, name: &str) -> Result<VfsPath, vfs::VfsError> {
        ensure_dir(&self.update_dir)?;
        let dir = self.update_dir.join(name)?;
        ensure_dir(&dir)?;

        Ok(dir)
    }

    /// Directory name a version tree lives under: `<name>-<version>.<platform>`.
    pub(crate) fn version_dirname(&self, version: &VersionNumber) -> String {
        format!("{}-{}.{}", self.name, version, self.platform)
    }

    /// Where a fully prepared version tree is staged for the swap step.
    pub(crate) fn ready_path(&self, version: &VersionNumber) -> Result<VfsPath, vfs::VfsError> {
        self.workdir("ready")?
            .join(&self.version_dirname(version))
    }
}

fn ensure_dir(path: &VfsPath) -> Result<(), vfs::VfsError> {
    if !path.is_dir()? {
        path.create_dir()?;
    }

    Ok(())
}
