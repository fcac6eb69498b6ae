// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use url::Url;
use vfs::VfsPath;

use crate::errors::ConfigError;

const CONFIG_FILENAME: &str = "esky.yml";

/// Identity of the installed application plus the location of its summary
/// feed, read from `esky.yml` in the application directory. Each shipped
/// version carries its own copy, so the version recorded here is the
/// version that is currently running.
#[serde_as]
#[derive(Deserialize, Debug)]
pub struct Config {
    name: String,
    version: String,
    platform: String,

    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    summary: Url,
}

impl Config {
    pub fn filename() -> &'static str {
        CONFIG_FILENAME
    }

    pub fn load(fs: &VfsPath) -> Result<Config, ConfigError> {
        let file = fs
            .join(CONFIG_FILENAME)
            .and_then(|path| path.open_file())
            .map_err(|source| ConfigError::NoConfig { source })?;

        serde_yaml::from_reader(file).map_err(|source| ConfigError::InvalidConfig { source })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn summary(&self) -> &Url {
        &self.summary
    }
}
