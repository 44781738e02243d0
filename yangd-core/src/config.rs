// Copyright 2024 yangd contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    env, fs,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

/// Load config from an explicit path, falling back to `$YANGD_CONFIG_FILE`
/// if it exists, then layering the `YANGD_*` environment overrides on top.
#[instrument(skip_all)]
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(config_path) = config_file {
        info!("parsing explicitly passed in config ({})", config_path);
        let config_str = fs::read_to_string(config_path).context("reading config toml")?;
        config = toml::from_str(&config_str).context("parsing config file")?;
    } else if let Ok(config_path) = env::var("YANGD_CONFIG_FILE") {
        if PathBuf::from(&config_path).exists() {
            let config_str = fs::read_to_string(&config_path).context("reading config toml")?;
            config = toml::from_str(&config_str).context("parsing config file")?;
        }
    }

    if let Ok(dir) = env::var("YANGD_SCHEMA_DIR") {
        config.schema_dir = Some(dir.into());
    }
    if let Ok(dir) = env::var("YANGD_DATA_DIR") {
        config.data_dir = Some(dir.into());
    }
    if let Ok(path) = env::var("YANGD_SOCKET_PATH") {
        config.socket_path = Some(path.into());
    }
    if let Ok(path) = env::var("YANGD_PID_PATH") {
        config.pid_path = Some(path.into());
    }

    Ok(config)
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// Directory holding schema description files, one per module.
    /// Defaults to `/etc/yangd/schema`.
    pub schema_dir: Option<PathBuf>,

    /// Directory holding per-module running/startup data files and
    /// persistence-manager side-data. Defaults to `/var/lib/yangd/data`.
    pub data_dir: Option<PathBuf>,

    /// Control socket path. Defaults to `/var/run/yangd/yangd.sock`.
    pub socket_path: Option<PathBuf>,

    /// PID file path. Defaults to `/var/run/yangd/yangd.pid`.
    pub pid_path: Option<PathBuf>,

    /// Ceiling on a single framed message, overriding
    /// [`yangd_protocol::MAX_MSG_SIZE`].
    pub max_msg_size: Option<u32>,

    /// Number of past errors retained per session for `get-last-errors`,
    /// overriding [`crate::consts::MAX_SESSION_ERRORS`].
    pub max_session_errors: Option<usize>,
}

impl Config {
    pub fn max_msg_size(&self) -> u32 {
        self.max_msg_size.unwrap_or(yangd_protocol::MAX_MSG_SIZE)
    }

    pub fn max_session_errors(&self) -> usize {
        self.max_session_errors.unwrap_or(crate::consts::MAX_SESSION_ERRORS)
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.schema_dir.clone().unwrap_or_else(|| PathBuf::from("/etc/yangd/schema"))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("/var/lib/yangd/data"))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(|| PathBuf::from("/var/run/yangd/yangd.sock"))
    }

    pub fn pid_path(&self) -> PathBuf {
        self.pid_path.clone().unwrap_or_else(|| PathBuf::from("/var/run/yangd/yangd.pid"))
    }
}

/// Shared handle to the current config, swappable at runtime (e.g. by a
/// future `SIGHUP` handler) without invalidating references already
/// handed out to callers mid-request.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl Manager {
    pub fn new(config: Config) -> Self {
        Manager { inner: Arc::new(RwLock::new(Arc::new(config))) }
    }

    pub fn get(&self) -> Arc<Config> {
        Arc::clone(&self.inner.read().unwrap())
    }

    pub fn replace(&self, config: Config) {
        *self.inner.write().unwrap() = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_toml() {
        let cases = vec![
            r#"
            schema_dir = "/tmp/schema"
            data_dir = "/tmp/data"
            "#,
            r#"
            max_msg_size = 1048576
            "#,
            "",
        ];
        for case in cases {
            let _: Config = toml::from_str(case).expect("config should parse");
        }
    }

    #[test]
    fn manager_get_reflects_replace() {
        let mgr = Manager::new(Config { max_msg_size: Some(10), ..Default::default() });
        assert_eq!(mgr.get().max_msg_size(), 10);
        mgr.replace(Config { max_msg_size: Some(20), ..Default::default() });
        assert_eq!(mgr.get().max_msg_size(), 20);
    }
}
