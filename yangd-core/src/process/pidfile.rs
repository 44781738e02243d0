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

//! RAII guard around the daemon's pid file. Written on construction,
//! removed on drop, so a clean shutdown (including an early `?` return
//! out of `daemon::run`) never leaves a stale pid file a future launch
//! would have to notice and clean up by hand.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use nix::unistd::Pid;
use tracing::info;

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
        }
        if let Ok(existing) = fs::read_to_string(path) {
            if let Ok(pid) = existing.trim().parse::<i32>() {
                if process_alive(Pid::from_raw(pid)) {
                    anyhow::bail!("yangd already running with pid {pid} ({path:?})");
                }
                info!(stale_pid = pid, "removing stale pid file");
            }
        }
        fs::write(path, format!("{}\n", Pid::this())).with_context(|| format!("writing {path:?}"))?;
        Ok(PidFile { path: path.to_path_buf() })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn process_alive(pid: Pid) -> bool {
    nix::sys::signal::kill(pid, None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yangd.pid");
        {
            let _pid_file = PidFile::create(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn stale_pid_file_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yangd.pid");
        fs::write(&path, "999999999\n").unwrap();
        let _pid_file = PidFile::create(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), Pid::this().to_string());
    }
}
