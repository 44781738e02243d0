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

//! Daemon-mode entrypoint: bind the control socket, build the
//! [`crate::engine::Engine`], and hand both to the
//! [`crate::reactor::Reactor`] until a termination signal arrives.

use std::{env, fs, os::unix::net::UnixListener, path::PathBuf, sync::Arc};

use anyhow::Context;
use tracing::info;

use crate::{config, consts, engine::Engine, process, reactor::Reactor};

#[tracing::instrument(skip_all)]
pub fn run(config_manager: config::Manager, socket: PathBuf) -> anyhow::Result<()> {
    if let Ok(daemonize) = env::var(consts::AUTODAEMONIZE_VAR) {
        if daemonize == "true" {
            env::remove_var(consts::AUTODAEMONIZE_VAR); // avoid looping

            let pid_file = socket.with_file_name("daemonized-yangd.pid");
            info!(?pid_file, "daemonizing");
            daemonize::Daemonize::new().pid_file(pid_file).start().context("daemonizing")?;
        }
    }

    info!("\n\n======================== STARTING DAEMON ============================\n\n");

    let cfg = config_manager.get();
    let _pid_file = process::pidfile::PidFile::create(&cfg.pid_path())?;

    let engine = Arc::new(Engine::new(cfg.schema_dir(), cfg.data_dir())?);

    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
    }
    if socket.exists() {
        fs::remove_file(&socket).with_context(|| format!("removing stale socket {socket:?}"))?;
    }
    let listener = UnixListener::bind(&socket).with_context(|| format!("binding to {socket:?}"))?;

    let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
    process::signals::Handler::new(stop_tx).spawn()?;

    let mut reactor = Reactor::new(listener, engine, config_manager)?.with_stop_channel(stop_rx);
    reactor.run()?;

    fs::remove_file(&socket).with_context(|| format!("cleaning up socket {socket:?}"))?;
    info!("daemon stopped");
    Ok(())
}
