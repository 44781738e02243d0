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

use std::{env, fs, io, path::PathBuf, sync::Mutex, thread};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::fmt::format::FmtSpan;

pub mod access_control;
pub mod config;
mod consts;
mod daemon;
pub mod data_manager;
pub mod engine;
pub mod error;
pub mod framing;
pub mod notification;
mod persistence;
mod process;
pub mod reactor;
pub mod schema;
pub mod sequencer;
pub mod session;
pub mod user;

/// The command line arguments `yangd` expects. These can be parsed
/// directly with clap or constructed by hand to embed the daemon under
/// some other front end.
#[derive(Parser, Debug)]
#[clap(author, about)]
pub struct Args {
    #[clap(short, long, action, long_help = "The file to write logs to

Logs go to stderr by default when running in daemon mode.")]
    pub log_file: Option<String>,

    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Show more in logs, may be provided multiple times",
    )]
    pub verbose: u8,

    #[clap(
        short,
        long,
        action,
        long_help = "The path for the control unix socket to listen on

Defaults to $YANGD_SOCKET_PATH, then /var/run/yangd/yangd.sock."
    )]
    pub socket: Option<String>,

    #[clap(short, long, action, help = "a toml file containing configuration")]
    pub config_file: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// The subcommands `yangd` supports.
#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Print version")]
    Version,

    #[clap(about = "Starts the datastore daemon")]
    Daemon,
}

impl Args {
    /// Version indicates if the wrapping binary must display the
    /// version then exit.
    pub fn version(&self) -> bool {
        matches!(self.command, Commands::Version)
    }
}

/// Run `yangd` with the given arguments.
pub fn run(args: Args) -> anyhow::Result<()> {
    let trace_level = if args.verbose == 0 {
        tracing::Level::INFO
    } else if args.verbose == 1 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::TRACE
    };
    if let Some(log_file) = args.log_file.clone() {
        let file = fs::File::create(log_file)?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(Mutex::new(file))
            .init();
    } else if let Commands::Daemon = args.command {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .init();
    }

    let config_manager = config::Manager::new(config::read_config(&args.config_file)?);

    let socket = match args.socket {
        Some(s) => PathBuf::from(s),
        None => config_manager.get().socket_path(),
    };

    let res: anyhow::Result<()> = match args.command {
        Commands::Version => return Err(anyhow!("wrapper binary must handle version")),
        Commands::Daemon => daemon::run(config_manager, socket),
    };

    if let Err(err) = res {
        error!("{:?}", err);
        std::process::exit(1);
    }

    Ok(())
}

/// Library-mode spin-up: run the reactor against `socket` on a
/// background thread rather than forking a whole daemon process. Used
/// by embedders that want an in-process datastore instead of a
/// stand-alone `yangd` binary.
pub fn run_on_thread(
    schema_dir: PathBuf,
    data_dir: PathBuf,
    socket: PathBuf,
) -> anyhow::Result<thread::JoinHandle<anyhow::Result<()>>> {
    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
    }
    if socket.exists() {
        fs::remove_file(&socket).with_context(|| format!("removing stale socket {socket:?}"))?;
    }
    let listener = std::os::unix::net::UnixListener::bind(&socket)
        .with_context(|| format!("binding to {socket:?}"))?;

    let engine = std::sync::Arc::new(engine::Engine::new(schema_dir, data_dir)?);
    let config_manager = config::Manager::new(config::Config::default());
    let mut reactor = reactor::Reactor::new(listener, engine, config_manager)?;

    Ok(thread::Builder::new().name("yangd-reactor".into()).spawn(move || reactor.run())?)
}
