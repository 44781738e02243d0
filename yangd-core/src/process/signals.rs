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

//! Signal handling. `SIGTERM`/`SIGINT` should make the reactor stop its
//! poll loop and exit cleanly rather than calling `process::exit`
//! directly from a signal-adjacent thread, since the reactor owns the
//! module data that's mid-commit and needs to get a chance to finish
//! or cleanly bail. `SIGPIPE` is ignored outright: a client that
//! vanishes mid-write must surface as a normal connection-closed error
//! from the next `write`, never as a process-killing signal.

use std::thread;

use anyhow::Context;
use crossbeam_channel::Sender;
use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGPIPE, SIGTERM},
    iterator::Signals,
};
use tracing::info;

/// Sent to the reactor's control channel when a termination signal
/// arrives, so the poll loop can unwind in the same place normal
/// shutdown requests do.
#[derive(Debug, Clone, Copy)]
pub enum SignalEvent {
    Stop,
    ReloadConfig,
}

pub struct Handler {
    stop_tx: Sender<SignalEvent>,
}

impl Handler {
    pub fn new(stop_tx: Sender<SignalEvent>) -> Self {
        Handler { stop_tx }
    }

    /// Spawn the background thread that blocks on `signal_hook`'s
    /// iterator and forwards the ones yangd cares about. `SIGPIPE` is
    /// registered only so the default disposition (terminate) never
    /// fires; it's intentionally not forwarded anywhere.
    pub fn spawn(self) -> anyhow::Result<()> {
        let mut signals =
            Signals::new([SIGTERM, SIGINT, SIGHUP, SIGPIPE]).context("registering signal handlers")?;
        thread::Builder::new()
            .name("yangd-signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    match signal {
                        SIGTERM | SIGINT => {
                            info!(signal, "received termination signal");
                            let _ = self.stop_tx.send(SignalEvent::Stop);
                        }
                        SIGHUP => {
                            info!("received SIGHUP, reloading config");
                            let _ = self.stop_tx.send(SignalEvent::ReloadConfig);
                        }
                        SIGPIPE => {
                            // Ignored: see module docs.
                        }
                        _ => {}
                    }
                }
            })
            .context("spawning signal handler thread")?;
        Ok(())
    }
}
