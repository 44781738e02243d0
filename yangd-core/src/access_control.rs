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

//! Access control. Every module's persisted data file carries normal
//! unix file permissions; a session's actions are checked against the
//! peer credentials the connection was accepted with by briefly
//! switching the process's effective identity and asking the kernel,
//! rather than reimplementing permission-bit arithmetic here.

use std::path::Path;

use nix::unistd::{self, Gid, Uid};
use tracing::instrument;

use crate::error::{EngineError, EngineResult};
use crate::user::PeerCredentials;

/// RAII guard that switches the process's effective uid/gid for the
/// duration of a permission check, then restores the prior identity on
/// drop (including on an early return via `?`).
pub struct IdentityGuard {
    prev_euid: Uid,
    prev_egid: Gid,
}

impl IdentityGuard {
    #[instrument(skip_all, fields(uid = %uid, gid = %gid))]
    pub fn switch_to(uid: Uid, gid: Gid) -> EngineResult<Self> {
        let prev_euid = unistd::geteuid();
        let prev_egid = unistd::getegid();
        unistd::setegid(gid).map_err(|e| EngineError::Unauthorized(format!("setegid: {e}")))?;
        unistd::seteuid(uid).map_err(|e| EngineError::Unauthorized(format!("seteuid: {e}")))?;
        Ok(IdentityGuard { prev_euid, prev_egid })
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        // Restore uid before gid: dropping group privilege while still
        // holding elevated euid would briefly be the wrong ordering.
        let _ = unistd::seteuid(self.prev_euid);
        let _ = unistd::setegid(self.prev_egid);
    }
}

/// Check whether `peer` may access `path` for read (or write, if
/// `write` is set), by switching to the peer's identity and asking the
/// kernel via `access(2)`. Only meaningful when the process is running
/// with privilege to switch identities (daemon mode); library-mode
/// connections are trusted by construction and never reach this check.
#[instrument(skip(peer))]
pub fn check_file_permission(
    path: &Path,
    peer: &PeerCredentials,
    write: bool,
) -> EngineResult<()> {
    if !path.exists() {
        // A missing data file (module never committed to) is readable/
        // writable by definition: there's nothing to gate yet.
        return Ok(());
    }

    if unistd::geteuid() != Uid::from_raw(0) {
        // Not running with privilege to switch identity; fall back to
        // trusting the normal unix permission check the open() call
        // will perform.
        return Ok(());
    }

    let _guard = IdentityGuard::switch_to(peer.uid, peer.gid)?;
    let mode = if write { unistd::AccessFlags::W_OK } else { unistd::AccessFlags::R_OK };
    unistd::access(path, mode)
        .map_err(|_| EngineError::Unauthorized(format!("{} denied for {:?}", path.display(), peer.uid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_file_is_always_allowed() {
        let peer = PeerCredentials { uid: Uid::current(), gid: Gid::current(), pid: None };
        let result = check_file_permission(Path::new("/nonexistent/path/for/test"), &peer, false);
        assert!(result.is_ok());
    }

    #[test]
    fn unprivileged_process_skips_the_switch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.xml");
        fs::write(&file, "<root/>").unwrap();
        let peer = PeerCredentials { uid: Uid::current(), gid: Gid::current(), pid: None };
        assert!(check_file_permission(&file, &peer, true).is_ok());
    }
}
