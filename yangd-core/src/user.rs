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

//! Peer-credential and passwd-entry lookups. `yangd` runs as a local
//! socket server that must know who is dialing in (for `session-start`'s
//! real/effective user checks) and who the process itself is running as
//! (for loading the default schema/data directories).

use std::{
    ffi::CStr,
    io, ptr,
    os::unix::net::UnixStream,
};

use anyhow::anyhow;
use nix::unistd::{Gid, Uid};

#[derive(Debug, Clone)]
pub struct Info {
    pub home_dir: String,
    pub user: String,
}

/// Resolve the passwd entry for the given uid.
pub fn info_for_uid(uid: Uid) -> anyhow::Result<Info> {
    let mut passwd_str_buf: [libc::c_char; 1024 * 4] = [0; 1024 * 4];
    let mut passwd = libc::passwd {
        pw_name: ptr::null_mut(),
        pw_passwd: ptr::null_mut(),
        pw_uid: 0,
        pw_gid: 0,
        pw_gecos: ptr::null_mut(),
        pw_dir: ptr::null_mut(),
        pw_shell: ptr::null_mut(),
    };
    let mut passwd_res_ptr: *mut libc::passwd = ptr::null_mut();
    unsafe {
        // Safety: pretty much pure ffi, passwd and passwd_str_buf correctly
        //         have memory backing them.
        let errno = libc::getpwuid_r(
            uid.as_raw(),
            &mut passwd,
            passwd_str_buf.as_mut_ptr(),
            passwd_str_buf.len(),
            &mut passwd_res_ptr as *mut *mut libc::passwd,
        );
        if passwd_res_ptr.is_null() {
            if errno == 0 {
                return Err(anyhow!("no passwd entry for uid {}", uid));
            } else {
                return Err(anyhow!(
                    "error resolving user info: {}",
                    io::Error::from_raw_os_error(errno)
                ));
            }
        }

        // Safety: these pointers are all cstrings owned by the static
        // passwd buffer we just filled in.
        Ok(Info {
            home_dir: String::from(String::from_utf8_lossy(
                CStr::from_ptr(passwd.pw_dir).to_bytes(),
            )),
            user: String::from(String::from_utf8_lossy(CStr::from_ptr(passwd.pw_name).to_bytes())),
        })
    }
}

/// Resolve the passwd entry for the process's own real uid.
pub fn info() -> anyhow::Result<Info> {
    info_for_uid(Uid::current())
}

pub fn name_for_uid(uid: Uid) -> anyhow::Result<String> {
    Ok(info_for_uid(uid)?.user)
}

#[derive(Debug, Clone, Copy)]
pub struct PeerCredentials {
    pub uid: Uid,
    pub gid: Gid,
    pub pid: Option<nix::unistd::Pid>,
}

/// Read the credentials of the peer on the other end of a connected unix
/// stream socket. Used by the Session Manager's `connection_start` to
/// reject cross-user library-mode connections and by Access Control to
/// resolve the acting identity.
#[cfg(target_os = "linux")]
pub fn peer_credentials(sock: &UnixStream) -> anyhow::Result<PeerCredentials> {
    use nix::sys::socket;

    let creds = socket::getsockopt(sock, socket::sockopt::PeerCredentials)?;
    Ok(PeerCredentials {
        uid: Uid::from_raw(creds.uid()),
        gid: Gid::from_raw(creds.gid()),
        pid: Some(nix::unistd::Pid::from_raw(creds.pid())),
    })
}

#[cfg(target_os = "macos")]
pub fn peer_credentials(sock: &UnixStream) -> anyhow::Result<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let mut peer_uid: libc::uid_t = 0;
    let mut peer_gid: libc::gid_t = 0;
    // Safety: getpeereid is standard BSD ffi, both pointers are valid.
    unsafe {
        if libc::getpeereid(sock.as_raw_fd(), &mut peer_uid, &mut peer_gid) != 0 {
            return Err(anyhow!(
                "could not get peer credentials from socket: {}",
                io::Error::last_os_error()
            ));
        }
    }
    Ok(PeerCredentials { uid: Uid::from_raw(peer_uid), gid: Gid::from_raw(peer_gid), pid: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_for_current_uid_resolves() {
        let info = info().expect("current user should resolve");
        assert!(!info.user.is_empty());
    }
}
