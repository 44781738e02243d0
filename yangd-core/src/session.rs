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

//! The session manager. Tracks every open connection (one per accepted
//! socket, or the single in-process handle a library-mode caller gets)
//! and every session multiplexed on top of one.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::instrument;
use yangd_protocol::Datastore;

use crate::{
    consts::MAX_SESSION_ERRORS,
    error::{EngineError, EngineResult},
    sequencer::Sequencer,
    user::PeerCredentials,
};

/// How a connection reached the engine. Only `Daemon` connections carry
/// real peer credentials pulled off the accepted socket; `Library`
/// connections are an in-process caller using `run_on_thread` and are
/// trusted outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Daemon,
    Library,
}

pub struct Connection {
    pub id: u32,
    pub kind: ConnectionKind,
    pub peer: Option<PeerCredentials>,
    pub session_ids: HashSet<u32>,
}

pub struct Session {
    pub id: u32,
    pub connection_id: u32,
    pub datastore: Datastore,
    pub user_name: Option<String>,
    pub sequencer: Sequencer,
    pub locked_modules: HashSet<String>,
    pub datastore_locked: bool,
    pub last_errors: VecDeque<(String, String)>,
}

impl Session {
    pub fn record_error(&mut self, path: String, message: String) {
        if self.last_errors.len() == MAX_SESSION_ERRORS {
            self.last_errors.pop_front();
        }
        self.last_errors.push_back((path, message));
    }
}

pub struct Manager {
    next_connection_id: u32,
    next_session_id: u32,
    connections: HashMap<u32, Connection>,
    sessions: HashMap<u32, Session>,
}

impl Manager {
    pub fn new() -> Self {
        Manager {
            next_connection_id: 1,
            next_session_id: 1,
            connections: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    #[instrument(skip(self, peer))]
    pub fn connection_start(
        &mut self,
        kind: ConnectionKind,
        peer: Option<PeerCredentials>,
    ) -> EngineResult<u32> {
        if kind == ConnectionKind::Daemon && peer.is_none() {
            return Err(EngineError::Unauthorized(
                "daemon-mode connections require peer credentials".into(),
            ));
        }
        let id = self.next_connection_id;
        self.next_connection_id = id
            .checked_add(1)
            .ok_or_else(|| EngineError::Other(anyhow::anyhow!("connection id space exhausted")))?;
        self.connections.insert(id, Connection { id, kind, peer, session_ids: HashSet::new() });
        Ok(id)
    }

    #[instrument(skip(self))]
    pub fn connection_close(&mut self, connection_id: u32) {
        if let Some(conn) = self.connections.remove(&connection_id) {
            for session_id in conn.session_ids {
                self.sessions.remove(&session_id);
            }
        }
    }

    #[instrument(skip(self))]
    pub fn session_create(
        &mut self,
        connection_id: u32,
        datastore: Datastore,
        user_name: Option<String>,
    ) -> EngineResult<u32> {
        if !self.connections.contains_key(&connection_id) {
            return Err(EngineError::NotFound(format!("no such connection {connection_id}")));
        }
        let id = self.next_session_id;
        self.next_session_id = id
            .checked_add(1)
            .ok_or_else(|| EngineError::Other(anyhow::anyhow!("session id space exhausted")))?;

        self.sessions.insert(
            id,
            Session {
                id,
                connection_id,
                datastore,
                user_name,
                sequencer: Sequencer::new(),
                locked_modules: HashSet::new(),
                datastore_locked: false,
                last_errors: VecDeque::new(),
            },
        );
        self.connections.get_mut(&connection_id).unwrap().session_ids.insert(id);
        Ok(id)
    }

    pub fn session_stop(&mut self, session_id: u32) -> EngineResult<()> {
        let session = self
            .sessions
            .remove(&session_id)
            .ok_or_else(|| EngineError::NotFound(format!("no such session {session_id}")))?;
        if let Some(conn) = self.connections.get_mut(&session.connection_id) {
            conn.session_ids.remove(&session_id);
        }
        Ok(())
    }

    pub fn session(&self, session_id: u32) -> EngineResult<&Session> {
        self.sessions.get(&session_id).ok_or_else(|| EngineError::NotFound(format!("no such session {session_id}")))
    }

    pub fn session_mut(&mut self, session_id: u32) -> EngineResult<&mut Session> {
        self.sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::NotFound(format!("no such session {session_id}")))
    }

    pub fn connection(&self, connection_id: u32) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{Gid, Uid};

    fn peer() -> PeerCredentials {
        PeerCredentials { uid: Uid::current(), gid: Gid::current(), pid: None }
    }

    #[test]
    fn library_connections_do_not_need_peer_credentials() {
        let mut mgr = Manager::new();
        let id = mgr.connection_start(ConnectionKind::Library, None).unwrap();
        assert!(mgr.connection(id).is_some());
    }

    #[test]
    fn daemon_connections_require_peer_credentials() {
        let mut mgr = Manager::new();
        assert!(mgr.connection_start(ConnectionKind::Daemon, None).is_err());
        assert!(mgr.connection_start(ConnectionKind::Daemon, Some(peer())).is_ok());
    }

    #[test]
    fn closing_a_connection_drops_its_sessions() {
        let mut mgr = Manager::new();
        let conn = mgr.connection_start(ConnectionKind::Library, None).unwrap();
        let session = mgr.session_create(conn, Datastore::Running, None).unwrap();
        mgr.connection_close(conn);
        assert!(mgr.session(session).is_err());
    }

    #[test]
    fn session_create_fails_for_unknown_connection() {
        let mut mgr = Manager::new();
        assert!(mgr.session_create(999, Datastore::Running, None).is_err());
    }
}
