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

//! The connection manager: a single-threaded cooperative event loop
//! over every accepted socket, driven by `nix::poll`. Every connection
//! is a plain state machine (read what's ready, extract frames,
//! dispatch, queue a response, write what's ready); nothing here ever
//! blocks except the call into `poll(2)` itself.

use std::{
    collections::HashMap,
    io::{ErrorKind, Read, Write},
    os::fd::{AsRawFd, RawFd},
    os::unix::net::{UnixListener, UnixStream},
    sync::Arc,
};

use crossbeam_channel::Receiver;
use nix::poll::{PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, instrument, warn};
use yangd_protocol::{Message, Request, Response};

use crate::{
    config,
    consts::{BUF_ALLOC_CHUNK, IN_BUF_MIN_SPACE, MAX_OUTPUT_BUF},
    engine::Engine,
    framing,
    process::signals::SignalEvent,
    session::ConnectionKind,
    user,
};

struct Conn {
    stream: UnixStream,
    connection_id: u32,
    in_buf: Vec<u8>,
    out_buf: Vec<u8>,
    out_pos: usize,
    closing: bool,
}

pub struct Reactor {
    listener: UnixListener,
    engine: Arc<Engine>,
    config: config::Manager,
    conns: HashMap<RawFd, Conn>,
    stop_rx: Option<Receiver<SignalEvent>>,
}

impl Reactor {
    pub fn new(listener: UnixListener, engine: Arc<Engine>, config: config::Manager) -> anyhow::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Reactor { listener, engine, config, conns: HashMap::new(), stop_rx: None })
    }

    pub fn with_stop_channel(mut self, stop_rx: Receiver<SignalEvent>) -> Self {
        self.stop_rx = Some(stop_rx);
        self
    }

    /// Run until told to stop. Returns once every listener and
    /// connection fd has been cleaned up.
    #[instrument(skip_all)]
    pub fn run(&mut self) -> anyhow::Result<()> {
        info!("reactor starting");
        loop {
            if let Some(rx) = &self.stop_rx {
                if let Ok(SignalEvent::Stop) = rx.try_recv() {
                    info!("stop requested, draining reactor");
                    break;
                }
            }

            let mut poll_fds = Vec::with_capacity(self.conns.len() + 1);
            poll_fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
            let fds: Vec<RawFd> = self.conns.keys().copied().collect();
            for fd in &fds {
                let conn = &self.conns[fd];
                let mut flags = PollFlags::POLLIN;
                if conn.out_pos < conn.out_buf.len() {
                    flags |= PollFlags::POLLOUT;
                }
                // Safety: the fd stays open and owned by `conn` for the
                // lifetime of this poll call.
                poll_fds.push(PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(*fd) }, flags));
            }

            let timeout = PollTimeout::from(100u8);
            let ready = nix::poll::poll(&mut poll_fds, timeout)?;
            if ready == 0 {
                continue;
            }

            if poll_fds[0].revents().is_some_and(|e| e.contains(PollFlags::POLLIN)) {
                self.accept_all();
            }

            for (i, fd) in fds.iter().enumerate() {
                let Some(revents) = poll_fds[i + 1].revents() else { continue };
                if revents.contains(PollFlags::POLLOUT) {
                    self.flush_writes(*fd);
                }
                if revents.contains(PollFlags::POLLIN) {
                    self.read_and_dispatch(*fd);
                }
                if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                    self.conns.entry(*fd).and_modify(|c| c.closing = true);
                }
            }

            self.reap_closed();
        }

        for fd in self.conns.keys().copied().collect::<Vec<_>>() {
            self.close_conn(fd);
        }
        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if let Err(e) = self.accept_one(stream) {
                        warn!("rejecting connection: {e:?}");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e:?}");
                    break;
                }
            }
        }
    }

    fn accept_one(&mut self, stream: UnixStream) -> anyhow::Result<()> {
        stream.set_nonblocking(true)?;
        let peer = user::peer_credentials(&stream).ok();
        let connection_id = self
            .engine
            .connection_start(ConnectionKind::Daemon, peer)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let fd = stream.as_raw_fd();
        self.conns.insert(
            fd,
            Conn {
                stream,
                connection_id,
                in_buf: Vec::with_capacity(BUF_ALLOC_CHUNK),
                out_buf: Vec::new(),
                out_pos: 0,
                closing: false,
            },
        );
        debug!(connection_id, "accepted connection");
        Ok(())
    }

    fn read_and_dispatch(&mut self, fd: RawFd) {
        let max_msg_size = self.config.get().max_msg_size();
        let connection_id = self.conns[&fd].connection_id;

        loop {
            let conn = self.conns.get_mut(&fd).unwrap();
            if conn.in_buf.len() - used_len(conn) < IN_BUF_MIN_SPACE {
                conn.in_buf.resize(conn.in_buf.len() + BUF_ALLOC_CHUNK, 0);
            }
            let write_at = used_len(conn);
            let capacity = conn.in_buf.len();
            match conn.stream.read(&mut conn.in_buf[write_at..capacity]) {
                Ok(0) => {
                    conn.closing = true;
                    break;
                }
                Ok(n) => {
                    conn.in_buf.truncate(write_at + n);
                    if n < capacity - write_at {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(connection_id, "read error: {e:?}");
                    conn.closing = true;
                    break;
                }
            }
        }

        self.drain_frames(fd, connection_id, max_msg_size);
    }

    fn drain_frames(&mut self, fd: RawFd, connection_id: u32, max_msg_size: u32) {
        loop {
            let conn = self.conns.get_mut(&fd).unwrap();
            match framing::try_extract_frame(&conn.in_buf, max_msg_size) {
                Ok(Some((message, consumed))) => {
                    conn.in_buf.drain(..consumed);
                    self.handle_message(fd, connection_id, message, max_msg_size);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(connection_id, "malformed frame: {e}");
                    self.conns.get_mut(&fd).unwrap().closing = true;
                    break;
                }
            }
        }
    }

    fn handle_message(&mut self, fd: RawFd, connection_id: u32, message: Message, max_msg_size: u32) {
        let (session_id, operation) = match message {
            Message::Request(Request { session_id, operation }) => (session_id, operation),
            Message::Response(response) => {
                self.handle_unexpected_response(fd, connection_id, response, max_msg_size);
                return;
            }
            Message::Notification(_) => {
                warn!(connection_id, "client sent a notification frame, closing");
                self.conns.get_mut(&fd).unwrap().closing = true;
                return;
            }
        };
        if !operation.well_formed() {
            self.queue_response(
                fd,
                Response {
                    session_id,
                    operation: operation.kind(),
                    result_code: yangd_protocol::ErrorCode::MalformedMessage,
                    body: Default::default(),
                    error_message: Some("malformed operation".into()),
                    error_paths: Vec::new(),
                },
                max_msg_size,
            );
            return;
        }

        let kind = operation.kind();
        let (response_session_id, response, notifications) =
            match self.engine.dispatch(connection_id, session_id, operation) {
                Ok((sid, body, notifications)) => (
                    sid,
                    Response {
                        session_id: sid,
                        operation: kind,
                        result_code: yangd_protocol::ErrorCode::Ok,
                        body,
                        error_message: None,
                        error_paths: Vec::new(),
                    },
                    notifications,
                ),
                Err(e) => {
                    self.engine.record_error(session_id, kind, &e.to_string());
                    (
                        session_id,
                        Response {
                            session_id,
                            operation: kind,
                            result_code: e.code(),
                            body: Default::default(),
                            error_message: Some(e.to_string()),
                            error_paths: e.error_paths(),
                        },
                        Vec::new(),
                    )
                }
            };
        let _ = response_session_id;
        self.queue_response(fd, response, max_msg_size);
        deliver_notifications(notifications, max_msg_size);
    }

    /// A client is only ever supposed to send `Request` frames; nothing
    /// in this protocol has the client answering a server-initiated
    /// exchange. Rather than tear down the connection over a single
    /// malformed frame, report it back with the dedicated error code so
    /// a misbehaving client can see what it did wrong and keep going.
    fn handle_unexpected_response(
        &mut self,
        fd: RawFd,
        connection_id: u32,
        response: Response,
        max_msg_size: u32,
    ) {
        warn!(connection_id, session_id = response.session_id, operation = ?response.operation, "client sent a response frame");
        self.queue_response(
            fd,
            Response {
                session_id: response.session_id,
                operation: response.operation,
                result_code: yangd_protocol::ErrorCode::UnexpectedResponse,
                body: Default::default(),
                error_message: Some("clients may not send response frames".into()),
                error_paths: Vec::new(),
            },
            max_msg_size,
        );
    }

    fn queue_response(&mut self, fd: RawFd, response: Response, max_msg_size: u32) {
        let msg = Message::Response(response);
        match framing::encode(&msg, max_msg_size) {
            Ok(bytes) => {
                let conn = self.conns.get_mut(&fd).unwrap();
                if conn.out_buf.len() + bytes.len() > MAX_OUTPUT_BUF {
                    warn!(fd, "output buffer over limit, closing connection");
                    conn.closing = true;
                    return;
                }
                conn.out_buf.extend_from_slice(&bytes);
                self.flush_writes(fd);
            }
            Err(e) => warn!("failed to encode response: {e}"),
        }
    }

    fn flush_writes(&mut self, fd: RawFd) {
        let conn = self.conns.get_mut(&fd).unwrap();
        while conn.out_pos < conn.out_buf.len() {
            match conn.stream.write(&conn.out_buf[conn.out_pos..]) {
                Ok(0) => break,
                Ok(n) => conn.out_pos += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => {
                    conn.closing = true;
                    break;
                }
            }
        }
        if conn.out_pos == conn.out_buf.len() {
            conn.out_buf.clear();
            conn.out_pos = 0;
        }
    }

    fn reap_closed(&mut self) {
        let to_close: Vec<RawFd> = self
            .conns
            .iter()
            .filter(|(_, c)| c.closing && c.out_pos >= c.out_buf.len())
            .map(|(fd, _)| *fd)
            .collect();
        for fd in to_close {
            self.close_conn(fd);
        }
    }

    fn close_conn(&mut self, fd: RawFd) {
        if let Some(conn) = self.conns.remove(&fd) {
            self.engine.connection_close(conn.connection_id);
            debug!(connection_id = conn.connection_id, "closed connection");
        }
    }
}

fn used_len(conn: &Conn) -> usize {
    conn.in_buf.len()
}

/// Deliver each notification by dialing its destination address fresh
/// and writing one frame. Subscribers are expected to run their own
/// short-lived listener for this.
fn deliver_notifications(notifications: Vec<yangd_protocol::Notification>, max_msg_size: u32) {
    for notification in notifications {
        let address = notification.destination_address.clone();
        match UnixStream::connect(&address) {
            Ok(mut stream) => {
                let msg = Message::Notification(notification);
                if let Err(e) = framing::encode_to(&mut stream, &msg, max_msg_size) {
                    warn!(address, "failed to deliver notification: {e}");
                }
            }
            Err(e) => warn!(address, "could not reach notification subscriber: {e}"),
        }
    }
}
