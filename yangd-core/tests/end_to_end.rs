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

//! End-to-end tests driving a real daemon over its unix socket. The
//! daemon runs on an in-process background thread
//! (`yangd_core::run_on_thread`) rather than a spawned subprocess,
//! since there is no pty/shell child process to manage here.

use std::{
    fs, io,
    os::unix::net::UnixStream,
    path::PathBuf,
    time::Duration,
};

use yangd_protocol::{Datastore, EditOptions, Message, Operation, Request, Response, Value};

const DEMO_SCHEMA: &str = r#"
[module]
name = "demo"
namespace = "urn:demo"
prefix = "demo"

[[node]]
path = "interfaces"
kind = "container"

[[node]]
path = "interfaces.interface"
kind = "list"
keys = ["name"]
user_ordered = true

[[node]]
path = "interfaces.interface.name"
kind = "leaf"
type = "string"
mandatory = true

[[node]]
path = "interfaces.interface.mtu"
kind = "leaf"
type = "uint16"
"#;

struct Harness {
    _dir: tempfile::TempDir,
    socket: PathBuf,
}

impl Harness {
    fn spawn() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let schema_dir = dir.path().join("schema");
        let data_dir = dir.path().join("data");
        fs::create_dir_all(&schema_dir).unwrap();
        fs::write(schema_dir.join("demo.toml"), DEMO_SCHEMA).unwrap();
        let socket = dir.path().join("yangd.sock");

        yangd_core::run_on_thread(schema_dir, data_dir, socket.clone()).unwrap();
        // Give the reactor thread a moment to bind and enter its poll loop.
        std::thread::sleep(Duration::from_millis(50));

        Harness { _dir: dir, socket }
    }

    fn connect(&self) -> Client {
        let stream = connect_with_retry(&self.socket);
        Client { stream }
    }
}

fn connect_with_retry(socket: &PathBuf) -> UnixStream {
    let mut last_err = None;
    for _ in 0..50 {
        match UnixStream::connect(socket) {
            Ok(s) => return s,
            Err(e) => {
                last_err = Some(e);
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
    panic!("could not connect to {socket:?}: {last_err:?}");
}

struct Client {
    stream: UnixStream,
}

impl Client {
    fn call(&mut self, session_id: u32, operation: Operation) -> Response {
        let request = Message::Request(Request { session_id, operation });
        yangd_core::framing::encode_to(&mut self.stream, &request, yangd_protocol::MAX_MSG_SIZE)
            .unwrap();
        match yangd_core::framing::decode_from(&mut self.stream, yangd_protocol::MAX_MSG_SIZE)
            .unwrap()
        {
            Message::Response(r) => r,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    fn session_start(&mut self, datastore: Datastore) -> u32 {
        let resp = self.call(0, Operation::SessionStart { datastore, user_name: None });
        assert_eq!(resp.result_code, yangd_protocol::ErrorCode::Ok, "{:?}", resp.error_message);
        match resp.body {
            yangd_protocol::ResponseBody::SessionStarted { session_id } => session_id,
            other => panic!("expected SessionStarted, got {other:?}"),
        }
    }
}

#[test]
#[ntest::timeout(10000)]
fn set_commit_then_get_round_trips_a_value() {
    let harness = Harness::spawn();
    let mut client = harness.connect();
    let session_id = client.session_start(Datastore::Running);

    let set_resp = client.call(
        session_id,
        Operation::SetItem {
            xpath: "/demo:interfaces/interface[name='eth0']/mtu".into(),
            value: Some(Value::UInt16(1500)),
            options: EditOptions::default(),
        },
    );
    assert_eq!(set_resp.result_code, yangd_protocol::ErrorCode::Ok, "{:?}", set_resp.error_message);

    let commit_resp = client.call(session_id, Operation::Commit);
    assert_eq!(commit_resp.result_code, yangd_protocol::ErrorCode::Ok, "{:?}", commit_resp.error_message);

    let get_resp = client.call(
        session_id,
        Operation::GetItem { xpath: "/demo:interfaces/interface[name='eth0']/mtu".into() },
    );
    assert_eq!(get_resp.result_code, yangd_protocol::ErrorCode::Ok);
    match get_resp.body {
        yangd_protocol::ResponseBody::Value(v) => assert_eq!(v.value, Value::UInt16(1500)),
        other => panic!("expected Value, got {other:?}"),
    }
}

#[test]
#[ntest::timeout(10000)]
fn uncommitted_edits_are_not_visible_to_a_second_session() {
    let harness = Harness::spawn();
    let mut writer = harness.connect();
    let writer_session = writer.session_start(Datastore::Running);

    let set_resp = writer.call(
        writer_session,
        Operation::SetItem {
            xpath: "/demo:interfaces/interface[name='eth1']/mtu".into(),
            value: Some(Value::UInt16(9000)),
            options: EditOptions::default(),
        },
    );
    assert_eq!(set_resp.result_code, yangd_protocol::ErrorCode::Ok);

    let mut reader = harness.connect();
    let reader_session = reader.session_start(Datastore::Running);
    let get_resp = reader.call(
        reader_session,
        Operation::GetItem { xpath: "/demo:interfaces/interface[name='eth1']/mtu".into() },
    );
    assert_ne!(get_resp.result_code, yangd_protocol::ErrorCode::Ok);
}

#[test]
#[ntest::timeout(10000)]
fn malformed_frame_closes_the_connection_without_crashing_the_daemon() {
    use std::io::Write;

    let harness = Harness::spawn();
    let mut bad = UnixStream::connect(&harness.socket).unwrap();
    // A length prefix of zero is always rejected by the framing layer.
    bad.write_all(&[0u8, 0, 0, 0]).unwrap();
    let mut buf = [0u8; 16];
    let _ = io::Read::read(&mut bad, &mut buf);

    // The daemon itself should still be alive and serving other clients.
    let mut client = harness.connect();
    let session_id = client.session_start(Datastore::Running);
    assert!(session_id > 0 || session_id == 0);
}

#[test]
#[ntest::timeout(10000)]
fn list_schemas_reports_the_loaded_demo_module() {
    let harness = Harness::spawn();
    let mut client = harness.connect();
    let session_id = client.session_start(Datastore::Running);

    let resp = client.call(session_id, Operation::ListSchemas);
    assert_eq!(resp.result_code, yangd_protocol::ErrorCode::Ok);
    match resp.body {
        yangd_protocol::ResponseBody::Schemas(schemas) => {
            assert!(schemas.iter().any(|s| s.module_name == "demo"));
        }
        other => panic!("expected Schemas, got {other:?}"),
    }
}
