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

//! Wire types shared between the yangd daemon and anything that talks to
//! its control socket. A frame is a 4 byte big endian length prefix
//! followed by a msgpack-encoded [`Message`]. See `yangd_core::framing`
//! for the actual encode/decode and length-prefix handling; this crate
//! only defines the shapes.

use std::fmt;

use serde_derive::{Deserialize, Serialize};

pub const MAX_MSG_SIZE: u32 = 16 * 1024 * 1024;

/// A frame on the wire is always exactly one of these.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    /// Ignored for `session-start`.
    #[serde(default)]
    pub session_id: u32,
    pub operation: Operation,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub session_id: u32,
    pub operation: OperationKind,
    pub result_code: ErrorCode,
    #[serde(default)]
    pub body: ResponseBody,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Present for `ValidationFailed`/`CommitFailed`: one entry per
    /// offending xpath.
    #[serde(default)]
    pub error_paths: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Notification {
    pub event_kind: EventKind,
    pub destination_address: String,
    pub destination_id: u32,
    pub body: NotificationBody,
}

/// Discriminant for a [`Request`]/[`Response`] pair, independent of the
/// payload, so a `Response` can be matched against the `Request` that
/// produced it without re-deriving it from the body.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SessionStart,
    SessionStop,
    SessionRefresh,
    ListSchemas,
    GetSchema,
    GetItem,
    GetItems,
    GetItemsIter,
    SetItem,
    DeleteItem,
    MoveItem,
    Validate,
    Commit,
    DiscardChanges,
    LockModule,
    UnlockModule,
    LockDatastore,
    UnlockDatastore,
    FeatureEnable,
    ModuleInstall,
    Subscribe,
    Unsubscribe,
    GetLastErrors,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Operation {
    SessionStart { datastore: Datastore, user_name: Option<String> },
    SessionStop,
    SessionRefresh,
    ListSchemas,
    GetSchema { module: String, revision: Option<String>, submodule: Option<String>, yin: bool },
    GetItem { xpath: String },
    GetItems { xpath: String },
    GetItemsIter { xpath: String, offset: u32, limit: u32, recursive: bool },
    SetItem { xpath: String, value: Option<Value>, options: EditOptions },
    DeleteItem { xpath: String, options: EditOptions },
    MoveItem { xpath: String, direction: MoveDirection },
    Validate,
    Commit,
    DiscardChanges,
    LockModule { module: String },
    UnlockModule { module: String },
    LockDatastore,
    UnlockDatastore,
    FeatureEnable { module: String, feature: String, enable: bool },
    ModuleInstall { module: String, revision: Option<String>, install: bool },
    Subscribe {
        event_kind: EventKind,
        destination_address: String,
        destination_id: u32,
        module: Option<String>,
        xpath: Option<String>,
    },
    Unsubscribe {
        event_kind: EventKind,
        destination_address: String,
        destination_id: u32,
        module: Option<String>,
    },
    GetLastErrors,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::SessionStart { .. } => OperationKind::SessionStart,
            Operation::SessionStop => OperationKind::SessionStop,
            Operation::SessionRefresh => OperationKind::SessionRefresh,
            Operation::ListSchemas => OperationKind::ListSchemas,
            Operation::GetSchema { .. } => OperationKind::GetSchema,
            Operation::GetItem { .. } => OperationKind::GetItem,
            Operation::GetItems { .. } => OperationKind::GetItems,
            Operation::GetItemsIter { .. } => OperationKind::GetItemsIter,
            Operation::SetItem { .. } => OperationKind::SetItem,
            Operation::DeleteItem { .. } => OperationKind::DeleteItem,
            Operation::MoveItem { .. } => OperationKind::MoveItem,
            Operation::Validate => OperationKind::Validate,
            Operation::Commit => OperationKind::Commit,
            Operation::DiscardChanges => OperationKind::DiscardChanges,
            Operation::LockModule { .. } => OperationKind::LockModule,
            Operation::UnlockModule { .. } => OperationKind::UnlockModule,
            Operation::LockDatastore => OperationKind::LockDatastore,
            Operation::UnlockDatastore => OperationKind::UnlockDatastore,
            Operation::FeatureEnable { .. } => OperationKind::FeatureEnable,
            Operation::ModuleInstall { .. } => OperationKind::ModuleInstall,
            Operation::Subscribe { .. } => OperationKind::Subscribe,
            Operation::Unsubscribe { .. } => OperationKind::Unsubscribe,
            Operation::GetLastErrors => OperationKind::GetLastErrors,
        }
    }

    /// A per-operation well-formedness check, run right after decode.
    /// Rejects messages that decoded fine as an enum variant but are
    /// missing a sub-field that isn't representable as "absent" in the
    /// wire encoding (mostly empty-string xpaths/module names).
    pub fn well_formed(&self) -> bool {
        match self {
            Operation::GetSchema { module, .. } => !module.is_empty(),
            Operation::GetItem { xpath } | Operation::GetItems { xpath } => !xpath.is_empty(),
            Operation::GetItemsIter { xpath, .. } => !xpath.is_empty(),
            Operation::SetItem { xpath, .. } | Operation::DeleteItem { xpath, .. } => {
                !xpath.is_empty()
            }
            Operation::MoveItem { xpath, .. } => !xpath.is_empty(),
            Operation::LockModule { module } | Operation::UnlockModule { module } => {
                !module.is_empty()
            }
            Operation::FeatureEnable { module, feature, .. } => {
                !module.is_empty() && !feature.is_empty()
            }
            Operation::ModuleInstall { module, .. } => !module.is_empty(),
            Operation::Subscribe { destination_address, module, event_kind, .. } => {
                !destination_address.is_empty()
                    && (*event_kind != EventKind::ModuleChange || module.is_some())
            }
            Operation::Unsubscribe { destination_address, module, event_kind, .. } => {
                !destination_address.is_empty()
                    && (*event_kind != EventKind::ModuleChange || module.is_some())
            }
            _ => true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    SessionStarted {
        session_id: u32,
    },
    Schemas(Vec<SchemaInfo>),
    SchemaContent(Vec<u8>),
    Value(ValueResult),
    Values(Vec<ValueResult>),
    Errors(Vec<PathError>),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub enum NotificationBody {
    #[default]
    Empty,
    ModuleInstall {
        module: String,
        revision: Option<String>,
        installed: bool,
    },
    FeatureEnable {
        module: String,
        feature: String,
        enabled: bool,
    },
    ModuleChange {
        module: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PathError {
    pub path: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SchemaInfo {
    pub module_name: String,
    pub namespace: String,
    pub prefix: String,
    pub revision: RevisionInfo,
    #[serde(default)]
    pub submodules: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RevisionInfo {
    pub version: Option<String>,
    pub yang_path: Option<String>,
    pub yin_path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    Startup,
    Running,
    Candidate,
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datastore::Startup => write!(f, "startup"),
            Datastore::Running => write!(f, "running"),
            Datastore::Candidate => write!(f, "candidate"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Edit-option flags. These are independent bits, but `strict` and
/// `default` are mutually exclusive by construction at the call site
/// (the edit engine treats "neither set" as strict-like default
/// behavior equivalent to `default` for `set`/`delete`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditOptions {
    pub strict: bool,
    pub non_recursive: bool,
    pub default: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ModuleInstall,
    FeatureEnable,
    ModuleChange,
}

/// A typed value, tagged so that an exhaustive match is required at every
/// consumer when a new YANG type is added.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    /// decimal64: `value * 10^-digits`.
    Decimal64 { value: i64, digits: u8 },
    Bool(bool),
    String(String),
    Binary(Vec<u8>),
    Bits(Vec<String>),
    Enum(String),
    IdentityRef(String),
    Empty,
    LeafRef(Box<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Decimal64 { value, digits } => {
                let scale = 10i64.pow(*digits as u32);
                write!(f, "{}.{:0width$}", value / scale, (value % scale).abs(), width = *digits as usize)
            }
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Value::Bits(v) => write!(f, "{}", v.join(" ")),
            Value::Enum(v) => write!(f, "{v}"),
            Value::IdentityRef(v) => write!(f, "{v}"),
            Value::Empty => write!(f, ""),
            Value::LeafRef(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ValueResult {
    pub xpath: String,
    pub value: Value,
    pub default: bool,
}

/// Error taxonomy, surfaced verbatim as `result_code`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorCode {
    #[error("ok")]
    Ok,
    #[error("invalid argument")]
    InvalidArg,
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("unsupported")]
    Unsupported,
    #[error("locked")]
    Locked,
    #[error("data exists")]
    DataExists,
    #[error("data missing")]
    DataMissing,
    #[error("bad xpath element")]
    BadElement,
    #[error("unknown schema model")]
    UnknownModel,
    #[error("validation failed")]
    ValidationFailed,
    #[error("commit failed")]
    CommitFailed,
    #[error("internal error")]
    Internal,
    #[error("out of memory")]
    NoMemory,
    #[error("malformed message")]
    MalformedMessage,
    #[error("io error")]
    Io,
    #[error("initialization failed")]
    InitFailed,
    #[error("unexpected response")]
    UnexpectedResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_roundtrips_through_operation() {
        let op = Operation::GetItem { xpath: "/m:a".into() };
        assert_eq!(op.kind(), OperationKind::GetItem);
    }

    #[test]
    fn well_formed_rejects_empty_xpath() {
        let op = Operation::GetItem { xpath: String::new() };
        assert!(!op.well_formed());
    }

    #[test]
    fn well_formed_requires_module_for_module_change_subscribe() {
        let op = Operation::Subscribe {
            event_kind: EventKind::ModuleChange,
            destination_address: "/tmp/sub.sock".into(),
            destination_id: 1,
            module: None,
            xpath: None,
        };
        assert!(!op.well_formed());

        let op = Operation::Subscribe {
            event_kind: EventKind::ModuleInstall,
            destination_address: "/tmp/sub.sock".into(),
            destination_id: 1,
            module: None,
            xpath: None,
        };
        assert!(op.well_formed());
    }

    #[test]
    fn decimal64_display() {
        let v = Value::Decimal64 { value: 1234, digits: 2 };
        assert_eq!(v.to_string(), "12.34");
    }
}
