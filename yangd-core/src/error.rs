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

//! Typed errors at the seams that must produce a specific wire
//! [`ErrorCode`]. Everything else (setup failures, "should be
//! impossible" branches) keeps using `anyhow::Result` throughout the
//! daemon module.

use yangd_protocol::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("locked by session {0}")]
    Locked(u32),
    #[error("data exists at {0}")]
    DataExists(String),
    #[error("data missing at {0}")]
    DataMissing(String),
    #[error("bad xpath element in {0}")]
    BadElement(String),
    #[error("unknown schema model: {0}")]
    UnknownModel(String),
    #[error("validation failed")]
    ValidationFailed(Vec<(String, String)>),
    #[error("commit failed: {0}")]
    CommitFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::InvalidArg(_) => ErrorCode::InvalidArg,
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::Unauthorized(_) => ErrorCode::Unauthorized,
            EngineError::Unsupported(_) => ErrorCode::Unsupported,
            EngineError::Locked(_) => ErrorCode::Locked,
            EngineError::DataExists(_) => ErrorCode::DataExists,
            EngineError::DataMissing(_) => ErrorCode::DataMissing,
            EngineError::BadElement(_) => ErrorCode::BadElement,
            EngineError::UnknownModel(_) => ErrorCode::UnknownModel,
            EngineError::ValidationFailed(_) => ErrorCode::ValidationFailed,
            EngineError::CommitFailed(_) => ErrorCode::CommitFailed,
            EngineError::Io(_) => ErrorCode::Io,
            EngineError::Other(_) => ErrorCode::Internal,
        }
    }

    /// Per-path diagnostics, populated only for `ValidationFailed`.
    pub fn error_paths(&self) -> Vec<String> {
        match self {
            EngineError::ValidationFailed(paths) => {
                paths.iter().map(|(path, _)| path.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
