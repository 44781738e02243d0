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

use std::time::Duration;

/// Minimum amount of free space an input buffer is topped back up to
/// after compaction, mirroring `CM_IN_BUFF_MIN_SPACE` in the original
/// connection manager.
pub const IN_BUF_MIN_SPACE: usize = 512;

/// Growth increment used when an input buffer needs more room,
/// mirroring `CM_BUFF_ALLOC_CHUNK`.
pub const BUF_ALLOC_CHUNK: usize = 1024;

/// Initial capacity of a session's pending-request FIFO, mirroring
/// `CM_SESSION_REQ_QUEUE_SIZE`.
pub const SESSION_REQ_QUEUE_SIZE: usize = 2;

/// How long the commit pipeline retries a non-blocking module file lock
/// before giving up as `CommitFailed`.
pub const COMMIT_LOCK_RETRY_TIMEOUT: Duration = Duration::from_millis(200);
pub const COMMIT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Ceiling on a connection's outbound buffer before backpressure closes
/// the connection outright.
pub const MAX_OUTPUT_BUF: usize = 8 * 1024 * 1024;

/// Number of past errors retained per session for `get-last-errors`.
pub const MAX_SESSION_ERRORS: usize = 16;

/// If set to "true", the daemon autodaemonizes after launch.
pub const AUTODAEMONIZE_VAR: &str = "YANGD__INTERNAL__AUTODAEMONIZE";
