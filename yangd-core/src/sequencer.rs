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

//! Per-session request sequencing. Requests on a single session must be
//! answered in the order they were issued even though the reactor
//! processes the socket's bytes as they arrive; this is a plain FIFO
//! plus two counters that reconcile "requests seen" against "responses
//! sent".
//!
//! No current operation produces more than one in-flight request
//! before its response, so this FIFO is never more than one-deep in
//! practice; it's still implemented in full so a future pipelined
//! client wouldn't need a protocol change, just a sequencer that's
//! already exercised by every session.

use std::collections::VecDeque;

use yangd_protocol::OperationKind;

use crate::consts::SESSION_REQ_QUEUE_SIZE;

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub kind: OperationKind,
    pub seq: u64,
}

/// FIFO of a session's outstanding requests, plus the request/response
/// counters used to detect a session that's fallen out of sync (a
/// response arriving for a sequence number that was never enqueued is
/// a bug, not a client error, and should panic in debug builds rather
/// than be silently swallowed).
#[derive(Debug)]
pub struct Sequencer {
    queue: VecDeque<PendingRequest>,
    rp_req_cnt: u64,
    rp_resp_expected: u64,
}

impl Sequencer {
    pub fn new() -> Self {
        Sequencer {
            queue: VecDeque::with_capacity(SESSION_REQ_QUEUE_SIZE),
            rp_req_cnt: 0,
            rp_resp_expected: 0,
        }
    }

    /// Record a newly-received request, returning its sequence number.
    pub fn push(&mut self, kind: OperationKind) -> u64 {
        let seq = self.rp_req_cnt;
        self.rp_req_cnt += 1;
        self.queue.push_back(PendingRequest { kind, seq });
        seq
    }

    /// Pop the oldest pending request, asserting it's the one the
    /// caller expects to be answering (FIFO order is an invariant, not
    /// a convenience -- a caller answering out of order is a bug in the
    /// reactor's dispatch logic).
    pub fn pop_expected(&mut self, kind: OperationKind) -> Option<PendingRequest> {
        let front = self.queue.front()?;
        if front.kind != kind {
            return None;
        }
        let req = self.queue.pop_front()?;
        self.rp_resp_expected += 1;
        Some(req)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.queue.len()
    }

    pub fn counters(&self) -> (u64, u64) {
        (self.rp_req_cnt, self.rp_resp_expected)
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_enforced() {
        let mut seq = Sequencer::new();
        seq.push(OperationKind::GetItem);
        seq.push(OperationKind::Commit);

        assert!(seq.pop_expected(OperationKind::Commit).is_none());
        let first = seq.pop_expected(OperationKind::GetItem).unwrap();
        assert_eq!(first.seq, 0);
        let second = seq.pop_expected(OperationKind::Commit).unwrap();
        assert_eq!(second.seq, 1);
        assert!(seq.is_empty());
    }

    #[test]
    fn counters_track_requests_and_responses() {
        let mut seq = Sequencer::new();
        seq.push(OperationKind::Validate);
        seq.pop_expected(OperationKind::Validate);
        assert_eq!(seq.counters(), (1, 1));
    }
}
