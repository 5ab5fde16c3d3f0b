// Copyright 2018-2022 Cargill Incorporated
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

//! The schema operation handle shared by the waiting client and the coordinator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::bitmap::NodeBitmap;
use crate::cluster::NodeId;

use super::result::{ParticipantResult, ResultCode};
use super::table::{SchemaOpKey, SchemaOpType};

struct SchemaOpState {
    participants: Option<BTreeSet<NodeId>>,
    results: BTreeMap<NodeId, (ResultCode, String)>,
    completed: bool,
    client_result: Option<ResultCode>,
}

/// In-process state of one schema operation.
///
/// The client creates the handle before writing the operation row and waits on it; the
/// coordinator, running in the event loop thread of the same node, registers the expected
/// participants when it first observes the row and records their results as they arrive.
pub struct SchemaOp {
    key: SchemaOpKey,
    op_type: SchemaOpType,
    op_id: u32,
    origin: NodeId,
    started: Instant,
    state: Mutex<SchemaOpState>,
    completed: Condvar,
}

impl SchemaOp {
    pub fn new(key: SchemaOpKey, op_type: SchemaOpType, op_id: u32, origin: NodeId) -> Self {
        SchemaOp {
            key,
            op_type,
            op_id,
            origin,
            started: Instant::now(),
            state: Mutex::new(SchemaOpState {
                participants: None,
                results: BTreeMap::new(),
                completed: false,
                client_result: None,
            }),
            completed: Condvar::new(),
        }
    }

    pub fn key(&self) -> &SchemaOpKey {
        &self.key
    }

    pub fn op_type(&self) -> SchemaOpType {
        self.op_type
    }

    pub fn op_id(&self) -> u32 {
        self.op_id
    }

    pub fn origin(&self) -> NodeId {
        self.origin
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Sets the participants expected to report. Returns false if they were already set, in
    /// which case the existing set is kept.
    ///
    /// Results received before registration are kept only for registered participants.
    pub fn register_participants(&self, participants: BTreeSet<NodeId>) -> bool {
        let mut state = mutex_lock_unwrap!(self.state);
        if state.participants.is_some() {
            return false;
        }
        state
            .results
            .retain(|node_id, _| participants.contains(node_id));
        state.participants = Some(participants);
        true
    }

    pub fn participants(&self) -> Option<BTreeSet<NodeId>> {
        mutex_lock_unwrap!(self.state).participants.clone()
    }

    /// Records the result reported by `node_id`. Results from nodes that are not participants,
    /// and repeated results, are ignored; returns whether the result was recorded.
    pub fn result_received(&self, node_id: NodeId, code: ResultCode, message: &str) -> bool {
        let mut state = mutex_lock_unwrap!(self.state);
        if state.completed || state.results.contains_key(&node_id) {
            return false;
        }
        if let Some(participants) = &state.participants {
            if !participants.contains(&node_id) {
                return false;
            }
        }
        state
            .results
            .insert(node_id, (code, message.to_string()));
        true
    }

    /// Treats a participant that has not reported yet as having reported `code`.
    pub fn fail_participant(&self, node_id: NodeId, code: ResultCode) -> bool {
        let mut state = mutex_lock_unwrap!(self.state);
        let waiting = match &state.participants {
            Some(participants) => participants.contains(&node_id),
            None => false,
        };
        if state.completed || !waiting || state.results.contains_key(&node_id) {
            return false;
        }
        state.results.insert(node_id, (code, String::new()));
        true
    }

    /// Fails every participant which has not reported and is not in `live`.
    pub fn fail_participants_not_in(&self, live: &NodeBitmap, code: ResultCode) -> Vec<NodeId> {
        let pending = self.pending_participants();
        pending
            .into_iter()
            .filter(|node_id| !live.is_set(*node_id))
            .filter(|node_id| self.fail_participant(*node_id, code))
            .collect()
    }

    /// Fails every participant which has not reported yet. If no participants were registered,
    /// the handle is settled with only `own_node` failed.
    pub fn fail_unreported(&self, code: ResultCode, own_node: NodeId) -> Vec<NodeId> {
        let mut state = mutex_lock_unwrap!(self.state);
        if state.completed {
            return vec![];
        }
        if state.participants.is_none() {
            let mut participants = BTreeSet::new();
            participants.insert(own_node);
            state.participants = Some(participants);
        }

        let pending: Vec<NodeId> = state
            .participants
            .iter()
            .flatten()
            .filter(|node_id| !state.results.contains_key(node_id))
            .copied()
            .collect();
        for node_id in &pending {
            state.results.insert(*node_id, (code, String::new()));
        }
        pending
    }

    /// Fails the participants still pending once the operation is older than `timeout`.
    pub fn check_timeout(&self, timeout: Duration, own_node: NodeId) -> Vec<NodeId> {
        if self.started.elapsed() < timeout {
            return vec![];
        }
        self.fail_unreported(ResultCode::NodeTimeout, own_node)
    }

    pub fn pending_participants(&self) -> Vec<NodeId> {
        let state = mutex_lock_unwrap!(self.state);
        match &state.participants {
            Some(participants) => participants
                .iter()
                .filter(|node_id| !state.results.contains_key(node_id))
                .copied()
                .collect(),
            None => vec![],
        }
    }

    /// True once participants are registered and every one of them has a result.
    pub fn all_reported(&self) -> bool {
        let state = mutex_lock_unwrap!(self.state);
        match &state.participants {
            Some(participants) => participants
                .iter()
                .all(|node_id| state.results.contains_key(node_id)),
            None => false,
        }
    }

    /// Marks the operation completed and wakes the waiting client.
    pub fn mark_completed(&self) {
        let mut state = mutex_lock_unwrap!(self.state);
        state.completed = true;
        self.completed.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        mutex_lock_unwrap!(self.state).completed
    }

    /// Waits up to `timeout` for the operation to complete; returns whether it did.
    pub fn wait_completed(&self, timeout: Duration) -> bool {
        let state = mutex_lock_unwrap!(self.state);
        if state.completed {
            return true;
        }
        match self
            .completed
            .wait_timeout_while(state, timeout, |state| !state.completed)
        {
            Ok((state, _)) => state.completed,
            Err(err) => panic!("Mutex error: {:?}", err),
        }
    }

    /// Records that the client gave up on the operation.
    pub fn set_client_result(&self, code: ResultCode) {
        mutex_lock_unwrap!(self.state).client_result = Some(code);
    }

    pub fn client_result(&self) -> Option<ResultCode> {
        mutex_lock_unwrap!(self.state).client_result
    }

    pub fn results(&self) -> Vec<ParticipantResult> {
        mutex_lock_unwrap!(self.state)
            .results
            .iter()
            .map(|(node_id, (code, message))| ParticipantResult {
                node_id: *node_id,
                code: *code,
                message: message.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    fn op() -> SchemaOp {
        SchemaOp::new(
            SchemaOpKey::new("s1", "t1", 10, 1),
            SchemaOpType::CreateTable,
            1,
            1,
        )
    }

    fn nodes(nodes: &[NodeId]) -> BTreeSet<NodeId> {
        nodes.iter().copied().collect()
    }

    /// Verifies that the operation is reported complete only once every registered participant
    /// has a result, and that unexpected or repeated results are ignored.
    #[test]
    fn test_results_from_participants_only() {
        let op = op();
        assert!(!op.all_reported());
        assert!(op.register_participants(nodes(&[1, 2, 3])));
        assert!(!op.register_participants(nodes(&[1, 2])));

        assert!(op.result_received(1, ResultCode::Success, ""));
        assert!(op.result_received(2, ResultCode::Success, ""));
        assert!(!op.result_received(2, ResultCode::SchemaOpFailure, "again"));
        assert!(!op.result_received(4, ResultCode::Success, ""));
        assert!(!op.all_reported());
        assert_eq!(op.pending_participants(), vec![3]);

        assert!(op.result_received(3, ResultCode::Other(1050), "exists"));
        assert!(op.all_reported());
        assert_eq!(op.results().len(), 3);
        assert_eq!(op.results()[2].code, ResultCode::Other(1050));
    }

    /// Verifies that results arriving before registration are kept for participants only.
    #[test]
    fn test_results_before_registration() {
        let op = op();
        assert!(op.result_received(2, ResultCode::Success, ""));
        assert!(op.result_received(5, ResultCode::Success, ""));
        op.register_participants(nodes(&[1, 2]));
        assert_eq!(op.pending_participants(), vec![1]);
    }

    /// Verifies failure of nodes which left the live set, and that reported nodes keep their
    /// result.
    #[test]
    fn test_fail_participants_not_in() {
        let op = op();
        op.register_participants(nodes(&[1, 2, 3]));
        op.result_received(2, ResultCode::Success, "");

        let live = NodeBitmap::from_nodes(vec![1]);
        assert_eq!(
            op.fail_participants_not_in(&live, ResultCode::NodeFailure),
            vec![3]
        );
        let results = op.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].code, ResultCode::Success);
        assert_eq!(results[1].node_id, 3);
        assert_eq!(results[1].code, ResultCode::NodeFailure);
        assert_eq!(op.pending_participants(), vec![1]);
    }

    /// Verifies that a handle settled before registration reports the owning node as failed.
    #[test]
    fn test_fail_unreported_without_participants() {
        let op = op();
        assert_eq!(op.fail_unreported(ResultCode::CoordAbort, 1), vec![1]);
        assert!(op.all_reported());
        assert_eq!(op.results()[0].code, ResultCode::CoordAbort);
    }

    /// Verifies the coordinator timeout check.
    #[test]
    fn test_check_timeout() {
        let op = op();
        op.register_participants(nodes(&[1, 2]));
        op.result_received(1, ResultCode::Success, "");
        assert!(op.check_timeout(Duration::from_secs(60), 1).is_empty());

        thread::sleep(Duration::from_millis(5));
        assert_eq!(op.check_timeout(Duration::from_millis(1), 1), vec![2]);
        assert!(op.all_reported());
    }

    /// Verifies that a waiting thread is woken on completion.
    #[test]
    fn test_wait_completed() {
        let op = Arc::new(op());
        assert!(!op.wait_completed(Duration::from_millis(5)));

        let completer = op.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.mark_completed();
        });
        assert!(op.wait_completed(Duration::from_secs(5)));
        handle.join().expect("Completer panicked");
    }
}
