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

//! Registry of the schema operations in flight on one node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::cluster::NodeId;
use crate::collections::RefMap;

use super::error::SchemaDistError;
use super::result::ResultCode;
use super::schema_op::SchemaOp;
use super::table::{SchemaOpKey, SchemaOpType};

const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct RegistryState {
    ops: HashMap<u32, Arc<SchemaOp>>,
    by_object: HashMap<(String, String), u32>,
    refs: RefMap<u32>,
}

/// Live schema operation handles, keyed by operation id.
///
/// Each holder of a handle (the waiting client, the coordinator) takes a reference through
/// `create` or `acquire` and gives it back with `release`; the handle leaves the registry with
/// its last reference. At most one operation per object is registered at a time, so a second
/// operation on the same object waits for the first to be released.
pub struct SchemaOpRegistry {
    state: Mutex<RegistryState>,
    released: Condvar,
    next_op_id: AtomicU32,
}

impl SchemaOpRegistry {
    pub fn new() -> Self {
        SchemaOpRegistry {
            state: Mutex::new(RegistryState::default()),
            released: Condvar::new(),
            next_op_id: AtomicU32::new(1),
        }
    }

    /// Registers a new operation on behalf of a client, waiting up to `wait` for an earlier
    /// operation on the same object to be released. The wait ends with `Killed` as soon as
    /// `cancelled` returns true.
    pub fn create(
        &self,
        key: SchemaOpKey,
        op_type: SchemaOpType,
        origin: NodeId,
        wait: Duration,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Arc<SchemaOp>, SchemaDistError> {
        let deadline = Instant::now() + wait;
        let object = key.object();

        let mut state = mutex_lock_unwrap!(self.state);
        let mut waiting = false;
        while state.by_object.contains_key(&object) {
            if cancelled() {
                debug!("Gave up waiting for {}: session killed", key);
                return Err(SchemaDistError::Killed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SchemaDistError::ObjectBusy(key.to_string()));
            }
            if !waiting {
                debug!("Waiting for earlier schema operation on {}.{}", object.0, object.1);
                waiting = true;
            }
            let timeout = (deadline - now).min(CANCEL_CHECK_INTERVAL);
            state = match self.released.wait_timeout(state, timeout) {
                Ok((state, _)) => state,
                Err(err) => panic!("Mutex error: {:?}", err),
            };
        }

        let op_id = self.next_op_id.fetch_add(1, Ordering::SeqCst);
        let op = Arc::new(SchemaOp::new(key, op_type, op_id, origin));
        state.ops.insert(op_id, op.clone());
        state.by_object.insert(object, op_id);
        state.refs.add_ref(op_id);

        Ok(op)
    }

    /// Takes a reference to the operation registered for `key`, if it is the same operation:
    /// same object id and version, and same operation id when one is given.
    pub fn acquire(&self, key: &SchemaOpKey, op_id: Option<u32>) -> Option<Arc<SchemaOp>> {
        let mut state = mutex_lock_unwrap!(self.state);
        let registered_id = *state.by_object.get(&key.object())?;
        if op_id.map(|op_id| op_id != registered_id).unwrap_or(false) {
            return None;
        }

        let op = state.ops.get(&registered_id)?.clone();
        if op.key() != key || op.is_completed() {
            return None;
        }
        state.refs.add_ref(registered_id);
        Some(op)
    }

    pub fn get(&self, op_id: u32) -> Option<Arc<SchemaOp>> {
        mutex_lock_unwrap!(self.state).ops.get(&op_id).cloned()
    }

    /// Gives back a reference taken by `create` or `acquire`.
    pub fn release(&self, op: &SchemaOp) {
        let mut state = mutex_lock_unwrap!(self.state);
        match state.refs.remove_ref(&op.op_id()) {
            Ok(Some(op_id)) => {
                state.ops.remove(&op_id);
                let object = op.key().object();
                if state.by_object.get(&object) == Some(&op_id) {
                    state.by_object.remove(&object);
                }
                self.released.notify_all();
            }
            Ok(None) => (),
            Err(err) => warn!("Releasing schema operation {}: {}", op.key(), err.0),
        }
    }

    pub fn open_ops(&self) -> Vec<Arc<SchemaOp>> {
        mutex_lock_unwrap!(self.state).ops.values().cloned().collect()
    }

    /// Settles every registered operation with `code` for the participants that have not
    /// reported, and wakes their clients.
    pub fn abort_all(&self, code: ResultCode, own_node: NodeId) -> usize {
        let ops = self.open_ops();
        for op in &ops {
            if !op.is_completed() {
                let failed = op.fail_unreported(code, own_node);
                debug!("Aborted schema operation {} for {:?}", op.key(), failed);
                op.mark_completed();
            }
        }
        ops.len()
    }

    pub fn len(&self) -> usize {
        mutex_lock_unwrap!(self.state).ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaOpRegistry {
    fn default() -> Self {
        Self::new()
    }
}
