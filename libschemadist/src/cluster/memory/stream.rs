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

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::cluster::{BlobRef, ClusterError, ClusterEvent, Epoch, EventStream, NodeId, TableName};

use super::{lock_state, ClusterState, EpochBatch};

/// Event stream of a `MemoryCluster`.
///
/// Dropping the stream removes its subscriptions, which the remaining subscribers observe as
/// unsubscribe events.
pub(super) struct MemoryEventStream {
    id: u64,
    node: NodeId,
    state: Arc<Mutex<ClusterState>>,
    receiver: Receiver<EpochBatch>,
    pending: VecDeque<EpochBatch>,
    latest: Arc<AtomicU64>,
    tables: HashSet<TableName>,
    current_blobs: Vec<(u64, Vec<u8>)>,
}

impl MemoryEventStream {
    pub(super) fn new(
        id: u64,
        node: NodeId,
        state: Arc<Mutex<ClusterState>>,
        receiver: Receiver<EpochBatch>,
        latest: Arc<AtomicU64>,
    ) -> Self {
        MemoryEventStream {
            id,
            node,
            state,
            receiver,
            pending: VecDeque::new(),
            latest,
            tables: HashSet::new(),
            current_blobs: vec![],
        }
    }
}

impl EventStream for MemoryEventStream {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn poll_epoch(&mut self, timeout: Duration) -> Result<Option<Epoch>, ClusterError> {
        if let Some(batch) = self.pending.front() {
            return Ok(Some(batch.epoch));
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(batch) => {
                let epoch = batch.epoch;
                self.pending.push_back(batch);
                Ok(Some(epoch))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ClusterError::Disconnected(format!(
                "event stream {} of node {} was closed by the cluster",
                self.id, self.node
            ))),
        }
    }

    fn next_event(&mut self, epoch: Epoch) -> Option<ClusterEvent> {
        let batch = match self.pending.front_mut() {
            Some(batch) if batch.epoch == epoch => batch,
            _ => return None,
        };

        match batch.events.pop_front() {
            Some(stream_event) => {
                self.current_blobs = stream_event.blobs;
                Some(stream_event.event)
            }
            None => {
                self.pending.pop_front();
                self.current_blobs.clear();
                None
            }
        }
    }

    fn latest_epoch(&self) -> Epoch {
        self.latest.load(Ordering::SeqCst)
    }

    fn subscribe(&mut self, table: &TableName) -> Result<(), ClusterError> {
        let mut state = lock_state(&self.state)?;
        state.subscribe(self.id, table)?;
        self.tables.insert(table.clone());
        Ok(())
    }

    fn unsubscribe(&mut self, table: &TableName) -> Result<(), ClusterError> {
        let mut state = lock_state(&self.state)?;
        state.unsubscribe(self.id, table);
        self.tables.remove(table);
        Ok(())
    }

    fn is_subscribed(&self, table: &TableName) -> bool {
        self.tables.contains(table)
    }

    fn read_blob_into(&self, blob: &BlobRef, buffer: &mut Vec<u8>) -> Result<(), ClusterError> {
        let bytes = self
            .current_blobs
            .iter()
            .find(|(id, _)| *id == blob.id)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| {
                ClusterError::NoSuchObject(format!(
                    "blob {} is not part of the current event",
                    blob.id
                ))
            })?;
        buffer.clear();
        buffer.extend_from_slice(bytes);
        Ok(())
    }
}

impl Drop for MemoryEventStream {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.remove_stream(self.id);
        }
    }
}
