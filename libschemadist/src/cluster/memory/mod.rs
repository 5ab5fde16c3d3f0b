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

//! An in-process storage cluster.
//!
//! `MemoryCluster` keeps every table in memory and delivers committed changes to event streams
//! over crossbeam channels, one batch per epoch. By default every commit closes its own epoch;
//! [`MemoryCluster::hold_epoch`] keeps the current epoch open so that several commits land in the
//! same epoch, which is how concurrent activity within one epoch is reproduced in tests.
//!
//! Besides the `Cluster` interface it provides the controls needed to exercise failure handling:
//! failing nodes and shards, dropping tables behind the back of the front ends, and injecting
//! temporary commit failures.

mod stream;
mod transaction;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Sender;

use crate::error::InternalError;

use super::{
    Cluster, ClusterError, ClusterEvent, Epoch, EventStream, NodeId, Row, ShardId, TableDef,
    TableName, Transaction, Value,
};

use self::stream::MemoryEventStream;
use self::transaction::MemoryTransaction;

const DEFAULT_SHARDS: &[ShardId] = &[1, 2];

/// An event together with the blob bytes it references.
#[derive(Clone, Debug)]
pub(super) struct StreamEvent {
    event: ClusterEvent,
    blobs: Vec<(u64, Vec<u8>)>,
}

/// All events of one epoch, as delivered to a single stream.
#[derive(Debug)]
pub(super) struct EpochBatch {
    epoch: Epoch,
    events: VecDeque<StreamEvent>,
}

enum Target {
    /// Every stream subscribed to the table when the epoch closes.
    Table(TableName),
    Stream(u64),
    All,
}

struct PendingEvent {
    target: Target,
    event: StreamEvent,
}

struct StoredRow {
    values: Row,
    version: u64,
}

struct MemoryTable {
    def: TableDef,
    rows: HashMap<Vec<Value>, StoredRow>,
}

struct StreamEntry {
    node: NodeId,
    tables: HashSet<TableName>,
    sender: Sender<EpochBatch>,
    latest: Arc<AtomicU64>,
}

struct ClusterState {
    tables: HashMap<TableName, MemoryTable>,
    shards: Vec<ShardId>,
    streams: HashMap<u64, StreamEntry>,
    next_stream_id: u64,
    open_epoch: Epoch,
    pending: Vec<PendingEvent>,
    held: bool,
    next_blob_id: u64,
    next_row_version: u64,
    injected_failures: u32,
}

impl ClusterState {
    fn new(shards: Vec<ShardId>) -> Self {
        ClusterState {
            tables: HashMap::new(),
            shards,
            streams: HashMap::new(),
            next_stream_id: 1,
            open_epoch: 1,
            pending: Vec::new(),
            held: false,
            next_blob_id: 1,
            next_row_version: 1,
            injected_failures: 0,
        }
    }

    fn push(&mut self, target: Target, event: ClusterEvent) {
        self.pending.push(PendingEvent {
            target,
            event: StreamEvent {
                event,
                blobs: vec![],
            },
        });
    }

    /// Completes the open epoch, delivering it to every stream, even when it carries no events.
    fn close_epoch(&mut self) -> Epoch {
        let epoch = self.open_epoch;
        let pending = std::mem::take(&mut self.pending);

        for (id, stream) in self.streams.iter() {
            let events = pending
                .iter()
                .filter(|pending| match &pending.target {
                    Target::Table(table) => stream.tables.contains(table),
                    Target::Stream(stream_id) => stream_id == id,
                    Target::All => true,
                })
                .map(|pending| pending.event.clone())
                .collect();

            // a closed receiver is cleaned up when its stream is dropped
            let _ = stream.sender.send(EpochBatch { epoch, events });
            stream.latest.store(epoch, Ordering::SeqCst);
        }

        self.open_epoch += 1;
        epoch
    }

    fn close_epoch_unless_held(&mut self) {
        if !self.held {
            self.close_epoch();
        }
    }

    fn subscribers(&self, table: &TableName) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .streams
            .values()
            .filter(|stream| stream.tables.contains(table))
            .map(|stream| stream.node)
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    fn subscribe(&mut self, stream_id: u64, table: &TableName) -> Result<(), ClusterError> {
        if !self.tables.contains_key(table) {
            return Err(ClusterError::NoSuchObject(format!("table {}", table)));
        }

        let node = match self.streams.get(&stream_id) {
            Some(stream) if stream.tables.contains(table) => return Ok(()),
            Some(stream) => stream.node,
            None => {
                return Err(ClusterError::Disconnected(format!(
                    "event stream {} is closed",
                    stream_id
                )))
            }
        };

        // the new subscriber learns about everyone already subscribed
        let existing = self.subscribers(table);
        for shard in self.shards.clone() {
            for existing_node in existing.iter().filter(|existing| **existing != node) {
                self.push(
                    Target::Stream(stream_id),
                    ClusterEvent::Subscribe {
                        table: table.clone(),
                        shard,
                        node: *existing_node,
                    },
                );
            }
        }

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.tables.insert(table.clone());
        }

        for shard in self.shards.clone() {
            self.push(
                Target::Table(table.clone()),
                ClusterEvent::Subscribe {
                    table: table.clone(),
                    shard,
                    node,
                },
            );
        }

        self.close_epoch_unless_held();
        Ok(())
    }

    fn unsubscribe(&mut self, stream_id: u64, table: &TableName) {
        let node = match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                if !stream.tables.remove(table) {
                    return;
                }
                stream.node
            }
            None => return,
        };

        // another stream of the same node may still hold the subscription
        if self.subscribers(table).contains(&node) {
            return;
        }

        for shard in self.shards.clone() {
            self.push(
                Target::Table(table.clone()),
                ClusterEvent::Unsubscribe {
                    table: table.clone(),
                    shard,
                    node,
                },
            );
        }
        self.close_epoch_unless_held();
    }

    fn remove_stream(&mut self, stream_id: u64) {
        let tables: Vec<TableName> = match self.streams.get(&stream_id) {
            Some(stream) => stream.tables.iter().cloned().collect(),
            None => return,
        };
        for table in tables {
            self.unsubscribe(stream_id, &table);
        }
        self.streams.remove(&stream_id);
    }
}

fn lock_state(state: &Mutex<ClusterState>) -> Result<MutexGuard<ClusterState>, ClusterError> {
    state.lock().map_err(|_| {
        ClusterError::InternalError(InternalError::with_message(
            "memory cluster state lock was poisoned".into(),
        ))
    })
}

/// An in-memory `Cluster`.
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    /// Creates a cluster whose data is spread over the given shards.
    pub fn new(shards: Vec<ShardId>) -> Self {
        MemoryCluster {
            state: Arc::new(Mutex::new(ClusterState::new(shards))),
        }
    }

    /// Keeps the current epoch open until `release_epoch` is called.
    pub fn hold_epoch(&self) {
        mutex_lock_unwrap!(self.state).held = true;
    }

    /// Closes the held epoch and returns to closing one epoch per commit.
    pub fn release_epoch(&self) -> Epoch {
        let mut state = mutex_lock_unwrap!(self.state);
        state.held = false;
        state.close_epoch()
    }

    /// Closes the current epoch, even if it is empty, unless epochs are held.
    ///
    /// Mirrors the periodic global checkpoint of a real cluster.
    pub fn tick(&self) -> Option<Epoch> {
        let mut state = mutex_lock_unwrap!(self.state);
        if state.held {
            None
        } else {
            Some(state.close_epoch())
        }
    }

    /// The epoch currently collecting commits.
    pub fn open_epoch(&self) -> Epoch {
        mutex_lock_unwrap!(self.state).open_epoch
    }

    /// Makes the next `count` commits fail with a temporary error.
    pub fn inject_temporary_failures(&self, count: u32) {
        mutex_lock_unwrap!(self.state).injected_failures = count;
    }

    /// Simulates the failure of a front-end node: its event streams are disconnected and every
    /// other stream receives a node failure event.
    pub fn fail_node(&self, node: NodeId) {
        let mut state = mutex_lock_unwrap!(self.state);
        state.streams.retain(|_, stream| stream.node != node);
        state.push(Target::All, ClusterEvent::NodeFailure { node });
        state.close_epoch_unless_held();
    }

    /// Simulates the failure of a data shard.
    pub fn fail_shard(&self, shard: ShardId) {
        let mut state = mutex_lock_unwrap!(self.state);
        state.push(Target::All, ClusterEvent::ShardFailure { shard });
        state.close_epoch_unless_held();
    }

    /// Removes a table without notifying anyone, as an administrator working directly on the
    /// cluster would.
    pub fn drop_table(&self, table: &TableName) -> bool {
        let mut state = mutex_lock_unwrap!(self.state);
        for stream in state.streams.values_mut() {
            stream.tables.remove(table);
        }
        state.tables.remove(table).is_some()
    }

    /// Renames a table in the dictionary, keeping its rows. Subscriptions stay on the old name
    /// until the subscribers move them.
    pub fn rename_table(&self, from: &TableName, to: &TableName) -> Result<(), ClusterError> {
        let mut state = lock_state(&self.state)?;
        if state.tables.contains_key(to) {
            return Err(ClusterError::AlreadyExists(format!("table {}", to)));
        }
        let table = state
            .tables
            .remove(from)
            .ok_or_else(|| ClusterError::NoSuchObject(format!("table {}", from)))?;
        state.tables.insert(
            to.clone(),
            MemoryTable {
                def: table.def.renamed(to.clone()),
                rows: table.rows,
            },
        );
        Ok(())
    }

    /// Returns whether any stream of `node` is subscribed to `table`.
    pub fn is_subscribed(&self, node: NodeId, table: &TableName) -> bool {
        mutex_lock_unwrap!(self.state).subscribers(table).contains(&node)
    }

    /// Returns the committed rows of `table`, or `None` if it does not exist.
    pub fn rows(&self, table: &TableName) -> Option<Vec<Row>> {
        let state = mutex_lock_unwrap!(self.state);
        state.tables.get(table).map(|table| {
            let mut rows: Vec<Row> = table.rows.values().map(|row| row.values.clone()).collect();
            rows.sort();
            rows
        })
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        MemoryCluster::new(DEFAULT_SHARDS.to_vec())
    }
}

impl Cluster for MemoryCluster {
    fn begin(&self) -> Result<Box<dyn Transaction>, ClusterError> {
        Ok(Box::new(MemoryTransaction::new(self.state.clone())))
    }

    fn force_gcp(&self) -> Result<(), ClusterError> {
        let mut state = lock_state(&self.state)?;
        if !state.pending.is_empty() {
            state.close_epoch_unless_held();
        }
        Ok(())
    }

    fn table_def(&self, table: &TableName) -> Result<Option<TableDef>, ClusterError> {
        let state = lock_state(&self.state)?;
        Ok(state.tables.get(table).map(|table| table.def.clone()))
    }

    fn list_tables(&self) -> Result<Vec<TableDef>, ClusterError> {
        let state = lock_state(&self.state)?;
        let mut defs: Vec<TableDef> = state.tables.values().map(|t| t.def.clone()).collect();
        defs.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(defs)
    }

    fn create_table(&self, def: TableDef) -> Result<(), ClusterError> {
        let mut state = lock_state(&self.state)?;
        if state.tables.contains_key(def.name()) {
            return Err(ClusterError::AlreadyExists(format!("table {}", def.name())));
        }
        debug!("Created cluster table {}", def.name());
        state.tables.insert(
            def.name().clone(),
            MemoryTable {
                def,
                rows: HashMap::new(),
            },
        );
        Ok(())
    }

    fn create_event_stream(&self, node: NodeId) -> Result<Box<dyn EventStream>, ClusterError> {
        let mut state = lock_state(&self.state)?;
        let id = state.next_stream_id;
        state.next_stream_id += 1;

        let (sender, receiver) = crossbeam_channel::unbounded();
        let latest = Arc::new(AtomicU64::new(state.open_epoch - 1));
        state.streams.insert(
            id,
            StreamEntry {
                node,
                tables: HashSet::new(),
                sender,
                latest: latest.clone(),
            },
        );

        Ok(Box::new(MemoryEventStream::new(
            id,
            node,
            self.state.clone(),
            receiver,
            latest,
        )))
    }
}
