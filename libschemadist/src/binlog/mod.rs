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

//! The replication log and the epoch event loop which feeds it.
//!
//! Every node owns one [`ReplicationLog`]. Its [`EpochEventLoop`](event_loop/struct.EpochEventLoop.html)
//! writes one transaction per epoch with the row changes of that epoch, prefixed by a heartbeat
//! row of the apply status table, and the statements of the schema operations applied in
//! between.

mod error;
pub mod event_loop;
pub mod injector;
#[cfg(feature = "memory")]
mod memory;

use serde_derive::{Deserialize, Serialize};

use crate::cluster::{Epoch, TableName, Value};

pub use self::error::{EventLoopError, ReplicationLogError};
pub use self::event_loop::EpochEventLoop;
pub use self::injector::ChangeInjector;
#[cfg(feature = "memory")]
pub use self::memory::{LogEntry, MemoryReplicationLog};

/// A position in the replication log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub file: String,
    pub offset: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRowKind {
    /// Insert, or an update logged with its after image only.
    Write,
    Update,
    Delete,
}

/// One row change as written to the log.
///
/// Images hold one entry per table column; columns left out of the image are `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub table: TableName,
    pub kind: LogRowKind,
    pub before: Option<Vec<Option<Value>>>,
    pub after: Option<Vec<Option<Value>>>,
    pub server_id: u32,
}

/// Row changes of a transaction, either as rows or compressed into one payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    Rows(Vec<LogRow>),
    /// The JSON-encoded rows, compressed with zstd.
    Compressed {
        level: i32,
        uncompressed_len: usize,
        data: Vec<u8>,
    },
}

/// The transaction injected for one epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct LogTransaction {
    pub epoch: Epoch,
    pub heartbeat: LogRow,
    pub payload: LogPayload,
    pub inserts: u32,
    pub updates: u32,
    pub deletes: u32,
    pub schema_ops: u32,
    /// The server id shared by every row of the transaction, or zero if they differ.
    pub orig_server_id: u32,
    pub orig_epoch: Epoch,
}

/// Metadata recorded with each injected epoch transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: Epoch,
    pub inserts: u32,
    pub updates: u32,
    pub deletes: u32,
    pub schema_ops: u32,
    pub orig_server_id: u32,
    pub orig_epoch: Epoch,
    pub file: String,
    pub start_position: u64,
    pub next_position: u64,
}

/// A statement written to the log by a schema operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEvent {
    pub db: String,
    pub query: String,
    /// Server id the statement is attributed to: the originating server, not the local one.
    pub server_id: u32,
    pub epoch: Epoch,
}

/// The durable, ordered log of one node.
pub trait ReplicationLog: Send + Sync {
    /// Writes `txn` atomically and returns the record describing where it was written.
    fn write_transaction(&self, txn: LogTransaction) -> Result<EpochRecord, ReplicationLogError>;

    fn write_query(&self, query: QueryEvent) -> Result<LogPosition, ReplicationLogError>;

    /// Marks a possible gap in the log, such as after losing the cluster event streams.
    fn write_incident(&self, reason: &str) -> Result<LogPosition, ReplicationLogError>;

    fn position(&self) -> Result<LogPosition, ReplicationLogError>;
}
