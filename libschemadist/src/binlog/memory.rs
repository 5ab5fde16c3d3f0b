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

use std::sync::{Arc, Mutex, MutexGuard};

use serde_derive::Serialize;

use crate::error::InternalError;

use super::{
    EpochRecord, LogPayload, LogPosition, LogRow, LogTransaction, QueryEvent, ReplicationLog,
    ReplicationLogError,
};

const LOG_FILE: &str = "binlog.000001";
const HEADER_LEN: u64 = 4;

/// An event of the in-memory log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum LogEntry {
    Transaction {
        record: EpochRecord,
        heartbeat: LogRow,
        payload: LogPayload,
    },
    Query(QueryEvent),
    Incident { reason: String },
}

struct LogState {
    entries: Vec<LogEntry>,
    offset: u64,
}

/// A `ReplicationLog` kept in memory.
///
/// Offsets advance by the JSON-encoded size of each entry. Clones share the same log.
#[derive(Clone)]
pub struct MemoryReplicationLog {
    state: Arc<Mutex<LogState>>,
}

impl MemoryReplicationLog {
    pub fn new() -> Self {
        MemoryReplicationLog {
            state: Arc::new(Mutex::new(LogState {
                entries: vec![],
                offset: HEADER_LEN,
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<LogState>, ReplicationLogError> {
        self.state.lock().map_err(|_| {
            ReplicationLogError::InternalError(InternalError::with_message(
                "replication log lock was poisoned".into(),
            ))
        })
    }

    fn append(state: &mut LogState, entry: LogEntry) -> Result<u64, ReplicationLogError> {
        let len = serde_json::to_vec(&entry)?.len() as u64;
        state.offset += len;
        state.entries.push(entry);
        Ok(state.offset)
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        mutex_lock_unwrap!(self.state).entries.clone()
    }

    pub fn epoch_records(&self) -> Vec<EpochRecord> {
        mutex_lock_unwrap!(self.state)
            .entries
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Transaction { record, .. } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn queries(&self) -> Vec<QueryEvent> {
        mutex_lock_unwrap!(self.state)
            .entries
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Query(query) => Some(query.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Default for MemoryReplicationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationLog for MemoryReplicationLog {
    fn write_transaction(&self, txn: LogTransaction) -> Result<EpochRecord, ReplicationLogError> {
        let mut state = self.lock()?;
        let start_position = state.offset;

        let mut record = EpochRecord {
            epoch: txn.epoch,
            inserts: txn.inserts,
            updates: txn.updates,
            deletes: txn.deletes,
            schema_ops: txn.schema_ops,
            orig_server_id: txn.orig_server_id,
            orig_epoch: txn.orig_epoch,
            file: LOG_FILE.to_string(),
            start_position,
            next_position: start_position,
        };
        let mut entry = LogEntry::Transaction {
            record: record.clone(),
            heartbeat: txn.heartbeat,
            payload: txn.payload,
        };
        record.next_position = start_position + serde_json::to_vec(&entry)?.len() as u64;
        if let LogEntry::Transaction {
            record: entry_record,
            ..
        } = &mut entry
        {
            *entry_record = record.clone();
        }

        state.offset = record.next_position;
        state.entries.push(entry);
        Ok(record)
    }

    fn write_query(&self, query: QueryEvent) -> Result<LogPosition, ReplicationLogError> {
        let mut state = self.lock()?;
        let offset = Self::append(&mut state, LogEntry::Query(query))?;
        Ok(LogPosition {
            file: LOG_FILE.to_string(),
            offset,
        })
    }

    fn write_incident(&self, reason: &str) -> Result<LogPosition, ReplicationLogError> {
        let mut state = self.lock()?;
        let offset = Self::append(
            &mut state,
            LogEntry::Incident {
                reason: reason.to_string(),
            },
        )?;
        Ok(LogPosition {
            file: LOG_FILE.to_string(),
            offset,
        })
    }

    fn position(&self) -> Result<LogPosition, ReplicationLogError> {
        Ok(LogPosition {
            file: LOG_FILE.to_string(),
            offset: self.lock()?.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::binlog::LogRowKind;
    use crate::cluster::{TableName, Value};

    fn heartbeat() -> LogRow {
        LogRow {
            table: TableName::new("schemadist", "apply_status"),
            kind: LogRowKind::Write,
            before: None,
            after: Some(vec![Some(Value::UInt(1)), Some(Value::UInt(9))]),
            server_id: 1,
        }
    }

    /// Verifies that positions advance with each entry and that a transaction's record
    /// describes where it was written.
    #[test]
    fn test_positions() {
        let log = MemoryReplicationLog::new();
        assert_eq!(log.position().unwrap().offset, HEADER_LEN);

        let record = log
            .write_transaction(LogTransaction {
                epoch: 9,
                heartbeat: heartbeat(),
                payload: LogPayload::Rows(vec![]),
                inserts: 0,
                updates: 0,
                deletes: 0,
                schema_ops: 1,
                orig_server_id: 0,
                orig_epoch: 0,
            })
            .expect("Unable to write transaction");
        assert_eq!(record.start_position, HEADER_LEN);
        assert!(record.next_position > record.start_position);
        assert_eq!(log.position().unwrap().offset, record.next_position);
        assert_eq!(log.epoch_records(), vec![record.clone()]);

        let position = log
            .write_query(QueryEvent {
                db: "s1".into(),
                query: "DROP TABLE t1".into(),
                server_id: 2,
                epoch: 9,
            })
            .unwrap();
        assert!(position.offset > record.next_position);

        log.write_incident("restarted").unwrap();
        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.queries().len(), 1);
    }
}
