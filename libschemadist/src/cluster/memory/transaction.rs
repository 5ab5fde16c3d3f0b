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

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cluster::{
    BlobRef, ClusterError, ClusterEvent, Epoch, Row, RowEvent, RowEventKind, TableName,
    Transaction, Value,
};

use super::{lock_state, ClusterState, PendingEvent, StoredRow, StreamEvent, Target};

enum Operation {
    Write(TableName, Row),
    Insert(TableName, Row),
    Delete(TableName, Vec<Value>),
}

/// A transaction against a `MemoryCluster`.
///
/// Exclusive reads are optimistic: the version of each row read exclusively is remembered and
/// checked again when the transaction commits.
pub(super) struct MemoryTransaction {
    state: Arc<Mutex<ClusterState>>,
    operations: Vec<Operation>,
    exclusive_reads: Vec<(TableName, Vec<Value>, Option<u64>)>,
    any_value: u32,
}

impl MemoryTransaction {
    pub(super) fn new(state: Arc<Mutex<ClusterState>>) -> Self {
        MemoryTransaction {
            state,
            operations: vec![],
            exclusive_reads: vec![],
            any_value: 0,
        }
    }

    fn read_with_version(
        &self,
        table: &TableName,
        key: &[Value],
    ) -> Result<Option<(Row, u64)>, ClusterError> {
        let state = lock_state(&self.state)?;
        let table = state
            .tables
            .get(table)
            .ok_or_else(|| ClusterError::NoSuchObject(format!("table {}", table)))?;
        Ok(table
            .rows
            .get(key)
            .map(|row| (row.values.clone(), row.version)))
    }
}

impl Transaction for MemoryTransaction {
    fn read(&mut self, table: &TableName, key: &[Value]) -> Result<Option<Row>, ClusterError> {
        Ok(self.read_with_version(table, key)?.map(|(row, _)| row))
    }

    fn read_exclusive(
        &mut self,
        table: &TableName,
        key: &[Value],
    ) -> Result<Option<Row>, ClusterError> {
        let found = self.read_with_version(table, key)?;
        self.exclusive_reads.push((
            table.clone(),
            key.to_vec(),
            found.as_ref().map(|(_, version)| *version),
        ));
        Ok(found.map(|(row, _)| row))
    }

    fn scan(&mut self, table: &TableName) -> Result<Vec<Row>, ClusterError> {
        let state = lock_state(&self.state)?;
        let table = state
            .tables
            .get(table)
            .ok_or_else(|| ClusterError::NoSuchObject(format!("table {}", table)))?;
        let mut rows: Vec<Row> = table.rows.values().map(|row| row.values.clone()).collect();
        rows.sort();
        Ok(rows)
    }

    fn write(&mut self, table: &TableName, row: Row) -> Result<(), ClusterError> {
        self.operations.push(Operation::Write(table.clone(), row));
        Ok(())
    }

    fn insert(&mut self, table: &TableName, row: Row) -> Result<(), ClusterError> {
        self.operations.push(Operation::Insert(table.clone(), row));
        Ok(())
    }

    fn delete(&mut self, table: &TableName, key: Vec<Value>) -> Result<(), ClusterError> {
        self.operations.push(Operation::Delete(table.clone(), key));
        Ok(())
    }

    fn set_any_value(&mut self, any_value: u32) {
        self.any_value = any_value;
    }

    fn commit(self: Box<Self>) -> Result<Epoch, ClusterError> {
        let MemoryTransaction {
            state,
            operations,
            exclusive_reads,
            any_value,
        } = *self;
        let mut state = lock_state(&state)?;

        if state.injected_failures > 0 {
            state.injected_failures -= 1;
            return Err(ClusterError::temporary("injected lock conflict"));
        }

        for (table, key, version) in &exclusive_reads {
            let current = state
                .tables
                .get(table)
                .and_then(|table| table.rows.get(key))
                .map(|row| row.version);
            if current != *version {
                return Err(ClusterError::temporary(&format!(
                    "row of {} was changed by a concurrent transaction",
                    table
                )));
            }
        }

        validate(&state, &operations)?;

        let epoch = state.open_epoch;
        for operation in operations {
            apply(&mut state, operation, any_value);
        }
        state.close_epoch_unless_held();

        Ok(epoch)
    }
}

/// Checks that every operation can be applied, so that commits apply all or nothing.
fn validate(state: &ClusterState, operations: &[Operation]) -> Result<(), ClusterError> {
    let mut presence: HashMap<(TableName, Vec<Value>), bool> = HashMap::new();

    for operation in operations {
        let (table_name, key, present_after) = match operation {
            Operation::Write(table_name, row) | Operation::Insert(table_name, row) => {
                let table = state
                    .tables
                    .get(table_name)
                    .ok_or_else(|| ClusterError::NoSuchObject(format!("table {}", table_name)))?;
                table.def.validate_row(row)?;
                (table_name, table.def.key_of(row), true)
            }
            Operation::Delete(table_name, key) => {
                if !state.tables.contains_key(table_name) {
                    return Err(ClusterError::NoSuchObject(format!("table {}", table_name)));
                }
                (table_name, key.clone(), false)
            }
        };

        let lookup = (table_name.clone(), key);
        let exists = match presence.get(&lookup) {
            Some(exists) => *exists,
            None => state
                .tables
                .get(table_name)
                .map(|table| table.rows.contains_key(&lookup.1))
                .unwrap_or(false),
        };

        match operation {
            Operation::Insert(..) if exists => {
                return Err(ClusterError::AlreadyExists(format!(
                    "row {:?} of {}",
                    lookup.1, table_name
                )))
            }
            Operation::Delete(..) if !exists => {
                return Err(ClusterError::NoSuchObject(format!(
                    "row {:?} of {}",
                    lookup.1, table_name
                )))
            }
            _ => (),
        }

        presence.insert(lookup, present_after);
    }

    Ok(())
}

fn apply(state: &mut ClusterState, operation: Operation, any_value: u32) {
    let version = state.next_row_version;
    state.next_row_version += 1;

    let (table_name, blob_columns, mut event) = match operation {
        Operation::Write(table_name, row) | Operation::Insert(table_name, row) => {
            let table = match state.tables.get_mut(&table_name) {
                Some(table) => table,
                None => return,
            };
            let key = table.def.key_of(&row);
            let previous = table.rows.insert(
                key,
                StoredRow {
                    values: row.clone(),
                    version,
                },
            );
            let event = match previous {
                Some(previous) => RowEvent {
                    table: table_name.clone(),
                    kind: RowEventKind::Update,
                    changed: previous
                        .values
                        .iter()
                        .zip(row.iter())
                        .map(|(before, after)| before != after)
                        .collect(),
                    before: Some(previous.values),
                    after: Some(row),
                    any_value,
                },
                None => RowEvent {
                    table: table_name.clone(),
                    kind: RowEventKind::Insert,
                    before: None,
                    after: Some(row),
                    changed: vec![],
                    any_value,
                },
            };
            (table_name, table.def.blob_columns(), event)
        }
        Operation::Delete(table_name, key) => {
            let table = match state.tables.get_mut(&table_name) {
                Some(table) => table,
                None => return,
            };
            let previous = match table.rows.remove(&key) {
                Some(previous) => previous,
                None => return,
            };
            let event = RowEvent {
                table: table_name.clone(),
                kind: RowEventKind::Delete,
                before: Some(previous.values),
                after: None,
                changed: vec![],
                any_value,
            };
            (table_name, table.def.blob_columns(), event)
        }
    };

    let mut blobs = vec![];
    for image in vec![event.before.as_mut(), event.after.as_mut()]
        .into_iter()
        .flatten()
    {
        for index in &blob_columns {
            let bytes = match image.get(*index) {
                Some(Value::Bytes(bytes)) => bytes.clone(),
                Some(Value::Text(text)) => text.as_bytes().to_vec(),
                _ => continue,
            };
            let id = state.next_blob_id;
            state.next_blob_id += 1;
            image[*index] = Value::Blob(BlobRef {
                id,
                len: bytes.len(),
            });
            blobs.push((id, bytes));
        }
    }

    state.pending.push(PendingEvent {
        target: Target::Table(table_name),
        event: StreamEvent {
            event: ClusterEvent::Row(event),
            blobs,
        },
    });
}
