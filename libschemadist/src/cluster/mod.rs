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

//! Interface to the shared, replicated storage cluster.
//!
//! The storage cluster is an external collaborator: it stores the coordination tables and all
//! user tables, runs transactions against them, and delivers every committed change to the
//! front-end nodes as an ordered stream of epochs. This module only defines the narrow interface
//! the rest of the library depends on; an in-memory implementation lives in
//! [`memory`](memory/index.html).

mod error;
#[cfg(feature = "memory")]
pub mod memory;

use std::fmt;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::error::InvalidArgumentError;

pub use self::error::ClusterError;

/// Identifies a front-end node attached to the cluster.
pub type NodeId = u32;

/// Identifies a data shard (data node) of the cluster.
pub type ShardId = u32;

/// Cluster-wide, monotonically increasing identifier of one committed batch of changes.
pub type Epoch = u64;

/// A fully-qualified table name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    db: String,
    name: String,
}

impl TableName {
    pub fn new(db: &str, name: &str) -> Self {
        TableName {
            db: db.to_string(),
            name: name.to_string(),
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.name)
    }
}

/// Reference to a blob value attached to a row event.
///
/// The referenced bytes are only readable, through [`EventStream::read_blob_into`], while the
/// event carrying the reference is the current event of its stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobRef {
    pub id: u64,
    pub len: usize,
}

/// A single column value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Null,
    UInt(u64),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Blob(BlobRef),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(value) => Some(*value),
            Value::Int(value) if *value >= 0 => Some(*value as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(value) => Some(value),
            Value::Text(value) => Some(value.as_bytes()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

pub type Row = Vec<Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    UInt,
    Int,
    Text { max_len: usize },
    Bytes { max_len: usize },
    Blob,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    name: String,
    column_type: ColumnType,
    nullable: bool,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        ColumnDef {
            name: name.to_string(),
            column_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Maximum length of a text or bytes column.
    pub fn max_len(&self) -> Option<usize> {
        match self.column_type {
            ColumnType::Text { max_len } | ColumnType::Bytes { max_len } => Some(max_len),
            _ => None,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self.column_type, value) {
            (_, Value::Null) => self.nullable,
            (ColumnType::UInt, Value::UInt(_)) => true,
            (ColumnType::Int, Value::Int(_)) => true,
            (ColumnType::Text { max_len }, Value::Text(text)) => text.len() <= max_len,
            (ColumnType::Bytes { max_len }, Value::Bytes(bytes)) => bytes.len() <= max_len,
            (ColumnType::Blob, Value::Bytes(_)) | (ColumnType::Blob, Value::Text(_)) => true,
            (ColumnType::Blob, Value::Blob(_)) => true,
            _ => false,
        }
    }
}

/// Definition of a table as stored in the cluster dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    name: TableName,
    id: u32,
    version: u32,
    columns: Vec<ColumnDef>,
    primary_key: Vec<usize>,
}

impl TableDef {
    pub fn builder() -> TableDefBuilder {
        TableDefBuilder::default()
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    /// Tables without a declared primary key are identified by their full row.
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn blob_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.column_type == ColumnType::Blob)
            .map(|(index, _)| index)
            .collect()
    }

    /// Extracts the key identifying `row`.
    pub fn key_of(&self, row: &[Value]) -> Vec<Value> {
        if self.primary_key.is_empty() {
            row.to_vec()
        } else {
            self.primary_key
                .iter()
                .map(|index| row.get(*index).cloned().unwrap_or(Value::Null))
                .collect()
        }
    }

    /// Returns a copy of this definition with a different name, as after a rename.
    pub fn renamed(&self, name: TableName) -> TableDef {
        TableDef {
            name,
            ..self.clone()
        }
    }

    pub fn validate_row(&self, row: &[Value]) -> Result<(), ClusterError> {
        if row.len() != self.columns.len() {
            return Err(ClusterError::SchemaMismatch(format!(
                "{} has {} columns, row has {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }

        for (column, value) in self.columns.iter().zip(row.iter()) {
            if !column.accepts(value) {
                return Err(ClusterError::SchemaMismatch(format!(
                    "value {:?} does not fit column {}.{}",
                    value, self.name, column.name
                )));
            }
        }

        Ok(())
    }
}

/// Builds a `TableDef`.
#[derive(Default)]
pub struct TableDefBuilder {
    name: Option<TableName>,
    id: Option<u32>,
    version: Option<u32>,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
}

impl TableDefBuilder {
    pub fn with_name(mut self, name: TableName) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|column| column.to_string()).collect();
        self
    }

    pub fn build(self) -> Result<TableDef, InvalidArgumentError> {
        let name = self.name.ok_or_else(|| {
            InvalidArgumentError::new("name".to_string(), "a table name is required".to_string())
        })?;

        if self.columns.is_empty() {
            return Err(InvalidArgumentError::new(
                "columns".to_string(),
                format!("{} must have at least one column", name),
            ));
        }

        let mut primary_key = Vec::with_capacity(self.primary_key.len());
        for key_column in &self.primary_key {
            let index = self
                .columns
                .iter()
                .position(|column| &column.name == key_column)
                .ok_or_else(|| {
                    InvalidArgumentError::new(
                        "primary_key".to_string(),
                        format!("{} has no column {}", name, key_column),
                    )
                })?;
            if self.columns[index].column_type == ColumnType::Blob {
                return Err(InvalidArgumentError::new(
                    "primary_key".to_string(),
                    format!("blob column {} cannot be part of a key", key_column),
                ));
            }
            primary_key.push(index);
        }

        Ok(TableDef {
            name,
            id: self.id.unwrap_or(0),
            version: self.version.unwrap_or(0),
            columns: self.columns,
            primary_key,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowEventKind {
    Insert,
    Update,
    Delete,
}

/// A committed change to one row.
#[derive(Clone, Debug, PartialEq)]
pub struct RowEvent {
    pub table: TableName,
    pub kind: RowEventKind,
    /// Row image before the change; present for updates and deletes.
    pub before: Option<Row>,
    /// Row image after the change; present for inserts and updates.
    pub after: Option<Row>,
    /// Per column, whether an update changed its value. Empty for inserts and deletes.
    pub changed: Vec<bool>,
    /// Raw any-value tag of the operation which made the change.
    pub any_value: u32,
}

/// An event delivered by an `EventStream`.
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterEvent {
    Row(RowEvent),
    /// `node` subscribed to changes of `table` on `shard`.
    Subscribe {
        table: TableName,
        shard: ShardId,
        node: NodeId,
    },
    /// `node` stopped receiving changes of `table` from `shard`.
    Unsubscribe {
        table: TableName,
        shard: ShardId,
        node: NodeId,
    },
    /// A data shard failed; every subscription it served is gone.
    ShardFailure { shard: ShardId },
    /// A front-end node failed.
    NodeFailure { node: NodeId },
}

/// A transaction against the cluster.
///
/// Operations are buffered and take effect atomically on `commit`.
pub trait Transaction {
    /// Reads the committed row with the given key.
    fn read(&mut self, table: &TableName, key: &[Value]) -> Result<Option<Row>, ClusterError>;

    /// Reads the committed row with the given key and holds it exclusively; the commit fails with
    /// a temporary error if the row was changed by someone else in the meantime.
    fn read_exclusive(
        &mut self,
        table: &TableName,
        key: &[Value],
    ) -> Result<Option<Row>, ClusterError>;

    /// Reads every committed row of `table`.
    fn scan(&mut self, table: &TableName) -> Result<Vec<Row>, ClusterError>;

    /// Inserts the row, replacing any existing row with the same key.
    fn write(&mut self, table: &TableName, row: Row) -> Result<(), ClusterError>;

    /// Inserts the row; the commit fails if a row with the same key exists.
    fn insert(&mut self, table: &TableName, row: Row) -> Result<(), ClusterError>;

    /// Deletes the row with the given key.
    fn delete(&mut self, table: &TableName, key: Vec<Value>) -> Result<(), ClusterError>;

    /// Sets the any-value tag attached to every operation of this transaction.
    fn set_any_value(&mut self, any_value: u32);

    /// Commits the transaction, returning the epoch it became part of.
    fn commit(self: Box<Self>) -> Result<Epoch, ClusterError>;
}

/// An ordered stream of committed epochs for the tables a node subscribed to.
pub trait EventStream: Send {
    fn node_id(&self) -> NodeId;

    /// Waits up to `timeout` for a completed epoch and returns the oldest one not yet consumed.
    fn poll_epoch(&mut self, timeout: Duration) -> Result<Option<Epoch>, ClusterError>;

    /// Returns the next event of `epoch`. Returns `None` once the epoch is exhausted, or if
    /// `epoch` is not the oldest pending epoch; events of later epochs stay queued.
    fn next_event(&mut self, epoch: Epoch) -> Option<ClusterEvent>;

    /// The most recent epoch received by this stream.
    fn latest_epoch(&self) -> Epoch;

    fn subscribe(&mut self, table: &TableName) -> Result<(), ClusterError>;

    fn unsubscribe(&mut self, table: &TableName) -> Result<(), ClusterError>;

    fn is_subscribed(&self, table: &TableName) -> bool;

    /// Copies a blob value of the current event into `buffer`.
    fn read_blob_into(&self, blob: &BlobRef, buffer: &mut Vec<u8>) -> Result<(), ClusterError>;
}

/// The storage cluster.
pub trait Cluster: Send + Sync {
    fn begin(&self) -> Result<Box<dyn Transaction>, ClusterError>;

    /// Forces the current epoch to complete so that committed changes propagate promptly.
    fn force_gcp(&self) -> Result<(), ClusterError>;

    fn table_def(&self, table: &TableName) -> Result<Option<TableDef>, ClusterError>;

    fn list_tables(&self) -> Result<Vec<TableDef>, ClusterError>;

    fn create_table(&self, def: TableDef) -> Result<(), ClusterError>;

    fn create_event_stream(&self, node: NodeId) -> Result<Box<dyn EventStream>, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableDef {
        TableDef::builder()
            .with_name(TableName::new("shop", "orders"))
            .with_id(4)
            .with_version(2)
            .with_column(ColumnDef::new("id", ColumnType::UInt))
            .with_column(ColumnDef::new("note", ColumnType::Text { max_len: 8 }).nullable())
            .with_column(ColumnDef::new("body", ColumnType::Blob).nullable())
            .with_primary_key(&["id"])
            .build()
            .expect("Unable to build table definition")
    }

    /// Verifies that the builder resolves key columns and rejects unknown or blob key columns.
    #[test]
    fn test_table_def_builder() {
        let def = orders();
        assert_eq!(def.primary_key(), &[0]);
        assert_eq!(def.blob_columns(), vec![2]);
        assert_eq!(def.column("note").and_then(ColumnDef::max_len), Some(8));

        assert!(TableDef::builder()
            .with_name(TableName::new("shop", "orders"))
            .with_column(ColumnDef::new("id", ColumnType::UInt))
            .with_primary_key(&["missing"])
            .build()
            .is_err());

        assert!(TableDef::builder()
            .with_name(TableName::new("shop", "orders"))
            .with_column(ColumnDef::new("body", ColumnType::Blob))
            .with_primary_key(&["body"])
            .build()
            .is_err());
    }

    /// Verifies row validation against column types, lengths and nullability.
    #[test]
    fn test_validate_row() {
        let def = orders();
        assert!(def
            .validate_row(&[Value::UInt(1), Value::Null, Value::Null])
            .is_ok());
        assert!(def
            .validate_row(&[Value::Null, Value::Null, Value::Null])
            .is_err());
        assert!(def
            .validate_row(&[
                Value::UInt(1),
                Value::Text("much too long".into()),
                Value::Null
            ])
            .is_err());
        assert!(def.validate_row(&[Value::UInt(1)]).is_err());
    }

    /// Verifies that tables without a primary key are keyed by the whole row.
    #[test]
    fn test_key_of() {
        let def = orders();
        let row = vec![Value::UInt(9), Value::Null, Value::Bytes(vec![1])];
        assert_eq!(def.key_of(&row), vec![Value::UInt(9)]);

        let heap = TableDef::builder()
            .with_name(TableName::new("shop", "log"))
            .with_column(ColumnDef::new("line", ColumnType::Text { max_len: 20 }))
            .build()
            .unwrap();
        let row = vec![Value::Text("x".into())];
        assert!(!heap.has_primary_key());
        assert_eq!(heap.key_of(&row), row);
    }
}
