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

//! Layout of the shared tables used as transport for schema operations.

use std::fmt;

use crate::bitmap::{NodeBitmap, NODE_BITMAP_BYTES};
use crate::cluster::{ColumnDef, ColumnType, Epoch, NodeId, Row, TableDef, TableName, Value};
use crate::error::{InvalidArgumentError, InvalidStateError};

use super::result::ResultCode;

pub const SCHEMADIST_DB: &str = "schemadist";
pub const SCHEMA_OPS_TABLE: &str = "schema_ops";
pub const RESULTS_TABLE: &str = "schema_op_results";
pub const APPLY_STATUS_TABLE: &str = "apply_status";

const MAX_DB_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_MESSAGE_LEN: usize = 255;
const MAX_LOG_NAME_LEN: usize = 255;

const COL_SCHEMA_NAME: usize = 0;
const COL_OBJECT_NAME: usize = 1;
const COL_LOCK_BITMAP: usize = 2;
const COL_PAYLOAD: usize = 3;
const COL_ORIGIN_NODE_ID: usize = 4;
const COL_EPOCH: usize = 5;
const COL_OBJECT_ID: usize = 6;
const COL_OBJECT_VERSION: usize = 7;
const COL_OP_TYPE: usize = 8;
const COL_OP_ID: usize = 9;

pub fn schema_ops_table() -> TableName {
    TableName::new(SCHEMADIST_DB, SCHEMA_OPS_TABLE)
}

pub fn results_table() -> TableName {
    TableName::new(SCHEMADIST_DB, RESULTS_TABLE)
}

pub fn apply_status_table() -> TableName {
    TableName::new(SCHEMADIST_DB, APPLY_STATUS_TABLE)
}

/// Tables of the schema distribution itself are never treated as user tables.
pub fn is_internal_table(table: &TableName) -> bool {
    table.db() == SCHEMADIST_DB
}

/// Definition of the coordination table. Tables created without `op_id` only support the
/// bitmap acknowledgment protocol.
pub fn schema_ops_def(with_op_id: bool) -> Result<TableDef, InvalidArgumentError> {
    let builder = TableDef::builder()
        .with_name(schema_ops_table())
        .with_column(ColumnDef::new(
            "schema_name",
            ColumnType::Text { max_len: MAX_DB_LEN },
        ))
        .with_column(ColumnDef::new(
            "object_name",
            ColumnType::Text {
                max_len: MAX_NAME_LEN,
            },
        ))
        .with_column(ColumnDef::new(
            "lock_bitmap",
            ColumnType::Bytes {
                max_len: NODE_BITMAP_BYTES,
            },
        ))
        .with_column(ColumnDef::new("payload", ColumnType::Blob))
        .with_column(ColumnDef::new("origin_node_id", ColumnType::UInt))
        .with_column(ColumnDef::new("epoch", ColumnType::UInt))
        .with_column(ColumnDef::new("object_id", ColumnType::UInt))
        .with_column(ColumnDef::new("object_version", ColumnType::UInt))
        .with_column(ColumnDef::new("op_type", ColumnType::UInt));

    let builder = if with_op_id {
        builder.with_column(ColumnDef::new("op_id", ColumnType::UInt).nullable())
    } else {
        builder
    };

    builder
        .with_primary_key(&["schema_name", "object_name"])
        .build()
}

pub fn results_def() -> Result<TableDef, InvalidArgumentError> {
    TableDef::builder()
        .with_name(results_table())
        .with_column(ColumnDef::new("origin_node_id", ColumnType::UInt))
        .with_column(ColumnDef::new("op_id", ColumnType::UInt))
        .with_column(ColumnDef::new("participant_node_id", ColumnType::UInt))
        .with_column(ColumnDef::new("result_code", ColumnType::UInt))
        .with_column(ColumnDef::new(
            "message",
            ColumnType::Text {
                max_len: MAX_MESSAGE_LEN,
            },
        ))
        .with_primary_key(&["origin_node_id", "op_id", "participant_node_id"])
        .build()
}

pub fn apply_status_def() -> Result<TableDef, InvalidArgumentError> {
    TableDef::builder()
        .with_name(apply_status_table())
        .with_column(ColumnDef::new("node_id", ColumnType::UInt))
        .with_column(ColumnDef::new("epoch", ColumnType::UInt))
        .with_column(ColumnDef::new(
            "log_name",
            ColumnType::Text {
                max_len: MAX_LOG_NAME_LEN,
            },
        ))
        .with_column(ColumnDef::new("start_offset", ColumnType::UInt))
        .with_column(ColumnDef::new("end_offset", ColumnType::UInt))
        .with_primary_key(&["node_id"])
        .build()
}

/// Kind of a schema operation, with the numeric codes stored in the coordination table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaOpType {
    DropTable,
    CreateTable,
    AlterTableCommit,
    DropDb,
    CreateDb,
    AlterDb,
    ClearSlock,
    RenameTable,
    TruncateTable,
    RenameTablePrepare,
    CreateTablespace,
    AlterTablespace,
    DropTablespace,
    CreateLogfileGroup,
    AlterLogfileGroup,
    DropLogfileGroup,
    AclSnapshot,
    AclStatement,
}

impl SchemaOpType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => SchemaOpType::DropTable,
            1 => SchemaOpType::CreateTable,
            3 => SchemaOpType::AlterTableCommit,
            4 => SchemaOpType::DropDb,
            5 => SchemaOpType::CreateDb,
            6 => SchemaOpType::AlterDb,
            7 => SchemaOpType::ClearSlock,
            10 => SchemaOpType::RenameTable,
            11 => SchemaOpType::TruncateTable,
            12 => SchemaOpType::RenameTablePrepare,
            20 => SchemaOpType::CreateTablespace,
            21 => SchemaOpType::AlterTablespace,
            22 => SchemaOpType::DropTablespace,
            23 => SchemaOpType::CreateLogfileGroup,
            24 => SchemaOpType::AlterLogfileGroup,
            25 => SchemaOpType::DropLogfileGroup,
            26 => SchemaOpType::AclSnapshot,
            27 => SchemaOpType::AclStatement,
            _ => return None,
        })
    }

    pub fn code(&self) -> u32 {
        match self {
            SchemaOpType::DropTable => 0,
            SchemaOpType::CreateTable => 1,
            SchemaOpType::AlterTableCommit => 3,
            SchemaOpType::DropDb => 4,
            SchemaOpType::CreateDb => 5,
            SchemaOpType::AlterDb => 6,
            SchemaOpType::ClearSlock => 7,
            SchemaOpType::RenameTable => 10,
            SchemaOpType::TruncateTable => 11,
            SchemaOpType::RenameTablePrepare => 12,
            SchemaOpType::CreateTablespace => 20,
            SchemaOpType::AlterTablespace => 21,
            SchemaOpType::DropTablespace => 22,
            SchemaOpType::CreateLogfileGroup => 23,
            SchemaOpType::AlterLogfileGroup => 24,
            SchemaOpType::DropLogfileGroup => 25,
            SchemaOpType::AclSnapshot => 26,
            SchemaOpType::AclStatement => 27,
        }
    }

    /// Operations changing the identity of an existing object are applied only after all data
    /// events of their epoch have been injected.
    pub fn is_post_epoch(&self) -> bool {
        matches!(
            self,
            SchemaOpType::DropTable
                | SchemaOpType::RenameTable
                | SchemaOpType::AlterTableCommit
                | SchemaOpType::DropDb
                | SchemaOpType::DropTablespace
                | SchemaOpType::DropLogfileGroup
        )
    }

    /// Whether participants write the statement to their replication log.
    pub fn is_logged(&self) -> bool {
        !matches!(
            self,
            SchemaOpType::ClearSlock | SchemaOpType::RenameTablePrepare | SchemaOpType::AclSnapshot
        )
    }
}

impl fmt::Display for SchemaOpType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SchemaOpType::DropTable => "DROP_TABLE",
            SchemaOpType::CreateTable => "CREATE_TABLE",
            SchemaOpType::AlterTableCommit => "ALTER_TABLE_COMMIT",
            SchemaOpType::DropDb => "DROP_DB",
            SchemaOpType::CreateDb => "CREATE_DB",
            SchemaOpType::AlterDb => "ALTER_DB",
            SchemaOpType::ClearSlock => "CLEAR_SLOCK",
            SchemaOpType::RenameTable => "RENAME_TABLE",
            SchemaOpType::TruncateTable => "TRUNCATE_TABLE",
            SchemaOpType::RenameTablePrepare => "RENAME_TABLE_PREPARE",
            SchemaOpType::CreateTablespace => "CREATE_TABLESPACE",
            SchemaOpType::AlterTablespace => "ALTER_TABLESPACE",
            SchemaOpType::DropTablespace => "DROP_TABLESPACE",
            SchemaOpType::CreateLogfileGroup => "CREATE_LOGFILE_GROUP",
            SchemaOpType::AlterLogfileGroup => "ALTER_LOGFILE_GROUP",
            SchemaOpType::DropLogfileGroup => "DROP_LOGFILE_GROUP",
            SchemaOpType::AclSnapshot => "ACL_SNAPSHOT",
            SchemaOpType::AclStatement => "ACL_STATEMENT",
        };
        f.write_str(name)
    }
}

/// Identity of one schema operation: the object it changes, together with the id and version
/// the object has after the change.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SchemaOpKey {
    pub db: String,
    pub name: String,
    pub id: u32,
    pub version: u32,
}

impl SchemaOpKey {
    pub fn new(db: &str, name: &str, id: u32, version: u32) -> Self {
        SchemaOpKey {
            db: db.to_string(),
            name: name.to_string(),
            id,
            version,
        }
    }

    /// Key of the coordination table row carrying this operation.
    pub fn object(&self) -> (String, String) {
        (self.db.clone(), self.name.clone())
    }

    pub fn table_name(&self) -> TableName {
        TableName::new(&self.db, &self.name)
    }
}

impl fmt::Display for SchemaOpKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}({}/{})", self.db, self.name, self.id, self.version)
    }
}

/// Column limits and capabilities of the coordination table found in the cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinationLayout {
    max_db_len: usize,
    max_name_len: usize,
    uses_op_id: bool,
}

impl CoordinationLayout {
    pub fn from_def(def: &TableDef) -> Result<Self, InvalidStateError> {
        let max_len = |column: &str| {
            def.column(column)
                .and_then(ColumnDef::max_len)
                .ok_or_else(|| {
                    InvalidStateError::with_message(format!(
                        "coordination table {} has no usable {} column",
                        def.name(),
                        column
                    ))
                })
        };

        let max_db_len = max_len("schema_name")?;
        let max_name_len = max_len("object_name")?;

        for (index, column) in [
            "lock_bitmap",
            "payload",
            "origin_node_id",
            "epoch",
            "object_id",
            "object_version",
            "op_type",
        ]
        .iter()
        .enumerate()
        {
            if def.column_index(column) != Some(index + COL_LOCK_BITMAP) {
                return Err(InvalidStateError::with_message(format!(
                    "coordination table {} has an unexpected layout at column {}",
                    def.name(),
                    column
                )));
            }
        }

        Ok(CoordinationLayout {
            max_db_len,
            max_name_len,
            uses_op_id: def.column_index("op_id") == Some(COL_OP_ID),
        })
    }

    pub fn max_db_len(&self) -> usize {
        self.max_db_len
    }

    pub fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    /// Whether operations carry an id and are acknowledged through the result table.
    pub fn uses_op_id(&self) -> bool {
        self.uses_op_id
    }
}

/// One row of the coordination table.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaOpRow {
    pub db: String,
    pub name: String,
    pub lock_bitmap: NodeBitmap,
    pub payload: String,
    pub origin_node_id: NodeId,
    pub epoch: Epoch,
    pub object_id: u32,
    pub object_version: u32,
    pub op_type: SchemaOpType,
    pub op_id: Option<u32>,
}

impl SchemaOpRow {
    pub fn key(&self) -> SchemaOpKey {
        SchemaOpKey::new(&self.db, &self.name, self.object_id, self.object_version)
    }

    /// Whether `other` describes the same operation: same object, id, version and origin.
    pub fn is_same_op(&self, other: &SchemaOpRow) -> bool {
        self.key() == other.key()
            && self.origin_node_id == other.origin_node_id
            && (self.op_id.is_none() || other.op_id.is_none() || self.op_id == other.op_id)
    }

    /// The primary key of this row.
    pub fn primary_key(&self) -> Vec<Value> {
        vec![
            Value::Text(self.db.clone()),
            Value::Text(self.name.clone()),
        ]
    }

    pub fn to_row(&self, layout: &CoordinationLayout) -> Row {
        let mut row = vec![
            Value::Text(self.db.clone()),
            Value::Text(self.name.clone()),
            Value::Bytes(self.lock_bitmap.to_bytes()),
            Value::Bytes(self.payload.as_bytes().to_vec()),
            Value::UInt(self.origin_node_id as u64),
            Value::UInt(self.epoch),
            Value::UInt(self.object_id as u64),
            Value::UInt(self.object_version as u64),
            Value::UInt(self.op_type.code() as u64),
        ];
        if layout.uses_op_id {
            row.push(self.op_id.map(|id| Value::UInt(id as u64)).unwrap_or(Value::Null));
        }
        row
    }

    /// Parses a row read from the table, or taken from an event whose blob values have been
    /// resolved.
    pub fn from_row(row: &[Value]) -> Result<Self, InvalidArgumentError> {
        let text = |index: usize, column: &str| {
            row.get(index)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| invalid_column(column))
        };
        let uint = |index: usize, column: &str| {
            row.get(index)
                .and_then(Value::as_u64)
                .ok_or_else(|| invalid_column(column))
        };

        let lock_bitmap = row
            .get(COL_LOCK_BITMAP)
            .and_then(Value::as_bytes)
            .ok_or_else(|| invalid_column("lock_bitmap"))
            .and_then(NodeBitmap::from_bytes)?;

        let payload = match row.get(COL_PAYLOAD) {
            Some(Value::Null) => String::new(),
            Some(value) => value
                .as_bytes()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .ok_or_else(|| invalid_column("payload"))?,
            None => return Err(invalid_column("payload")),
        };

        let op_type_code = uint(COL_OP_TYPE, "op_type")? as u32;
        let op_type = SchemaOpType::from_code(op_type_code).ok_or_else(|| {
            InvalidArgumentError::new(
                "op_type".to_string(),
                format!("unknown schema operation type {}", op_type_code),
            )
        })?;

        let op_id = match row.get(COL_OP_ID) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_u64().ok_or_else(|| invalid_column("op_id"))? as u32),
        };

        Ok(SchemaOpRow {
            db: text(COL_SCHEMA_NAME, "schema_name")?,
            name: text(COL_OBJECT_NAME, "object_name")?,
            lock_bitmap,
            payload,
            origin_node_id: uint(COL_ORIGIN_NODE_ID, "origin_node_id")? as NodeId,
            epoch: uint(COL_EPOCH, "epoch")?,
            object_id: uint(COL_OBJECT_ID, "object_id")? as u32,
            object_version: uint(COL_OBJECT_VERSION, "object_version")? as u32,
            op_type,
            op_id,
        })
    }
}

/// One row of the result table.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRow {
    pub origin_node_id: NodeId,
    pub op_id: u32,
    pub participant_node_id: NodeId,
    pub code: ResultCode,
    pub message: String,
}

impl ResultRow {
    pub fn to_row(&self) -> Row {
        vec![
            Value::UInt(self.origin_node_id as u64),
            Value::UInt(self.op_id as u64),
            Value::UInt(self.participant_node_id as u64),
            Value::UInt(self.code.code() as u64),
            Value::Text(truncate(&self.message, MAX_MESSAGE_LEN)),
        ]
    }

    pub fn from_row(row: &[Value]) -> Result<Self, InvalidArgumentError> {
        let uint = |index: usize, column: &str| {
            row.get(index)
                .and_then(Value::as_u64)
                .ok_or_else(|| invalid_column(column))
        };

        Ok(ResultRow {
            origin_node_id: uint(0, "origin_node_id")? as NodeId,
            op_id: uint(1, "op_id")? as u32,
            participant_node_id: uint(2, "participant_node_id")? as NodeId,
            code: ResultCode::from_code(uint(3, "result_code")? as u32),
            message: row
                .get(4)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    pub fn primary_key(&self) -> Vec<Value> {
        vec![
            Value::UInt(self.origin_node_id as u64),
            Value::UInt(self.op_id as u64),
            Value::UInt(self.participant_node_id as u64),
        ]
    }
}

/// Encodes the new name staged by a rename prepare.
pub fn encode_rename_target(table: &TableName) -> String {
    format!("./{}/{}", table.db(), table.name())
}

pub fn decode_rename_target(payload: &str) -> Option<TableName> {
    let mut parts = payload.strip_prefix("./")?.splitn(2, '/');
    let db = parts.next().filter(|db| !db.is_empty())?;
    let name = parts.next().filter(|name| !name.is_empty())?;
    Some(TableName::new(db, name))
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn invalid_column(column: &str) -> InvalidArgumentError {
    InvalidArgumentError::new(
        column.to_string(),
        "missing or has an unexpected type".to_string(),
    )
}
