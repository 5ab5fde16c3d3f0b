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

//! The participant role: applying operations to the local catalog.

use crate::any_value::AnyValue;
use crate::binlog::QueryEvent;
use crate::catalog::{CatalogError, MdlKey};
use crate::cluster::{EventStream, TableName};
use crate::error::InvalidArgumentError;

use super::super::error::SchemaDistError;
use super::super::result::ResultCode;
use super::super::table::{decode_rename_target, SchemaOpRow, SchemaOpType};
use super::{Role, SchemaEventHandler};

impl SchemaEventHandler {
    /// Handles an operation row written by another node.
    pub(super) fn participate(
        &mut self,
        row: SchemaOpRow,
        any_value: AnyValue,
        data_stream: &mut dyn EventStream,
    ) -> Result<(), SchemaDistError> {
        debug!(
            "Participating in {} {} from node {}",
            row.op_type,
            row.key(),
            row.origin_node_id
        );
        self.apply_or_queue(row, any_value, Role::Participant, data_stream)
    }

    /// Reports the local result to the coordinator. Only a broken coordination row stops the
    /// event loop; other failures to acknowledge are left to the coordinator's timeout.
    pub(super) fn acknowledge(
        &self,
        row: &SchemaOpRow,
        code: ResultCode,
        message: &str,
    ) -> Result<(), SchemaDistError> {
        match self
            .acknowledger
            .ack(row, self.context.node_id(), code, message)
        {
            Ok(()) => Ok(()),
            Err(err @ SchemaDistError::ProtocolError(_)) => Err(err),
            Err(err) => {
                error!("Unable to acknowledge {}: {}", row.key(), err);
                Ok(())
            }
        }
    }

    /// Applies `row` locally and returns the result to report for this node.
    pub(super) fn apply_local(
        &mut self,
        row: &SchemaOpRow,
        any_value: AnyValue,
        data_stream: &mut dyn EventStream,
    ) -> (ResultCode, String) {
        match self.apply_locked(row, any_value, data_stream) {
            Ok(()) => {
                self.context.stats().op_applied();
                (ResultCode::Success, String::new())
            }
            Err(err) => {
                self.context.stats().apply_failed();
                warn!("Failed to apply {} {}: {}", row.op_type, row.key(), err);
                (ResultCode::SchemaOpFailure, err.to_string())
            }
        }
    }

    fn apply_locked(
        &mut self,
        row: &SchemaOpRow,
        any_value: AnyValue,
        data_stream: &mut dyn EventStream,
    ) -> Result<(), SchemaDistError> {
        let ticket = match mdl_key(row) {
            Some(key) => Some(
                self.locks
                    .lock_exclusive(&key, self.context.config().lock_wait_timeout())?,
            ),
            None => None,
        };
        let result = self.apply_op(row, data_stream);
        if let Some(ticket) = ticket {
            self.locks.release(ticket);
        }
        result?;

        self.log_statement(row, any_value)
    }

    fn apply_op(
        &mut self,
        row: &SchemaOpRow,
        data_stream: &mut dyn EventStream,
    ) -> Result<(), SchemaDistError> {
        let binlog_enabled = self.context.config().binlog_enabled();
        let table = row.key().table_name();

        match row.op_type {
            SchemaOpType::CreateTable
            | SchemaOpType::AlterTableCommit
            | SchemaOpType::TruncateTable => {
                let def = self.cluster.table_def(&table)?.ok_or_else(|| {
                    CatalogError::NotFound(format!("table {} in cluster dictionary", table))
                })?;
                self.catalog.install_table(&def)?;
                if binlog_enabled && !data_stream.is_subscribed(&table) {
                    data_stream.subscribe(&table)?;
                }
            }
            SchemaOpType::DropTable => {
                if !self.catalog.remove_table(&table)? {
                    debug!("Table {} was not installed locally", table);
                }
                if data_stream.is_subscribed(&table) {
                    data_stream.unsubscribe(&table)?;
                }
            }
            SchemaOpType::RenameTablePrepare => {
                let target = decode_rename_target(&row.payload).ok_or_else(|| {
                    InvalidArgumentError::new(
                        "payload".into(),
                        format!("invalid rename target {:?}", row.payload),
                    )
                })?;
                self.prepared_renames
                    .insert((row.db.clone(), row.name.clone()), target);
            }
            SchemaOpType::RenameTable => {
                let target = self
                    .prepared_renames
                    .remove(&(row.db.clone(), row.name.clone()))
                    .ok_or_else(|| {
                        SchemaDistError::ProtocolError(format!(
                            "rename of {} was not prepared",
                            table
                        ))
                    })?;
                self.catalog.rename_table(&table, &target)?;
                if data_stream.is_subscribed(&table) {
                    data_stream.unsubscribe(&table)?;
                }
                if binlog_enabled && !data_stream.is_subscribed(&target) {
                    data_stream.subscribe(&target)?;
                }
            }
            SchemaOpType::CreateDb => self.catalog.create_database(&row.db, &row.payload)?,
            SchemaOpType::AlterDb => self.catalog.alter_database(&row.db, &row.payload)?,
            SchemaOpType::DropDb => {
                let tables: Vec<TableName> = self
                    .catalog
                    .list_tables()?
                    .into_iter()
                    .map(|def| def.name().clone())
                    .filter(|name| name.db() == row.db)
                    .collect();
                if !self.catalog.drop_database(&row.db)? {
                    debug!("Database {} did not exist locally", row.db);
                }
                for table in tables {
                    if data_stream.is_subscribed(&table) {
                        data_stream.unsubscribe(&table)?;
                    }
                }
            }
            SchemaOpType::CreateTablespace | SchemaOpType::AlterTablespace => self
                .catalog
                .install_tablespace(&row.name, row.object_id, row.object_version)?,
            SchemaOpType::DropTablespace => {
                self.catalog.remove_tablespace(&row.name)?;
            }
            SchemaOpType::CreateLogfileGroup | SchemaOpType::AlterLogfileGroup => self
                .catalog
                .install_logfile_group(&row.name, row.object_id, row.object_version)?,
            SchemaOpType::DropLogfileGroup => {
                self.catalog.remove_logfile_group(&row.name)?;
            }
            SchemaOpType::AclStatement => self.catalog.apply_acl_statement(&row.payload)?,
            SchemaOpType::AclSnapshot => {
                let users: Vec<String> = row
                    .payload
                    .split(',')
                    .map(str::trim)
                    .filter(|user| !user.is_empty())
                    .map(String::from)
                    .collect();
                self.catalog.refresh_acl_snapshot(&users)?;
            }
            SchemaOpType::ClearSlock => (),
        }

        Ok(())
    }

    /// Writes the statement of `row` to the replication log, attributed to the server the tag
    /// of its operation row names.
    fn log_statement(&self, row: &SchemaOpRow, any_value: AnyValue) -> Result<(), SchemaDistError> {
        let config = self.context.config();
        if !config.binlog_enabled() || !row.op_type.is_logged() {
            return Ok(());
        }
        let server_id = match any_value
            .logging_server_id(self.context.server_id(), config.log_replica_updates())
        {
            Some(server_id) => server_id,
            None => {
                trace!("Not logging {} {}", row.op_type, row.key());
                return Ok(());
            }
        };

        self.log.write_query(QueryEvent {
            db: row.db.clone(),
            query: row.payload.clone(),
            server_id,
            epoch: self.current_epoch,
        })?;
        Ok(())
    }
}

fn mdl_key(row: &SchemaOpRow) -> Option<MdlKey> {
    match row.op_type {
        SchemaOpType::CreateTable
        | SchemaOpType::AlterTableCommit
        | SchemaOpType::TruncateTable
        | SchemaOpType::DropTable
        | SchemaOpType::RenameTablePrepare
        | SchemaOpType::RenameTable => Some(MdlKey::Table(row.key().table_name())),
        SchemaOpType::CreateDb | SchemaOpType::AlterDb | SchemaOpType::DropDb => {
            Some(MdlKey::Schema(row.db.clone()))
        }
        SchemaOpType::CreateTablespace
        | SchemaOpType::AlterTablespace
        | SchemaOpType::DropTablespace => Some(MdlKey::Tablespace(row.name.clone())),
        SchemaOpType::CreateLogfileGroup
        | SchemaOpType::AlterLogfileGroup
        | SchemaOpType::DropLogfileGroup => Some(MdlKey::LogfileGroup(row.name.clone())),
        SchemaOpType::AclStatement | SchemaOpType::AclSnapshot => Some(MdlKey::Acl),
        SchemaOpType::ClearSlock => None,
    }
}
