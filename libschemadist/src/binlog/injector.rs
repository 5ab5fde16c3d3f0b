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

//! Conversion of the cluster's row events into replication log transactions.

#[cfg(feature = "compression")]
use std::io::Cursor;
use std::sync::Arc;

use crate::any_value::AnyValue;
use crate::catalog::LocalCatalog;
use crate::cluster::{ClusterError, Epoch, EventStream, RowEvent, RowEventKind, Value};
use crate::sdist::table::apply_status_table;
use crate::sdist::{SchemaDistContext, SchemaDistError};

use super::{
    EpochRecord, EventLoopError, LogPayload, LogRow, LogRowKind, LogTransaction, ReplicationLog,
    ReplicationLogError,
};

/// Collects the row changes of one epoch and writes them as one log transaction.
pub struct ChangeInjector {
    context: Arc<SchemaDistContext>,
    catalog: Arc<dyn LocalCatalog>,
    log: Arc<dyn ReplicationLog>,
    rows: Vec<LogRow>,
    inserts: u32,
    updates: u32,
    deletes: u32,
    /// `Some(None)` once rows from more than one server were seen.
    server_id: Option<Option<u32>>,
    blob_buffer: Vec<u8>,
}

/// Which columns of a row go into a log image.
#[derive(Clone, Copy)]
enum Columns {
    All,
    PrimaryKey,
    PrimaryKeyAndChanged,
    ChangedNonKey,
}

impl ChangeInjector {
    pub fn new(
        context: Arc<SchemaDistContext>,
        catalog: Arc<dyn LocalCatalog>,
        log: Arc<dyn ReplicationLog>,
    ) -> Self {
        ChangeInjector {
            context,
            catalog,
            log,
            rows: vec![],
            inserts: 0,
            updates: 0,
            deletes: 0,
            server_id: None,
            blob_buffer: vec![],
        }
    }

    /// Adds one row event of the current epoch. Blob values are read from `stream`, which must
    /// be positioned on the event.
    pub fn handle_event(
        &mut self,
        event: RowEvent,
        stream: &dyn EventStream,
    ) -> Result<(), EventLoopError> {
        let config = self.context.config();
        let server_id = match AnyValue::decode(event.any_value)
            .logging_server_id(self.context.server_id(), config.log_replica_updates())
        {
            Some(server_id) => server_id,
            None => {
                trace!("Not logging {:?} on {}", event.kind, event.table);
                return Ok(());
            }
        };

        let (primary_key, has_primary_key) = match self
            .catalog
            .get_table(&event.table)
            .map_err(SchemaDistError::from)?
        {
            Some(def) => (def.primary_key().to_vec(), def.has_primary_key()),
            None => (vec![], false),
        };
        let minimal = config.log_update_minimal() && has_primary_key;
        let updated_only = config.log_updated_only();

        let mut images = Images {
            primary_key: &primary_key,
            changed: &event.changed,
            stream,
            buffer: &mut self.blob_buffer,
        };

        let (kind, before, after) = match event.kind {
            RowEventKind::Insert => {
                self.inserts += 1;
                (
                    LogRowKind::Write,
                    None,
                    images.image(event.after.as_deref(), Columns::All)?,
                )
            }
            RowEventKind::Delete => {
                self.deletes += 1;
                let columns = if minimal {
                    Columns::PrimaryKey
                } else {
                    Columns::All
                };
                (
                    LogRowKind::Delete,
                    images.image(event.before.as_deref(), columns)?,
                    None,
                )
            }
            RowEventKind::Update => {
                self.updates += 1;
                let use_update =
                    !config.log_update_as_write() || !has_primary_key || config.log_update_minimal();
                let partial = if updated_only {
                    Columns::PrimaryKeyAndChanged
                } else {
                    Columns::All
                };
                if use_update {
                    let before_columns = if minimal {
                        Columns::PrimaryKey
                    } else {
                        partial
                    };
                    let after_columns = if minimal {
                        Columns::ChangedNonKey
                    } else {
                        partial
                    };
                    (
                        LogRowKind::Update,
                        images.image(event.before.as_deref(), before_columns)?,
                        images.image(event.after.as_deref(), after_columns)?,
                    )
                } else {
                    (
                        LogRowKind::Write,
                        None,
                        images.image(event.after.as_deref(), partial)?,
                    )
                }
            }
        };

        self.server_id = match self.server_id {
            None => Some(Some(server_id)),
            Some(Some(current)) if current == server_id => Some(Some(current)),
            Some(_) => Some(None),
        };
        self.rows.push(LogRow {
            table: event.table,
            kind,
            before,
            after,
            server_id,
        });
        Ok(())
    }

    pub fn pending_rows(&self) -> usize {
        self.rows.len()
    }

    /// Writes the transaction of `epoch`, if there is anything to write. Returns the record of
    /// the written transaction.
    pub fn commit_epoch(
        &mut self,
        epoch: Epoch,
        schema_ops: u32,
    ) -> Result<Option<EpochRecord>, EventLoopError> {
        let config = self.context.config();
        if !config.binlog_enabled() {
            self.reset();
            return Ok(None);
        }
        if self.rows.is_empty() && schema_ops == 0 && !config.log_empty_epochs() {
            return Ok(None);
        }

        let position = self.log.position()?;
        let heartbeat = LogRow {
            table: apply_status_table(),
            kind: LogRowKind::Write,
            before: None,
            after: Some(vec![
                Some(Value::UInt(u64::from(self.context.node_id()))),
                Some(Value::UInt(epoch)),
                Some(Value::Text(position.file)),
                Some(Value::UInt(position.offset)),
                Some(Value::UInt(position.offset)),
            ]),
            server_id: self.context.server_id(),
        };

        let rows = std::mem::take(&mut self.rows);
        let payload = if config.transaction_compression() {
            compress(rows, config.transaction_compression_level())?
        } else {
            LogPayload::Rows(rows)
        };

        let txn = LogTransaction {
            epoch,
            heartbeat,
            payload,
            inserts: self.inserts,
            updates: self.updates,
            deletes: self.deletes,
            schema_ops,
            orig_server_id: self.server_id.flatten().unwrap_or(0),
            orig_epoch: 0,
        };
        self.reset();

        let record = self.log.write_transaction(txn)?;
        self.context.stats().epoch_injected();
        debug!(
            "Injected epoch {}: {} insert(s), {} update(s), {} delete(s), {} schema op(s)",
            record.epoch, record.inserts, record.updates, record.deletes, record.schema_ops
        );
        Ok(Some(record))
    }

    /// Discards the changes collected for the current epoch.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.inserts = 0;
        self.updates = 0;
        self.deletes = 0;
        self.server_id = None;
    }
}

struct Images<'a> {
    primary_key: &'a [usize],
    changed: &'a [bool],
    stream: &'a dyn EventStream,
    buffer: &'a mut Vec<u8>,
}

impl<'a> Images<'a> {
    fn image(
        &mut self,
        row: Option<&[Value]>,
        columns: Columns,
    ) -> Result<Option<Vec<Option<Value>>>, ClusterError> {
        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let mut image = Vec::with_capacity(row.len());
        for (index, value) in row.iter().enumerate() {
            if !self.includes(index, columns) {
                image.push(None);
                continue;
            }
            let value = match value {
                Value::Blob(blob) => {
                    self.stream.read_blob_into(blob, self.buffer)?;
                    Value::Bytes(self.buffer.clone())
                }
                value => value.clone(),
            };
            image.push(Some(value));
        }
        Ok(Some(image))
    }

    fn includes(&self, index: usize, columns: Columns) -> bool {
        let is_key = self.primary_key.contains(&index);
        let changed = self.changed.get(index).copied().unwrap_or(true);
        match columns {
            Columns::All => true,
            Columns::PrimaryKey => is_key,
            Columns::PrimaryKeyAndChanged => is_key || changed,
            Columns::ChangedNonKey => !is_key && changed,
        }
    }
}

#[cfg(feature = "compression")]
fn compress(rows: Vec<LogRow>, level: i32) -> Result<LogPayload, ReplicationLogError> {
    let json = serde_json::to_vec(&rows)?;
    let data = zstd::stream::encode_all(Cursor::new(&json), level)
        .map_err(|err| ReplicationLogError::SerializationError(err.to_string()))?;
    Ok(LogPayload::Compressed {
        level,
        uncompressed_len: json.len(),
        data,
    })
}

#[cfg(not(feature = "compression"))]
fn compress(rows: Vec<LogRow>, _level: i32) -> Result<LogPayload, ReplicationLogError> {
    Ok(LogPayload::Rows(rows))
}

/// Returns the rows of a transaction payload, decompressing it if needed.
pub fn payload_rows(payload: &LogPayload) -> Result<Vec<LogRow>, ReplicationLogError> {
    match payload {
        LogPayload::Rows(rows) => Ok(rows.clone()),
        #[cfg(feature = "compression")]
        LogPayload::Compressed { data, .. } => {
            let json = zstd::stream::decode_all(Cursor::new(data))
                .map_err(|err| ReplicationLogError::SerializationError(err.to_string()))?;
            Ok(serde_json::from_slice(&json)?)
        }
        #[cfg(not(feature = "compression"))]
        LogPayload::Compressed { .. } => Err(ReplicationLogError::SerializationError(
            "compressed payloads require the compression feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::binlog::{LogEntry, MemoryReplicationLog};
    use crate::catalog::MemoryCatalog;
    use crate::cluster::memory::MemoryCluster;
    use crate::cluster::{Cluster, ColumnDef, ColumnType, TableDef, TableName};
    use crate::config::{SchemaDistConfig, SchemaDistConfigBuilder};

    fn orders() -> TableDef {
        TableDef::builder()
            .with_name(TableName::new("shop", "orders"))
            .with_column(ColumnDef::new("id", ColumnType::UInt))
            .with_column(ColumnDef::new("item", ColumnType::Text { max_len: 32 }))
            .with_column(ColumnDef::new("qty", ColumnType::UInt))
            .with_primary_key(&["id"])
            .build()
            .unwrap()
    }

    struct Fixture {
        injector: ChangeInjector,
        log: MemoryReplicationLog,
        stream: Box<dyn EventStream>,
    }

    fn fixture(config: SchemaDistConfig) -> Fixture {
        let catalog = MemoryCatalog::new();
        catalog.install_table(&orders()).unwrap();
        let log = MemoryReplicationLog::new();
        let context = Arc::new(SchemaDistContext::new(1, 101, config));
        Fixture {
            injector: ChangeInjector::new(context, Arc::new(catalog), Arc::new(log.clone())),
            log,
            stream: MemoryCluster::default().create_event_stream(1).unwrap(),
        }
    }

    fn row(id: u64, item: &str, qty: u64) -> Vec<Value> {
        vec![Value::UInt(id), Value::Text(item.into()), Value::UInt(qty)]
    }

    fn update(any_value: AnyValue) -> RowEvent {
        RowEvent {
            table: TableName::new("shop", "orders"),
            kind: RowEventKind::Update,
            before: Some(row(1, "apple", 1)),
            after: Some(row(1, "apple", 5)),
            changed: vec![false, false, true],
            any_value: any_value.encode(),
        }
    }

    fn logged_rows(log: &MemoryReplicationLog) -> Vec<LogRow> {
        match log.entries().pop() {
            Some(LogEntry::Transaction { payload, .. }) => payload_rows(&payload).unwrap(),
            other => panic!("Unexpected entry {:?}", other),
        }
    }

    /// Verifies that with the default options an update of a table with a primary key is
    /// logged as a write of the key and the changed columns.
    #[test]
    fn test_update_as_write() {
        let mut fixture = fixture(SchemaDistConfig::default());
        fixture
            .injector
            .handle_event(update(AnyValue::Unspecified), &*fixture.stream)
            .unwrap();
        let record = fixture.injector.commit_epoch(7, 0).unwrap().unwrap();
        assert_eq!(record.updates, 1);
        assert_eq!(record.orig_server_id, 101);

        let rows = logged_rows(&fixture.log);
        assert_eq!(rows[0].kind, LogRowKind::Write);
        assert_eq!(rows[0].before, None);
        assert_eq!(
            rows[0].after,
            Some(vec![Some(Value::UInt(1)), None, Some(Value::UInt(5))])
        );
    }

    /// Verifies the minimal update format: key-only before image and changed non-key after
    /// image; deletes carry the key only.
    #[test]
    fn test_minimal_update() {
        let config = SchemaDistConfigBuilder::new()
            .with_log_update_minimal(true)
            .build()
            .unwrap();
        let mut fixture = fixture(config);
        fixture
            .injector
            .handle_event(update(AnyValue::Unspecified), &*fixture.stream)
            .unwrap();
        fixture
            .injector
            .handle_event(
                RowEvent {
                    table: TableName::new("shop", "orders"),
                    kind: RowEventKind::Delete,
                    before: Some(row(2, "pear", 3)),
                    after: None,
                    changed: vec![],
                    any_value: 0,
                },
                &*fixture.stream,
            )
            .unwrap();
        fixture.injector.commit_epoch(7, 0).unwrap();

        let rows = logged_rows(&fixture.log);
        assert_eq!(rows[0].kind, LogRowKind::Update);
        assert_eq!(rows[0].before, Some(vec![Some(Value::UInt(1)), None, None]));
        assert_eq!(rows[0].after, Some(vec![None, None, Some(Value::UInt(5))]));
        assert_eq!(rows[1].kind, LogRowKind::Delete);
        assert_eq!(rows[1].before, Some(vec![Some(Value::UInt(2)), None, None]));
    }

    /// Verifies that full images are logged when updated-only logging is off and updates are
    /// not logged as writes.
    #[test]
    fn test_full_update() {
        let config = SchemaDistConfigBuilder::new()
            .with_log_update_as_write(false)
            .with_log_updated_only(false)
            .build()
            .unwrap();
        let mut fixture = fixture(config);
        fixture
            .injector
            .handle_event(update(AnyValue::Origin { server_id: 7 }), &*fixture.stream)
            .unwrap();
        let record = fixture.injector.commit_epoch(3, 0).unwrap().unwrap();
        assert_eq!(record.orig_server_id, 7);

        let rows = logged_rows(&fixture.log);
        assert_eq!(rows[0].kind, LogRowKind::Update);
        assert_eq!(rows[0].server_id, 7);
        assert_eq!(
            rows[0].before,
            Some(row(1, "apple", 1).into_iter().map(Some).collect::<Vec<_>>())
        );
    }

    /// Verifies that untaggable changes are skipped and that empty epochs are only written
    /// when configured or when schema operations were applied.
    #[test]
    fn test_skipped_changes_and_empty_epochs() {
        let mut skipping = fixture(SchemaDistConfig::default());
        skipping
            .injector
            .handle_event(update(AnyValue::NoLogging), &*skipping.stream)
            .unwrap();
        skipping
            .injector
            .handle_event(update(AnyValue::Replicated { server_id: 9 }), &*skipping.stream)
            .unwrap();
        assert_eq!(skipping.injector.pending_rows(), 0);
        assert!(skipping.injector.commit_epoch(4, 0).unwrap().is_none());

        let record = skipping.injector.commit_epoch(5, 1).unwrap().unwrap();
        assert_eq!(record.schema_ops, 1);
        assert_eq!(record.orig_server_id, 0);

        let config = SchemaDistConfigBuilder::new()
            .with_log_empty_epochs(true)
            .build()
            .unwrap();
        let mut empty_epochs = fixture(config);
        assert!(empty_epochs.injector.commit_epoch(6, 0).unwrap().is_some());
        match empty_epochs.log.entries().pop() {
            Some(LogEntry::Transaction { heartbeat, .. }) => {
                let after = heartbeat.after.unwrap();
                assert_eq!(after[0], Some(Value::UInt(1)));
                assert_eq!(after[1], Some(Value::UInt(6)));
            }
            other => panic!("Unexpected entry {:?}", other),
        }
    }

    /// Verifies that a compressed payload decodes to the rows it was built from.
    #[cfg(feature = "compression")]
    #[test]
    fn test_compressed_payload() {
        let config = SchemaDistConfigBuilder::new()
            .with_transaction_compression(true)
            .with_transaction_compression_level(5)
            .build()
            .unwrap();
        let mut fixture = fixture(config);
        fixture
            .injector
            .handle_event(update(AnyValue::Unspecified), &*fixture.stream)
            .unwrap();
        fixture.injector.commit_epoch(8, 0).unwrap();

        match fixture.log.entries().pop() {
            Some(LogEntry::Transaction {
                payload: LogPayload::Compressed { level, .. },
                ..
            }) => assert_eq!(level, 5),
            other => panic!("Unexpected entry {:?}", other),
        }
        let rows = logged_rows(&fixture.log);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table, TableName::new("shop", "orders"));
    }
}
