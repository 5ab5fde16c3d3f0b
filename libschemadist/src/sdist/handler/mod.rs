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

//! Handling of the events of the coordination and result tables.
//!
//! Every operation row is handled by each node in one of two roles. The node which wrote the
//! row coordinates: it snapshots the live participants, collects their results and writes the
//! final all-clear. Every other node participates: it applies the change to its local catalog,
//! logs it and acknowledges. The coordinator applies the change locally as well and records its
//! own result directly.
//!
//! Operations changing the identity of an existing object are not applied when their row is
//! seen but queued, and applied by `run_post_epoch` once the data events of the same epoch
//! have been injected.

mod coordinator;
mod participant;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crate::any_value::AnyValue;
use crate::binlog::ReplicationLog;
use crate::catalog::{LocalCatalog, MetadataLocks};
use crate::cluster::{
    Cluster, ClusterEvent, Epoch, EventStream, RowEvent, RowEventKind, TableName, Value,
};
use crate::error::InvalidStateError;

use super::ack::Acknowledger;
use super::context::SchemaDistContext;
use super::error::SchemaDistError;
use super::schema_op::SchemaOp;
use super::table::{results_table, schema_ops_table, SchemaOpRow, SchemaOpType};

/// An operation this node coordinates, with the row it was started by.
struct Coordinated {
    op: Arc<SchemaOp>,
    row: SchemaOpRow,
}

enum Role {
    /// Record the local result on the coordinated operation with this id.
    Coordinator(u32),
    Participant,
    /// Own operation without a waiting client; apply only.
    Local,
}

struct PostEpochOp {
    row: SchemaOpRow,
    any_value: AnyValue,
    role: Role,
}

/// Processes schema events for one node. Owned by the event loop thread.
pub struct SchemaEventHandler {
    context: Arc<SchemaDistContext>,
    cluster: Arc<dyn Cluster>,
    catalog: Arc<dyn LocalCatalog>,
    locks: Arc<dyn MetadataLocks>,
    log: Arc<dyn ReplicationLog>,
    acknowledger: Box<dyn Acknowledger>,
    coordinated: BTreeMap<u32, Coordinated>,
    post_epoch: Vec<PostEpochOp>,
    prepared_renames: HashMap<(String, String), TableName>,
    current_epoch: Epoch,
    schema_ops_in_epoch: u32,
    last_sweep: Instant,
    blob_buffer: Vec<u8>,
}

impl SchemaEventHandler {
    pub fn new(
        context: Arc<SchemaDistContext>,
        cluster: Arc<dyn Cluster>,
        catalog: Arc<dyn LocalCatalog>,
        locks: Arc<dyn MetadataLocks>,
        log: Arc<dyn ReplicationLog>,
        acknowledger: Box<dyn Acknowledger>,
    ) -> Self {
        SchemaEventHandler {
            context,
            cluster,
            catalog,
            locks,
            log,
            acknowledger,
            coordinated: BTreeMap::new(),
            post_epoch: vec![],
            prepared_renames: HashMap::new(),
            current_epoch: 0,
            schema_ops_in_epoch: 0,
            last_sweep: Instant::now(),
            blob_buffer: vec![],
        }
    }

    /// Handles one event of the schema stream belonging to `epoch`.
    pub fn handle_event(
        &mut self,
        epoch: Epoch,
        event: ClusterEvent,
        schema_stream: &dyn EventStream,
        data_stream: &mut dyn EventStream,
    ) -> Result<(), SchemaDistError> {
        self.current_epoch = epoch;
        let coordination_table = schema_ops_table();

        match event {
            ClusterEvent::Row(row_event) if row_event.table == coordination_table => {
                self.handle_schema_op_event(row_event, schema_stream, data_stream)
            }
            ClusterEvent::Row(row_event) if row_event.table == results_table() => {
                self.handle_result_event(row_event);
                Ok(())
            }
            ClusterEvent::Row(row_event) => {
                trace!("Ignoring row event of {} on schema stream", row_event.table);
                Ok(())
            }
            ClusterEvent::Subscribe { table, shard, node } if table == coordination_table => {
                debug!("Node {} subscribed to schema operations on shard {}", node, shard);
                self.context.tracker().subscribe(shard, node);
                Ok(())
            }
            ClusterEvent::Unsubscribe { table, shard, node } if table == coordination_table => {
                debug!(
                    "Node {} unsubscribed from schema operations on shard {}",
                    node, shard
                );
                if self.context.tracker().unsubscribe(shard, node) {
                    self.participant_unsubscribed(node);
                }
                Ok(())
            }
            ClusterEvent::Subscribe { .. } | ClusterEvent::Unsubscribe { .. } => Ok(()),
            ClusterEvent::ShardFailure { shard } => {
                warn!("Shard {} failed", shard);
                self.context.tracker().shard_failed(shard);
                self.shard_failed();
                Ok(())
            }
            ClusterEvent::NodeFailure { node } => {
                warn!("Node {} failed", node);
                self.context.tracker().node_failed(node);
                self.participant_failed(node);
                Ok(())
            }
        }
    }

    fn handle_schema_op_event(
        &mut self,
        row_event: RowEvent,
        schema_stream: &dyn EventStream,
        data_stream: &mut dyn EventStream,
    ) -> Result<(), SchemaDistError> {
        if row_event.kind == RowEventKind::Delete {
            return Ok(());
        }
        let mut values = match row_event.after {
            Some(values) => values,
            None => return Ok(()),
        };

        for value in values.iter_mut() {
            if let Value::Blob(blob) = value {
                schema_stream.read_blob_into(blob, &mut self.blob_buffer)?;
                *value = Value::Bytes(self.blob_buffer.clone());
            }
        }

        let row = match SchemaOpRow::from_row(&values) {
            Ok(row) => row,
            Err(err) => {
                warn!("Ignoring unreadable schema operation row: {}", err);
                return Ok(());
            }
        };
        let any_value = AnyValue::decode(row_event.any_value);

        if row.op_type == SchemaOpType::ClearSlock {
            if row.origin_node_id == self.context.node_id() {
                self.lock_bitmap_acked(&row);
            }
            return Ok(());
        }

        self.schema_ops_in_epoch += 1;
        if row.origin_node_id == self.context.node_id() {
            self.coordinate(row, any_value, data_stream)
        } else {
            self.participate(row, any_value, data_stream)
        }
    }

    /// Applies the operations deferred until the data events of the current epoch were
    /// injected.
    pub fn run_post_epoch(
        &mut self,
        epoch: Epoch,
        data_stream: &mut dyn EventStream,
    ) -> Result<(), SchemaDistError> {
        self.current_epoch = epoch;
        let post_epoch = std::mem::take(&mut self.post_epoch);

        for PostEpochOp {
            row,
            any_value,
            role,
        } in post_epoch
        {
            debug!("Applying {} {} after epoch {}", row.op_type, row.key(), epoch);
            let (code, message) = self.apply_local(&row, any_value, data_stream);
            match role {
                Role::Coordinator(op_id) => {
                    if let Some(coordinated) = self.coordinated.get(&op_id) {
                        coordinated
                            .op
                            .result_received(self.context.node_id(), code, &message);
                    }
                    self.maybe_complete(op_id);
                }
                Role::Participant => self.acknowledge(&row, code, &message)?,
                Role::Local => (),
            }
        }

        Ok(())
    }

    pub fn has_post_epoch_ops(&self) -> bool {
        !self.post_epoch.is_empty()
    }

    /// Returns the number of schema operations handled since the last call.
    pub fn take_schema_op_count(&mut self) -> u32 {
        std::mem::replace(&mut self.schema_ops_in_epoch, 0)
    }

    /// Periodic check of the coordinated operations for timed out participants, and of the
    /// coordination table itself.
    pub fn sweep(&mut self) -> Result<(), SchemaDistError> {
        if self.last_sweep.elapsed() < self.context.config().check_interval() {
            return Ok(());
        }
        self.last_sweep = Instant::now();

        let timeout = self.context.config().schema_op_timeout();
        let op_ids: Vec<u32> = self.coordinated.keys().copied().collect();
        for op_id in op_ids {
            if let Some(coordinated) = self.coordinated.get(&op_id) {
                let timed_out = coordinated
                    .op
                    .check_timeout(timeout, self.context.node_id());
                if !timed_out.is_empty() {
                    self.context.stats().timed_out();
                    warn!(
                        "Schema operation {} timed out waiting for node(s) {:?}",
                        coordinated.op.key(),
                        timed_out
                    );
                }
            }
            self.maybe_complete(op_id);
        }

        if self.cluster.table_def(&schema_ops_table())?.is_none() {
            return Err(SchemaDistError::InvalidStateError(
                InvalidStateError::with_message(
                    "coordination table was dropped; schema distribution must be set up again"
                        .to_string(),
                ),
            ));
        }

        Ok(())
    }

    /// Releases every coordinated operation and forgets queued work. The context must have
    /// been torn down first so that the waiting clients see their operations aborted.
    pub fn teardown(&mut self) {
        for (_, coordinated) in std::mem::take(&mut self.coordinated) {
            self.context.registry().release(&coordinated.op);
        }
        self.post_epoch.clear();
        self.prepared_renames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::binlog::MemoryReplicationLog;
    use crate::bitmap::NodeBitmap;
    use crate::catalog::MemoryCatalog;
    use crate::cluster::memory::MemoryCluster;
    use crate::cluster::{ColumnDef, ColumnType, TableDef};
    use crate::config::SchemaDistConfigBuilder;
    use crate::retry::RetryPolicy;
    use crate::sdist::ack::acknowledger_for;
    use crate::sdist::result::ResultCode;
    use crate::sdist::table::{
        results_def, schema_ops_def, CoordinationLayout, ResultRow, SchemaOpKey,
    };

    struct Fixture {
        cluster: MemoryCluster,
        catalog: MemoryCatalog,
        log: MemoryReplicationLog,
        context: Arc<SchemaDistContext>,
        layout: CoordinationLayout,
        handler: SchemaEventHandler,
        schema_stream: Box<dyn EventStream>,
        data_stream: Box<dyn EventStream>,
    }

    fn fixture(node_id: u32) -> Fixture {
        let cluster = MemoryCluster::default();
        cluster.create_table(schema_ops_def(true).unwrap()).unwrap();
        cluster.create_table(results_def().unwrap()).unwrap();
        cluster
            .create_table(
                TableDef::builder()
                    .with_name(TableName::new("s1", "t1"))
                    .with_id(10)
                    .with_version(1)
                    .with_column(ColumnDef::new("id", ColumnType::UInt))
                    .with_primary_key(&["id"])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let config = SchemaDistConfigBuilder::new()
            .with_schema_op_timeout(Duration::from_millis(50))
            .with_check_interval(Duration::from_millis(10))
            .with_lock_wait_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let context = Arc::new(SchemaDistContext::new(node_id, 100 + node_id, config));
        let layout = CoordinationLayout::from_def(&schema_ops_def(true).unwrap()).unwrap();
        context.init(layout.clone());

        let catalog = MemoryCatalog::new();
        let log = MemoryReplicationLog::new();
        let shared: Arc<dyn Cluster> = Arc::new(cluster.clone());
        let handler = SchemaEventHandler::new(
            context.clone(),
            shared.clone(),
            Arc::new(catalog.clone()),
            Arc::new(catalog.clone()),
            Arc::new(log.clone()),
            acknowledger_for(&layout, shared, RetryPolicy::new(3, Duration::from_millis(1))),
        );

        Fixture {
            schema_stream: cluster.create_event_stream(node_id).unwrap(),
            data_stream: cluster.create_event_stream(node_id).unwrap(),
            cluster,
            catalog,
            log,
            context,
            layout,
            handler,
        }
    }

    fn op_row(origin: u32, op_type: SchemaOpType, op_id: u32) -> SchemaOpRow {
        SchemaOpRow {
            db: "s1".into(),
            name: "t1".into(),
            lock_bitmap: NodeBitmap::all_ones(),
            payload: format!("{} s1.t1", op_type),
            origin_node_id: origin,
            epoch: 0,
            object_id: 10,
            object_version: 1,
            op_type,
            op_id: Some(op_id),
        }
    }

    fn row_event(
        row: &SchemaOpRow,
        layout: &CoordinationLayout,
        any_value: AnyValue,
    ) -> ClusterEvent {
        ClusterEvent::Row(RowEvent {
            table: schema_ops_table(),
            kind: RowEventKind::Insert,
            before: None,
            after: Some(row.to_row(layout)),
            changed: vec![],
            any_value: any_value.encode(),
        })
    }

    fn handle(fixture: &mut Fixture, epoch: Epoch, event: ClusterEvent) {
        let Fixture {
            handler,
            schema_stream,
            data_stream,
            ..
        } = fixture;
        handler
            .handle_event(epoch, event, &**schema_stream, &mut **data_stream)
            .expect("Unable to handle event");
    }

    /// Verifies that a participant applies a create table immediately: installs the table,
    /// subscribes to its changes, logs the statement under the originating server id and
    /// reports success.
    #[test]
    fn test_participant_applies_create_table() {
        let mut fixture = fixture(2);
        let row = op_row(1, SchemaOpType::CreateTable, 4);
        let event = row_event(&row, &fixture.layout, AnyValue::Origin { server_id: 101 });
        handle(&mut fixture, 5, event);

        assert!(fixture
            .catalog
            .get_table(&TableName::new("s1", "t1"))
            .unwrap()
            .is_some());
        assert!(fixture.data_stream.is_subscribed(&TableName::new("s1", "t1")));

        let queries = fixture.log.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].server_id, 101);
        assert_eq!(queries[0].epoch, 5);

        let results = fixture.cluster.rows(&results_table()).unwrap();
        let result = ResultRow::from_row(&results[0]).unwrap();
        assert_eq!(result.participant_node_id, 2);
        assert_eq!(result.op_id, 4);
        assert_eq!(result.code, ResultCode::Success);
        assert_eq!(fixture.handler.take_schema_op_count(), 1);
    }

    /// Verifies that a drop table is only applied by `run_post_epoch`.
    #[test]
    fn test_participant_defers_drop_table() {
        let mut fixture = fixture(2);
        let create = op_row(1, SchemaOpType::CreateTable, 1);
        let event = row_event(&create, &fixture.layout, AnyValue::Unspecified);
        handle(&mut fixture, 5, event);

        let drop = op_row(1, SchemaOpType::DropTable, 2);
        let event = row_event(&drop, &fixture.layout, AnyValue::Unspecified);
        handle(&mut fixture, 6, event);
        assert!(fixture.handler.has_post_epoch_ops());
        assert!(fixture.data_stream.is_subscribed(&TableName::new("s1", "t1")));

        let Fixture {
            handler,
            data_stream,
            ..
        } = &mut fixture;
        handler
            .run_post_epoch(6, &mut **data_stream)
            .expect("Unable to run post epoch");
        assert!(!fixture.data_stream.is_subscribed(&TableName::new("s1", "t1")));
        assert!(fixture
            .catalog
            .get_table(&TableName::new("s1", "t1"))
            .unwrap()
            .is_none());
        assert_eq!(fixture.cluster.rows(&results_table()).unwrap().len(), 2);
    }

    /// Verifies that a failure to apply is reported as a failure result rather than dropped,
    /// and that statements of operations tagged no-logging are not logged.
    #[test]
    fn test_participant_reports_apply_failure() {
        let mut fixture = fixture(2);
        let ticket = fixture
            .catalog
            .lock_exclusive(
                &crate::catalog::MdlKey::Table(TableName::new("s1", "t1")),
                Duration::from_millis(10),
            )
            .unwrap();

        let row = op_row(1, SchemaOpType::CreateTable, 9);
        let event = row_event(&row, &fixture.layout, AnyValue::NoLogging);
        handle(&mut fixture, 5, event);
        fixture.catalog.release(ticket);

        let results = fixture.cluster.rows(&results_table()).unwrap();
        let result = ResultRow::from_row(&results[0]).unwrap();
        assert_eq!(result.code, ResultCode::SchemaOpFailure);
        assert!(!result.message.is_empty());
        assert!(fixture.log.queries().is_empty());
        assert_eq!(fixture.context.stats().snapshot().apply_failures, 1);
    }

    /// Verifies the coordinator role: participants are snapshotted from the tracker, results
    /// are collected from the result table, a failed node is treated as reported, and the
    /// operation completes.
    ///
    /// 1. Nodes 2 and 3 are subscribed; a client on node 1 registers an operation
    /// 2. The coordinator sees the row; participants are {1, 2, 3}, node 1 reported success
    /// 3. Node 2 reports success, node 3 fails
    /// 4. The operation completes with node 3 marked NODE_FAILURE
    #[test]
    fn test_coordinator_collects_results() {
        let mut fixture = fixture(1);
        let table = schema_ops_table();
        for node in [2, 3].iter() {
            handle(
                &mut fixture,
                1,
                ClusterEvent::Subscribe {
                    table: table.clone(),
                    shard: 1,
                    node: *node,
                },
            );
        }

        let op = fixture
            .context
            .registry()
            .create(
                SchemaOpKey::new("s1", "t1", 10, 1),
                SchemaOpType::CreateTable,
                1,
                Duration::from_secs(1),
                &|| false,
            )
            .unwrap();
        let row = op_row(1, SchemaOpType::CreateTable, op.op_id());
        let event = row_event(&row, &fixture.layout, AnyValue::Unspecified);
        handle(&mut fixture, 2, event);

        assert_eq!(
            op.participants().unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(op.pending_participants(), vec![2, 3]);

        let result = ResultRow {
            origin_node_id: 1,
            op_id: op.op_id(),
            participant_node_id: 2,
            code: ResultCode::Success,
            message: String::new(),
        };
        handle(
            &mut fixture,
            3,
            ClusterEvent::Row(RowEvent {
                table: results_table(),
                kind: RowEventKind::Insert,
                before: None,
                after: Some(result.to_row()),
                changed: vec![],
                any_value: 0,
            }),
        );
        assert!(!op.is_completed());

        handle(&mut fixture, 4, ClusterEvent::NodeFailure { node: 3 });
        assert!(op.is_completed());
        let results = op.results();
        assert_eq!(results[2].node_id, 3);
        assert_eq!(results[2].code, ResultCode::NodeFailure);

        fixture.context.registry().release(&op);
        assert!(fixture.context.registry().is_empty());
    }

    fn subscribe(fixture: &mut Fixture, shard: u32, node: u32) {
        handle(
            fixture,
            1,
            ClusterEvent::Subscribe {
                table: schema_ops_table(),
                shard,
                node,
            },
        );
    }

    fn result_event(op_id: u32, participant: u32, code: ResultCode) -> ClusterEvent {
        let result = ResultRow {
            origin_node_id: 1,
            op_id,
            participant_node_id: participant,
            code,
            message: String::new(),
        };
        ClusterEvent::Row(RowEvent {
            table: results_table(),
            kind: RowEventKind::Insert,
            before: None,
            after: Some(result.to_row()),
            changed: vec![],
            any_value: 0,
        })
    }

    /// Registers a client operation on node 1 and lets the coordinator see its row.
    fn start_coordinating(fixture: &mut Fixture) -> Arc<SchemaOp> {
        let op = fixture
            .context
            .registry()
            .create(
                SchemaOpKey::new("s1", "t1", 10, 1),
                SchemaOpType::CreateTable,
                1,
                Duration::from_secs(1),
                &|| false,
            )
            .unwrap();
        let row = op_row(1, SchemaOpType::CreateTable, op.op_id());
        let event = row_event(&row, &fixture.layout, AnyValue::Unspecified);
        handle(fixture, 2, event);
        op
    }

    /// Verifies that seeing the same operation row twice does not start a second coordination.
    ///
    /// 1. Node 2 is subscribed; the coordinator sees the operation row
    /// 2. The identical row is seen again; nothing is applied or registered a second time
    /// 3. Node 2 reports success and the operation completes
    #[test]
    fn test_coordinator_ignores_repeated_row() {
        let mut fixture = fixture(1);
        subscribe(&mut fixture, 1, 2);
        let op = start_coordinating(&mut fixture);

        let row = op_row(1, SchemaOpType::CreateTable, op.op_id());
        let event = row_event(&row, &fixture.layout, AnyValue::Unspecified);
        handle(&mut fixture, 3, event);

        let stats = fixture.context.stats().snapshot();
        assert_eq!(stats.ops_coordinated, 1);
        assert_eq!(stats.ops_applied, 1);
        assert_eq!(fixture.context.registry().len(), 1);
        assert_eq!(op.pending_participants(), vec![2]);

        handle(&mut fixture, 4, result_event(op.op_id(), 2, ResultCode::Success));
        assert!(op.is_completed());
        fixture.context.registry().release(&op);
        assert!(fixture.context.registry().is_empty());
    }

    /// Verifies that a participant unsubscribing from every shard is reported as
    /// NODE_UNSUBSCRIBE, and that the operation completes once the others have reported.
    #[test]
    fn test_coordinator_handles_unsubscribe() {
        let mut fixture = fixture(1);
        subscribe(&mut fixture, 1, 2);
        subscribe(&mut fixture, 1, 3);
        let op = start_coordinating(&mut fixture);
        assert_eq!(op.pending_participants(), vec![2, 3]);

        handle(
            &mut fixture,
            3,
            ClusterEvent::Unsubscribe {
                table: schema_ops_table(),
                shard: 1,
                node: 3,
            },
        );
        assert_eq!(op.pending_participants(), vec![2]);
        assert!(!op.is_completed());

        handle(&mut fixture, 4, result_event(op.op_id(), 2, ResultCode::Success));
        assert!(op.is_completed());
        let results = op.results();
        assert_eq!(results[2].node_id, 3);
        assert_eq!(results[2].code, ResultCode::NodeUnsubscribe);
        assert_eq!(results[1].code, ResultCode::Success);
        fixture.context.registry().release(&op);
    }

    /// Verifies that the participants only reachable through a failed shard are treated as
    /// failed.
    ///
    /// 1. Node 2 is subscribed on shard 1, node 3 on shard 2
    /// 2. Shard 1 fails; node 2 is marked NODE_FAILURE, node 3 is still pending
    /// 3. Node 3 reports success and the operation completes
    #[test]
    fn test_coordinator_handles_shard_failure() {
        let mut fixture = fixture(1);
        subscribe(&mut fixture, 1, 2);
        subscribe(&mut fixture, 2, 3);
        let op = start_coordinating(&mut fixture);

        fixture.cluster.fail_shard(1);
        let deadline = Instant::now() + Duration::from_secs(5);
        let (epoch, event) = loop {
            assert!(Instant::now() < deadline, "Shard failure was not delivered");
            if let Some(epoch) = fixture
                .schema_stream
                .poll_epoch(Duration::from_millis(50))
                .unwrap()
            {
                let mut failure = None;
                while let Some(event) = fixture.schema_stream.next_event(epoch) {
                    if let ClusterEvent::ShardFailure { shard: 1 } = event {
                        failure = Some(event);
                    }
                }
                if let Some(event) = failure {
                    break (epoch, event);
                }
            }
        };
        handle(&mut fixture, epoch, event);

        assert_eq!(op.pending_participants(), vec![3]);
        assert_eq!(op.results()[1].code, ResultCode::NodeFailure);
        assert!(!op.is_completed());

        handle(&mut fixture, epoch + 1, result_event(op.op_id(), 3, ResultCode::Success));
        assert!(op.is_completed());
        assert_eq!(op.results()[2].code, ResultCode::Success);
        fixture.context.registry().release(&op);
    }

    /// Verifies that the sweep times out participants which never report.
    #[test]
    fn test_sweep_times_out_participants() {
        let mut fixture = fixture(1);
        handle(
            &mut fixture,
            1,
            ClusterEvent::Subscribe {
                table: schema_ops_table(),
                shard: 1,
                node: 2,
            },
        );
        let op = fixture
            .context
            .registry()
            .create(
                SchemaOpKey::new("s1", "t1", 10, 1),
                SchemaOpType::CreateTable,
                1,
                Duration::from_secs(1),
                &|| false,
            )
            .unwrap();
        let row = op_row(1, SchemaOpType::CreateTable, op.op_id());
        let event = row_event(&row, &fixture.layout, AnyValue::Unspecified);
        handle(&mut fixture, 2, event);

        std::thread::sleep(Duration::from_millis(60));
        fixture.handler.sweep().expect("Sweep failed");
        assert!(op.is_completed());
        assert_eq!(op.results()[1].code, ResultCode::NodeTimeout);
        assert_eq!(fixture.context.stats().snapshot().timeouts, 1);
    }

    /// Verifies that the sweep fails once the coordination table disappears.
    #[test]
    fn test_sweep_detects_dropped_table() {
        let mut fixture = fixture(1);
        fixture.cluster.drop_table(&schema_ops_table());
        std::thread::sleep(Duration::from_millis(15));
        assert!(fixture.handler.sweep().is_err());
    }
}
