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

//! End-to-end schema distribution between several nodes sharing one in-memory cluster.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use schemadist::binlog::{LogEntry, MemoryReplicationLog};
use schemadist::bitmap::NodeBitmap;
use schemadist::catalog::{LocalCatalog, MdlKey, MemoryCatalog, MetadataLocks};
use schemadist::cluster::memory::MemoryCluster;
use schemadist::cluster::{Cluster, ColumnDef, ColumnType, NodeId, TableDef, TableName, Value};
use schemadist::config::{SchemaDistConfig, SchemaDistConfigBuilder};
use schemadist::node::SchemaDistNode;
use schemadist::sdist::table::{results_table, schema_ops_table, SchemaOpRow};
use schemadist::sdist::{ResultCode, SchemaDistError, SchemaOpType, Session};
use schemadist::threading::shutdown::{shutdown, ShutdownHandle};

const WAIT: Duration = Duration::from_secs(10);

struct TestNode {
    node: SchemaDistNode,
    catalog: MemoryCatalog,
    log: MemoryReplicationLog,
}

struct Harness {
    cluster: MemoryCluster,
    nodes: Vec<TestNode>,
}

impl Harness {
    /// Starts nodes 1 to `count` and waits until they all know each other.
    fn start(count: NodeId, config: SchemaDistConfig) -> Self {
        let cluster = MemoryCluster::default();
        let nodes: Vec<TestNode> = (1..=count)
            .map(|node_id| start_node(&cluster, node_id, config.clone()))
            .collect();
        for test_node in &nodes {
            assert!(
                test_node.node.wait_until_ready(WAIT),
                "Node {} never became ready",
                test_node.node.node_id()
            );
        }
        let harness = Harness { cluster, nodes };
        harness.wait_for_subscribers(count);
        harness
    }

    fn wait_for_subscribers(&self, subscribers: u32) {
        wait_until("subscribers", || {
            self.nodes.iter().all(|test_node| {
                test_node.node.context().tracker().live_nodes().count() >= subscribers
            })
        });
    }

    fn node(&self, node_id: NodeId) -> &TestNode {
        &self.nodes[node_id as usize - 1]
    }

    /// Creates a table in the cluster dictionary, as the storage engine of node 1 would.
    fn create_cluster_table(&self, table: &TableName, id: u32) -> TableDef {
        let def = TableDef::builder()
            .with_name(table.clone())
            .with_id(id)
            .with_version(1)
            .with_column(ColumnDef::new("id", ColumnType::UInt))
            .with_column(ColumnDef::new("label", ColumnType::Text { max_len: 32 }))
            .with_primary_key(&["id"])
            .build()
            .expect("Unable to build table");
        self.cluster
            .create_table(def.clone())
            .expect("Unable to create table");
        def
    }

    fn shutdown(self) {
        let handles: Vec<Box<dyn ShutdownHandle>> = self
            .nodes
            .into_iter()
            .map(|test_node| Box::new(test_node.node) as Box<dyn ShutdownHandle>)
            .collect();
        shutdown(handles).expect("Unable to shut down nodes");
    }
}

fn start_node(cluster: &MemoryCluster, node_id: NodeId, config: SchemaDistConfig) -> TestNode {
    let catalog = MemoryCatalog::new();
    let log = MemoryReplicationLog::new();
    let node = SchemaDistNode::builder()
        .with_node_id(node_id)
        .with_config(config)
        .with_cluster(Arc::new(cluster.clone()))
        .with_catalog(Arc::new(catalog.clone()))
        .with_metadata_locks(Arc::new(catalog.clone()))
        .with_replication_log(Arc::new(log.clone()))
        .start()
        .expect("Unable to start node");
    TestNode { node, catalog, log }
}

fn config() -> SchemaDistConfigBuilder {
    SchemaDistConfigBuilder::new()
        .with_schema_op_timeout(Duration::from_secs(10))
        .with_check_interval(Duration::from_millis(20))
        .with_lock_wait_timeout(Duration::from_millis(100))
        .with_retry_backoff(Duration::from_millis(5))
        .with_restart_delay(Duration::from_millis(50))
}

fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "Timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

fn coordination_row(cluster: &MemoryCluster, db: &str, name: &str) -> Option<SchemaOpRow> {
    cluster
        .rows(&schema_ops_table())?
        .iter()
        .filter_map(|row| SchemaOpRow::from_row(row).ok())
        .find(|row| row.db == db && row.name == name)
}

/// Verifies a create table distributed to three nodes.
///
/// 1. Start three nodes and create `s1.t1` in the cluster dictionary
/// 2. Distribute the create from node 1
/// 3. Verify every node reported success, installed the table and logged the statement under
///    the server id of the session
/// 4. Verify the result rows were removed and the coordination row was cleared
#[test]
fn create_table_reaches_every_node() {
    let harness = Harness::start(3, config().build().unwrap());
    let table = TableName::new("s1", "t1");
    harness.create_cluster_table(&table, 11);

    let outcome = harness
        .node(1)
        .node
        .client()
        .create_table(
            &Session::new(1),
            "CREATE TABLE s1.t1 (id INT PRIMARY KEY, label VARCHAR(32))",
            "s1",
            "t1",
            11,
            1,
        )
        .expect("Create table failed");

    assert!(outcome.is_success(), "{}", outcome);
    let nodes: Vec<NodeId> = outcome.results().iter().map(|r| r.node_id).collect();
    assert_eq!(nodes, vec![1, 2, 3]);

    for test_node in &harness.nodes {
        assert!(test_node.catalog.get_table(&table).unwrap().is_some());
        let queries = test_node.log.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].server_id, 1);
        assert_eq!(queries[0].db, "s1");
        assert!(harness.cluster.is_subscribed(test_node.node.node_id(), &table));
    }

    assert_eq!(harness.cluster.rows(&results_table()), Some(vec![]));
    let row = coordination_row(&harness.cluster, "s1", "t1").expect("No coordination row");
    assert_eq!(row.op_type, SchemaOpType::ClearSlock);
    assert_eq!(row.lock_bitmap, NodeBitmap::new());
    assert!(harness.node(1).node.context().registry().is_empty());

    harness.shutdown();
}

/// Verifies that a participant lost during an operation is reported as failed instead of
/// blocking the client.
///
/// 1. Start nodes 1 and 2, and a stream of node 3 subscribed to the coordination table which
///    never acknowledges anything
/// 2. Start a create table from node 1 and wait until node 1 coordinates it
/// 3. Fail node 3
/// 4. Verify the client returns with node 3 failed and the other nodes successful
#[test]
fn failed_participant_does_not_block_the_client() {
    let harness = Harness::start(2, config().build().unwrap());
    let mut zombie = harness
        .cluster
        .create_event_stream(3)
        .expect("Unable to create stream");
    zombie
        .subscribe(&schema_ops_table())
        .expect("Unable to subscribe");
    harness.wait_for_subscribers(3);

    let table = TableName::new("s1", "t1");
    harness.create_cluster_table(&table, 12);
    let client = harness.node(1).node.client();
    let waiter = thread::spawn(move || {
        client.create_table(&Session::new(1), "CREATE TABLE s1.t1", "s1", "t1", 12, 1)
    });

    wait_until("coordination", || {
        harness.node(1).node.stats().ops_coordinated >= 1
    });
    harness.cluster.fail_node(3);

    let outcome = waiter
        .join()
        .expect("Client panicked")
        .expect("Create table failed");
    assert!(!outcome.is_success());
    assert_eq!(outcome.result_for(1).unwrap().code, ResultCode::Success);
    assert_eq!(outcome.result_for(2).unwrap().code, ResultCode::Success);
    assert_eq!(outcome.result_for(3).unwrap().code, ResultCode::NodeFailure);
    assert!(outcome.to_string().contains("node 3"));

    drop(zombie);
    harness.shutdown();
}

/// Verifies a rename in its two phases: the prepare announces the new name, the rename itself
/// moves the table and its change subscription on every node.
#[test]
fn rename_moves_table_and_subscription() {
    let harness = Harness::start(2, config().build().unwrap());
    let old = TableName::new("s1", "t1");
    let new = TableName::new("s1", "t2");
    harness.create_cluster_table(&old, 13);
    let client = harness.node(1).node.client();
    let session = Session::new(1);

    client
        .create_table(&session, "CREATE TABLE s1.t1", "s1", "t1", 13, 1)
        .expect("Create table failed");
    let prepared = client
        .rename_table_prepare(&session, "s1", "t1", 13, 1, &new)
        .expect("Rename prepare failed");
    assert!(prepared.is_success(), "{}", prepared);

    harness
        .cluster
        .rename_table(&old, &new)
        .expect("Unable to rename in cluster");
    let renamed = client
        .rename_table(&session, "RENAME TABLE s1.t1 TO s1.t2", "s1", "t1", 13, 1)
        .expect("Rename failed");
    assert!(renamed.is_success(), "{}", renamed);

    for test_node in &harness.nodes {
        let node_id = test_node.node.node_id();
        assert!(test_node.catalog.get_table(&old).unwrap().is_none());
        assert!(test_node.catalog.get_table(&new).unwrap().is_some());
        assert!(!harness.cluster.is_subscribed(node_id, &old));
        assert!(harness.cluster.is_subscribed(node_id, &new));

        // the prepare step is not logged
        let queries: Vec<String> = test_node
            .log
            .queries()
            .into_iter()
            .map(|query| query.query)
            .collect();
        assert_eq!(
            queries,
            vec![
                "CREATE TABLE s1.t1".to_string(),
                "RENAME TABLE s1.t1 TO s1.t2".to_string()
            ]
        );
    }

    harness.shutdown();
}

/// Verifies that row changes committed in the same epoch as a drop table are logged before
/// the drop.
///
/// 1. Create and distribute `s1.t1`, then hold the open epoch
/// 2. Insert a row into `s1.t1` and write the drop of `s1.t1` in the held epoch
/// 3. Release the epoch
/// 4. Verify each node logged the epoch's transaction, with the insert, before the drop
///    statement, and no longer subscribes to the table
#[test]
fn drop_table_is_applied_after_the_epoch() {
    let harness = Harness::start(2, config().build().unwrap());
    let table = TableName::new("s1", "t1");
    harness.create_cluster_table(&table, 14);
    let client = harness.node(1).node.client();
    client
        .create_table(&Session::new(1), "CREATE TABLE s1.t1", "s1", "t1", 14, 1)
        .expect("Create table failed");

    harness.cluster.hold_epoch();
    let mut txn = harness.cluster.begin().unwrap();
    txn.insert(&table, vec![Value::UInt(1), Value::Text("one".into())])
        .unwrap();
    let epoch = txn.commit().unwrap();

    let waiter = thread::spawn(move || {
        client.drop_table(&Session::new(1), "DROP TABLE s1.t1", "s1", "t1", 14, 1)
    });
    wait_until("drop table row", || {
        coordination_row(&harness.cluster, "s1", "t1")
            .map(|row| row.op_type == SchemaOpType::DropTable)
            .unwrap_or(false)
    });
    assert_eq!(harness.cluster.release_epoch(), epoch);

    let outcome = waiter
        .join()
        .expect("Client panicked")
        .expect("Drop table failed");
    assert!(outcome.is_success(), "{}", outcome);

    for test_node in &harness.nodes {
        let entries = test_node.log.entries();
        let transaction = entries
            .iter()
            .position(|entry| match entry {
                LogEntry::Transaction { record, .. } => record.epoch == epoch,
                _ => false,
            })
            .expect("Epoch was not injected");
        let drop = entries
            .iter()
            .position(|entry| match entry {
                LogEntry::Query(query) => query.query == "DROP TABLE s1.t1",
                _ => false,
            })
            .expect("Drop was not logged");
        assert!(transaction < drop);

        match &entries[transaction] {
            LogEntry::Transaction { record, .. } => {
                assert_eq!(record.inserts, 1);
                assert_eq!(record.schema_ops, 1);
            }
            _ => unreachable!(),
        }
        assert!(!harness
            .cluster
            .is_subscribed(test_node.node.node_id(), &table));
        assert!(test_node.catalog.get_table(&table).unwrap().is_none());
    }

    harness.shutdown();
}

/// Verifies the lock bitmap protocol used when the coordination table has no operation id
/// column.
#[test]
fn lock_bitmap_protocol() {
    let config = config().with_create_op_id_column(false).build().unwrap();
    let harness = Harness::start(3, config);
    let table = TableName::new("s1", "t1");
    harness.create_cluster_table(&table, 15);

    let outcome = harness
        .node(2)
        .node
        .client()
        .create_table(&Session::new(2), "CREATE TABLE s1.t1", "s1", "t1", 15, 1)
        .expect("Create table failed");
    assert!(outcome.is_success(), "{}", outcome);
    assert_eq!(outcome.results().len(), 3);

    assert!(harness.cluster.table_def(&results_table()).unwrap().is_none());
    let row = coordination_row(&harness.cluster, "s1", "t1").expect("No coordination row");
    assert_eq!(row.op_id, None);
    assert_eq!(row.op_type, SchemaOpType::ClearSlock);
    assert!(row.lock_bitmap.is_empty());
    for test_node in &harness.nodes {
        assert!(test_node.catalog.get_table(&table).unwrap().is_some());
    }

    harness.shutdown();
}

/// Verifies that a participant unable to take the metadata lock reports a failure with a
/// message.
#[test]
fn apply_failure_is_reported() {
    let harness = Harness::start(2, config().build().unwrap());
    let table = TableName::new("s1", "t1");
    harness.create_cluster_table(&table, 16);

    let ticket = harness
        .node(2)
        .catalog
        .lock_exclusive(&MdlKey::Table(table.clone()), Duration::from_secs(1))
        .expect("Unable to lock");
    let outcome = harness
        .node(1)
        .node
        .client()
        .create_table(&Session::new(1), "CREATE TABLE s1.t1", "s1", "t1", 16, 1)
        .expect("Create table failed");
    harness.node(2).catalog.release(ticket);

    let failure = outcome.result_for(2).expect("No result for node 2");
    assert_eq!(failure.code, ResultCode::SchemaOpFailure);
    assert!(!failure.message.is_empty());
    assert_eq!(outcome.result_for(1).unwrap().code, ResultCode::Success);
    assert!(harness.node(2).catalog.get_table(&table).unwrap().is_none());
    assert_eq!(harness.node(2).node.stats().apply_failures, 1);

    harness.shutdown();
}

/// Verifies database, tablespace and access control operations, and that statements of a
/// replica applier session are not logged again.
#[test]
fn other_objects_and_replica_sessions() {
    let harness = Harness::start(2, config().build().unwrap());
    let client = harness.node(1).node.client();
    let session = Session::new(1);

    assert!(client
        .create_db(&session, "CREATE DATABASE s2", "s2", 1, 1)
        .unwrap()
        .is_success());
    assert!(client
        .create_tablespace(&session, "CREATE TABLESPACE ts1", "ts1", 4, 1)
        .unwrap()
        .is_success());
    assert!(client
        .acl_notify(&session, "GRANT SELECT ON s2.* TO 'app'")
        .unwrap()
        .is_success());
    assert!(client
        .acl_snapshot(&session, &["app".to_string(), "ops".to_string()])
        .unwrap()
        .is_success());

    let replica = Session::new(1).as_replica_applier(77);
    assert!(client
        .alter_db(&replica, "ALTER DATABASE s2 CHARACTER SET utf8", "s2", 1, 2)
        .unwrap()
        .is_success());

    let participant = harness.node(2);
    assert!(participant.catalog.has_database("s2").unwrap());
    assert_eq!(
        participant.catalog.database_statement("s2"),
        Some("ALTER DATABASE s2 CHARACTER SET utf8".to_string())
    );
    assert_eq!(participant.catalog.tablespace("ts1"), Some((4, 1)));
    assert_eq!(
        participant.catalog.acl_statements(),
        vec!["GRANT SELECT ON s2.* TO 'app'".to_string()]
    );
    assert_eq!(
        participant.catalog.acl_refreshes(),
        vec!["app".to_string(), "ops".to_string()]
    );

    let queries: Vec<String> = participant
        .log
        .queries()
        .into_iter()
        .map(|query| query.query)
        .collect();
    assert_eq!(
        queries,
        vec![
            "CREATE DATABASE s2".to_string(),
            "CREATE TABLESPACE ts1".to_string(),
            "GRANT SELECT ON s2.* TO 'app'".to_string(),
        ]
    );

    harness.shutdown();
}

/// Verifies that a participant which never answers is timed out, and that the client does not
/// wait much longer than the operation timeout.
#[test]
fn silent_participant_times_out() {
    let config = config()
        .with_schema_op_timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let harness = Harness::start(1, config);
    let mut silent = harness.cluster.create_event_stream(5).unwrap();
    silent.subscribe(&schema_ops_table()).unwrap();
    harness.wait_for_subscribers(2);

    let start = Instant::now();
    let result = harness.node(1).node.client().create_db(
        &Session::new(1),
        "CREATE DATABASE s3",
        "s3",
        1,
        1,
    );
    assert!(start.elapsed() < Duration::from_secs(5));

    match result {
        Ok(outcome) => {
            assert_eq!(outcome.result_for(5).unwrap().code, ResultCode::NodeTimeout);
            assert_eq!(outcome.result_for(1).unwrap().code, ResultCode::Success);
        }
        Err(SchemaDistError::Timeout { .. }) => (),
        Err(err) => panic!("Unexpected error {}", err),
    }
    wait_until("timeout sweep", || {
        harness.node(1).node.stats().timeouts >= 1
    });

    drop(silent);
    harness.shutdown();
}
