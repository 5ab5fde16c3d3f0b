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

//! The client side of a distributed schema operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::any_value::AnyValue;
use crate::bitmap::NodeBitmap;
use crate::cluster::{Cluster, TableName};
use crate::retry::{run_in_transaction, RetryPolicy};

use super::context::SchemaDistContext;
use super::error::SchemaDistError;
use super::result::{ResultCode, SchemaDistOutcome};
use super::table::{
    encode_rename_target, schema_ops_table, SchemaOpKey, SchemaOpRow, SchemaOpType,
};

/// The session a schema change is executed in.
#[derive(Clone, Debug)]
pub struct Session {
    server_id: u32,
    killed: Arc<AtomicBool>,
    replica_origin: Option<u32>,
    no_distribution: bool,
}

impl Session {
    pub fn new(server_id: u32) -> Self {
        Session {
            server_id,
            killed: Arc::new(AtomicBool::new(false)),
            replica_origin: None,
            no_distribution: false,
        }
    }

    /// Marks the session as applying changes replicated from `upstream_server_id`.
    pub fn as_replica_applier(mut self, upstream_server_id: u32) -> Self {
        self.replica_origin = Some(upstream_server_id);
        self
    }

    /// Changes made in this session only affect the local node.
    pub fn without_distribution(mut self) -> Self {
        self.no_distribution = true;
        self
    }

    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    /// Kills the session. Clones share the flag.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

struct Request<'a> {
    db: &'a str,
    name: &'a str,
    id: u32,
    version: u32,
    op_type: SchemaOpType,
    payload: String,
}

/// Distributes schema changes made on this node and waits for the other nodes to apply them.
///
/// Every operation returns the outcome of each participant; an `Ok` outcome may still contain
/// failures of individual nodes.
#[derive(Clone)]
pub struct SchemaDistClient {
    context: Arc<SchemaDistContext>,
    cluster: Arc<dyn Cluster>,
}

impl SchemaDistClient {
    pub fn new(context: Arc<SchemaDistContext>, cluster: Arc<dyn Cluster>) -> Self {
        SchemaDistClient { context, cluster }
    }

    pub fn create_table(
        &self,
        session: &Session,
        query: &str,
        db: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::CreateTable, query, db, name, id, version)
    }

    pub fn alter_table(
        &self,
        session: &Session,
        query: &str,
        db: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::AlterTableCommit, query, db, name, id, version)
    }

    pub fn truncate_table(
        &self,
        session: &Session,
        query: &str,
        db: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::TruncateTable, query, db, name, id, version)
    }

    pub fn drop_table(
        &self,
        session: &Session,
        query: &str,
        db: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::DropTable, query, db, name, id, version)
    }

    /// First phase of a rename: tells every node the name `db.name` is about to get.
    #[allow(clippy::too_many_arguments)]
    pub fn rename_table_prepare(
        &self,
        session: &Session,
        db: &str,
        name: &str,
        id: u32,
        version: u32,
        new_name: &TableName,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.distribute(
            session,
            Request {
                db,
                name,
                id,
                version,
                op_type: SchemaOpType::RenameTablePrepare,
                payload: encode_rename_target(new_name),
            },
        )
    }

    /// Second phase of a rename, for the table as it was named when prepared.
    pub fn rename_table(
        &self,
        session: &Session,
        query: &str,
        db: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::RenameTable, query, db, name, id, version)
    }

    pub fn create_db(
        &self,
        session: &Session,
        query: &str,
        db: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::CreateDb, query, db, "", id, version)
    }

    pub fn alter_db(
        &self,
        session: &Session,
        query: &str,
        db: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::AlterDb, query, db, "", id, version)
    }

    pub fn drop_db(
        &self,
        session: &Session,
        query: &str,
        db: &str,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::DropDb, query, db, "", 0, 0)
    }

    pub fn create_tablespace(
        &self,
        session: &Session,
        query: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::CreateTablespace, query, "", name, id, version)
    }

    pub fn alter_tablespace(
        &self,
        session: &Session,
        query: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::AlterTablespace, query, "", name, id, version)
    }

    pub fn drop_tablespace(
        &self,
        session: &Session,
        query: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::DropTablespace, query, "", name, id, version)
    }

    pub fn create_logfile_group(
        &self,
        session: &Session,
        query: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::CreateLogfileGroup, query, "", name, id, version)
    }

    pub fn alter_logfile_group(
        &self,
        session: &Session,
        query: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::AlterLogfileGroup, query, "", name, id, version)
    }

    pub fn drop_logfile_group(
        &self,
        session: &Session,
        query: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::DropLogfileGroup, query, "", name, id, version)
    }

    /// Distributes an access control statement to be re-executed by every node.
    pub fn acl_notify(
        &self,
        session: &Session,
        statement: &str,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::AclStatement, statement, "", "", 0, 0)
    }

    /// Asks every node to reload the privileges of `users` from the shared privilege tables.
    pub fn acl_snapshot(
        &self,
        session: &Session,
        users: &[String],
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.table_op(session, SchemaOpType::AclSnapshot, &users.join(","), "", "", 0, 0)
    }

    #[allow(clippy::too_many_arguments)]
    fn table_op(
        &self,
        session: &Session,
        op_type: SchemaOpType,
        query: &str,
        db: &str,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        self.distribute(
            session,
            Request {
                db,
                name,
                id,
                version,
                op_type,
                payload: query.to_string(),
            },
        )
    }

    fn distribute(
        &self,
        session: &Session,
        request: Request,
    ) -> Result<SchemaDistOutcome, SchemaDistError> {
        if session.no_distribution {
            return Ok(SchemaDistOutcome::default());
        }
        if !self.context.is_ready() {
            return Err(SchemaDistError::NotReady);
        }
        let layout = self.context.layout().ok_or(SchemaDistError::NotReady)?;

        if request.db.len() > layout.max_db_len() {
            return Err(SchemaDistError::IdentifierTooLong {
                identifier: request.db.to_string(),
                max_len: layout.max_db_len(),
            });
        }
        if request.name.len() > layout.max_name_len() {
            return Err(SchemaDistError::IdentifierTooLong {
                identifier: request.name.to_string(),
                max_len: layout.max_name_len(),
            });
        }

        let config = self.context.config();
        let own = self.context.node_id();
        let key = SchemaOpKey::new(request.db, request.name, request.id, request.version);
        let op = self.context.registry().create(
            key.clone(),
            request.op_type,
            own,
            config.schema_op_timeout(),
            &|| session.is_killed(),
        )?;

        if session.is_killed() {
            op.set_client_result(ResultCode::ClientKilled);
            self.context.registry().release(&op);
            return Err(SchemaDistError::Killed);
        }

        let tag = match session.replica_origin {
            Some(upstream) if config.log_replica_updates() => AnyValue::Replicated {
                server_id: upstream,
            },
            Some(_) => AnyValue::NoLogging,
            None => AnyValue::Origin {
                server_id: session.server_id,
            },
        };
        let row = SchemaOpRow {
            db: request.db.to_string(),
            name: request.name.to_string(),
            lock_bitmap: NodeBitmap::all_ones(),
            payload: request.payload,
            origin_node_id: own,
            epoch: 0,
            object_id: request.id,
            object_version: request.version,
            op_type: request.op_type,
            op_id: if layout.uses_op_id() {
                Some(op.op_id())
            } else {
                None
            },
        };

        debug!("Distributing {} {}", request.op_type, key);
        let table = schema_ops_table();
        let policy = RetryPolicy::from_config(config);
        let written = run_in_transaction(
            &*self.cluster,
            &policy,
            &|| session.is_killed(),
            |txn| {
                txn.set_any_value(tag.encode());
                txn.write(&table, row.to_row(&layout))
            },
        );
        if let Err(err) = written {
            op.set_client_result(ResultCode::ClientAbort);
            self.context.registry().release(&op);
            if session.is_killed() {
                return Err(SchemaDistError::Killed);
            }
            return Err(err.into());
        }
        if let Err(err) = self.cluster.force_gcp() {
            warn!("Unable to force epoch completion for {}: {}", key, err);
        }

        let check_interval = config.check_interval();
        let deadline = op.started() + config.schema_op_timeout() + check_interval;
        let mut kill_logged = false;
        while !op.wait_completed(check_interval) {
            if session.is_killed() && !kill_logged {
                info!(
                    "Session killed after distributing {}; waiting for participants",
                    key
                );
                kill_logged = true;
            }
            if Instant::now() >= deadline {
                op.set_client_result(ResultCode::ClientTimeout);
                let results = op.results();
                self.context.registry().release(&op);
                warn!("Timed out waiting for {} {}", request.op_type, key);
                return Err(SchemaDistError::Timeout {
                    op: format!("{} {}", request.op_type, key),
                    results,
                });
            }
        }

        let outcome = SchemaDistOutcome::new(op.results());
        self.context.registry().release(&op);
        if !outcome.is_success() {
            warn!("{} {} finished with {}", request.op_type, key, outcome);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::cluster::memory::MemoryCluster;
    use crate::config::SchemaDistConfigBuilder;
    use crate::sdist::table::{schema_ops_def, CoordinationLayout};

    fn client(with_op_id: bool) -> (SchemaDistClient, Arc<SchemaDistContext>, MemoryCluster) {
        client_with_timeout(with_op_id, Duration::from_millis(40))
    }

    fn client_with_timeout(
        with_op_id: bool,
        schema_op_timeout: Duration,
    ) -> (SchemaDistClient, Arc<SchemaDistContext>, MemoryCluster) {
        let cluster = MemoryCluster::default();
        let def = schema_ops_def(with_op_id).unwrap();
        cluster.create_table(def.clone()).unwrap();

        let config = SchemaDistConfigBuilder::new()
            .with_schema_op_timeout(schema_op_timeout)
            .with_check_interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let context = Arc::new(SchemaDistContext::new(1, 101, config));
        context.init(CoordinationLayout::from_def(&def).unwrap());

        (
            SchemaDistClient::new(context.clone(), Arc::new(cluster.clone())),
            context,
            cluster,
        )
    }

    /// Verifies that a session without distribution never touches the cluster.
    #[test]
    fn test_no_distribution() {
        let (client, context, cluster) = client(true);
        context.teardown();

        let session = Session::new(101).without_distribution();
        let outcome = client
            .create_table(&session, "CREATE TABLE t1", "s1", "t1", 1, 1)
            .expect("Local operation failed");
        assert!(outcome.is_success());
        assert!(outcome.results().is_empty());
        assert!(cluster.rows(&schema_ops_table()).unwrap().is_empty());
    }

    /// Verifies the errors returned before anything is written.
    #[test]
    fn test_rejected_operations() {
        let (client, context, cluster) = client(true);
        let session = Session::new(101);

        let long_name = "t".repeat(256);
        match client.create_table(&session, "CREATE TABLE", "s1", &long_name, 1, 1) {
            Err(SchemaDistError::IdentifierTooLong { max_len, .. }) => assert_eq!(max_len, 255),
            other => panic!("Unexpected result {:?}", other),
        }

        session.kill();
        match client.create_table(&session, "CREATE TABLE t1", "s1", "t1", 1, 1) {
            Err(SchemaDistError::Killed) => (),
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(context.registry().is_empty());

        context.teardown();
        match client.create_table(&session, "CREATE TABLE t1", "s1", "t1", 1, 1) {
            Err(SchemaDistError::NotReady) => (),
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(cluster.rows(&schema_ops_table()).unwrap().is_empty());
    }

    /// Verifies that a session killed while waiting for an earlier operation on the same table
    /// is aborted before anything is written.
    #[test]
    fn test_killed_while_object_busy() {
        let (client, context, cluster) = client_with_timeout(true, Duration::from_secs(5));
        let earlier = context
            .registry()
            .create(
                SchemaOpKey::new("s1", "t1", 1, 1),
                SchemaOpType::CreateTable,
                1,
                Duration::from_secs(1),
                &|| false,
            )
            .unwrap();

        let session = Session::new(101);
        let killer = session.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            killer.kill();
        });

        let start = Instant::now();
        match client.drop_table(&session, "DROP TABLE t1", "s1", "t1", 1, 1) {
            Err(SchemaDistError::Killed) => (),
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(cluster.rows(&schema_ops_table()).unwrap().is_empty());

        context.registry().release(&earlier);
        assert!(context.registry().is_empty());
        handle.join().expect("Killer panicked");
    }

    /// Verifies that without an event loop the row is written and the client gives up after
    /// the operation timeout, releasing its handle.
    #[test]
    fn test_client_timeout() {
        let (client, context, cluster) = client(true);
        let session = Session::new(101);

        match client.create_table(&session, "CREATE TABLE t1", "s1", "t1", 7, 2) {
            Err(SchemaDistError::Timeout { results, .. }) => assert!(results.is_empty()),
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(context.registry().is_empty());

        let rows = cluster.rows(&schema_ops_table()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = SchemaOpRow::from_row(&rows[0]).unwrap();
        assert_eq!(row.op_type, SchemaOpType::CreateTable);
        assert_eq!(row.origin_node_id, 1);
        assert_eq!(row.object_id, 7);
        assert!(row.op_id.is_some());
        assert!(row.lock_bitmap.is_set(3));
    }

    /// Verifies that rows are written without an operation id when the coordination table has
    /// no column for it.
    #[test]
    fn test_legacy_layout_row() {
        let (client, _, cluster) = client(false);
        let session = Session::new(101);
        let target = TableName::new("s1", "t2");

        let _ = client.rename_table_prepare(&session, "s1", "t1", 7, 2, &target);

        let rows = cluster.rows(&schema_ops_table()).unwrap();
        let row = SchemaOpRow::from_row(&rows[0]).unwrap();
        assert_eq!(row.op_type, SchemaOpType::RenameTablePrepare);
        assert_eq!(row.op_id, None);
        assert_eq!(row.payload, encode_rename_target(&target));
    }
}
