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

//! The per-node event loop.
//!
//! The loop owns two event streams on the cluster: the schema stream, subscribed to the
//! coordination and result tables, and the data stream, subscribed to every user table. Each
//! epoch is processed in a fixed order: schema events, then data events, then the epoch's log
//! transaction, then the schema operations deferred to the end of the epoch.
//!
//! Any error ends the current session: open operations are aborted, an incident is written to
//! the replication log and the loop sets itself up again after a delay.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::catalog::{LocalCatalog, MetadataLocks};
use crate::cluster::{Cluster, ClusterError, ClusterEvent, Epoch, EventStream, TableDef};
use crate::error::InvalidStateError;
use crate::retry::RetryPolicy;
use crate::sdist::ack::acknowledger_for;
use crate::sdist::table::{
    apply_status_def, is_internal_table, results_def, results_table, schema_ops_def,
    schema_ops_table, CoordinationLayout,
};
use crate::sdist::{SchemaDistContext, SchemaDistError, SchemaEventHandler};

use super::{ChangeInjector, EventLoopError, ReplicationLog};

const SCHEMA_POLL_TIMEOUT: Duration = Duration::from_millis(50);
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// State of one set-up session of the loop; dropped on teardown.
struct LoopSession {
    schema_stream: Box<dyn EventStream>,
    data_stream: Box<dyn EventStream>,
    handler: SchemaEventHandler,
    injector: ChangeInjector,
}

pub struct EpochEventLoop {
    context: Arc<SchemaDistContext>,
    cluster: Arc<dyn Cluster>,
    catalog: Arc<dyn LocalCatalog>,
    locks: Arc<dyn MetadataLocks>,
    log: Arc<dyn ReplicationLog>,
    shutdown: Arc<AtomicBool>,
}

impl EpochEventLoop {
    pub fn new(
        context: Arc<SchemaDistContext>,
        cluster: Arc<dyn Cluster>,
        catalog: Arc<dyn LocalCatalog>,
        locks: Arc<dyn MetadataLocks>,
        log: Arc<dyn ReplicationLog>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        EpochEventLoop {
            context,
            cluster,
            catalog,
            locks,
            log,
            shutdown,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs until the shutdown flag is set, setting the loop up again after every failure.
    pub fn run(&self) {
        let node_id = self.context.node_id();
        info!("Starting epoch event loop of node {}", node_id);

        while !self.is_shutdown() {
            match self.setup() {
                Ok(mut session) => {
                    let result = self.run_session(&mut session);
                    self.teardown(session);
                    match result {
                        Ok(()) => break,
                        Err(err) => {
                            error!("Epoch event loop of node {} failed: {}", node_id, err);
                            self.write_incident(&err.to_string());
                        }
                    }
                }
                Err(err) => {
                    error!(
                        "Unable to set up schema distribution on node {}: {}",
                        node_id, err
                    );
                    self.context.teardown();
                }
            }

            if !self.sleep(self.context.config().restart_delay()) {
                break;
            }
            self.context.stats().restarted();
            info!("Restarting epoch event loop of node {}", node_id);
        }

        info!("Epoch event loop of node {} stopped", node_id);
    }

    /// Sleeps up to `duration`; returns false if shutdown was requested meanwhile.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while !self.is_shutdown() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SHUTDOWN_CHECK_INTERVAL.min(deadline - now));
        }
        false
    }

    fn setup(&self) -> Result<LoopSession, EventLoopError> {
        let config = self.context.config();
        let node_id = self.context.node_id();

        let coordination_def = self.ensure_table(
            schema_ops_def(config.create_op_id_column()).map_err(SchemaDistError::from)?,
        )?;
        let layout = CoordinationLayout::from_def(&coordination_def)?;
        if layout.uses_op_id() {
            self.ensure_table(results_def().map_err(SchemaDistError::from)?)?;
        }
        self.ensure_table(apply_status_def().map_err(SchemaDistError::from)?)?;

        let acknowledger = acknowledger_for(
            &layout,
            self.cluster.clone(),
            RetryPolicy::from_config(config),
        );

        let mut schema_stream = self.cluster.create_event_stream(node_id)?;
        schema_stream.subscribe(&schema_ops_table())?;
        if layout.uses_op_id() {
            schema_stream.subscribe(&results_table())?;
        }

        let mut data_stream = self.cluster.create_event_stream(node_id)?;
        self.resync_catalog(&mut *data_stream)?;

        self.context.init(layout);

        Ok(LoopSession {
            schema_stream,
            data_stream,
            handler: SchemaEventHandler::new(
                self.context.clone(),
                self.cluster.clone(),
                self.catalog.clone(),
                self.locks.clone(),
                self.log.clone(),
                acknowledger,
            ),
            injector: ChangeInjector::new(
                self.context.clone(),
                self.catalog.clone(),
                self.log.clone(),
            ),
        })
    }

    /// Returns the definition of a shared table, creating it if no node did yet.
    fn ensure_table(&self, def: TableDef) -> Result<TableDef, EventLoopError> {
        let name = def.name().clone();
        if let Some(existing) = self.cluster.table_def(&name)? {
            return Ok(existing);
        }

        match self.cluster.create_table(def.clone()) {
            Ok(()) => {
                info!("Created {}", name);
                Ok(def)
            }
            Err(ClusterError::AlreadyExists(_)) => self.cluster.table_def(&name)?.ok_or_else(|| {
                EventLoopError::SetupError(InvalidStateError::with_message(format!(
                    "{} was created and dropped concurrently",
                    name
                )))
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Makes the local catalog match the user tables of the cluster and subscribes to their
    /// changes.
    fn resync_catalog(&self, data_stream: &mut dyn EventStream) -> Result<(), EventLoopError> {
        let binlog_enabled = self.context.config().binlog_enabled();
        let tables: Vec<TableDef> = self
            .cluster
            .list_tables()?
            .into_iter()
            .filter(|def| !is_internal_table(def.name()))
            .collect();
        let names: BTreeSet<_> = tables.iter().map(|def| def.name().clone()).collect();

        for local in self
            .catalog
            .list_tables()
            .map_err(SchemaDistError::from)?
        {
            if !names.contains(local.name()) {
                debug!("Removing stale local table {}", local.name());
                self.catalog
                    .remove_table(local.name())
                    .map_err(SchemaDistError::from)?;
            }
        }
        for def in &tables {
            self.catalog
                .install_table(def)
                .map_err(SchemaDistError::from)?;
            if binlog_enabled {
                data_stream.subscribe(def.name())?;
            }
        }

        debug!("Synchronized {} table(s) from the cluster", tables.len());
        Ok(())
    }

    /// Processes epochs until shutdown or the first error.
    fn run_session(&self, session: &mut LoopSession) -> Result<(), EventLoopError> {
        let binlog_enabled = self.context.config().binlog_enabled();

        while !self.is_shutdown() {
            let schema_epoch = session.schema_stream.poll_epoch(SCHEMA_POLL_TIMEOUT)?;
            let data_epoch = session.data_stream.poll_epoch(Duration::from_millis(0))?;

            let epoch = select_epoch(
                schema_epoch,
                data_epoch,
                session.schema_stream.latest_epoch(),
                session.data_stream.latest_epoch(),
                binlog_enabled,
            );
            if let Some(epoch) = epoch {
                self.process_epoch(session, epoch)?;
            }

            session.handler.sweep()?;
        }

        Ok(())
    }

    fn process_epoch(&self, session: &mut LoopSession, epoch: Epoch) -> Result<(), EventLoopError> {
        trace!("Processing epoch {}", epoch);
        let binlog_enabled = self.context.config().binlog_enabled();

        while let Some(event) = session.schema_stream.next_event(epoch) {
            session.handler.handle_event(
                epoch,
                event,
                &*session.schema_stream,
                &mut *session.data_stream,
            )?;
        }

        while let Some(event) = session.data_stream.next_event(epoch) {
            match event {
                ClusterEvent::Row(row_event) if binlog_enabled => {
                    session
                        .injector
                        .handle_event(row_event, &*session.data_stream)?;
                }
                _ => (),
            }
        }

        let schema_ops = session.handler.take_schema_op_count();
        session.injector.commit_epoch(epoch, schema_ops)?;

        if session.handler.has_post_epoch_ops() {
            session
                .handler
                .run_post_epoch(epoch, &mut *session.data_stream)?;
        }
        Ok(())
    }

    fn teardown(&self, mut session: LoopSession) {
        self.context.teardown();
        session.handler.teardown();
        session.injector.reset();
    }

    fn write_incident(&self, reason: &str) {
        if !self.context.config().binlog_enabled() {
            return;
        }
        if let Err(err) = self.log.write_incident(reason) {
            error!("Unable to write incident to replication log: {}", err);
        }
    }
}

/// Chooses the next epoch to process from the epochs available on each stream.
///
/// Both streams deliver every epoch. When only one stream has an epoch available it is
/// processed only once the other stream is known to have nothing left for it.
fn select_epoch(
    schema: Option<Epoch>,
    data: Option<Epoch>,
    schema_latest: Epoch,
    data_latest: Epoch,
    binlog_enabled: bool,
) -> Option<Epoch> {
    match (schema, data) {
        (Some(schema), Some(data)) => Some(schema.min(data)),
        (Some(schema), None) if !binlog_enabled || data_latest >= schema => Some(schema),
        (None, Some(data)) if schema_latest >= data => Some(data),
        _ => None,
    }
}
