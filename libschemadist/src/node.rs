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

//! A front-end node: its shared schema distribution state and its epoch event loop thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::binlog::{EpochEventLoop, ReplicationLog};
use crate::bitmap::MAX_NODES;
use crate::catalog::{LocalCatalog, MetadataLocks};
use crate::cluster::{Cluster, NodeId};
use crate::config::SchemaDistConfig;
use crate::error::{InternalError, InvalidArgumentError};
use crate::sdist::{SchemaDistClient, SchemaDistContext, SchemaDistStatsSnapshot};
use crate::threading::shutdown::ShutdownHandle;

/// Builds and starts a [`SchemaDistNode`].
#[derive(Default)]
pub struct SchemaDistNodeBuilder {
    node_id: Option<NodeId>,
    server_id: Option<u32>,
    config: Option<SchemaDistConfig>,
    cluster: Option<Arc<dyn Cluster>>,
    catalog: Option<Arc<dyn LocalCatalog>>,
    locks: Option<Arc<dyn MetadataLocks>>,
    log: Option<Arc<dyn ReplicationLog>>,
}

impl SchemaDistNodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// The server id the node's own changes are attributed to. Defaults to the node id.
    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = Some(server_id);
        self
    }

    pub fn with_config(mut self, config: SchemaDistConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_cluster(mut self, cluster: Arc<dyn Cluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn LocalCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_metadata_locks(mut self, locks: Arc<dyn MetadataLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn with_replication_log(mut self, log: Arc<dyn ReplicationLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Starts the event loop thread of the node.
    pub fn start(self) -> Result<SchemaDistNode, InternalError> {
        let node_id = self.node_id.ok_or_else(|| missing("node_id"))?;
        if node_id >= MAX_NODES {
            return Err(InternalError::from_source(Box::new(InvalidArgumentError::new(
                "node_id".to_string(),
                format!("must be less than {}, got {}", MAX_NODES, node_id),
            ))));
        }
        let cluster = self.cluster.ok_or_else(|| missing("cluster"))?;
        let catalog = self.catalog.ok_or_else(|| missing("catalog"))?;
        let locks = self.locks.ok_or_else(|| missing("metadata_locks"))?;
        let log = self.log.ok_or_else(|| missing("replication_log"))?;
        let server_id = self.server_id.unwrap_or(node_id);
        let config = self.config.unwrap_or_default();

        let context = Arc::new(SchemaDistContext::new(node_id, server_id, config));
        let shutdown = Arc::new(AtomicBool::new(false));
        let event_loop = EpochEventLoop::new(
            context.clone(),
            cluster.clone(),
            catalog,
            locks,
            log,
            shutdown.clone(),
        );

        let join_handle = thread::Builder::new()
            .name(format!("SchemaDist-{}", node_id))
            .spawn(move || event_loop.run())
            .map_err(|err| InternalError::from_source(Box::new(err)))?;

        Ok(SchemaDistNode {
            context,
            cluster,
            shutdown,
            join_handle: Some(join_handle),
        })
    }
}

fn missing(argument: &str) -> InternalError {
    InternalError::from_source(Box::new(InvalidArgumentError::new(
        argument.to_string(),
        "missing required argument".to_string(),
    )))
}

/// A running front-end node.
pub struct SchemaDistNode {
    context: Arc<SchemaDistContext>,
    cluster: Arc<dyn Cluster>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl SchemaDistNode {
    pub fn builder() -> SchemaDistNodeBuilder {
        SchemaDistNodeBuilder::new()
    }

    pub fn node_id(&self) -> NodeId {
        self.context.node_id()
    }

    /// Returns a client for schema changes made on this node.
    pub fn client(&self) -> SchemaDistClient {
        SchemaDistClient::new(self.context.clone(), self.cluster.clone())
    }

    pub fn context(&self) -> &Arc<SchemaDistContext> {
        &self.context
    }

    pub fn stats(&self) -> SchemaDistStatsSnapshot {
        self.context.stats().snapshot()
    }

    pub fn is_ready(&self) -> bool {
        self.context.is_ready()
    }

    /// Waits up to `timeout` for the event loop to finish setting up.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.context.is_ready() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl ShutdownHandle for SchemaDistNode {
    fn signal_shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn wait_for_shutdown(&mut self) -> Result<(), InternalError> {
        match self.join_handle.take() {
            Some(join_handle) => join_handle.join().map_err(|_| {
                InternalError::with_message(format!(
                    "Event loop of node {} panicked",
                    self.context.node_id()
                ))
            }),
            None => Ok(()),
        }
    }
}
