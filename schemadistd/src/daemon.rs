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


//! The daemon: one in-memory storage cluster, the front-end nodes attached to it, the periodic
//! global checkpoint closing the cluster's epochs, and the console driving the nodes' clients.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use schemadist::binlog::MemoryReplicationLog;
use schemadist::catalog::MemoryCatalog;
use schemadist::cluster::memory::MemoryCluster;
use schemadist::cluster::{NodeId, ShardId};
use schemadist::config::SchemaDistConfig;
use schemadist::error::InternalError;
use schemadist::node::SchemaDistNode;
use schemadist::threading::shutdown::{shutdown, ShutdownHandle};

use crate::console::{parse_line, Console};
use crate::error::UserError;

const CONSOLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
pub struct SchemaDistDaemonBuilder {
    node_ids: Vec<NodeId>,
    server_id_base: u32,
    shards: Vec<ShardId>,
    gcp_interval: Option<Duration>,
    config: Option<SchemaDistConfig>,
    exit_on_console_close: bool,
}

impl SchemaDistDaemonBuilder {
    pub fn new() -> Self {
        SchemaDistDaemonBuilder::default()
    }

    pub fn with_node_ids(mut self, node_ids: Vec<NodeId>) -> Self {
        self.node_ids = node_ids;
        self
    }

    /// Each node's server id is the base plus its node id.
    pub fn with_server_id_base(mut self, server_id_base: u32) -> Self {
        self.server_id_base = server_id_base;
        self
    }

    pub fn with_shards(mut self, shards: Vec<ShardId>) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_gcp_interval(mut self, gcp_interval: Duration) -> Self {
        self.gcp_interval = Some(gcp_interval);
        self
    }

    pub fn with_schema_dist_config(mut self, config: SchemaDistConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Stop the daemon once the console input ends, instead of waiting for a shutdown signal.
    pub fn with_exit_on_console_close(mut self, exit_on_console_close: bool) -> Self {
        self.exit_on_console_close = exit_on_console_close;
        self
    }

    pub fn build(self) -> Result<SchemaDistDaemon, UserError> {
        if self.node_ids.is_empty() {
            return Err(UserError::MissingArgument("node ids".to_string()));
        }
        if self.shards.is_empty() {
            return Err(UserError::MissingArgument("shards".to_string()));
        }
        let gcp_interval = self
            .gcp_interval
            .ok_or_else(|| UserError::MissingArgument("gcp interval".to_string()))?;
        if gcp_interval == Duration::from_secs(0) {
            return Err(UserError::InvalidArgument(
                "gcp interval must be greater than zero".to_string(),
            ));
        }

        Ok(SchemaDistDaemon {
            node_ids: self.node_ids,
            server_id_base: self.server_id_base,
            shards: self.shards,
            gcp_interval,
            config: self.config.unwrap_or_default(),
            exit_on_console_close: self.exit_on_console_close,
        })
    }
}

pub struct SchemaDistDaemon {
    node_ids: Vec<NodeId>,
    server_id_base: u32,
    shards: Vec<ShardId>,
    gcp_interval: Duration,
    config: SchemaDistConfig,
    exit_on_console_close: bool,
}

impl SchemaDistDaemon {
    /// Runs the daemon until it receives a shutdown signal, reading console commands from
    /// standard input and printing their reports to standard output.
    pub fn start(&mut self) -> Result<(), UserError> {
        // Setup up ctrlc handling
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            info!("Received Shutdown");
            r.store(false, Ordering::SeqCst);
        })
        .map_err(|err| {
            UserError::daemon_err_with_source("unable to set the ctrl-c handler", Box::new(err))
        })?;

        let (sender, receiver) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("Console".into())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            if sender.send(line).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            error!("Unable to read console input: {}", err);
                            break;
                        }
                    }
                }
            })
            .map_err(|err| {
                UserError::daemon_err_with_source("unable to start the console", Box::new(err))
            })?;

        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.run(running, receiver, &mut out)
    }

    fn run<W: Write>(
        &self,
        running: Arc<AtomicBool>,
        commands: Receiver<String>,
        out: &mut W,
    ) -> Result<(), UserError> {
        let cluster = MemoryCluster::new(self.shards.clone());
        let mut nodes = Vec::with_capacity(self.node_ids.len());
        for node_id in &self.node_ids {
            let catalog = MemoryCatalog::new();
            let node = SchemaDistNode::builder()
                .with_node_id(*node_id)
                .with_server_id(self.server_id_base + node_id)
                .with_config(self.config.clone())
                .with_cluster(Arc::new(cluster.clone()))
                .with_catalog(Arc::new(catalog.clone()))
                .with_metadata_locks(Arc::new(catalog))
                .with_replication_log(Arc::new(MemoryReplicationLog::new()))
                .start()?;
            nodes.push(node);
        }
        let checkpoint = GlobalCheckpoint::start(cluster.clone(), self.gcp_interval)?;

        for node in &nodes {
            if node.wait_until_ready(self.config.schema_op_timeout()) {
                info!("Node {} is ready", node.node_id());
            } else {
                warn!("Node {} is not ready yet", node.node_id());
            }
        }
        if !self.wait_for_subscribers(&nodes) {
            warn!("Not every node is subscribed to schema distribution yet");
        }

        let result = self.serve_console(&running, &commands, &Console::new(&cluster, &nodes), out);

        let mut handles: Vec<Box<dyn ShutdownHandle>> = nodes
            .into_iter()
            .map(|node| Box::new(node) as Box<dyn ShutdownHandle>)
            .collect();
        handles.push(Box::new(checkpoint));
        shutdown(handles)?;
        info!("Schema distribution daemon stopped");

        result
    }

    // Operations only reach the nodes their coordinator knows about, so the console waits until
    // every node has seen the subscriptions of all the others.
    fn wait_for_subscribers(&self, nodes: &[SchemaDistNode]) -> bool {
        let expected = nodes.len() as u32;
        let deadline = Instant::now() + self.config.schema_op_timeout();
        loop {
            if nodes
                .iter()
                .all(|node| node.context().tracker().live_nodes().count() >= expected)
            {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn serve_console<W: Write>(
        &self,
        running: &AtomicBool,
        commands: &Receiver<String>,
        console: &Console,
        out: &mut W,
    ) -> Result<(), UserError> {
        let mut console_open = true;
        while running.load(Ordering::SeqCst) {
            if !console_open {
                thread::sleep(CONSOLE_POLL_INTERVAL);
                continue;
            }
            let line = match commands.recv_timeout(CONSOLE_POLL_INTERVAL) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if self.exit_on_console_close {
                        debug!("Console input ended, stopping");
                        break;
                    }
                    console_open = false;
                    continue;
                }
            };

            let report = match parse_line(&line) {
                Ok(Some((node_id, command))) => console.execute(node_id, command),
                Ok(None) => continue,
                Err(err) => Err(err),
            };
            match report {
                Ok(report) => writeln!(out, "{}", report)?,
                Err(err) => {
                    error!("{}", err);
                    writeln!(out, "error: {}", err)?;
                }
            }
            out.flush()?;
        }
        Ok(())
    }
}

/// Closes the cluster's open epoch at a fixed interval, the way the global checkpoint of a
/// storage cluster does.
struct GlobalCheckpoint {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl GlobalCheckpoint {
    fn start(cluster: MemoryCluster, interval: Duration) -> Result<Self, InternalError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let join_handle = thread::Builder::new()
            .name("GlobalCheckpoint".into())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    if let Some(epoch) = cluster.tick() {
                        trace!("Closed epoch {}", epoch);
                    }
                }
            })
            .map_err(|err| InternalError::from_source(Box::new(err)))?;

        Ok(GlobalCheckpoint {
            shutdown,
            join_handle: Some(join_handle),
        })
    }
}

impl ShutdownHandle for GlobalCheckpoint {
    fn signal_shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn wait_for_shutdown(&mut self) -> Result<(), InternalError> {
        match self.join_handle.take() {
            Some(join_handle) => join_handle.join().map_err(|_| {
                InternalError::with_message("Global checkpoint thread panicked".to_string())
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use schemadist::config::SchemaDistConfigBuilder;

    /// Verifies that the builder requires node ids, shards and a non-zero checkpoint interval.
    #[test]
    fn test_builder_validation() {
        let builder = || {
            SchemaDistDaemonBuilder::new()
                .with_node_ids(vec![1, 2])
                .with_shards(vec![1])
                .with_gcp_interval(Duration::from_millis(10))
        };

        assert!(builder().build().is_ok());
        assert!(matches!(
            builder().with_node_ids(vec![]).build(),
            Err(UserError::MissingArgument(_))
        ));
        assert!(matches!(
            builder().with_shards(vec![]).build(),
            Err(UserError::MissingArgument(_))
        ));
        assert!(matches!(
            builder().with_gcp_interval(Duration::from_secs(0)).build(),
            Err(UserError::InvalidArgument(_))
        ));
    }

    /// Verifies that a daemon runs a script of console commands and stops when it ends.
    ///
    /// 1. Build a daemon of three nodes which exits when its console closes
    /// 2. Queue a database, a table and a tablespace creation, a malformed line and a comment,
    ///    then close the console
    /// 3. Run the daemon
    ///
    /// Every distributed command reports success on all three nodes, the malformed line is
    /// reported as an error, the comment is skipped and the daemon returns on its own.
    #[test]
    fn test_run_console_script() {
        let config = SchemaDistConfigBuilder::new()
            .with_check_interval(Duration::from_millis(20))
            .with_schema_op_timeout(Duration::from_secs(10))
            .build()
            .expect("Unable to build config");
        let daemon = SchemaDistDaemonBuilder::new()
            .with_node_ids(vec![1, 2, 3])
            .with_server_id_base(100)
            .with_shards(vec![1, 2])
            .with_gcp_interval(Duration::from_millis(10))
            .with_schema_dist_config(config)
            .with_exit_on_console_close(true)
            .build()
            .expect("Unable to build daemon");

        let (sender, receiver) = crossbeam_channel::unbounded();
        for line in &[
            "# setup",
            "2 create-db shop 1 1",
            "1 create-table shop orders 12 1",
            "3 create-tablespace ts1 4 1",
            "1 create-table shop",
        ] {
            sender.send(line.to_string()).expect("Unable to queue line");
        }
        drop(sender);

        let mut out = Vec::new();
        daemon
            .run(Arc::new(AtomicBool::new(true)), receiver, &mut out)
            .expect("Daemon failed");

        let out = String::from_utf8(out).expect("Output is not UTF-8");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4, "{}", out);
        assert_eq!(lines[0], "success on 3 node(s)");
        assert_eq!(lines[1], "success on 3 node(s)");
        assert_eq!(lines[2], "success on 3 node(s)");
        assert!(lines[3].starts_with("error: "), "{}", lines[3]);
    }
}
