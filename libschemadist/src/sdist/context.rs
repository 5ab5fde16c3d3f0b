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

//! State shared between the client sessions and the event loop of one node.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::cluster::NodeId;
use crate::config::SchemaDistConfig;

use super::registry::SchemaOpRegistry;
use super::result::ResultCode;
use super::subscribers::SubscriberTracker;
use super::table::CoordinationLayout;

/// Counters describing the schema distribution activity of one node.
#[derive(Default)]
pub struct SchemaDistStats {
    ops_coordinated: AtomicU64,
    ops_applied: AtomicU64,
    apply_failures: AtomicU64,
    timeouts: AtomicU64,
    epochs_injected: AtomicU64,
    restarts: AtomicU64,
}

/// A point-in-time copy of `SchemaDistStats`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaDistStatsSnapshot {
    pub ops_coordinated: u64,
    pub ops_applied: u64,
    pub apply_failures: u64,
    pub timeouts: u64,
    pub epochs_injected: u64,
    pub restarts: u64,
}

impl SchemaDistStats {
    pub(crate) fn op_coordinated(&self) {
        self.ops_coordinated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn op_applied(&self) {
        self.ops_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn apply_failed(&self) {
        self.apply_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn epoch_injected(&self) {
        self.epochs_injected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn restarted(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchemaDistStatsSnapshot {
        SchemaDistStatsSnapshot {
            ops_coordinated: self.ops_coordinated.load(Ordering::Relaxed),
            ops_applied: self.ops_applied.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            epochs_injected: self.epochs_injected.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide schema distribution state of one node.
///
/// Created once per node; the event loop initializes it after setting up its streams and tears
/// it down, force-failing every open operation, whenever it stops or restarts.
pub struct SchemaDistContext {
    node_id: NodeId,
    server_id: u32,
    config: SchemaDistConfig,
    registry: SchemaOpRegistry,
    tracker: SubscriberTracker,
    ready: AtomicBool,
    layout: Mutex<Option<CoordinationLayout>>,
    stats: SchemaDistStats,
}

impl SchemaDistContext {
    pub fn new(node_id: NodeId, server_id: u32, config: SchemaDistConfig) -> Self {
        SchemaDistContext {
            node_id,
            server_id,
            config,
            registry: SchemaOpRegistry::new(),
            tracker: SubscriberTracker::new(),
            ready: AtomicBool::new(false),
            layout: Mutex::new(None),
            stats: SchemaDistStats::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    pub fn config(&self) -> &SchemaDistConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaOpRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &SubscriberTracker {
        &self.tracker
    }

    pub fn stats(&self) -> &SchemaDistStats {
        &self.stats
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Layout of the coordination table, known once the event loop is set up.
    pub fn layout(&self) -> Option<CoordinationLayout> {
        mutex_lock_unwrap!(self.layout).clone()
    }

    pub(crate) fn init(&self, layout: CoordinationLayout) {
        info!(
            "Schema distribution ready on node {} ({} acknowledgments)",
            self.node_id,
            if layout.uses_op_id() {
                "result table"
            } else {
                "lock bitmap"
            }
        );
        *mutex_lock_unwrap!(self.layout) = Some(layout);
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Stops accepting new operations and settles every open one as aborted by the coordinator.
    pub(crate) fn teardown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        *mutex_lock_unwrap!(self.layout) = None;
        let aborted = self
            .registry
            .abort_all(ResultCode::CoordAbort, self.node_id);
        if aborted > 0 {
            warn!(
                "Aborted {} open schema operation(s) on node {}",
                aborted, self.node_id
            );
        }
        self.tracker.clear();
    }
}
