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

//! Tracking of the nodes subscribed to the coordination table.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::bitmap::NodeBitmap;
use crate::cluster::{NodeId, ShardId};

/// One subscriber bitmap per data shard, fed by the subscribe, unsubscribe and failure events
/// of the coordination table.
///
/// The union over all shards is the set of nodes currently believed to be live participants.
/// It is a heuristic; it is not consistent with any particular epoch.
#[derive(Default)]
pub struct SubscriberTracker {
    shards: Mutex<BTreeMap<ShardId, NodeBitmap>>,
}

impl SubscriberTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, shard: ShardId, node: NodeId) {
        mutex_lock_unwrap!(self.shards)
            .entry(shard)
            .or_insert_with(NodeBitmap::new)
            .set(node);
    }

    /// Clears `node` on `shard`; returns true if that left the node without any subscription.
    pub fn unsubscribe(&self, shard: ShardId, node: NodeId) -> bool {
        let mut shards = mutex_lock_unwrap!(self.shards);
        if let Some(bitmap) = shards.get_mut(&shard) {
            bitmap.clear(node);
        }
        !shards.values().any(|bitmap| bitmap.is_set(node))
    }

    /// Forgets every subscription served by a failed shard.
    pub fn shard_failed(&self, shard: ShardId) {
        if let Some(bitmap) = mutex_lock_unwrap!(self.shards).get_mut(&shard) {
            *bitmap = NodeBitmap::new();
        }
    }

    pub fn node_failed(&self, node: NodeId) {
        for bitmap in mutex_lock_unwrap!(self.shards).values_mut() {
            bitmap.clear(node);
        }
    }

    /// The nodes subscribed on any shard.
    pub fn live_nodes(&self) -> NodeBitmap {
        mutex_lock_unwrap!(self.shards)
            .values()
            .fold(NodeBitmap::new(), |live, bitmap| live.union(bitmap))
    }

    pub fn clear(&self) {
        mutex_lock_unwrap!(self.shards).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies that a node stays live while subscribed on at least one shard.
    ///
    /// 1. Subscribe node 2 on shards 1 and 2 and node 3 on shard 1
    /// 2. Unsubscribe node 2 from shard 1; it is still live
    /// 3. Unsubscribe node 2 from shard 2; it is gone
    #[test]
    fn test_live_across_shards() {
        let tracker = SubscriberTracker::new();
        tracker.subscribe(1, 2);
        tracker.subscribe(2, 2);
        tracker.subscribe(1, 3);
        assert_eq!(tracker.live_nodes().iter().collect::<Vec<_>>(), vec![2, 3]);

        assert!(!tracker.unsubscribe(1, 2));
        assert!(tracker.live_nodes().is_set(2));
        assert!(tracker.unsubscribe(2, 2));
        assert_eq!(tracker.live_nodes().iter().collect::<Vec<_>>(), vec![3]);
    }

    /// Verifies shard and node failures.
    #[test]
    fn test_failures() {
        let tracker = SubscriberTracker::new();
        tracker.subscribe(1, 2);
        tracker.subscribe(2, 3);
        tracker.subscribe(1, 4);
        tracker.subscribe(2, 4);

        tracker.shard_failed(1);
        assert_eq!(tracker.live_nodes().iter().collect::<Vec<_>>(), vec![3, 4]);

        tracker.node_failed(4);
        assert_eq!(tracker.live_nodes().iter().collect::<Vec<_>>(), vec![3]);

        tracker.clear();
        assert!(tracker.live_nodes().is_empty());
    }
}
