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

//! The coordinator role: collecting the results of operations started on this node.

use std::collections::BTreeSet;

use crate::any_value::AnyValue;
use crate::cluster::{EventStream, NodeId, RowEvent, RowEventKind};

use super::super::error::SchemaDistError;
use super::super::result::{ResultCode, SchemaDistOutcome};
use super::super::table::{ResultRow, SchemaOpRow};
use super::{Coordinated, PostEpochOp, Role, SchemaEventHandler};

impl SchemaEventHandler {
    /// Handles an operation row written by this node.
    pub(super) fn coordinate(
        &mut self,
        row: SchemaOpRow,
        any_value: AnyValue,
        data_stream: &mut dyn EventStream,
    ) -> Result<(), SchemaDistError> {
        let own = self.context.node_id();
        let op = match self.context.registry().acquire(&row.key(), row.op_id) {
            Some(op) => op,
            None => {
                debug!(
                    "No client is waiting for {} {}; applying locally only",
                    row.op_type,
                    row.key()
                );
                return self.apply_or_queue(row, any_value, Role::Local, data_stream);
            }
        };

        if self.coordinated.contains_key(&op.op_id()) {
            trace!("Already coordinating {}", op.key());
            self.context.registry().release(&op);
            return Ok(());
        }

        let mut participants: BTreeSet<NodeId> =
            self.context.tracker().live_nodes().iter().collect();
        participants.insert(own);
        if !op.register_participants(participants.clone()) {
            self.context.registry().release(&op);
            return Ok(());
        }

        self.context.stats().op_coordinated();
        info!(
            "Coordinating {} {} with participants {:?}",
            row.op_type,
            row.key(),
            participants
        );

        let op_id = op.op_id();
        self.coordinated.insert(
            op_id,
            Coordinated {
                op,
                row: row.clone(),
            },
        );
        self.apply_or_queue(row, any_value, Role::Coordinator(op_id), data_stream)
    }

    /// Applies an operation now, or queues it until the end of the epoch.
    pub(super) fn apply_or_queue(
        &mut self,
        row: SchemaOpRow,
        any_value: AnyValue,
        role: Role,
        data_stream: &mut dyn EventStream,
    ) -> Result<(), SchemaDistError> {
        if row.op_type.is_post_epoch() {
            self.post_epoch.push(PostEpochOp {
                row,
                any_value,
                role,
            });
            return Ok(());
        }

        let (code, message) = self.apply_local(&row, any_value, data_stream);
        match role {
            Role::Coordinator(op_id) => {
                if let Some(coordinated) = self.coordinated.get(&op_id) {
                    coordinated
                        .op
                        .result_received(self.context.node_id(), code, &message);
                }
                self.maybe_complete(op_id);
                Ok(())
            }
            Role::Participant => self.acknowledge(&row, code, &message),
            Role::Local => Ok(()),
        }
    }

    /// Records a result row addressed to this node.
    pub(super) fn handle_result_event(&mut self, row_event: RowEvent) {
        if row_event.kind == RowEventKind::Delete {
            return;
        }
        let result = match row_event.after.as_deref().map(ResultRow::from_row) {
            Some(Ok(result)) => result,
            Some(Err(err)) => {
                warn!("Ignoring unreadable result row: {}", err);
                return;
            }
            None => return,
        };
        if result.origin_node_id != self.context.node_id() {
            return;
        }

        match self.coordinated.get(&result.op_id) {
            Some(coordinated) => {
                if !coordinated.op.result_received(
                    result.participant_node_id,
                    result.code,
                    &result.message,
                ) {
                    debug!(
                        "Ignoring result {} of node {} for {}",
                        result.code,
                        result.participant_node_id,
                        coordinated.op.key()
                    );
                }
            }
            None => {
                trace!(
                    "Result of node {} for unknown operation {}",
                    result.participant_node_id,
                    result.op_id
                );
                return;
            }
        }
        self.maybe_complete(result.op_id);
    }

    /// Records the participants whose bit is cleared in an acknowledged operation row.
    pub(super) fn lock_bitmap_acked(&mut self, row: &SchemaOpRow) {
        let own = self.context.node_id();
        let op_id = match self
            .coordinated
            .iter()
            .find(|(_, coordinated)| coordinated.row.is_same_op(row))
        {
            Some((op_id, coordinated)) => {
                for node in coordinated.op.pending_participants() {
                    if node != own && !row.lock_bitmap.is_set(node) {
                        coordinated.op.result_received(node, ResultCode::Success, "");
                    }
                }
                *op_id
            }
            None => return,
        };
        self.maybe_complete(op_id);
    }

    pub(super) fn participant_unsubscribed(&mut self, node: NodeId) {
        if node == self.context.node_id() {
            return;
        }
        for coordinated in self.coordinated.values() {
            if coordinated
                .op
                .fail_participant(node, ResultCode::NodeUnsubscribe)
            {
                debug!("Node {} unsubscribed during {}", node, coordinated.op.key());
            }
        }
        self.complete_reported();
    }

    pub(super) fn participant_failed(&mut self, node: NodeId) {
        for coordinated in self.coordinated.values() {
            if coordinated.op.fail_participant(node, ResultCode::NodeFailure) {
                debug!("Node {} failed during {}", node, coordinated.op.key());
            }
        }
        self.complete_reported();
    }

    pub(super) fn shard_failed(&mut self) {
        let mut live = self.context.tracker().live_nodes();
        live.set(self.context.node_id());
        for coordinated in self.coordinated.values() {
            let failed = coordinated
                .op
                .fail_participants_not_in(&live, ResultCode::NodeFailure);
            if !failed.is_empty() {
                debug!(
                    "Node(s) {:?} lost during {}",
                    failed,
                    coordinated.op.key()
                );
            }
        }
        self.complete_reported();
    }

    fn complete_reported(&mut self) {
        let op_ids: Vec<u32> = self.coordinated.keys().copied().collect();
        for op_id in op_ids {
            self.maybe_complete(op_id);
        }
    }

    /// Completes the operation once every participant has reported: writes the final
    /// all-clear, wakes the client and gives back the coordinator's reference.
    pub(super) fn maybe_complete(&mut self, op_id: u32) {
        let reported = self
            .coordinated
            .get(&op_id)
            .map(|coordinated| coordinated.op.all_reported())
            .unwrap_or(false);
        if !reported {
            return;
        }
        let coordinated = match self.coordinated.remove(&op_id) {
            Some(coordinated) => coordinated,
            None => return,
        };

        if let Err(err) = self.acknowledger.complete(&coordinated.row) {
            warn!(
                "Unable to write all-clear for {}: {}",
                coordinated.op.key(),
                err
            );
        }

        info!(
            "{} {} completed: {}",
            coordinated.op.op_type(),
            coordinated.op.key(),
            SchemaDistOutcome::new(coordinated.op.results())
        );
        coordinated.op.mark_completed();
        self.context.registry().release(&coordinated.op);
    }
}
