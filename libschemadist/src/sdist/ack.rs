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

//! Acknowledgment of schema operations.
//!
//! Two protocols exist, chosen once per event loop setup from the layout of the coordination
//! table. With the lock bitmap protocol a participant clears its bit in the operation row; it
//! can only signal "done". With the result table protocol a participant inserts one result row
//! per operation, carrying a result code and message.

use std::sync::Arc;

use crate::any_value::AnyValue;
use crate::bitmap::NodeBitmap;
use crate::cluster::{Cluster, ClusterError, NodeId, Value};
use crate::retry::{retry, RetryPolicy};

use super::error::SchemaDistError;
use super::result::ResultCode;
use super::table::{
    results_table, schema_ops_table, CoordinationLayout, ResultRow, SchemaOpRow, SchemaOpType,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckProtocol {
    LockBitmap,
    ResultTable,
}

pub trait Acknowledger: Send {
    fn protocol(&self) -> AckProtocol;

    /// Acknowledges `op` on behalf of `participant`.
    fn ack(
        &self,
        op: &SchemaOpRow,
        participant: NodeId,
        code: ResultCode,
        message: &str,
    ) -> Result<(), SchemaDistError>;

    /// Writes the coordinator's final all-clear for `op` and removes its acknowledgments.
    fn complete(&self, op: &SchemaOpRow) -> Result<(), SchemaDistError>;
}

/// Returns the acknowledger matching the coordination table layout.
pub fn acknowledger_for(
    layout: &CoordinationLayout,
    cluster: Arc<dyn Cluster>,
    policy: RetryPolicy,
) -> Box<dyn Acknowledger> {
    let lock_bitmap = LockBitmapAcknowledger {
        cluster,
        layout: layout.clone(),
        policy,
    };
    if layout.uses_op_id() {
        Box::new(ResultTableAcknowledger { lock_bitmap })
    } else {
        Box::new(lock_bitmap)
    }
}

fn force_gcp(cluster: &dyn Cluster) {
    if let Err(err) = cluster.force_gcp() {
        warn!("Unable to force epoch completion after acknowledgment: {}", err);
    }
}

fn parse_row(row: &[Value]) -> Result<SchemaOpRow, ClusterError> {
    SchemaOpRow::from_row(row).map_err(|err| ClusterError::SchemaMismatch(err.to_string()))
}

/// Clears the participant's bit in the operation row.
pub struct LockBitmapAcknowledger {
    cluster: Arc<dyn Cluster>,
    layout: CoordinationLayout,
    policy: RetryPolicy,
}

impl LockBitmapAcknowledger {
    /// Rewrites the current row of `op`, if it still describes `op`. Returns whether it did.
    fn rewrite_row<F>(&self, op: &SchemaOpRow, change: F) -> Result<bool, ClusterError>
    where
        F: Fn(&mut SchemaOpRow),
    {
        let table = schema_ops_table();
        let key = op.primary_key();

        retry(&*self.cluster, &self.policy, |txn| {
            txn.set_any_value(AnyValue::NoLogging.encode());
            let mut current = match txn.read_exclusive(&table, &key)? {
                Some(row) => parse_row(&row)?,
                None => return Ok(false),
            };
            if !current.is_same_op(op) {
                return Ok(false);
            }
            change(&mut current);
            txn.write(&table, current.to_row(&self.layout))?;
            Ok(true)
        })
    }
}

impl Acknowledger for LockBitmapAcknowledger {
    fn protocol(&self) -> AckProtocol {
        AckProtocol::LockBitmap
    }

    fn ack(
        &self,
        op: &SchemaOpRow,
        participant: NodeId,
        code: ResultCode,
        message: &str,
    ) -> Result<(), SchemaDistError> {
        if !code.is_success() {
            warn!(
                "Result of {} on node {} cannot be reported over the lock bitmap: {} {}",
                op.key(),
                participant,
                code,
                message
            );
        }

        let acked = self
            .rewrite_row(op, |row| {
                row.lock_bitmap.clear(participant);
                row.op_type = SchemaOpType::ClearSlock;
            })
            .map_err(|err| {
                SchemaDistError::ProtocolError(format!(
                    "unable to clear lock bit of node {} for {}: {}",
                    participant,
                    op.key(),
                    err
                ))
            })?;

        if acked {
            trace!("Cleared lock bit of node {} for {}", participant, op.key());
        } else {
            debug!("Not acknowledging superseded schema operation {}", op.key());
        }

        force_gcp(&*self.cluster);
        Ok(())
    }

    fn complete(&self, op: &SchemaOpRow) -> Result<(), SchemaDistError> {
        self.rewrite_row(op, |row| {
            row.lock_bitmap = NodeBitmap::new();
            row.op_type = SchemaOpType::ClearSlock;
            row.payload.clear();
        })?;
        force_gcp(&*self.cluster);
        Ok(())
    }
}

/// Inserts one result row per participant. Operations written without an id by older clients
/// are acknowledged over the lock bitmap.
pub struct ResultTableAcknowledger {
    lock_bitmap: LockBitmapAcknowledger,
}

impl Acknowledger for ResultTableAcknowledger {
    fn protocol(&self) -> AckProtocol {
        AckProtocol::ResultTable
    }

    fn ack(
        &self,
        op: &SchemaOpRow,
        participant: NodeId,
        code: ResultCode,
        message: &str,
    ) -> Result<(), SchemaDistError> {
        let op_id = match op.op_id {
            Some(op_id) => op_id,
            None => return self.lock_bitmap.ack(op, participant, code, message),
        };

        let result = ResultRow {
            origin_node_id: op.origin_node_id,
            op_id,
            participant_node_id: participant,
            code,
            message: message.to_string(),
        };
        let table = results_table();

        retry(&*self.lock_bitmap.cluster, &self.lock_bitmap.policy, |txn| {
            txn.set_any_value(AnyValue::NoLogging.encode());
            txn.write(&table, result.to_row())
        })?;
        trace!(
            "Reported {} for {} from node {}",
            code,
            op.key(),
            participant
        );

        force_gcp(&*self.lock_bitmap.cluster);
        Ok(())
    }

    fn complete(&self, op: &SchemaOpRow) -> Result<(), SchemaDistError> {
        self.lock_bitmap.complete(op)?;

        let op_id = match op.op_id {
            Some(op_id) => op_id,
            None => return Ok(()),
        };
        let table = results_table();
        let purged = retry(&*self.lock_bitmap.cluster, &self.lock_bitmap.policy, |txn| {
            txn.set_any_value(AnyValue::NoLogging.encode());
            let mut purged = 0;
            for row in txn.scan(&table)? {
                let result = match ResultRow::from_row(&row) {
                    Ok(result) => result,
                    Err(_) => continue,
                };
                if result.origin_node_id == op.origin_node_id && result.op_id == op_id {
                    txn.delete(&table, result.primary_key())?;
                    purged += 1;
                }
            }
            Ok(purged)
        })?;
        debug!("Purged {} result row(s) of {}", purged, op.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::cluster::memory::MemoryCluster;
    use crate::cluster::TableDef;
    use crate::sdist::table::{results_def, schema_ops_def};

    fn setup(with_op_id: bool) -> (MemoryCluster, CoordinationLayout) {
        let cluster = MemoryCluster::default();
        let def: TableDef = schema_ops_def(with_op_id).unwrap();
        let layout = CoordinationLayout::from_def(&def).unwrap();
        cluster.create_table(def).unwrap();
        cluster.create_table(results_def().unwrap()).unwrap();
        (cluster, layout)
    }

    fn write_op(cluster: &MemoryCluster, layout: &CoordinationLayout, op: &SchemaOpRow) {
        let mut txn = cluster.begin().unwrap();
        txn.write(&schema_ops_table(), op.to_row(layout)).unwrap();
        txn.commit().unwrap();
    }

    fn op(op_id: Option<u32>) -> SchemaOpRow {
        SchemaOpRow {
            db: "s1".into(),
            name: "t1".into(),
            lock_bitmap: NodeBitmap::all_ones(),
            payload: "CREATE TABLE t1".into(),
            origin_node_id: 1,
            epoch: 0,
            object_id: 10,
            object_version: 1,
            op_type: SchemaOpType::CreateTable,
            op_id,
        }
    }

    fn current_row(cluster: &MemoryCluster) -> SchemaOpRow {
        let rows = cluster.rows(&schema_ops_table()).unwrap();
        SchemaOpRow::from_row(&rows[0]).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(1))
    }

    /// Verifies that lock bitmap acknowledgments clear only the acknowledging node's bit, and
    /// that the all-clear resets the bitmap.
    #[test]
    fn test_lock_bitmap_ack() {
        let (cluster, layout) = setup(false);
        let op = op(None);
        write_op(&cluster, &layout, &op);

        let acknowledger = acknowledger_for(&layout, Arc::new(cluster.clone()), policy());
        assert_eq!(acknowledger.protocol(), AckProtocol::LockBitmap);

        acknowledger
            .ack(&op, 2, ResultCode::Success, "")
            .expect("Unable to ack");
        acknowledger
            .ack(&op, 3, ResultCode::Success, "")
            .expect("Unable to ack");

        let current = current_row(&cluster);
        assert_eq!(current.op_type, SchemaOpType::ClearSlock);
        assert!(!current.lock_bitmap.is_set(2));
        assert!(!current.lock_bitmap.is_set(3));
        assert!(current.lock_bitmap.is_set(1));

        acknowledger.complete(&op).expect("Unable to complete");
        assert!(current_row(&cluster).lock_bitmap.is_empty());
    }

    /// Verifies that acknowledgments of a superseded operation leave the new row untouched.
    #[test]
    fn test_lock_bitmap_ack_superseded() {
        let (cluster, layout) = setup(false);
        let old = op(None);
        let mut new = op(None);
        new.object_version = 2;
        write_op(&cluster, &layout, &new);

        let acknowledger = acknowledger_for(&layout, Arc::new(cluster.clone()), policy());
        acknowledger.ack(&old, 2, ResultCode::Success, "").unwrap();
        assert_eq!(current_row(&cluster), new);
    }

    /// Verifies that a lock bitmap acknowledgment without a coordination table is a protocol
    /// failure.
    #[test]
    fn test_lock_bitmap_ack_without_table() {
        let (cluster, layout) = setup(false);
        cluster.drop_table(&schema_ops_table());

        let acknowledger = acknowledger_for(&layout, Arc::new(cluster), policy());
        assert!(matches!(
            acknowledger.ack(&op(None), 2, ResultCode::Success, ""),
            Err(SchemaDistError::ProtocolError(_))
        ));
    }

    /// Verifies result rows are written per participant and purged on completion, leaving the
    /// rows of other operations in place.
    #[test]
    fn test_result_table_ack() {
        let (cluster, layout) = setup(true);
        let op = op(Some(7));
        write_op(&cluster, &layout, &op);

        let acknowledger = acknowledger_for(&layout, Arc::new(cluster.clone()), policy());
        assert_eq!(acknowledger.protocol(), AckProtocol::ResultTable);

        acknowledger.ack(&op, 2, ResultCode::Success, "").unwrap();
        acknowledger
            .ack(&op, 3, ResultCode::SchemaOpFailure, "lock wait timeout")
            .unwrap();
        let mut other = op.clone();
        other.op_id = Some(8);
        acknowledger.ack(&other, 2, ResultCode::Success, "").unwrap();

        let rows = cluster.rows(&results_table()).unwrap();
        assert_eq!(rows.len(), 3);
        let failed = ResultRow::from_row(&rows[1]).unwrap();
        assert_eq!(failed.participant_node_id, 3);
        assert_eq!(failed.code, ResultCode::SchemaOpFailure);
        assert_eq!(failed.message, "lock wait timeout");

        acknowledger.complete(&op).unwrap();
        let rows = cluster.rows(&results_table()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Value::UInt(8));
        assert_eq!(current_row(&cluster).op_type, SchemaOpType::ClearSlock);
    }
}
