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

//! Transaction retry helper.
//!
//! Every read or write the schema distribution performs against the cluster goes through
//! [`run_in_transaction`]: a fresh transaction per attempt, temporary errors retried after a
//! randomized backoff, permanent errors returned at once.

use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::cluster::{Cluster, ClusterError, Transaction};
use crate::config::SchemaDistConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &SchemaDistConfig) -> Self {
        RetryPolicy::new(config.retry_max_attempts(), config.retry_backoff())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Picks a sleep between half and one and a half times the configured backoff, or the
    /// cluster's hint when it asks for longer.
    fn sleep_duration(&self, err: &ClusterError) -> Duration {
        let millis = self.backoff.as_millis() as u64;
        let randomized =
            Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis + millis / 2));

        match err {
            ClusterError::Temporary(temporary) => temporary
                .retry_duration_hint()
                .map(|hint| hint.max(randomized))
                .unwrap_or(randomized),
            _ => randomized,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_config(&SchemaDistConfig::default())
    }
}

/// Runs `operation` in a new transaction and commits it, retrying on temporary errors.
///
/// `is_cancelled` is consulted before every retry; once it returns true the last temporary
/// error is returned without another attempt.
pub fn run_in_transaction<T, F>(
    cluster: &dyn Cluster,
    policy: &RetryPolicy,
    is_cancelled: &dyn Fn() -> bool,
    mut operation: F,
) -> Result<T, ClusterError>
where
    F: FnMut(&mut dyn Transaction) -> Result<T, ClusterError>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        let result = cluster.begin().and_then(|mut txn| {
            let value = operation(txn.as_mut())?;
            txn.commit()?;
            Ok(value)
        });

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_temporary() && attempt < policy.max_attempts => {
                if is_cancelled() {
                    debug!("Not retrying after cancellation: {}", err);
                    return Err(err);
                }
                let sleep = policy.sleep_duration(&err);
                trace!(
                    "Attempt {} of {} failed ({}); retrying in {:?}",
                    attempt,
                    policy.max_attempts,
                    err,
                    sleep
                );
                thread::sleep(sleep);
            }
            Err(err) => {
                if err.is_temporary() {
                    warn!("Giving up after {} attempts: {}", attempt, err);
                }
                return Err(err);
            }
        }
    }
}

/// Shorthand for `run_in_transaction` without a cancellation check.
pub fn retry<T, F>(
    cluster: &dyn Cluster,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, ClusterError>
where
    F: FnMut(&mut dyn Transaction) -> Result<T, ClusterError>,
{
    run_in_transaction(cluster, policy, &|| false, operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    use crate::cluster::memory::MemoryCluster;
    use crate::cluster::{ColumnDef, ColumnType, TableDef, TableName, Value};

    fn setup() -> (MemoryCluster, TableName) {
        let cluster = MemoryCluster::default();
        let name = TableName::new("test", "counters");
        cluster
            .create_table(
                TableDef::builder()
                    .with_name(name.clone())
                    .with_column(ColumnDef::new("id", ColumnType::UInt))
                    .with_primary_key(&["id"])
                    .build()
                    .expect("Unable to build table"),
            )
            .expect("Unable to create table");
        (cluster, name)
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    /// Verifies that temporary failures are retried until the operation commits.
    #[test]
    fn test_retries_temporary_errors() {
        let (cluster, name) = setup();
        cluster.inject_temporary_failures(3);

        let attempts = Cell::new(0);
        let result = retry(&cluster, &policy(10), |txn| {
            attempts.set(attempts.get() + 1);
            txn.write(&name, vec![Value::UInt(1)])
        });

        assert!(result.is_ok());
        assert_eq!(attempts.get(), 4);
        assert_eq!(cluster.rows(&name), Some(vec![vec![Value::UInt(1)]]));
    }

    /// Verifies that the temporary error is returned once the attempt budget is spent.
    #[test]
    fn test_attempt_budget() {
        let (cluster, name) = setup();
        cluster.inject_temporary_failures(5);

        let attempts = Cell::new(0);
        let result = retry(&cluster, &policy(3), |txn| {
            attempts.set(attempts.get() + 1);
            txn.write(&name, vec![Value::UInt(1)])
        });

        assert!(result.expect_err("Should have failed").is_temporary());
        assert_eq!(attempts.get(), 3);
    }

    /// Verifies that permanent errors are not retried.
    #[test]
    fn test_permanent_error() {
        let (cluster, _) = setup();
        let missing = TableName::new("test", "missing");

        let attempts = Cell::new(0);
        let result = retry(&cluster, &policy(10), |txn| {
            attempts.set(attempts.get() + 1);
            txn.write(&missing, vec![Value::UInt(1)])
        });

        assert!(matches!(result, Err(ClusterError::NoSuchObject(_))));
        assert_eq!(attempts.get(), 1);
    }

    /// Verifies that a cancelled caller stops retrying after the current attempt.
    #[test]
    fn test_cancellation() {
        let (cluster, name) = setup();
        cluster.inject_temporary_failures(5);

        let attempts = Cell::new(0);
        let result = run_in_transaction(&cluster, &policy(10), &|| true, |txn| {
            attempts.set(attempts.get() + 1);
            txn.write(&name, vec![Value::UInt(1)])
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }
}
