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

//! Configuration of a schema distribution node.

use std::time::Duration;

use crate::error::InvalidArgumentError;

const DEFAULT_SCHEMA_OP_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 100;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(30);
const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

const MIN_COMPRESSION_LEVEL: i32 = 1;
const MAX_COMPRESSION_LEVEL: i32 = 22;

/// Settings shared by the client, the schema event handler and the event loop of one node.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDistConfig {
    schema_op_timeout: Duration,
    check_interval: Duration,
    lock_wait_timeout: Duration,
    log_empty_epochs: bool,
    log_replica_updates: bool,
    log_update_as_write: bool,
    log_updated_only: bool,
    log_update_minimal: bool,
    transaction_compression: bool,
    transaction_compression_level: i32,
    binlog_enabled: bool,
    retry_max_attempts: u32,
    retry_backoff: Duration,
    restart_delay: Duration,
    create_op_id_column: bool,
}

impl SchemaDistConfig {
    /// How long a schema operation may wait for its participants, on both client and
    /// coordinator.
    pub fn schema_op_timeout(&self) -> Duration {
        self.schema_op_timeout
    }

    /// Interval of the client poll and of the coordinator's timeout sweep.
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Metadata lock wait used while applying a change as participant.
    pub fn lock_wait_timeout(&self) -> Duration {
        self.lock_wait_timeout
    }

    pub fn log_empty_epochs(&self) -> bool {
        self.log_empty_epochs
    }

    pub fn log_replica_updates(&self) -> bool {
        self.log_replica_updates
    }

    /// Log updates of tables with a primary key as a write of the after image only.
    pub fn log_update_as_write(&self) -> bool {
        self.log_update_as_write
    }

    /// Log only the columns an update actually changed.
    pub fn log_updated_only(&self) -> bool {
        self.log_updated_only
    }

    /// Log update before images with the primary key columns only.
    pub fn log_update_minimal(&self) -> bool {
        self.log_update_minimal
    }

    pub fn transaction_compression(&self) -> bool {
        self.transaction_compression
    }

    pub fn transaction_compression_level(&self) -> i32 {
        self.transaction_compression_level
    }

    pub fn binlog_enabled(&self) -> bool {
        self.binlog_enabled
    }

    pub fn retry_max_attempts(&self) -> u32 {
        self.retry_max_attempts
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Delay before the event loop sets itself up again after losing its streams.
    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    pub fn create_op_id_column(&self) -> bool {
        self.create_op_id_column
    }
}

impl Default for SchemaDistConfig {
    fn default() -> Self {
        SchemaDistConfig {
            schema_op_timeout: DEFAULT_SCHEMA_OP_TIMEOUT,
            check_interval: DEFAULT_CHECK_INTERVAL,
            lock_wait_timeout: DEFAULT_LOCK_WAIT_TIMEOUT,
            log_empty_epochs: false,
            log_replica_updates: false,
            log_update_as_write: true,
            log_updated_only: true,
            log_update_minimal: false,
            transaction_compression: false,
            transaction_compression_level: DEFAULT_COMPRESSION_LEVEL,
            binlog_enabled: true,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            restart_delay: DEFAULT_RESTART_DELAY,
            create_op_id_column: true,
        }
    }
}

/// Builds a `SchemaDistConfig`; unset values take their defaults.
#[derive(Default)]
pub struct SchemaDistConfigBuilder {
    schema_op_timeout: Option<Duration>,
    check_interval: Option<Duration>,
    lock_wait_timeout: Option<Duration>,
    log_empty_epochs: Option<bool>,
    log_replica_updates: Option<bool>,
    log_update_as_write: Option<bool>,
    log_updated_only: Option<bool>,
    log_update_minimal: Option<bool>,
    transaction_compression: Option<bool>,
    transaction_compression_level: Option<i32>,
    binlog_enabled: Option<bool>,
    retry_max_attempts: Option<u32>,
    retry_backoff: Option<Duration>,
    restart_delay: Option<Duration>,
    create_op_id_column: Option<bool>,
}

impl SchemaDistConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema_op_timeout(mut self, timeout: Duration) -> Self {
        self.schema_op_timeout = Some(timeout);
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = Some(timeout);
        self
    }

    pub fn with_log_empty_epochs(mut self, enabled: bool) -> Self {
        self.log_empty_epochs = Some(enabled);
        self
    }

    pub fn with_log_replica_updates(mut self, enabled: bool) -> Self {
        self.log_replica_updates = Some(enabled);
        self
    }

    pub fn with_log_update_as_write(mut self, enabled: bool) -> Self {
        self.log_update_as_write = Some(enabled);
        self
    }

    pub fn with_log_updated_only(mut self, enabled: bool) -> Self {
        self.log_updated_only = Some(enabled);
        self
    }

    pub fn with_log_update_minimal(mut self, enabled: bool) -> Self {
        self.log_update_minimal = Some(enabled);
        self
    }

    pub fn with_transaction_compression(mut self, enabled: bool) -> Self {
        self.transaction_compression = Some(enabled);
        self
    }

    pub fn with_transaction_compression_level(mut self, level: i32) -> Self {
        self.transaction_compression_level = Some(level);
        self
    }

    pub fn with_binlog_enabled(mut self, enabled: bool) -> Self {
        self.binlog_enabled = Some(enabled);
        self
    }

    pub fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = Some(delay);
        self
    }

    pub fn with_create_op_id_column(mut self, enabled: bool) -> Self {
        self.create_op_id_column = Some(enabled);
        self
    }

    pub fn build(self) -> Result<SchemaDistConfig, InvalidArgumentError> {
        let defaults = SchemaDistConfig::default();

        let schema_op_timeout = self
            .schema_op_timeout
            .unwrap_or(defaults.schema_op_timeout);
        let check_interval = self.check_interval.unwrap_or(defaults.check_interval);

        if check_interval == Duration::from_secs(0) {
            return Err(InvalidArgumentError::new(
                "check_interval".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        if schema_op_timeout < check_interval {
            return Err(InvalidArgumentError::new(
                "schema_op_timeout".to_string(),
                "must not be shorter than the check interval".to_string(),
            ));
        }

        let transaction_compression_level = self
            .transaction_compression_level
            .unwrap_or(defaults.transaction_compression_level);
        if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&transaction_compression_level)
        {
            return Err(InvalidArgumentError::new(
                "transaction_compression_level".to_string(),
                format!(
                    "must be between {} and {}, got {}",
                    MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL, transaction_compression_level
                ),
            ));
        }

        let transaction_compression = self
            .transaction_compression
            .unwrap_or(defaults.transaction_compression);
        if transaction_compression && !cfg!(feature = "compression") {
            return Err(InvalidArgumentError::new(
                "transaction_compression".to_string(),
                "compression support was not compiled in".to_string(),
            ));
        }

        let retry_max_attempts = self
            .retry_max_attempts
            .unwrap_or(defaults.retry_max_attempts);
        if retry_max_attempts == 0 {
            return Err(InvalidArgumentError::new(
                "retry_max_attempts".to_string(),
                "at least one attempt is required".to_string(),
            ));
        }

        Ok(SchemaDistConfig {
            schema_op_timeout,
            check_interval,
            lock_wait_timeout: self
                .lock_wait_timeout
                .unwrap_or(defaults.lock_wait_timeout),
            log_empty_epochs: self.log_empty_epochs.unwrap_or(defaults.log_empty_epochs),
            log_replica_updates: self
                .log_replica_updates
                .unwrap_or(defaults.log_replica_updates),
            log_update_as_write: self
                .log_update_as_write
                .unwrap_or(defaults.log_update_as_write),
            log_updated_only: self.log_updated_only.unwrap_or(defaults.log_updated_only),
            log_update_minimal: self
                .log_update_minimal
                .unwrap_or(defaults.log_update_minimal),
            transaction_compression,
            transaction_compression_level,
            binlog_enabled: self.binlog_enabled.unwrap_or(defaults.binlog_enabled),
            retry_max_attempts,
            retry_backoff: self.retry_backoff.unwrap_or(defaults.retry_backoff),
            restart_delay: self.restart_delay.unwrap_or(defaults.restart_delay),
            create_op_id_column: self
                .create_op_id_column
                .unwrap_or(defaults.create_op_id_column),
        })
    }
}
