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


use log::Level;

use super::logging::{AppenderConfig, LoggerConfig, RootConfig};

/// ConfigSource displays the source of configuration values, used to identify which of the various
/// config modules were used to create a particular PartialConfig object.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Toml { file: String },
    Default,
    Environment,
    CommandLine,
}

/// PartialConfig is an intermediate representation of configuration values, used when combining
/// several sources. As such, all values of the PartialConfig are options as it is not necessary
/// to provide all values from a single source.
///
/// Durations are kept in the unit their option is documented with: `schema_op_timeout` and
/// `lock_wait_timeout` in seconds, every other interval in milliseconds.
#[derive(Debug)]
pub struct PartialConfig {
    source: ConfigSource,
    node_ids: Option<Vec<u32>>,
    server_id_base: Option<u32>,
    shards: Option<Vec<u32>>,
    gcp_interval: Option<u64>,
    schema_op_timeout: Option<u64>,
    check_interval: Option<u64>,
    lock_wait_timeout: Option<u64>,
    log_empty_epochs: Option<bool>,
    log_replica_updates: Option<bool>,
    log_update_as_write: Option<bool>,
    log_updated_only: Option<bool>,
    log_update_minimal: Option<bool>,
    transaction_compression: Option<bool>,
    transaction_compression_level: Option<i32>,
    binlog_enabled: Option<bool>,
    retry_max_attempts: Option<u32>,
    retry_backoff: Option<u64>,
    restart_delay: Option<u64>,
    create_op_id_column: Option<bool>,
    root_logger: Option<RootConfig>,
    appenders: Option<Vec<AppenderConfig>>,
    loggers: Option<Vec<LoggerConfig>>,
    verbosity: Option<Level>,
}

impl PartialConfig {
    pub fn new(source: ConfigSource) -> Self {
        PartialConfig {
            source,
            node_ids: None,
            server_id_base: None,
            shards: None,
            gcp_interval: None,
            schema_op_timeout: None,
            check_interval: None,
            lock_wait_timeout: None,
            log_empty_epochs: None,
            log_replica_updates: None,
            log_update_as_write: None,
            log_updated_only: None,
            log_update_minimal: None,
            transaction_compression: None,
            transaction_compression_level: None,
            binlog_enabled: None,
            retry_max_attempts: None,
            retry_backoff: None,
            restart_delay: None,
            create_op_id_column: None,
            root_logger: None,
            appenders: None,
            loggers: None,
            verbosity: None,
        }
    }

    pub fn source(&self) -> ConfigSource {
        self.source.clone()
    }

    pub fn node_ids(&self) -> Option<Vec<u32>> {
        self.node_ids.clone()
    }

    pub fn server_id_base(&self) -> Option<u32> {
        self.server_id_base
    }

    pub fn shards(&self) -> Option<Vec<u32>> {
        self.shards.clone()
    }

    pub fn gcp_interval(&self) -> Option<u64> {
        self.gcp_interval
    }

    pub fn schema_op_timeout(&self) -> Option<u64> {
        self.schema_op_timeout
    }

    pub fn check_interval(&self) -> Option<u64> {
        self.check_interval
    }

    pub fn lock_wait_timeout(&self) -> Option<u64> {
        self.lock_wait_timeout
    }

    pub fn log_empty_epochs(&self) -> Option<bool> {
        self.log_empty_epochs
    }

    pub fn log_replica_updates(&self) -> Option<bool> {
        self.log_replica_updates
    }

    pub fn log_update_as_write(&self) -> Option<bool> {
        self.log_update_as_write
    }

    pub fn log_updated_only(&self) -> Option<bool> {
        self.log_updated_only
    }

    pub fn log_update_minimal(&self) -> Option<bool> {
        self.log_update_minimal
    }

    pub fn transaction_compression(&self) -> Option<bool> {
        self.transaction_compression
    }

    pub fn transaction_compression_level(&self) -> Option<i32> {
        self.transaction_compression_level
    }

    pub fn binlog_enabled(&self) -> Option<bool> {
        self.binlog_enabled
    }

    pub fn retry_max_attempts(&self) -> Option<u32> {
        self.retry_max_attempts
    }

    pub fn retry_backoff(&self) -> Option<u64> {
        self.retry_backoff
    }

    pub fn restart_delay(&self) -> Option<u64> {
        self.restart_delay
    }

    pub fn create_op_id_column(&self) -> Option<bool> {
        self.create_op_id_column
    }

    pub fn root_logger(&self) -> Option<RootConfig> {
        self.root_logger.clone()
    }

    pub fn appenders(&self) -> Option<Vec<AppenderConfig>> {
        self.appenders.clone()
    }

    pub fn loggers(&self) -> Option<Vec<LoggerConfig>> {
        self.loggers.clone()
    }

    pub fn verbosity(&self) -> Option<Level> {
        self.verbosity
    }

    pub fn with_node_ids(mut self, node_ids: Option<Vec<u32>>) -> Self {
        self.node_ids = node_ids;
        self
    }

    pub fn with_server_id_base(mut self, server_id_base: Option<u32>) -> Self {
        self.server_id_base = server_id_base;
        self
    }

    pub fn with_shards(mut self, shards: Option<Vec<u32>>) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_gcp_interval(mut self, gcp_interval: Option<u64>) -> Self {
        self.gcp_interval = gcp_interval;
        self
    }

    pub fn with_schema_op_timeout(mut self, schema_op_timeout: Option<u64>) -> Self {
        self.schema_op_timeout = schema_op_timeout;
        self
    }

    pub fn with_check_interval(mut self, check_interval: Option<u64>) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn with_lock_wait_timeout(mut self, lock_wait_timeout: Option<u64>) -> Self {
        self.lock_wait_timeout = lock_wait_timeout;
        self
    }

    pub fn with_log_empty_epochs(mut self, log_empty_epochs: Option<bool>) -> Self {
        self.log_empty_epochs = log_empty_epochs;
        self
    }

    pub fn with_log_replica_updates(mut self, log_replica_updates: Option<bool>) -> Self {
        self.log_replica_updates = log_replica_updates;
        self
    }

    pub fn with_log_update_as_write(mut self, log_update_as_write: Option<bool>) -> Self {
        self.log_update_as_write = log_update_as_write;
        self
    }

    pub fn with_log_updated_only(mut self, log_updated_only: Option<bool>) -> Self {
        self.log_updated_only = log_updated_only;
        self
    }

    pub fn with_log_update_minimal(mut self, log_update_minimal: Option<bool>) -> Self {
        self.log_update_minimal = log_update_minimal;
        self
    }

    pub fn with_transaction_compression(mut self, transaction_compression: Option<bool>) -> Self {
        self.transaction_compression = transaction_compression;
        self
    }

    pub fn with_transaction_compression_level(mut self, transaction_compression_level: Option<i32>) -> Self {
        self.transaction_compression_level = transaction_compression_level;
        self
    }

    pub fn with_binlog_enabled(mut self, binlog_enabled: Option<bool>) -> Self {
        self.binlog_enabled = binlog_enabled;
        self
    }

    pub fn with_retry_max_attempts(mut self, retry_max_attempts: Option<u32>) -> Self {
        self.retry_max_attempts = retry_max_attempts;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Option<u64>) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_restart_delay(mut self, restart_delay: Option<u64>) -> Self {
        self.restart_delay = restart_delay;
        self
    }

    pub fn with_create_op_id_column(mut self, create_op_id_column: Option<bool>) -> Self {
        self.create_op_id_column = create_op_id_column;
        self
    }

    pub fn with_root_logger(mut self, root_logger: Option<RootConfig>) -> Self {
        self.root_logger = root_logger;
        self
    }

    pub fn with_appenders(mut self, appenders: Option<Vec<AppenderConfig>>) -> Self {
        self.appenders = appenders;
        self
    }

    pub fn with_loggers(mut self, loggers: Option<Vec<LoggerConfig>>) -> Self {
        self.loggers = loggers;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Option<Level>) -> Self {
        self.verbosity = verbosity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies that a new `PartialConfig` holds no values and that set values are returned.
    #[test]
    fn test_partial_config_values() {
        let partial = PartialConfig::new(ConfigSource::Environment);
        assert_eq!(partial.source(), ConfigSource::Environment);
        assert_eq!(partial.node_ids(), None);
        assert_eq!(partial.binlog_enabled(), None);

        let partial = partial
            .with_node_ids(Some(vec![1, 2, 3]))
            .with_binlog_enabled(Some(false))
            .with_verbosity(Some(Level::Debug));
        assert_eq!(partial.node_ids(), Some(vec![1, 2, 3]));
        assert_eq!(partial.binlog_enabled(), Some(false));
        assert_eq!(partial.verbosity(), Some(Level::Debug));
        assert_eq!(partial.shards(), None);
    }
}
