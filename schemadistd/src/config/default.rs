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


//! `PartialConfig` builder using default values.

use crate::config::{ConfigError, ConfigSource, PartialConfig, PartialConfigBuilder};

use super::logging::{AppenderConfig, LogTarget, LoggerConfig, RootConfig, DEFAULT_LOGGING_PATTERN};

const NODE_IDS: &[u32] = &[1, 2];
const SERVER_ID_BASE: u32 = 0;
const SHARDS: &[u32] = &[1, 2];
const GCP_INTERVAL: u64 = 100; // milliseconds

const SCHEMA_OP_TIMEOUT: u64 = 120; // seconds
const CHECK_INTERVAL: u64 = 1000; // milliseconds
const LOCK_WAIT_TIMEOUT: u64 = 30; // seconds
const TRANSACTION_COMPRESSION_LEVEL: i32 = 3;
const RETRY_MAX_ATTEMPTS: u32 = 100;
const RETRY_BACKOFF: u64 = 30; // milliseconds
const RESTART_DELAY: u64 = 1000; // milliseconds

pub struct DefaultPartialConfigBuilder;

impl DefaultPartialConfigBuilder {
    pub fn new() -> Self {
        DefaultPartialConfigBuilder {}
    }
}

/// Constructs a `PartialConfig` object from the `DefaultPartialConfigBuilder`.
impl PartialConfigBuilder for DefaultPartialConfigBuilder {
    fn build(self) -> Result<PartialConfig, ConfigError> {
        let root_logger = RootConfig {
            appenders: vec!["stdout".to_string()],
            level: log::Level::Warn,
        };
        let stdout = AppenderConfig {
            name: "stdout".to_string(),
            encoder: String::from(DEFAULT_LOGGING_PATTERN),
            kind: LogTarget::Stdout,
            level: None,
        };
        let loggers = ["schemadist", "schemadistd"]
            .iter()
            .map(|name| LoggerConfig {
                name: name.to_string(),
                appenders: vec![],
                level: Some(log::Level::Trace),
            })
            .collect();

        Ok(PartialConfig::new(ConfigSource::Default)
            .with_node_ids(Some(NODE_IDS.to_vec()))
            .with_server_id_base(Some(SERVER_ID_BASE))
            .with_shards(Some(SHARDS.to_vec()))
            .with_gcp_interval(Some(GCP_INTERVAL))
            .with_schema_op_timeout(Some(SCHEMA_OP_TIMEOUT))
            .with_check_interval(Some(CHECK_INTERVAL))
            .with_lock_wait_timeout(Some(LOCK_WAIT_TIMEOUT))
            .with_log_empty_epochs(Some(false))
            .with_log_replica_updates(Some(false))
            .with_log_update_as_write(Some(true))
            .with_log_updated_only(Some(true))
            .with_log_update_minimal(Some(false))
            .with_transaction_compression(Some(false))
            .with_transaction_compression_level(Some(TRANSACTION_COMPRESSION_LEVEL))
            .with_binlog_enabled(Some(true))
            .with_retry_max_attempts(Some(RETRY_MAX_ATTEMPTS))
            .with_retry_backoff(Some(RETRY_BACKOFF))
            .with_restart_delay(Some(RESTART_DELAY))
            .with_create_op_id_column(Some(true))
            .with_root_logger(Some(root_logger))
            .with_appenders(Some(vec![stdout]))
            .with_loggers(Some(loggers))
            .with_verbosity(Some(log::Level::Info)))
    }
}
