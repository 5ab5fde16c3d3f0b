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


//! `PartialConfig` builder using values from a toml config file.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use serde_derive::Deserialize;

use crate::config::PartialConfigBuilder;
use crate::config::{ConfigError, ConfigSource, PartialConfig};

use super::logging::{
    AppenderConfig, LoggerConfig, RootConfig, UnnamedAppenderConfig, UnnamedLoggerConfig,
};

/// `TOML_VERSION` represents the version of the toml config file.
/// The version determines the most current valid toml config entries.
const TOML_VERSION: &str = "1";

/// `TomlConfig` object which holds values defined in a toml file. Changes here change the
/// valid format of the config file.
#[derive(Deserialize, Default, Debug)]
struct TomlConfig {
    version: Option<String>,
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
    appenders: Option<BTreeMap<String, UnnamedAppenderConfig>>,
    loggers: Option<BTreeMap<String, UnnamedLoggerConfig>>,
}

/// `PartialConfig` builder which holds values defined in a toml file.
pub struct TomlPartialConfigBuilder {
    source: ConfigSource,
    toml_config: TomlConfig,
}

/// Takes a toml file, represented as a string, and the path to the toml file to
/// construct a `TomlPartialConfigBuilder`.
impl TomlPartialConfigBuilder {
    pub fn new(toml: String, toml_path: String) -> Result<TomlPartialConfigBuilder, ConfigError> {
        Ok(TomlPartialConfigBuilder {
            source: ConfigSource::Toml { file: toml_path },
            toml_config: ::toml::from_str::<TomlConfig>(&toml).map_err(ConfigError::from)?,
        })
    }
}

/// Implementation of the `PartialConfigBuilder` trait to create a `PartialConfig` object from the
/// toml config file entries.
impl PartialConfigBuilder for TomlPartialConfigBuilder {
    fn build(self) -> Result<PartialConfig, ConfigError> {
        if let Some(version) = &self.toml_config.version {
            if version != TOML_VERSION {
                let file_path = match &self.source {
                    ConfigSource::Toml { file } => file.clone(),
                    _ => String::from(""),
                };
                return Err(ConfigError::InvalidVersion(format!(
                    "Invalid version: {}, expected {}, in config file {}",
                    version, TOML_VERSION, file_path
                )));
            }
        }

        let toml_config = self.toml_config;
        let mut partial_config = PartialConfig::new(self.source)
            .with_node_ids(toml_config.node_ids)
            .with_server_id_base(toml_config.server_id_base)
            .with_shards(toml_config.shards)
            .with_gcp_interval(toml_config.gcp_interval)
            .with_schema_op_timeout(toml_config.schema_op_timeout)
            .with_check_interval(toml_config.check_interval)
            .with_lock_wait_timeout(toml_config.lock_wait_timeout)
            .with_log_empty_epochs(toml_config.log_empty_epochs)
            .with_log_replica_updates(toml_config.log_replica_updates)
            .with_log_update_as_write(toml_config.log_update_as_write)
            .with_log_updated_only(toml_config.log_updated_only)
            .with_log_update_minimal(toml_config.log_update_minimal)
            .with_transaction_compression(toml_config.transaction_compression)
            .with_transaction_compression_level(toml_config.transaction_compression_level)
            .with_binlog_enabled(toml_config.binlog_enabled)
            .with_retry_max_attempts(toml_config.retry_max_attempts)
            .with_retry_backoff(toml_config.retry_backoff)
            .with_restart_delay(toml_config.restart_delay)
            .with_create_op_id_column(toml_config.create_op_id_column);

        if let Some(mut loggers) = toml_config.loggers {
            if let Some(root) = loggers.remove("root") {
                partial_config = partial_config.with_root_logger(Some(RootConfig::try_from(root)?));
            }
            partial_config = partial_config.with_loggers(Some(
                loggers.into_iter().map(LoggerConfig::from).collect(),
            ));
        }
        if let Some(appenders) = toml_config.appenders {
            partial_config = partial_config.with_appenders(Some(
                appenders
                    .into_iter()
                    .map(AppenderConfig::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ));
        }

        Ok(partial_config)
    }
}
