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


//! `ConfigBuilder` implementation to construct a finalized `Config` object.
//!
//! Takes various `PartialConfig` objects and finalizes the config values sourced from the
//! `PartialConfigs` to construct a `Config` object used to start the daemon.

use schemadist::bitmap::MAX_NODES;

use crate::config::error::ConfigError;
use crate::config::{Config, ConfigSource, PartialConfig};

pub trait PartialConfigBuilder {
    /// Takes all values set in a config object to create a `PartialConfig` object.
    fn build(self) -> Result<PartialConfig, ConfigError>;
}

/// ConfigBuilder collects `PartialConfig` objects from various sources to be used to generate a
/// `Config` object.
#[derive(Default)]
pub struct ConfigBuilder {
    partial_configs: Vec<PartialConfig>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder::default()
    }

    /// Adds a `PartialConfig` to the `ConfigBuilder` object. Values of earlier partial configs
    /// take precedence over the values of later ones.
    ///
    /// # Arguments
    ///
    /// * `partial` - A `PartialConfig` object generated from any of the config modules.
    pub fn with_partial_config(mut self, partial: PartialConfig) -> Self {
        self.partial_configs.push(partial);
        self
    }

    // Returns the first value provided for an option, with the source that provided it.
    fn find<T, F>(&self, name: &str, value: F) -> Result<(T, ConfigSource), ConfigError>
    where
        F: Fn(&PartialConfig) -> Option<T>,
    {
        self.partial_configs
            .iter()
            .find_map(|p| value(p).map(|v| (v, p.source())))
            .ok_or_else(|| ConfigError::MissingValue(name.to_string()))
    }

    /// Builds a `Config` object by incorporating the values from each `PartialConfig` object.
    pub fn build(self) -> Result<Config, ConfigError> {
        let node_ids = self.find("node ids", PartialConfig::node_ids)?;
        if node_ids.0.is_empty()
            || node_ids
                .0
                .iter()
                .any(|node_id| *node_id == 0 || *node_id >= MAX_NODES)
        {
            return Err(ConfigError::InvalidValue {
                name: "node ids".to_string(),
                value: format!("{:?}", node_ids.0),
            });
        }
        let shards = self.find("shards", PartialConfig::shards)?;
        if shards.0.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "shards".to_string(),
                value: format!("{:?}", shards.0),
            });
        }

        Ok(Config {
            node_ids,
            shards,
            server_id_base: self.find("server id base", PartialConfig::server_id_base)?,
            gcp_interval: self.find("gcp interval", PartialConfig::gcp_interval)?,
            schema_op_timeout: self.find("schema op timeout", PartialConfig::schema_op_timeout)?,
            check_interval: self.find("check interval", PartialConfig::check_interval)?,
            lock_wait_timeout: self.find("lock wait timeout", PartialConfig::lock_wait_timeout)?,
            log_empty_epochs: self.find("log empty epochs", PartialConfig::log_empty_epochs)?,
            log_replica_updates: self.find("log replica updates", PartialConfig::log_replica_updates)?,
            log_update_as_write: self.find("log update as write", PartialConfig::log_update_as_write)?,
            log_updated_only: self.find("log updated only", PartialConfig::log_updated_only)?,
            log_update_minimal: self.find("log update minimal", PartialConfig::log_update_minimal)?,
            transaction_compression: self.find("transaction compression", PartialConfig::transaction_compression)?,
            transaction_compression_level: self.find("transaction compression level", PartialConfig::transaction_compression_level)?,
            binlog_enabled: self.find("binlog enabled", PartialConfig::binlog_enabled)?,
            retry_max_attempts: self.find("retry max attempts", PartialConfig::retry_max_attempts)?,
            retry_backoff: self.find("retry backoff", PartialConfig::retry_backoff)?,
            restart_delay: self.find("restart delay", PartialConfig::restart_delay)?,
            create_op_id_column: self.find("create op id column", PartialConfig::create_op_id_column)?,
            root_logger: self.find("root logger", PartialConfig::root_logger)?,
            appenders: self.find("appenders", PartialConfig::appenders)?,
            loggers: self.find("loggers", PartialConfig::loggers)?,
            verbosity: self.find("verbosity", PartialConfig::verbosity)?,
        })
    }
}
