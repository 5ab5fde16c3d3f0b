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


//! Configuration of the schema distribution daemon.
//!
//! Values are collected from several sources, each turned into a `PartialConfig`, and merged by
//! the `ConfigBuilder`. The first source with a value for an option wins, so sources are added in
//! order of precedence: command line, config file, environment, defaults.

mod builder;
mod bytes;
#[cfg(feature = "config-command-line")]
mod clap;
#[cfg(feature = "config-default")]
mod default;
#[cfg(feature = "config-env-var")]
mod env;
mod error;
mod logging;
mod partial;
#[cfg(feature = "config-toml")]
mod toml;

use std::time::Duration;

use log::Level;

pub use builder::{ConfigBuilder, PartialConfigBuilder};
#[cfg(feature = "config-command-line")]
pub use self::clap::ClapPartialConfigBuilder;
#[cfg(feature = "config-default")]
pub use default::DefaultPartialConfigBuilder;
#[cfg(feature = "config-env-var")]
pub use env::EnvPartialConfigBuilder;
pub use error::ConfigError;
pub use logging::{
    AppenderConfig, LogTarget, LoggerConfig, RootConfig, DEFAULT_LOGGING_PATTERN,
};
pub use partial::{ConfigSource, PartialConfig};
#[cfg(feature = "config-toml")]
pub use self::toml::TomlPartialConfigBuilder;

/// Config is the final representation of configuration values. This final config object assembles
/// values from PartialConfig objects generated from various sources.
#[derive(Debug)]
pub struct Config {
    node_ids: (Vec<u32>, ConfigSource),
    server_id_base: (u32, ConfigSource),
    shards: (Vec<u32>, ConfigSource),
    gcp_interval: (u64, ConfigSource),
    schema_op_timeout: (u64, ConfigSource),
    check_interval: (u64, ConfigSource),
    lock_wait_timeout: (u64, ConfigSource),
    log_empty_epochs: (bool, ConfigSource),
    log_replica_updates: (bool, ConfigSource),
    log_update_as_write: (bool, ConfigSource),
    log_updated_only: (bool, ConfigSource),
    log_update_minimal: (bool, ConfigSource),
    transaction_compression: (bool, ConfigSource),
    transaction_compression_level: (i32, ConfigSource),
    binlog_enabled: (bool, ConfigSource),
    retry_max_attempts: (u32, ConfigSource),
    retry_backoff: (u64, ConfigSource),
    restart_delay: (u64, ConfigSource),
    create_op_id_column: (bool, ConfigSource),
    root_logger: (RootConfig, ConfigSource),
    appenders: (Vec<AppenderConfig>, ConfigSource),
    loggers: (Vec<LoggerConfig>, ConfigSource),
    verbosity: (Level, ConfigSource),
}

impl Config {
    pub fn node_ids(&self) -> &[u32] {
        &self.node_ids.0
    }

    pub fn server_id_base(&self) -> u32 {
        self.server_id_base.0
    }

    pub fn shards(&self) -> &[u32] {
        &self.shards.0
    }

    pub fn gcp_interval(&self) -> Duration {
        Duration::from_millis(self.gcp_interval.0)
    }

    pub fn schema_op_timeout(&self) -> Duration {
        Duration::from_secs(self.schema_op_timeout.0)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval.0)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_wait_timeout.0)
    }

    pub fn log_empty_epochs(&self) -> bool {
        self.log_empty_epochs.0
    }

    pub fn log_replica_updates(&self) -> bool {
        self.log_replica_updates.0
    }

    pub fn log_update_as_write(&self) -> bool {
        self.log_update_as_write.0
    }

    pub fn log_updated_only(&self) -> bool {
        self.log_updated_only.0
    }

    pub fn log_update_minimal(&self) -> bool {
        self.log_update_minimal.0
    }

    pub fn transaction_compression(&self) -> bool {
        self.transaction_compression.0
    }

    pub fn transaction_compression_level(&self) -> i32 {
        self.transaction_compression_level.0
    }

    pub fn binlog_enabled(&self) -> bool {
        self.binlog_enabled.0
    }

    pub fn retry_max_attempts(&self) -> u32 {
        self.retry_max_attempts.0
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff.0)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay.0)
    }

    pub fn create_op_id_column(&self) -> bool {
        self.create_op_id_column.0
    }

    pub fn root_logger(&self) -> &RootConfig {
        &self.root_logger.0
    }

    pub fn appenders(&self) -> &[AppenderConfig] {
        &self.appenders.0
    }

    pub fn loggers(&self) -> &[LoggerConfig] {
        &self.loggers.0
    }

    pub fn verbosity(&self) -> Level {
        self.verbosity.0
    }

    pub fn node_ids_source(&self) -> &ConfigSource {
        &self.node_ids.1
    }

    pub fn server_id_base_source(&self) -> &ConfigSource {
        &self.server_id_base.1
    }

    pub fn shards_source(&self) -> &ConfigSource {
        &self.shards.1
    }

    pub fn gcp_interval_source(&self) -> &ConfigSource {
        &self.gcp_interval.1
    }

    pub fn schema_op_timeout_source(&self) -> &ConfigSource {
        &self.schema_op_timeout.1
    }

    pub fn check_interval_source(&self) -> &ConfigSource {
        &self.check_interval.1
    }

    pub fn lock_wait_timeout_source(&self) -> &ConfigSource {
        &self.lock_wait_timeout.1
    }

    pub fn log_empty_epochs_source(&self) -> &ConfigSource {
        &self.log_empty_epochs.1
    }

    pub fn log_replica_updates_source(&self) -> &ConfigSource {
        &self.log_replica_updates.1
    }

    pub fn log_update_as_write_source(&self) -> &ConfigSource {
        &self.log_update_as_write.1
    }

    pub fn log_updated_only_source(&self) -> &ConfigSource {
        &self.log_updated_only.1
    }

    pub fn log_update_minimal_source(&self) -> &ConfigSource {
        &self.log_update_minimal.1
    }

    pub fn transaction_compression_source(&self) -> &ConfigSource {
        &self.transaction_compression.1
    }

    pub fn transaction_compression_level_source(&self) -> &ConfigSource {
        &self.transaction_compression_level.1
    }

    pub fn binlog_enabled_source(&self) -> &ConfigSource {
        &self.binlog_enabled.1
    }

    pub fn retry_max_attempts_source(&self) -> &ConfigSource {
        &self.retry_max_attempts.1
    }

    pub fn retry_backoff_source(&self) -> &ConfigSource {
        &self.retry_backoff.1
    }

    pub fn restart_delay_source(&self) -> &ConfigSource {
        &self.restart_delay.1
    }

    pub fn create_op_id_column_source(&self) -> &ConfigSource {
        &self.create_op_id_column.1
    }

    pub fn root_logger_source(&self) -> &ConfigSource {
        &self.root_logger.1
    }

    pub fn appenders_source(&self) -> &ConfigSource {
        &self.appenders.1
    }

    pub fn loggers_source(&self) -> &ConfigSource {
        &self.loggers.1
    }

    pub fn verbosity_source(&self) -> &ConfigSource {
        &self.verbosity.1
    }

    pub fn log_as_debug(&self) {
        debug!(
            "Config: node_ids: {:?} (source: {:?})",
            self.node_ids(),
            self.node_ids_source()
        );
        debug!(
            "Config: server_id_base: {} (source: {:?})",
            self.server_id_base(),
            self.server_id_base_source()
        );
        debug!(
            "Config: shards: {:?} (source: {:?})",
            self.shards(),
            self.shards_source()
        );
        debug!(
            "Config: gcp_interval: {:?} (source: {:?})",
            self.gcp_interval(),
            self.gcp_interval_source()
        );
        debug!(
            "Config: schema_op_timeout: {:?} (source: {:?})",
            self.schema_op_timeout(),
            self.schema_op_timeout_source()
        );
        debug!(
            "Config: check_interval: {:?} (source: {:?})",
            self.check_interval(),
            self.check_interval_source()
        );
        debug!(
            "Config: lock_wait_timeout: {:?} (source: {:?})",
            self.lock_wait_timeout(),
            self.lock_wait_timeout_source()
        );
        debug!(
            "Config: log_empty_epochs: {} (source: {:?})",
            self.log_empty_epochs(),
            self.log_empty_epochs_source()
        );
        debug!(
            "Config: log_replica_updates: {} (source: {:?})",
            self.log_replica_updates(),
            self.log_replica_updates_source()
        );
        debug!(
            "Config: log_update_as_write: {} (source: {:?})",
            self.log_update_as_write(),
            self.log_update_as_write_source()
        );
        debug!(
            "Config: log_updated_only: {} (source: {:?})",
            self.log_updated_only(),
            self.log_updated_only_source()
        );
        debug!(
            "Config: log_update_minimal: {} (source: {:?})",
            self.log_update_minimal(),
            self.log_update_minimal_source()
        );
        debug!(
            "Config: transaction_compression: {} (source: {:?})",
            self.transaction_compression(),
            self.transaction_compression_source()
        );
        debug!(
            "Config: transaction_compression_level: {} (source: {:?})",
            self.transaction_compression_level(),
            self.transaction_compression_level_source()
        );
        debug!(
            "Config: binlog_enabled: {} (source: {:?})",
            self.binlog_enabled(),
            self.binlog_enabled_source()
        );
        debug!(
            "Config: retry_max_attempts: {} (source: {:?})",
            self.retry_max_attempts(),
            self.retry_max_attempts_source()
        );
        debug!(
            "Config: retry_backoff: {:?} (source: {:?})",
            self.retry_backoff(),
            self.retry_backoff_source()
        );
        debug!(
            "Config: restart_delay: {:?} (source: {:?})",
            self.restart_delay(),
            self.restart_delay_source()
        );
        debug!(
            "Config: create_op_id_column: {} (source: {:?})",
            self.create_op_id_column(),
            self.create_op_id_column_source()
        );
        debug!(
            "Config: root_logger: {:?} (source: {:?})",
            self.root_logger(),
            self.root_logger_source()
        );
        debug!(
            "Config: appenders: {:?} (source: {:?})",
            self.appenders(),
            self.appenders_source()
        );
        debug!(
            "Config: loggers: {:?} (source: {:?})",
            self.loggers(),
            self.loggers_source()
        );
        debug!(
            "Config: verbosity: {} (source: {:?})",
            self.verbosity(),
            self.verbosity_source()
        );
    }
}
