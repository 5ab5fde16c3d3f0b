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


//! `PartialConfig` builder using values from the command line.

use std::str::FromStr;

use clap::{ArgMatches, ErrorKind};
use log::Level;

use crate::config::{ConfigError, ConfigSource, PartialConfig, PartialConfigBuilder};

/// Holds configuration values from command line arguments, represented by clap ArgMatches.
pub struct ClapPartialConfigBuilder<'a> {
    matches: ArgMatches<'a>,
}

fn parse_value<T: FromStr>(matches: &ArgMatches, arg: &str) -> Result<Option<T>, ConfigError> {
    match value_t!(matches.value_of(arg), T) {
        Ok(v) => Ok(Some(v)),
        Err(e) => match e.kind {
            ErrorKind::ValueValidation => Err(ConfigError::InvalidArgument(e)),
            _ => Ok(None),
        },
    }
}

fn parse_values(matches: &ArgMatches, arg: &str) -> Result<Option<Vec<u32>>, ConfigError> {
    if matches.is_present(arg) {
        values_t!(matches.values_of(arg), u32)
            .map(Some)
            .map_err(ConfigError::InvalidArgument)
    } else {
        Ok(None)
    }
}

// A flag only sets its option when it is given; otherwise a later source decides.
fn flag(matches: &ArgMatches, arg: &str, value: bool) -> Option<bool> {
    if matches.is_present(arg) {
        Some(value)
    } else {
        None
    }
}

impl<'a> ClapPartialConfigBuilder<'a> {
    pub fn new(matches: ArgMatches<'a>) -> Self {
        ClapPartialConfigBuilder { matches }
    }
}

impl<'a> PartialConfigBuilder for ClapPartialConfigBuilder<'a> {
    fn build(self) -> Result<PartialConfig, ConfigError> {
        let verbosity = if self.matches.is_present("quiet") {
            Some(Level::Warn)
        } else {
            match self.matches.occurrences_of("verbose") {
                0 => None,
                1 => Some(Level::Debug),
                _ => Some(Level::Trace),
            }
        };

        Ok(PartialConfig::new(ConfigSource::CommandLine)
            .with_node_ids(parse_values(&self.matches, "node_ids")?)
            .with_server_id_base(parse_value(&self.matches, "server_id_base")?)
            .with_shards(parse_values(&self.matches, "shards")?)
            .with_gcp_interval(parse_value(&self.matches, "gcp_interval")?)
            .with_schema_op_timeout(parse_value(&self.matches, "schema_op_timeout")?)
            .with_check_interval(parse_value(&self.matches, "check_interval")?)
            .with_lock_wait_timeout(parse_value(&self.matches, "lock_wait_timeout")?)
            .with_log_empty_epochs(flag(&self.matches, "log_empty_epochs", true))
            .with_log_replica_updates(flag(&self.matches, "log_replica_updates", true))
            .with_log_update_as_write(flag(&self.matches, "log_update_as_update", false))
            .with_log_updated_only(flag(&self.matches, "log_full_updates", false))
            .with_log_update_minimal(flag(&self.matches, "log_update_minimal", true))
            .with_transaction_compression(flag(&self.matches, "transaction_compression", true))
            .with_transaction_compression_level(parse_value(
                &self.matches,
                "transaction_compression_level",
            )?)
            .with_binlog_enabled(flag(&self.matches, "disable_binlog", false))
            .with_retry_max_attempts(parse_value(&self.matches, "retry_max_attempts")?)
            .with_retry_backoff(parse_value(&self.matches, "retry_backoff")?)
            .with_restart_delay(parse_value(&self.matches, "restart_delay")?)
            .with_verbosity(verbosity))
    }
}
