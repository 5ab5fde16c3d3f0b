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


//! `PartialConfig` builder using values from environment variables.

use std::env;
use std::str::FromStr;

use crate::config::{ConfigError, ConfigSource, PartialConfig, PartialConfigBuilder};

const NODE_IDS_ENV: &str = "SCHEMADIST_NODE_IDS";
const SERVER_ID_BASE_ENV: &str = "SCHEMADIST_SERVER_ID_BASE";
const SHARDS_ENV: &str = "SCHEMADIST_SHARDS";
const SCHEMA_OP_TIMEOUT_ENV: &str = "SCHEMADIST_SCHEMA_OP_TIMEOUT";
const BINLOG_ENABLED_ENV: &str = "SCHEMADIST_BINLOG_ENABLED";

pub struct EnvPartialConfigBuilder;

impl EnvPartialConfigBuilder {
    pub fn new() -> Self {
        EnvPartialConfigBuilder {}
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name).ok() {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

// A comma-separated list, such as "1,2,3".
fn parse_list(name: &str) -> Result<Option<Vec<u32>>, ConfigError> {
    match env::var(name).ok() {
        Some(value) => value
            .split(',')
            .map(|item| item.trim().parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

/// Implementation of the `PartialConfigBuilder` trait to create a `PartialConfig` object from the
/// environment variable config options.
impl PartialConfigBuilder for EnvPartialConfigBuilder {
    fn build(self) -> Result<PartialConfig, ConfigError> {
        Ok(PartialConfig::new(ConfigSource::Environment)
            .with_node_ids(parse_list(NODE_IDS_ENV)?)
            .with_server_id_base(parse_var(SERVER_ID_BASE_ENV)?)
            .with_shards(parse_list(SHARDS_ENV)?)
            .with_schema_op_timeout(parse_var(SCHEMA_OP_TIMEOUT_ENV)?)
            .with_binlog_enabled(parse_var(BINLOG_ENABLED_ENV)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// This test verifies that a `PartialConfig` object, constructed from the
    /// `EnvPartialConfigBuilder` module, contains the correct values using the following steps:
    ///
    /// 1. Remove any existing environment variables which may be set.
    /// 2. Build a `PartialConfig` from a new `EnvPartialConfigBuilder`.
    /// 3. Set the node ids, shards, timeout and binlog environment variables.
    /// 4. Build a second `PartialConfig`.
    /// 5. Set the node ids environment variable to a value which is not a list of numbers.
    /// 6. Build a third `PartialConfig`.
    ///
    /// The first `PartialConfig` holds no values, the second holds the values which were set and
    /// building the third fails.
    fn test_environment_var_set_config() {
        env::remove_var(NODE_IDS_ENV);
        env::remove_var(SERVER_ID_BASE_ENV);
        env::remove_var(SHARDS_ENV);
        env::remove_var(SCHEMA_OP_TIMEOUT_ENV);
        env::remove_var(BINLOG_ENABLED_ENV);

        let unset_config = EnvPartialConfigBuilder::new()
            .build()
            .expect("Unable to build EnvPartialConfigBuilder");
        assert_eq!(unset_config.source(), ConfigSource::Environment);
        assert_eq!(unset_config.node_ids(), None);
        assert_eq!(unset_config.shards(), None);
        assert_eq!(unset_config.schema_op_timeout(), None);
        assert_eq!(unset_config.binlog_enabled(), None);

        env::set_var(NODE_IDS_ENV, "1, 2,3");
        env::set_var(SHARDS_ENV, "7");
        env::set_var(SCHEMA_OP_TIMEOUT_ENV, "15");
        env::set_var(BINLOG_ENABLED_ENV, "false");

        let set_config = EnvPartialConfigBuilder::new()
            .build()
            .expect("Unable to build EnvPartialConfigBuilder");
        assert_eq!(set_config.node_ids(), Some(vec![1, 2, 3]));
        assert_eq!(set_config.server_id_base(), None);
        assert_eq!(set_config.shards(), Some(vec![7]));
        assert_eq!(set_config.schema_op_timeout(), Some(15));
        assert_eq!(set_config.binlog_enabled(), Some(false));

        env::set_var(NODE_IDS_ENV, "1,two");
        assert!(matches!(
            EnvPartialConfigBuilder::new().build(),
            Err(ConfigError::InvalidValue { .. })
        ));

        env::remove_var(NODE_IDS_ENV);
        env::remove_var(SHARDS_ENV);
        env::remove_var(SCHEMA_OP_TIMEOUT_ENV);
        env::remove_var(BINLOG_ENABLED_ENV);
    }
}
