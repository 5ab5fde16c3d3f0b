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


#[macro_use]
extern crate log;
#[macro_use]
extern crate clap;

mod config;
mod console;
mod daemon;
mod error;
mod logging;

use std::fs;
use std::path::Path;

use clap::{App, Arg, ArgMatches};
use schemadist::config::{SchemaDistConfig, SchemaDistConfigBuilder};

#[cfg(feature = "config-command-line")]
use crate::config::ClapPartialConfigBuilder;
#[cfg(feature = "config-default")]
use crate::config::DefaultPartialConfigBuilder;
#[cfg(feature = "config-env-var")]
use crate::config::EnvPartialConfigBuilder;
#[cfg(any(
    feature = "config-command-line",
    feature = "config-default",
    feature = "config-env-var",
    feature = "config-toml"
))]
use crate::config::PartialConfigBuilder;
#[cfg(feature = "config-toml")]
use crate::config::TomlPartialConfigBuilder;
use crate::config::{Config, ConfigBuilder};
#[cfg(feature = "config-toml")]
use crate::config::ConfigError;
use crate::daemon::SchemaDistDaemonBuilder;
use crate::error::UserError;
use crate::logging::{configure_logging, default_log_settings};

const DEFAULT_CONFIG_FILE: &str = "/etc/schemadist/schemadistd.toml";

fn create_app<'a, 'b>() -> App<'a, 'b> {
    let app = clap_app!(schemadistd =>
        (version: crate_version!())
        (about: "Schema Distribution Daemon")
        (@arg config: -c --config +takes_value "Path to the config file")
        (@arg node_ids: --("node-id") +takes_value +multiple number_of_values(1)
          "Id of a front-end node to run; may be given several times")
        (@arg server_id_base: --("server-id-base") +takes_value
          "Added to each node id to form the node's server id")
        (@arg shards: --shard +takes_value +multiple number_of_values(1)
          "Id of a data shard of the in-memory cluster; may be given several times")
        (@arg gcp_interval: --("gcp-interval") +takes_value
          "How often the cluster closes an epoch (in milliseconds)")
        (@arg schema_op_timeout: --("schema-op-timeout") +takes_value
          "How long a schema operation may take (in seconds)")
        (@arg check_interval: --("check-interval") +takes_value
          "How often in-flight schema operations are checked (in milliseconds)")
        (@arg lock_wait_timeout: --("lock-wait-timeout") +takes_value
          "How long a participant waits for a metadata lock (in seconds)")
        (@arg batch: --batch
          "Stop once the console input ends")
        (@arg quiet: -q --quiet "Decrease output verbosity")
        (@arg verbose: -v --verbose +multiple
          "Increase output verbosity"));

    app.arg(
        Arg::with_name("log_empty_epochs")
            .long("log-empty-epochs")
            .help("Write a transaction for epochs without row changes"),
    )
    .arg(
        Arg::with_name("log_replica_updates")
            .long("log-replica-updates")
            .help("Log changes applied by replica appliers"),
    )
    .arg(
        Arg::with_name("log_update_as_update")
            .long("log-update-as-update")
            .help("Log updates as updates rather than as writes"),
    )
    .arg(
        Arg::with_name("log_full_updates")
            .long("log-full-updates")
            .help("Log every column of updated rows rather than only the changed ones"),
    )
    .arg(
        Arg::with_name("log_update_minimal")
            .long("log-update-minimal")
            .help("Log only the primary key before an update and the changed columns after it"),
    )
    .arg(
        Arg::with_name("transaction_compression")
            .long("transaction-compression")
            .help("Compress the row events of each epoch transaction"),
    )
    .arg(
        Arg::with_name("transaction_compression_level")
            .long("transaction-compression-level")
            .takes_value(true)
            .help("Compression level, from 1 to 22"),
    )
    .arg(
        Arg::with_name("disable_binlog")
            .long("disable-binlog")
            .help("Do not write a replication log"),
    )
    .arg(
        Arg::with_name("retry_max_attempts")
            .long("retry-max-attempts")
            .takes_value(true)
            .help("How often a temporarily failing cluster transaction is retried"),
    )
    .arg(
        Arg::with_name("retry_backoff")
            .long("retry-backoff")
            .takes_value(true)
            .help("Pause between transaction retries (in milliseconds)"),
    )
    .arg(
        Arg::with_name("restart_delay")
            .long("restart-delay")
            .takes_value(true)
            .help("Pause before the event loop restarts after a failure (in milliseconds)"),
    )
}

fn create_config(_toml_path: Option<&str>, _matches: ArgMatches) -> Result<Config, UserError> {
    #[cfg(any(
        feature = "config-command-line",
        feature = "config-default",
        feature = "config-env-var",
        feature = "config-toml"
    ))]
    let mut builder = ConfigBuilder::new();
    #[cfg(not(any(
        feature = "config-command-line",
        feature = "config-default",
        feature = "config-env-var",
        feature = "config-toml"
    )))]
    let builder = ConfigBuilder::new();

    #[cfg(feature = "config-command-line")]
    {
        let clap_config = ClapPartialConfigBuilder::new(_matches).build()?;
        builder = builder.with_partial_config(clap_config);
    }

    #[cfg(feature = "config-toml")]
    {
        if let Some(file) = _toml_path {
            debug!("Loading config toml file: {:?}", fs::canonicalize(file)?);
            let toml_string = fs::read_to_string(file).map_err(|err| ConfigError::ReadError {
                file: String::from(file),
                err,
            })?;
            let toml_config = TomlPartialConfigBuilder::new(toml_string, String::from(file))?
                .build()?;
            builder = builder.with_partial_config(toml_config);
        }
    }

    #[cfg(feature = "config-env-var")]
    {
        let env_config = EnvPartialConfigBuilder::new().build()?;
        builder = builder.with_partial_config(env_config);
    }

    #[cfg(feature = "config-default")]
    {
        let default_config = DefaultPartialConfigBuilder::new().build()?;
        builder = builder.with_partial_config(default_config);
    }

    Ok(builder.build()?)
}

fn schema_dist_config(config: &Config) -> Result<SchemaDistConfig, UserError> {
    SchemaDistConfigBuilder::new()
        .with_schema_op_timeout(config.schema_op_timeout())
        .with_check_interval(config.check_interval())
        .with_lock_wait_timeout(config.lock_wait_timeout())
        .with_log_empty_epochs(config.log_empty_epochs())
        .with_log_replica_updates(config.log_replica_updates())
        .with_log_update_as_write(config.log_update_as_write())
        .with_log_updated_only(config.log_updated_only())
        .with_log_update_minimal(config.log_update_minimal())
        .with_transaction_compression(config.transaction_compression())
        .with_transaction_compression_level(config.transaction_compression_level())
        .with_binlog_enabled(config.binlog_enabled())
        .with_retry_max_attempts(config.retry_max_attempts())
        .with_retry_backoff(config.retry_backoff())
        .with_restart_delay(config.restart_delay())
        .with_create_op_id_column(config.create_op_id_column())
        .build()
        .map_err(|err| UserError::InvalidArgument(err.to_string()))
}

fn main() {
    let matches = create_app().get_matches();

    let log_handle = match default_log_settings().and_then(|settings| {
        log4rs::init_config(settings).map_err(|err| {
            UserError::daemon_err_with_source("unable to start logging", Box::new(err))
        })
    }) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Failed to start daemon, {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = start_daemon(matches, &log_handle) {
        error!("Failed to start daemon, {}", err);
        std::process::exit(1);
    }
}

fn start_daemon(matches: ArgMatches, log_handle: &log4rs::Handle) -> Result<(), UserError> {
    // get provided config file or search default location
    let config_file = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_FILE);
    let config_file_path = if Path::new(&config_file).is_file() {
        Some(config_file)
    } else if matches.is_present("config") {
        return Err(UserError::InvalidArgument(format!(
            "config file does not exist: {}",
            config_file
        )));
    } else {
        None
    };
    let exit_on_console_close = matches.is_present("batch");

    let config = create_config(config_file_path, matches.clone())?;
    configure_logging(&config, log_handle)?;
    config.log_as_debug();

    let mut daemon = SchemaDistDaemonBuilder::new()
        .with_node_ids(config.node_ids().to_vec())
        .with_server_id_base(config.server_id_base())
        .with_shards(config.shards().to_vec())
        .with_gcp_interval(config.gcp_interval())
        .with_schema_dist_config(schema_dist_config(&config)?)
        .with_exit_on_console_close(exit_on_console_close)
        .build()?;

    info!(
        "Starting schema distribution for nodes {:?} (server id base {})",
        config.node_ids(),
        config.server_id_base()
    );
    daemon.start()
}
