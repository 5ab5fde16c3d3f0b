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


//! Translation of the logging configuration into a log4rs configuration.

use std::convert::TryFrom;
use std::fs::OpenOptions;
use std::path::Path;

use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
        rolling_file::{
            policy::{
                compound::{
                    roll::delete::DeleteRoller, trigger::size::SizeTrigger, CompoundPolicy,
                },
                Policy,
            },
            RollingFileAppender,
        },
        Append,
    },
    config::{runtime::ConfigErrors, Appender, Logger, Root},
    encode::{pattern::PatternEncoder, Encode},
    filter::threshold::ThresholdFilter,
    Config,
};
use schemadist::error::InternalError;

use crate::config::{
    AppenderConfig, Config as InternalConfig, LogTarget, LoggerConfig, RootConfig,
    DEFAULT_LOGGING_PATTERN,
};
use crate::error::UserError;

fn build_appender(config: &AppenderConfig) -> Result<Appender, std::io::Error> {
    let encoder: Box<dyn Encode> = Box::new(PatternEncoder::new(&config.encoder));
    let boxed: Box<dyn Append> = match &config.kind {
        LogTarget::Stdout => Box::new(
            ConsoleAppender::builder()
                .encoder(encoder)
                .target(Target::Stdout)
                .build(),
        ),
        LogTarget::Stderr => Box::new(
            ConsoleAppender::builder()
                .encoder(encoder)
                .target(Target::Stderr)
                .build(),
        ),
        LogTarget::File(path) => Box::new(FileAppender::builder().encoder(encoder).build(path)?),
        LogTarget::RollingFile { filename, size } => {
            let trigger = Box::new(SizeTrigger::new(*size));
            let roll = Box::new(DeleteRoller::new());
            let policy: Box<dyn Policy> = Box::new(CompoundPolicy::new(trigger, roll));

            Box::new(
                RollingFileAppender::builder()
                    .encoder(encoder)
                    .build(filename, policy)?,
            )
        }
    };
    let mut builder = Appender::builder();
    if let Some(level) = config.level {
        builder = builder.filter(Box::new(ThresholdFilter::new(level.to_level_filter())))
    }
    Ok(builder.build(&config.name, boxed))
}

fn build_logger(config: &LoggerConfig, root: &RootConfig) -> Logger {
    let level = config.level.unwrap_or(root.level).to_level_filter();
    Logger::builder()
        .appenders(config.appenders.clone())
        .build(&config.name, level)
}

fn build_root(root: &RootConfig) -> Root {
    Root::builder()
        .appenders(root.appenders.clone())
        .build(root.level.to_level_filter())
}

struct LogConfig<'a> {
    root: &'a RootConfig,
    appenders: Vec<AppenderConfig>,
    loggers: &'a [LoggerConfig],
}

impl<'a> TryFrom<LogConfig<'a>> for Config {
    type Error = ConfigErrors;

    fn try_from(log_config: LogConfig<'a>) -> Result<Self, Self::Error> {
        Config::builder()
            .appenders(log_config.appenders.iter().filter_map(|appender| {
                build_appender(appender)
                    .map_err(|err| {
                        eprintln!("Unable to create log appender {}: {}", appender.name, err)
                    })
                    .ok()
            }))
            .loggers(
                log_config
                    .loggers
                    .iter()
                    .map(|logger| build_logger(logger, log_config.root)),
            )
            .build(build_root(log_config.root))
    }
}

fn check_file_writeable(path: &Path) -> Result<(), UserError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(UserError::IoError {
                context: format!("logfile directory does not exist: {}", parent.display()),
                source: None,
            });
        }
    }
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map(|_| ())
        .map_err(|err| UserError::IoError {
            context: format!("logfile is not writeable: {}", path.display()),
            source: Some(Box::new(err)),
        })
}

/// Replaces the logging configuration behind `log_handle` with the one described by `config`.
///
/// The verbosity given on the command line becomes the threshold of the stdout appender.
pub fn configure_logging(
    config: &InternalConfig,
    log_handle: &log4rs::Handle,
) -> Result<(), UserError> {
    config
        .appenders()
        .iter()
        .filter_map(AppenderConfig::get_filename)
        .try_for_each(|filename| check_file_writeable(Path::new(filename)))?;

    let appenders = config
        .appenders()
        .iter()
        .map(|appender| {
            if appender.name == "stdout" {
                AppenderConfig {
                    level: Some(config.verbosity()),
                    ..appender.clone()
                }
            } else {
                appender.clone()
            }
        })
        .collect();

    let log_config = Config::try_from(LogConfig {
        root: config.root_logger(),
        appenders,
        loggers: config.loggers(),
    })
    .map_err(|err| UserError::InternalError(InternalError::from_source(Box::new(err))))?;
    log_handle.set_config(log_config);
    Ok(())
}

/// Logging used until the configuration has been read: everything at info or above to stdout.
pub fn default_log_settings() -> Result<Config, UserError> {
    let stdout: Box<dyn Append> = Box::new(
        ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(DEFAULT_LOGGING_PATTERN)))
            .target(Target::Stdout)
            .build(),
    );
    Config::builder()
        .appender(Appender::builder().build("default", stdout))
        .build(
            Root::builder()
                .appender("default")
                .build(log::LevelFilter::Info),
        )
        .map_err(|err| UserError::InternalError(InternalError::from_source(Box::new(err))))
}

#[cfg(test)]
mod tests {
    use super::*;

    use log::Level;
    use tempfile::TempDir;

    fn root() -> RootConfig {
        RootConfig {
            appenders: vec!["stdout".to_string(), "file".to_string()],
            level: Level::Warn,
        }
    }

    /// Verifies that a logging configuration with console and file appenders and a named logger
    /// is accepted by log4rs.
    ///
    /// 1. Describe a stdout appender and a file appender writing into a temporary directory
    /// 2. Describe a logger for `schemadist` without a level of its own
    /// 3. Convert the description into a log4rs `Config`
    ///
    /// The conversion succeeds, keeps both appenders and gives the logger the root level.
    #[test]
    fn test_log_config_conversion() {
        let temp_dir = TempDir::new().expect("Unable to create temp dir");
        let log_file = temp_dir.path().join("schemadistd.log");
        let appenders = vec![
            AppenderConfig {
                name: "stdout".to_string(),
                encoder: DEFAULT_LOGGING_PATTERN.to_string(),
                kind: LogTarget::Stdout,
                level: Some(Level::Info),
            },
            AppenderConfig {
                name: "file".to_string(),
                encoder: DEFAULT_LOGGING_PATTERN.to_string(),
                kind: LogTarget::File(log_file.to_string_lossy().into_owned()),
                level: None,
            },
        ];
        let loggers = vec![LoggerConfig {
            name: "schemadist".to_string(),
            appenders: vec![],
            level: None,
        }];
        let root = root();

        let config = Config::try_from(LogConfig {
            root: &root,
            appenders,
            loggers: &loggers,
        })
        .expect("Unable to build log4rs config");

        assert_eq!(config.appenders().len(), 2);
        assert_eq!(config.loggers().len(), 1);
        assert_eq!(config.loggers()[0].level(), log::LevelFilter::Warn);
        assert_eq!(config.root().level(), log::LevelFilter::Warn);
    }

    /// Verifies that a log file in a directory which does not exist is reported.
    #[test]
    fn test_missing_log_directory() {
        let temp_dir = TempDir::new().expect("Unable to create temp dir");
        let missing = temp_dir.path().join("missing").join("schemadistd.log");
        assert!(check_file_writeable(&missing).is_err());

        let present = temp_dir.path().join("schemadistd.log");
        assert!(check_file_writeable(&present).is_ok());
    }
}
