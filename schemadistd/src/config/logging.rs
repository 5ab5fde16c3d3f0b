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


//! Logging configuration as read from the config sources, before it is handed to log4rs.

use std::convert::TryFrom;

use log::Level;
use serde_derive::Deserialize;

use super::bytes::ByteSize;
use super::error::ConfigError;

pub const DEFAULT_LOGGING_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S%.3f)}] T[{T}] {l} [{M}] {m}\n";

pub fn default_pattern() -> String {
    String::from(DEFAULT_LOGGING_PATTERN)
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    #[serde(alias = "error", alias = "ERROR")]
    Error,
    #[serde(alias = "warn", alias = "WARN")]
    Warn,
    #[serde(alias = "info", alias = "INFO")]
    Info,
    #[serde(alias = "debug", alias = "DEBUG")]
    Debug,
    #[serde(alias = "trace", alias = "TRACE")]
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::Error,
            LogLevel::Warn => Level::Warn,
            LogLevel::Info => Level::Info,
            LogLevel::Debug => Level::Debug,
            LogLevel::Trace => Level::Trace,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RootConfig {
    pub appenders: Vec<String>,
    pub level: Level,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggerConfig {
    pub name: String,
    pub appenders: Vec<String>,
    /// Falls back to the root level when unset.
    pub level: Option<Level>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct UnnamedLoggerConfig {
    pub appenders: Option<Vec<String>>,
    #[serde(alias = "filter")]
    pub level: Option<LogLevel>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppenderConfig {
    pub name: String,
    pub encoder: String,
    pub kind: LogTarget,
    pub level: Option<Level>,
}

impl AppenderConfig {
    pub fn get_filename(&self) -> Option<&str> {
        match &self.kind {
            LogTarget::File(filename) => Some(filename),
            LogTarget::RollingFile { filename, .. } => Some(filename),
            _ => None,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct UnnamedAppenderConfig {
    #[serde(default = "default_pattern")]
    #[serde(alias = "pattern")]
    pub encoder: String,
    pub kind: RawLogTarget,
    pub filename: Option<String>,
    pub size: Option<ByteSize>,
    pub level: Option<LogLevel>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(String),
    RollingFile { filename: String, size: u64 },
}

#[derive(Deserialize, Clone, Debug)]
pub enum RawLogTarget {
    #[serde(alias = "stdout")]
    Stdout,
    #[serde(alias = "stderr")]
    Stderr,
    #[serde(alias = "file")]
    File,
    #[serde(alias = "rolling_file")]
    RollingFile,
}

impl TryFrom<(String, UnnamedAppenderConfig)> for AppenderConfig {
    type Error = ConfigError;

    fn try_from((name, unnamed): (String, UnnamedAppenderConfig)) -> Result<Self, Self::Error> {
        let kind = match unnamed.kind {
            RawLogTarget::Stdout => LogTarget::Stdout,
            RawLogTarget::Stderr => LogTarget::Stderr,
            RawLogTarget::File => match unnamed.filename {
                Some(filename) => LogTarget::File(filename),
                None => {
                    return Err(ConfigError::MissingValue(format!(
                        "filename of appender {}",
                        name
                    )))
                }
            },
            RawLogTarget::RollingFile => match (unnamed.filename, unnamed.size) {
                (Some(filename), Some(size)) => LogTarget::RollingFile {
                    filename,
                    size: size.get_mem_size(),
                },
                _ => {
                    return Err(ConfigError::MissingValue(format!(
                        "filename|size of appender {}",
                        name
                    )))
                }
            },
        };
        Ok(AppenderConfig {
            name,
            encoder: unnamed.encoder,
            kind,
            level: unnamed.level.map(Level::from),
        })
    }
}

impl From<(String, UnnamedLoggerConfig)> for LoggerConfig {
    fn from((name, unnamed): (String, UnnamedLoggerConfig)) -> Self {
        LoggerConfig {
            name,
            appenders: unnamed.appenders.unwrap_or_default(),
            level: unnamed.level.map(Level::from),
        }
    }
}

impl TryFrom<UnnamedLoggerConfig> for RootConfig {
    type Error = ConfigError;

    fn try_from(unnamed: UnnamedLoggerConfig) -> Result<Self, Self::Error> {
        Ok(RootConfig {
            appenders: unnamed
                .appenders
                .unwrap_or_else(|| vec![String::from("stdout")]),
            level: unnamed
                .level
                .map(Level::from)
                .ok_or_else(|| ConfigError::MissingValue("root logger level".to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies that file appenders require the values their target needs.
    ///
    /// 1. Convert a rolling file appender with a filename and size
    /// 2. Convert a rolling file appender without a size
    /// 3. Convert a file appender without a filename
    ///
    /// Only the first conversion succeeds.
    #[test]
    fn test_appender_targets() {
        let unnamed = |kind, filename: Option<&str>, size| UnnamedAppenderConfig {
            encoder: default_pattern(),
            kind,
            filename: filename.map(String::from),
            size,
            level: Some(LogLevel::Info),
        };

        let rolling: UnnamedAppenderConfig = toml::from_str(
            "kind = \"rolling_file\"\nfilename = \"/tmp/schemadistd.log\"\nsize = \"1M\"",
        )
        .expect("Unable to parse appender");
        let appender = AppenderConfig::try_from(("rolling".to_string(), rolling))
            .expect("Unable to convert rolling appender");
        assert_eq!(
            appender.kind,
            LogTarget::RollingFile {
                filename: "/tmp/schemadistd.log".to_string(),
                size: 1_000_000
            }
        );
        assert_eq!(appender.get_filename(), Some("/tmp/schemadistd.log"));
        assert_eq!(appender.level, None);

        assert!(AppenderConfig::try_from((
            "rolling".to_string(),
            unnamed(RawLogTarget::RollingFile, Some("/tmp/x.log"), None),
        ))
        .is_err());
        assert!(AppenderConfig::try_from((
            "file".to_string(),
            unnamed(RawLogTarget::File, None, None),
        ))
        .is_err());

        let stdout = AppenderConfig::try_from((
            "stdout".to_string(),
            unnamed(RawLogTarget::Stdout, None, None),
        ))
        .expect("Unable to convert stdout appender");
        assert_eq!(stdout.get_filename(), None);
        assert_eq!(stdout.level, Some(Level::Info));
    }

    /// Verifies that the root logger requires a level and defaults to the stdout appender.
    #[test]
    fn test_root_logger() {
        let root = RootConfig::try_from(UnnamedLoggerConfig {
            appenders: None,
            level: Some(LogLevel::Debug),
        })
        .expect("Unable to convert root logger");
        assert_eq!(root.appenders, vec!["stdout".to_string()]);
        assert_eq!(root.level, Level::Debug);

        assert!(RootConfig::try_from(UnnamedLoggerConfig {
            appenders: None,
            level: None,
        })
        .is_err());
    }
}
