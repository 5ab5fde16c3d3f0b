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


use std::error::Error;
use std::fmt;
use std::io;

#[derive(Debug)]
/// General error type used during `Config` construction.
pub enum ConfigError {
    ReadError {
        file: String,
        err: io::Error,
    },
    #[cfg(feature = "config-toml")]
    TomlParseError(::toml::de::Error),
    #[cfg(feature = "config-command-line")]
    InvalidArgument(clap::Error),
    /// A value was given but could not be used.
    InvalidValue {
        name: String,
        value: String,
    },
    InvalidVersion(String),
    MissingValue(String),
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::ReadError { err, .. } => Some(err),
            #[cfg(feature = "config-toml")]
            ConfigError::TomlParseError(err) => Some(err),
            #[cfg(feature = "config-command-line")]
            ConfigError::InvalidArgument(err) => Some(err),
            ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidVersion(_) => None,
            ConfigError::MissingValue(_) => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::ReadError { file, err } => {
                write!(f, "unable to read config file {}: {}", file, err)
            }
            #[cfg(feature = "config-toml")]
            ConfigError::TomlParseError(err) => write!(f, "invalid config file: {}", err),
            #[cfg(feature = "config-command-line")]
            ConfigError::InvalidArgument(err) => write!(f, "invalid argument: {}", err),
            ConfigError::InvalidValue { name, value } => {
                write!(f, "invalid value for {}: {}", name, value)
            }
            ConfigError::InvalidVersion(msg) => write!(f, "{}", msg),
            ConfigError::MissingValue(msg) => write!(f, "configuration value missing: {}", msg),
        }
    }
}

#[cfg(feature = "config-toml")]
impl From<::toml::de::Error> for ConfigError {
    fn from(err: ::toml::de::Error) -> Self {
        ConfigError::TomlParseError(err)
    }
}

#[cfg(feature = "config-command-line")]
impl From<clap::Error> for ConfigError {
    fn from(err: clap::Error) -> Self {
        ConfigError::InvalidArgument(err)
    }
}
