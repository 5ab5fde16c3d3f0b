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

use schemadist::error::InternalError;

use crate::config::ConfigError;

#[derive(Debug)]
pub enum UserError {
    ConfigError(ConfigError),
    DaemonError {
        context: String,
        source: Option<Box<dyn Error>>,
    },
    InternalError(InternalError),
    InvalidArgument(String),
    IoError {
        context: String,
        source: Option<Box<dyn Error>>,
    },
    MissingArgument(String),
}

impl UserError {
    pub fn daemon_err_with_source(context: &str, err: Box<dyn Error>) -> Self {
        UserError::DaemonError {
            context: context.into(),
            source: Some(err),
        }
    }
}

impl Error for UserError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UserError::ConfigError(err) => Some(err),
            UserError::DaemonError { source, .. } => {
                if let Some(ref err) = source {
                    Some(&**err)
                } else {
                    None
                }
            }
            UserError::InternalError(err) => Some(err),
            UserError::InvalidArgument(_) => None,
            UserError::IoError { source, .. } => {
                if let Some(ref err) = source {
                    Some(&**err)
                } else {
                    None
                }
            }
            UserError::MissingArgument(_) => None,
        }
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UserError::ConfigError(err) => write!(f, "error occurred building config object: {}", err),
            UserError::DaemonError { context, source } => {
                if let Some(ref err) = source {
                    write!(f, "{}: {}", context, err)
                } else {
                    f.write_str(context)
                }
            }
            UserError::InternalError(err) => f.write_str(&err.to_string()),
            UserError::InvalidArgument(msg) => write!(f, "an invalid argument was passed: {}", msg),
            UserError::IoError { context, source } => {
                if let Some(ref err) = source {
                    write!(f, "{}: {}", context, err)
                } else {
                    f.write_str(context)
                }
            }
            UserError::MissingArgument(msg) => write!(f, "missing required argument: {}", msg),
        }
    }
}

impl From<ConfigError> for UserError {
    fn from(error: ConfigError) -> Self {
        UserError::ConfigError(error)
    }
}

impl From<InternalError> for UserError {
    fn from(error: InternalError) -> Self {
        UserError::InternalError(error)
    }
}

impl From<std::io::Error> for UserError {
    fn from(error: std::io::Error) -> Self {
        UserError::IoError {
            context: "encountered an IO error".into(),
            source: Some(Box::new(error)),
        }
    }
}
