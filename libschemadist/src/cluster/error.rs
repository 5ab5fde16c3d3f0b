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

use crate::error::{InternalError, ResourceTemporarilyUnavailableError};

/// Errors returned by the storage cluster.
///
/// `Temporary` errors (lock conflicts, exhausted resources) are worth retrying; every other
/// variant is permanent for the operation that produced it.
#[derive(Debug)]
pub enum ClusterError {
    Temporary(ResourceTemporarilyUnavailableError),
    NoSuchObject(String),
    AlreadyExists(String),
    SchemaMismatch(String),
    /// The connection to the cluster, or an event stream, has been lost.
    Disconnected(String),
    InternalError(InternalError),
}

impl ClusterError {
    pub fn temporary(message: &str) -> Self {
        ClusterError::Temporary(ResourceTemporarilyUnavailableError::from_source(Box::new(
            InternalError::with_message(message.to_string()),
        )))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, ClusterError::Temporary(_))
    }
}

impl Error for ClusterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClusterError::Temporary(err) => Some(err),
            ClusterError::InternalError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterError::Temporary(err) => write!(f, "temporary cluster error: {}", err),
            ClusterError::NoSuchObject(msg) => write!(f, "no such object: {}", msg),
            ClusterError::AlreadyExists(msg) => write!(f, "already exists: {}", msg),
            ClusterError::SchemaMismatch(msg) => write!(f, "schema mismatch: {}", msg),
            ClusterError::Disconnected(msg) => write!(f, "disconnected from cluster: {}", msg),
            ClusterError::InternalError(err) => write!(f, "{}", err),
        }
    }
}

impl From<InternalError> for ClusterError {
    fn from(err: InternalError) -> Self {
        ClusterError::InternalError(err)
    }
}
