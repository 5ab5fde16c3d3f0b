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

use crate::cluster::ClusterError;
use crate::error::{InternalError, InvalidStateError};
use crate::sdist::SchemaDistError;

#[derive(Debug)]
pub enum ReplicationLogError {
    SerializationError(String),
    InternalError(InternalError),
}

impl Error for ReplicationLogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReplicationLogError::InternalError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ReplicationLogError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReplicationLogError::SerializationError(msg) => {
                write!(f, "unable to serialize log event: {}", msg)
            }
            ReplicationLogError::InternalError(err) => write!(f, "{}", err),
        }
    }
}

impl From<InternalError> for ReplicationLogError {
    fn from(err: InternalError) -> Self {
        ReplicationLogError::InternalError(err)
    }
}

impl From<serde_json::Error> for ReplicationLogError {
    fn from(err: serde_json::Error) -> Self {
        ReplicationLogError::SerializationError(err.to_string())
    }
}

/// Errors which end an event loop session; the loop tears down and sets itself up again.
#[derive(Debug)]
pub enum EventLoopError {
    ClusterError(ClusterError),
    SchemaDistError(SchemaDistError),
    ReplicationLogError(ReplicationLogError),
    /// The shared tables or streams could not be set up, or disappeared.
    SetupError(InvalidStateError),
}

impl Error for EventLoopError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EventLoopError::ClusterError(err) => Some(err),
            EventLoopError::SchemaDistError(err) => Some(err),
            EventLoopError::ReplicationLogError(err) => Some(err),
            EventLoopError::SetupError(err) => Some(err),
        }
    }
}

impl fmt::Display for EventLoopError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventLoopError::ClusterError(err) => write!(f, "cluster error: {}", err),
            EventLoopError::SchemaDistError(err) => write!(f, "schema distribution error: {}", err),
            EventLoopError::ReplicationLogError(err) => {
                write!(f, "replication log error: {}", err)
            }
            EventLoopError::SetupError(err) => write!(f, "setup failed: {}", err),
        }
    }
}

impl From<ClusterError> for EventLoopError {
    fn from(err: ClusterError) -> Self {
        EventLoopError::ClusterError(err)
    }
}

impl From<SchemaDistError> for EventLoopError {
    fn from(err: SchemaDistError) -> Self {
        EventLoopError::SchemaDistError(err)
    }
}

impl From<ReplicationLogError> for EventLoopError {
    fn from(err: ReplicationLogError) -> Self {
        EventLoopError::ReplicationLogError(err)
    }
}

impl From<InvalidStateError> for EventLoopError {
    fn from(err: InvalidStateError) -> Self {
        EventLoopError::SetupError(err)
    }
}
