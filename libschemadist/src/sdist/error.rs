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

use crate::binlog::ReplicationLogError;
use crate::catalog::CatalogError;
use crate::cluster::ClusterError;
use crate::error::{InternalError, InvalidArgumentError, InvalidStateError};

use super::result::ParticipantResult;

#[derive(Debug)]
pub enum SchemaDistError {
    /// Schema distribution has not been set up on this node, or is restarting.
    NotReady,
    IdentifierTooLong {
        identifier: String,
        max_len: usize,
    },
    /// Another operation on the same object did not finish in time.
    ObjectBusy(String),
    /// The session was killed before the operation was distributed.
    Killed,
    /// The client stopped waiting; the operation may still complete on the cluster.
    Timeout {
        op: String,
        results: Vec<ParticipantResult>,
    },
    /// An acknowledgment that could not be delivered on a protocol without a way to report it.
    ProtocolError(String),
    ClusterError(ClusterError),
    CatalogError(CatalogError),
    ReplicationLogError(ReplicationLogError),
    InvalidArgumentError(InvalidArgumentError),
    InvalidStateError(InvalidStateError),
    InternalError(InternalError),
}

impl Error for SchemaDistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SchemaDistError::ClusterError(err) => Some(err),
            SchemaDistError::CatalogError(err) => Some(err),
            SchemaDistError::ReplicationLogError(err) => Some(err),
            SchemaDistError::InvalidArgumentError(err) => Some(err),
            SchemaDistError::InvalidStateError(err) => Some(err),
            SchemaDistError::InternalError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaDistError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchemaDistError::NotReady => f.write_str("schema distribution is not ready"),
            SchemaDistError::IdentifierTooLong {
                identifier,
                max_len,
            } => write!(
                f,
                "identifier '{}' is longer than {} bytes",
                identifier, max_len
            ),
            SchemaDistError::ObjectBusy(msg) => {
                write!(f, "another schema operation is in progress: {}", msg)
            }
            SchemaDistError::Killed => f.write_str("session killed before distribution"),
            SchemaDistError::Timeout { op, results } => write!(
                f,
                "timed out waiting for {} ({} result(s) received)",
                op,
                results.len()
            ),
            SchemaDistError::ProtocolError(msg) => write!(f, "protocol failure: {}", msg),
            SchemaDistError::ClusterError(err) => write!(f, "{}", err),
            SchemaDistError::CatalogError(err) => write!(f, "{}", err),
            SchemaDistError::ReplicationLogError(err) => write!(f, "{}", err),
            SchemaDistError::InvalidArgumentError(err) => write!(f, "{}", err),
            SchemaDistError::InvalidStateError(err) => write!(f, "{}", err),
            SchemaDistError::InternalError(err) => write!(f, "{}", err),
        }
    }
}

impl From<ClusterError> for SchemaDistError {
    fn from(err: ClusterError) -> Self {
        SchemaDistError::ClusterError(err)
    }
}

impl From<CatalogError> for SchemaDistError {
    fn from(err: CatalogError) -> Self {
        SchemaDistError::CatalogError(err)
    }
}

impl From<ReplicationLogError> for SchemaDistError {
    fn from(err: ReplicationLogError) -> Self {
        SchemaDistError::ReplicationLogError(err)
    }
}

impl From<InvalidArgumentError> for SchemaDistError {
    fn from(err: InvalidArgumentError) -> Self {
        SchemaDistError::InvalidArgumentError(err)
    }
}

impl From<InvalidStateError> for SchemaDistError {
    fn from(err: InvalidStateError) -> Self {
        SchemaDistError::InvalidStateError(err)
    }
}

impl From<InternalError> for SchemaDistError {
    fn from(err: InternalError) -> Self {
        SchemaDistError::InternalError(err)
    }
}
