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

use std::fmt;

use crate::cluster::NodeId;

const SUCCESS: u32 = 0;
const NODE_FAILURE: u32 = 9001;
const NODE_UNSUBSCRIBE: u32 = 9002;
const NODE_TIMEOUT: u32 = 9003;
const COORD_ABORT: u32 = 9004;
const CLIENT_ABORT: u32 = 9005;
const CLIENT_TIMEOUT: u32 = 9006;
const CLIENT_KILLED: u32 = 9007;
const SCHEMA_OP_FAILURE: u32 = 9008;

/// Outcome of a schema operation on one participant.
///
/// Apart from `Success`, the named codes are protocol outcomes assigned by the coordinator or
/// the client; `Other` carries an error code reported by a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    NodeFailure,
    NodeUnsubscribe,
    NodeTimeout,
    CoordAbort,
    ClientAbort,
    ClientTimeout,
    ClientKilled,
    SchemaOpFailure,
    Other(u32),
}

impl ResultCode {
    pub fn from_code(code: u32) -> Self {
        match code {
            SUCCESS => ResultCode::Success,
            NODE_FAILURE => ResultCode::NodeFailure,
            NODE_UNSUBSCRIBE => ResultCode::NodeUnsubscribe,
            NODE_TIMEOUT => ResultCode::NodeTimeout,
            COORD_ABORT => ResultCode::CoordAbort,
            CLIENT_ABORT => ResultCode::ClientAbort,
            CLIENT_TIMEOUT => ResultCode::ClientTimeout,
            CLIENT_KILLED => ResultCode::ClientKilled,
            SCHEMA_OP_FAILURE => ResultCode::SchemaOpFailure,
            other => ResultCode::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            ResultCode::Success => SUCCESS,
            ResultCode::NodeFailure => NODE_FAILURE,
            ResultCode::NodeUnsubscribe => NODE_UNSUBSCRIBE,
            ResultCode::NodeTimeout => NODE_TIMEOUT,
            ResultCode::CoordAbort => COORD_ABORT,
            ResultCode::ClientAbort => CLIENT_ABORT,
            ResultCode::ClientTimeout => CLIENT_TIMEOUT,
            ResultCode::ClientKilled => CLIENT_KILLED,
            ResultCode::SchemaOpFailure => SCHEMA_OP_FAILURE,
            ResultCode::Other(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == ResultCode::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResultCode::Success => f.write_str("success"),
            ResultCode::NodeFailure => f.write_str("participant failed"),
            ResultCode::NodeUnsubscribe => f.write_str("participant unsubscribed"),
            ResultCode::NodeTimeout => f.write_str("participant timed out"),
            ResultCode::CoordAbort => f.write_str("coordinator aborted"),
            ResultCode::ClientAbort => f.write_str("client aborted"),
            ResultCode::ClientTimeout => f.write_str("client timed out"),
            ResultCode::ClientKilled => f.write_str("client killed"),
            ResultCode::SchemaOpFailure => f.write_str("failed to apply schema operation"),
            ResultCode::Other(code) => write!(f, "error {}", code),
        }
    }
}

/// The result one participant reported, or was assigned, for a schema operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantResult {
    pub node_id: NodeId,
    pub code: ResultCode,
    pub message: String,
}

impl fmt::Display for ParticipantResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "node {}: {}", self.node_id, self.code)
        } else {
            write!(f, "node {}: {} ({})", self.node_id, self.code, self.message)
        }
    }
}

/// Aggregated outcome of a distributed schema operation, as returned to the client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaDistOutcome {
    results: Vec<ParticipantResult>,
}

impl SchemaDistOutcome {
    pub fn new(results: Vec<ParticipantResult>) -> Self {
        SchemaDistOutcome { results }
    }

    /// True when every participant succeeded. An operation that was not distributed at all
    /// succeeds trivially.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| result.code.is_success())
    }

    pub fn results(&self) -> &[ParticipantResult] {
        &self.results
    }

    pub fn failures(&self) -> Vec<&ParticipantResult> {
        self.results
            .iter()
            .filter(|result| !result.code.is_success())
            .collect()
    }

    pub fn result_for(&self, node_id: NodeId) -> Option<&ParticipantResult> {
        self.results.iter().find(|result| result.node_id == node_id)
    }
}

impl fmt::Display for SchemaDistOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_success() {
            return write!(f, "success on {} node(s)", self.results.len());
        }

        let failures: Vec<String> = self
            .failures()
            .iter()
            .map(|result| result.to_string())
            .collect();
        write!(f, "partial failure: {}", failures.join(", "))
    }
}
