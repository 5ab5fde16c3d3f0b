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

//! Distribution of schema changes between the front-end nodes of a cluster.
//!
//! A client on the node executing a schema change writes one row describing it to the shared
//! coordination table and waits. The event loop of every node sees the row: the originating
//! node coordinates, every other node applies the change to its local catalog and acknowledges,
//! and the coordinator wakes the client once every participant has reported or was found gone.

pub mod ack;
mod client;
mod context;
mod error;
mod handler;
mod registry;
mod result;
mod schema_op;
mod subscribers;
pub mod table;

pub use self::client::{SchemaDistClient, Session};
pub use self::context::{SchemaDistContext, SchemaDistStats, SchemaDistStatsSnapshot};
pub use self::error::SchemaDistError;
pub use self::handler::SchemaEventHandler;
pub use self::registry::SchemaOpRegistry;
pub use self::result::{ParticipantResult, ResultCode, SchemaDistOutcome};
pub use self::schema_op::SchemaOp;
pub use self::subscribers::SubscriberTracker;
pub use self::table::{SchemaOpKey, SchemaOpType};
