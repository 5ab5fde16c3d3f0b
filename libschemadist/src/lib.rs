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


//! Distribution of metadata changes across front-end nodes sharing one storage cluster.
//!
//! Every front-end node runs one event loop thread which consumes two event streams from the
//! cluster: the schema stream, carrying schema operations written by clients to a shared
//! coordination table together with the acknowledgments of the other nodes, and the data
//! stream, carrying row changes to user tables. The loop applies schema operations to the
//! node's local catalog, acknowledges them, coordinates the operations its own clients started,
//! and injects the data changes into the node's replication log, one transaction per epoch.

#[macro_use]
extern crate log;

#[macro_export]
macro_rules! mutex_lock_unwrap {
    ($lock:expr) => {
        match $lock.lock() {
            Ok(guard) => guard,
            Err(e) => panic!("Mutex error: {:?}", e),
        }
    };
}

pub mod any_value;
pub mod binlog;
pub mod bitmap;
pub mod catalog;
pub mod cluster;
mod collections;
pub mod config;
pub mod error;
pub mod node;
pub mod retry;
pub mod sdist;
pub mod threading;
