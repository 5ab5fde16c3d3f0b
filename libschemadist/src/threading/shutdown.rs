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


//! Two-phase shutdown of the long-lived threads of a node.

use crate::error::InternalError;

/// A component owning one or more threads which must be stopped and joined.
///
/// Stopping is split in two so that many nodes can be stopped together: every event loop is
/// told to stop first, and only then is each one joined.
pub trait ShutdownHandle {
    /// Asks the component's threads to leave their loops. Must not block.
    fn signal_shutdown(&mut self);

    /// Blocks until the component's threads have exited.
    fn wait_for_shutdown(&mut self) -> Result<(), InternalError>;
}

/// Signals every handle, then waits for each of them in turn.
///
/// A handle failing to stop does not prevent the remaining handles from being joined; the
/// failures are combined into one error.
pub fn shutdown(mut handles: Vec<Box<dyn ShutdownHandle>>) -> Result<(), InternalError> {
    handles
        .iter_mut()
        .for_each(|handle| handle.signal_shutdown());

    let failures: Vec<String> = handles
        .iter_mut()
        .filter_map(|handle| handle.wait_for_shutdown().err())
        .map(|err| {
            error!("Shutdown failed: {}", err);
            err.to_string()
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(InternalError::with_message(format!(
            "{} component(s) did not shut down cleanly: {}",
            failures.len(),
            failures.join("; ")
        )))
    }
}
