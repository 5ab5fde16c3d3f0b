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

//! Module containing InvalidStateError implementation.

use std::error;
use std::fmt;

/// An error returned when an operation cannot be completed because the state of the underlying
/// struct is inconsistent.
///
/// This can be caused by a caller calling a function which requires a prerequisite step to be
/// performed first, such as distributing a schema operation before schema distribution has
/// finished its setup.
#[derive(Debug)]
pub struct InvalidStateError {
    message: String,
}

impl InvalidStateError {
    /// Constructs a new `InvalidStateError` with a specified message string.
    pub fn with_message(message: String) -> Self {
        Self { message }
    }
}

impl error::Error for InvalidStateError {}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}
