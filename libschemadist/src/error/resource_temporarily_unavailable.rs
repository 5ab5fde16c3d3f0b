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

//! Module containing ResourceTemporarilyUnavailableError implementation.

use std::error;
use std::fmt;
use std::time::Duration;

/// An error which may be returned when an underlying resource is temporarily unavailable.
///
/// If a retry duration is provided, callers may wait that long before trying again.
#[derive(Debug)]
pub struct ResourceTemporarilyUnavailableError {
    source: Box<dyn error::Error + Send>,
    retry_duration_hint: Option<Duration>,
}

impl ResourceTemporarilyUnavailableError {
    /// Constructs a new `ResourceTemporarilyUnavailableError` from a specified source error.
    pub fn from_source(source: Box<dyn error::Error + Send>) -> Self {
        Self {
            source,
            retry_duration_hint: None,
        }
    }

    /// Constructs a new `ResourceTemporarilyUnavailableError` from a specified source error with
    /// a retry duration hint.
    pub fn from_source_with_hint(
        source: Box<dyn error::Error + Send>,
        retry_duration_hint: Duration,
    ) -> Self {
        Self {
            source,
            retry_duration_hint: Some(retry_duration_hint),
        }
    }

    /// Returns the duration which the underlying library suggests waiting before trying again.
    pub fn retry_duration_hint(&self) -> Option<Duration> {
        self.retry_duration_hint
    }
}

impl error::Error for ResourceTemporarilyUnavailableError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&*self.source)
    }
}

impl fmt::Display for ResourceTemporarilyUnavailableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
