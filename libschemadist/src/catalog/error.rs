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

use crate::error::InternalError;

#[derive(Debug)]
pub enum CatalogError {
    NotFound(String),
    AlreadyExists(String),
    /// A metadata lock could not be acquired within the wait timeout.
    LockTimeout(String),
    InternalError(InternalError),
}

impl Error for CatalogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CatalogError::InternalError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CatalogError::NotFound(msg) => write!(f, "not found: {}", msg),
            CatalogError::AlreadyExists(msg) => write!(f, "already exists: {}", msg),
            CatalogError::LockTimeout(msg) => write!(f, "lock wait timeout: {}", msg),
            CatalogError::InternalError(err) => write!(f, "{}", err),
        }
    }
}

impl From<InternalError> for CatalogError {
    fn from(err: InternalError) -> Self {
        CatalogError::InternalError(err)
    }
}
