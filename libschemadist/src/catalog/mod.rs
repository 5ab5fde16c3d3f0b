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

//! The node-local metadata catalog and its metadata locks.
//!
//! Every front-end node keeps its own copy of the schema. Participants apply distributed schema
//! operations to it through [`LocalCatalog`], holding an exclusive metadata lock from
//! [`MetadataLocks`] on the affected object while doing so.

mod error;
#[cfg(feature = "memory")]
mod memory;

use std::fmt;
use std::time::Duration;

use crate::cluster::{TableDef, TableName};

pub use self::error::CatalogError;
#[cfg(feature = "memory")]
pub use self::memory::MemoryCatalog;

/// An object a metadata lock can be taken on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MdlKey {
    Table(TableName),
    Schema(String),
    Tablespace(String),
    LogfileGroup(String),
    Acl,
}

impl fmt::Display for MdlKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MdlKey::Table(table) => write!(f, "table {}", table),
            MdlKey::Schema(db) => write!(f, "schema {}", db),
            MdlKey::Tablespace(name) => write!(f, "tablespace {}", name),
            MdlKey::LogfileGroup(name) => write!(f, "logfile group {}", name),
            MdlKey::Acl => f.write_str("acl"),
        }
    }
}

/// Proof of a held metadata lock, returned to `MetadataLocks::release`.
#[derive(Debug, PartialEq, Eq)]
pub struct MdlTicket {
    key: MdlKey,
    id: u64,
}

impl MdlTicket {
    pub fn new(key: MdlKey, id: u64) -> Self {
        MdlTicket { key, id }
    }

    pub fn key(&self) -> &MdlKey {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Exclusive metadata locks of one node.
pub trait MetadataLocks: Send + Sync {
    /// Takes an exclusive lock on `key`, waiting at most `timeout` for current holders.
    fn lock_exclusive(&self, key: &MdlKey, timeout: Duration) -> Result<MdlTicket, CatalogError>;

    fn release(&self, ticket: MdlTicket);
}

/// The local copy of the schema kept by one node.
pub trait LocalCatalog: Send + Sync {
    /// Installs `def`, replacing any table of the same name.
    fn install_table(&self, def: &TableDef) -> Result<(), CatalogError>;

    /// Removes a table; returns false if it was not installed.
    fn remove_table(&self, table: &TableName) -> Result<bool, CatalogError>;

    fn rename_table(&self, from: &TableName, to: &TableName) -> Result<(), CatalogError>;

    fn get_table(&self, table: &TableName) -> Result<Option<TableDef>, CatalogError>;

    fn list_tables(&self) -> Result<Vec<TableDef>, CatalogError>;

    /// Creates a database, or replaces the options of an existing one.
    fn create_database(&self, db: &str, statement: &str) -> Result<(), CatalogError>;

    fn alter_database(&self, db: &str, statement: &str) -> Result<(), CatalogError>;

    /// Drops a database and every table in it; returns false if it did not exist.
    fn drop_database(&self, db: &str) -> Result<bool, CatalogError>;

    fn has_database(&self, db: &str) -> Result<bool, CatalogError>;

    fn install_tablespace(&self, name: &str, id: u32, version: u32) -> Result<(), CatalogError>;

    fn remove_tablespace(&self, name: &str) -> Result<bool, CatalogError>;

    fn install_logfile_group(&self, name: &str, id: u32, version: u32)
        -> Result<(), CatalogError>;

    fn remove_logfile_group(&self, name: &str) -> Result<bool, CatalogError>;

    /// Applies an access control statement executed on another node.
    fn apply_acl_statement(&self, statement: &str) -> Result<(), CatalogError>;

    /// Reloads the privileges of the given users from the shared privilege tables.
    fn refresh_acl_snapshot(&self, users: &[String]) -> Result<(), CatalogError>;
}
