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

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::cluster::{TableDef, TableName};
use crate::error::InternalError;

use super::{CatalogError, LocalCatalog, MdlKey, MdlTicket, MetadataLocks};

#[derive(Default)]
struct CatalogState {
    tables: BTreeMap<TableName, TableDef>,
    databases: BTreeMap<String, String>,
    tablespaces: BTreeMap<String, (u32, u32)>,
    logfile_groups: BTreeMap<String, (u32, u32)>,
    acl_statements: Vec<String>,
    acl_refreshes: Vec<String>,
}

impl CatalogState {
    fn ensure_database(&mut self, db: &str) {
        if !self.databases.contains_key(db) {
            self.databases.insert(db.to_string(), String::new());
        }
    }
}

#[derive(Default)]
struct LockState {
    held: HashMap<MdlKey, u64>,
    next_id: u64,
}

/// An in-memory catalog and metadata lock manager for one node.
///
/// Clones share the same catalog, so tests can keep a handle to inspect what a node applied.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
    locks: Arc<(Mutex<LockState>, Condvar)>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> Result<MutexGuard<CatalogState>, CatalogError> {
        self.state.lock().map_err(|_| {
            CatalogError::InternalError(InternalError::with_message(
                "catalog state lock was poisoned".into(),
            ))
        })
    }

    pub fn tablespace(&self, name: &str) -> Option<(u32, u32)> {
        mutex_lock_unwrap!(self.state).tablespaces.get(name).copied()
    }

    pub fn logfile_group(&self, name: &str) -> Option<(u32, u32)> {
        mutex_lock_unwrap!(self.state)
            .logfile_groups
            .get(name)
            .copied()
    }

    /// The statement a database was last created or altered with.
    pub fn database_statement(&self, db: &str) -> Option<String> {
        mutex_lock_unwrap!(self.state).databases.get(db).cloned()
    }

    pub fn acl_statements(&self) -> Vec<String> {
        mutex_lock_unwrap!(self.state).acl_statements.clone()
    }

    pub fn acl_refreshes(&self) -> Vec<String> {
        mutex_lock_unwrap!(self.state).acl_refreshes.clone()
    }
}

impl LocalCatalog for MemoryCatalog {
    fn install_table(&self, def: &TableDef) -> Result<(), CatalogError> {
        let mut state = self.lock_state()?;
        state.ensure_database(def.name().db());
        state.tables.insert(def.name().clone(), def.clone());
        Ok(())
    }

    fn remove_table(&self, table: &TableName) -> Result<bool, CatalogError> {
        Ok(self.lock_state()?.tables.remove(table).is_some())
    }

    fn rename_table(&self, from: &TableName, to: &TableName) -> Result<(), CatalogError> {
        let mut state = self.lock_state()?;
        if state.tables.contains_key(to) {
            return Err(CatalogError::AlreadyExists(format!("table {}", to)));
        }
        let def = state
            .tables
            .remove(from)
            .ok_or_else(|| CatalogError::NotFound(format!("table {}", from)))?;
        state.ensure_database(to.db());
        state.tables.insert(to.clone(), def.renamed(to.clone()));
        Ok(())
    }

    fn get_table(&self, table: &TableName) -> Result<Option<TableDef>, CatalogError> {
        Ok(self.lock_state()?.tables.get(table).cloned())
    }

    fn list_tables(&self) -> Result<Vec<TableDef>, CatalogError> {
        Ok(self.lock_state()?.tables.values().cloned().collect())
    }

    fn create_database(&self, db: &str, statement: &str) -> Result<(), CatalogError> {
        self.lock_state()?
            .databases
            .insert(db.to_string(), statement.to_string());
        Ok(())
    }

    fn alter_database(&self, db: &str, statement: &str) -> Result<(), CatalogError> {
        let mut state = self.lock_state()?;
        match state.databases.get_mut(db) {
            Some(current) => {
                *current = statement.to_string();
                Ok(())
            }
            None => Err(CatalogError::NotFound(format!("database {}", db))),
        }
    }

    fn drop_database(&self, db: &str) -> Result<bool, CatalogError> {
        let mut state = self.lock_state()?;
        state.tables.retain(|name, _| name.db() != db);
        Ok(state.databases.remove(db).is_some())
    }

    fn has_database(&self, db: &str) -> Result<bool, CatalogError> {
        Ok(self.lock_state()?.databases.contains_key(db))
    }

    fn install_tablespace(&self, name: &str, id: u32, version: u32) -> Result<(), CatalogError> {
        self.lock_state()?
            .tablespaces
            .insert(name.to_string(), (id, version));
        Ok(())
    }

    fn remove_tablespace(&self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.lock_state()?.tablespaces.remove(name).is_some())
    }

    fn install_logfile_group(
        &self,
        name: &str,
        id: u32,
        version: u32,
    ) -> Result<(), CatalogError> {
        self.lock_state()?
            .logfile_groups
            .insert(name.to_string(), (id, version));
        Ok(())
    }

    fn remove_logfile_group(&self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.lock_state()?.logfile_groups.remove(name).is_some())
    }

    fn apply_acl_statement(&self, statement: &str) -> Result<(), CatalogError> {
        self.lock_state()?
            .acl_statements
            .push(statement.to_string());
        Ok(())
    }

    fn refresh_acl_snapshot(&self, users: &[String]) -> Result<(), CatalogError> {
        self.lock_state()?.acl_refreshes.extend_from_slice(users);
        Ok(())
    }
}

impl MetadataLocks for MemoryCatalog {
    fn lock_exclusive(&self, key: &MdlKey, timeout: Duration) -> Result<MdlTicket, CatalogError> {
        let (lock, condvar) = &*self.locks;
        let poisoned = || {
            CatalogError::InternalError(InternalError::with_message(
                "metadata lock state was poisoned".into(),
            ))
        };

        let deadline = Instant::now() + timeout;
        let mut state = lock.lock().map_err(|_| poisoned())?;
        while state.held.contains_key(key) {
            let now = Instant::now();
            if now >= deadline {
                return Err(CatalogError::LockTimeout(key.to_string()));
            }
            let (guard, _) = condvar
                .wait_timeout(state, deadline - now)
                .map_err(|_| poisoned())?;
            state = guard;
        }

        state.next_id += 1;
        let id = state.next_id;
        state.held.insert(key.clone(), id);
        Ok(MdlTicket::new(key.clone(), id))
    }

    fn release(&self, ticket: MdlTicket) {
        let (lock, condvar) = &*self.locks;
        let mut state = mutex_lock_unwrap!(lock);
        if state.held.get(ticket.key()) == Some(&ticket.id()) {
            state.held.remove(ticket.key());
        }
        condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use crate::cluster::{ColumnDef, ColumnType};

    fn table(db: &str, name: &str) -> TableDef {
        TableDef::builder()
            .with_name(TableName::new(db, name))
            .with_id(3)
            .with_version(1)
            .with_column(ColumnDef::new("id", ColumnType::UInt))
            .with_primary_key(&["id"])
            .build()
            .expect("Unable to build table")
    }

    /// Verifies table install, rename and removal, including the implicit database.
    #[test]
    fn test_tables() {
        let catalog = MemoryCatalog::new();
        let def = table("s1", "t1");
        catalog.install_table(&def).expect("Unable to install");
        assert!(catalog.has_database("s1").unwrap());

        let renamed = TableName::new("s2", "t2");
        catalog
            .rename_table(def.name(), &renamed)
            .expect("Unable to rename");
        assert_eq!(catalog.get_table(def.name()).unwrap(), None);
        assert_eq!(
            catalog.get_table(&renamed).unwrap().map(|t| t.name().clone()),
            Some(renamed.clone())
        );
        assert!(matches!(
            catalog.rename_table(def.name(), &renamed),
            Err(CatalogError::AlreadyExists(_))
        ));

        assert!(catalog.remove_table(&renamed).unwrap());
        assert!(!catalog.remove_table(&renamed).unwrap());
    }

    /// Verifies that dropping a database removes its tables.
    #[test]
    fn test_drop_database() {
        let catalog = MemoryCatalog::new();
        catalog.install_table(&table("s1", "a")).unwrap();
        catalog.install_table(&table("s2", "b")).unwrap();

        assert!(catalog.drop_database("s1").unwrap());
        let names: Vec<TableName> = catalog
            .list_tables()
            .unwrap()
            .into_iter()
            .map(|t| t.name().clone())
            .collect();
        assert_eq!(names, vec![TableName::new("s2", "b")]);
        assert!(catalog.alter_database("s1", "ALTER").is_err());
    }

    /// Verifies that an exclusive lock blocks a second locker until released, and that a
    /// locker gives up after its timeout.
    #[test]
    fn test_exclusive_locks() {
        let catalog = MemoryCatalog::new();
        let key = MdlKey::Table(TableName::new("s1", "t1"));

        let ticket = catalog
            .lock_exclusive(&key, Duration::from_millis(10))
            .expect("Unable to lock");
        assert!(matches!(
            catalog.lock_exclusive(&key, Duration::from_millis(20)),
            Err(CatalogError::LockTimeout(_))
        ));

        let other = catalog.clone();
        let waiter_key = key.clone();
        let waiter = thread::spawn(move || {
            other
                .lock_exclusive(&waiter_key, Duration::from_secs(5))
                .is_ok()
        });
        thread::sleep(Duration::from_millis(20));
        catalog.release(ticket);
        assert!(waiter.join().expect("Waiter panicked"));
    }
}
