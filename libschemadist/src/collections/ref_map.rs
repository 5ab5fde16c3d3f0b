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

//! A data structure for reference counting a set of keys.
//!
//! A key can be added to `RefMap` with `add_ref`; each call to `add_ref` will increment the
//! internal reference count associated with the key given. When `remove_ref` is called, the
//! reference count is decremented. If a reference count reaches zero, then the key is removed and
//! handed back to the caller so that it can release whatever the key was guarding.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use super::error::RefMapRemoveError;

/// A map that will keep track of the number of times a key has been added, and only remove the
/// key once the reference count is 0.
pub struct RefMap<K: Hash + Eq> {
    // key to reference count
    references: HashMap<K, u64>,
}

impl<K> RefMap<K>
where
    K: Hash + Eq + Clone + Debug,
{
    /// Create a new `RefMap`
    pub fn new() -> Self {
        RefMap {
            references: HashMap::new(),
        }
    }

    /// Increments the reference count for `key`
    ///
    /// If `key` does not already exist, it will be added.
    pub fn add_ref(&mut self, key: K) -> u64 {
        let ref_count = self.references.entry(key).or_insert(0);
        *ref_count += 1;
        *ref_count
    }

    /// Decrements the reference count for `key`
    ///
    /// If the internal reference count reaches zero, then `key` will be removed and returned.
    pub fn remove_ref(&mut self, key: &K) -> Result<Option<K>, RefMapRemoveError> {
        let ref_count = match self.references.remove(key) {
            Some(ref_count) => ref_count,
            None => {
                return Err(RefMapRemoveError(format!(
                    "Trying to remove a reference that does not exist: {:?}",
                    key
                )))
            }
        };

        if ref_count == 1 {
            Ok(Some(key.clone()))
        } else {
            self.references.insert(key.clone(), ref_count - 1);
            Ok(None)
        }
    }
}

impl<K> Default for RefMap<K>
where
    K: Hash + Eq + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
