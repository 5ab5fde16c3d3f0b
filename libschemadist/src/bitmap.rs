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

//! Fixed-size bitmap of front-end node ids.
//!
//! The same representation is used for the subscriber bitmaps kept per data shard and for the
//! legacy "lock" column of the coordination table, where it is stored as little-endian 32-bit
//! words.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::cluster::NodeId;
use crate::error::InvalidArgumentError;

/// Highest node id (exclusive) that can be represented.
pub const MAX_NODES: u32 = 256;

const WORDS: usize = (MAX_NODES / 32) as usize;

/// Number of bytes used when a bitmap is stored in a table column.
pub const NODE_BITMAP_BYTES: usize = WORDS * 4;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeBitmap {
    words: [u32; WORDS],
}

impl NodeBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bitmap with every node set, as written by a client starting a legacy operation.
    pub fn all_ones() -> Self {
        NodeBitmap {
            words: [u32::MAX; WORDS],
        }
    }

    pub fn from_nodes<I: IntoIterator<Item = NodeId>>(nodes: I) -> Self {
        let mut bitmap = Self::new();
        for node in nodes {
            bitmap.set(node);
        }
        bitmap
    }

    pub fn set(&mut self, node: NodeId) {
        if node < MAX_NODES {
            self.words[(node / 32) as usize] |= 1 << (node % 32);
        }
    }

    pub fn clear(&mut self, node: NodeId) {
        if node < MAX_NODES {
            self.words[(node / 32) as usize] &= !(1 << (node % 32));
        }
    }

    pub fn is_set(&self, node: NodeId) -> bool {
        node < MAX_NODES && self.words[(node / 32) as usize] & (1 << (node % 32)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn count(&self) -> u32 {
        self.words.iter().map(|word| word.count_ones()).sum()
    }

    pub fn union(&self, other: &NodeBitmap) -> NodeBitmap {
        let mut words = self.words;
        for (word, other) in words.iter_mut().zip(other.words.iter()) {
            *word |= *other;
        }
        NodeBitmap { words }
    }

    /// Iterates over the set node ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..MAX_NODES).filter(move |node| self.is_set(*node))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NODE_BITMAP_BYTES);
        for word in self.words.iter() {
            // writing into a Vec cannot fail
            let _ = bytes.write_u32::<LittleEndian>(*word);
        }
        bytes
    }

    /// Decodes a bitmap column value. Shorter values leave the remaining nodes unset; bytes
    /// beyond `NODE_BITMAP_BYTES` are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidArgumentError> {
        if bytes.len() % 4 != 0 {
            return Err(InvalidArgumentError::new(
                "bytes".into(),
                format!("bitmap length {} is not a multiple of 4", bytes.len()),
            ));
        }

        let mut bitmap = Self::new();
        let mut cursor = Cursor::new(bytes);
        for word in bitmap.words.iter_mut().take(bytes.len() / 4) {
            *word = cursor.read_u32::<LittleEndian>().map_err(|err| {
                InvalidArgumentError::new("bytes".into(), format!("unreadable bitmap: {}", err))
            })?;
        }
        Ok(bitmap)
    }
}

impl fmt::Debug for NodeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for NodeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let nodes = self
            .iter()
            .map(|node| node.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "[{}]", nodes)
    }
}
