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

//! The "any value" tag carried by every cluster operation.
//!
//! Each write to the storage cluster carries an opaque 32-bit tag which is delivered unchanged
//! with the resulting row event. The tag tells the receiving nodes where the change came from
//! and whether it should be written to the replication log. The raw value is decoded exactly
//! once, when the event leaves the event stream, into an [`AnyValue`].
//!
//! Layout of the raw value:
//!
//! * bit 31 set: reserved operation; the low byte selects which one
//! * bit 30 set: the change was applied by a replica applier on behalf of the server id in the
//!   low 30 bits
//! * otherwise the low 30 bits hold the originating server id (zero means unspecified)

const RESERVED_BIT: u32 = 0x8000_0000;
const REPLICATED_BIT: u32 = 0x4000_0000;
const SERVER_ID_MASK: u32 = 0x3FFF_FFFF;
const RESERVED_CODE_MASK: u32 = 0x0000_00FF;

const NO_LOGGING_CODE: u32 = 0x7f;
const REFLECT_CODE: u32 = 0x65;
const REFRESH_CODE: u32 = 0x66;
const READ_CODE: u32 = 0x67;

/// Largest server id that can be carried in the tag.
pub const MAX_SERVER_ID: u32 = SERVER_ID_MASK;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnyValue {
    /// No tag was set; the change is attributed to the local server.
    Unspecified,
    /// The change was made by a client of the given server.
    Origin { server_id: u32 },
    /// The change was applied by a replica applier; `server_id` is the upstream origin.
    Replicated { server_id: u32 },
    /// The change must not be written to any replication log.
    NoLogging,
    /// Reflected operation used by conflict detection; never logged.
    Reflect,
    /// Refresh of a row used by conflict detection; logged as a local change.
    Refresh,
    /// Read tracking operation; never logged.
    Read,
    /// A reserved value this version does not know about.
    Reserved(u32),
}

impl AnyValue {
    pub fn decode(raw: u32) -> Self {
        if raw & RESERVED_BIT != 0 {
            match raw & RESERVED_CODE_MASK {
                NO_LOGGING_CODE => AnyValue::NoLogging,
                REFLECT_CODE => AnyValue::Reflect,
                REFRESH_CODE => AnyValue::Refresh,
                READ_CODE => AnyValue::Read,
                _ => AnyValue::Reserved(raw),
            }
        } else if raw == 0 {
            AnyValue::Unspecified
        } else if raw & REPLICATED_BIT != 0 {
            AnyValue::Replicated {
                server_id: raw & SERVER_ID_MASK,
            }
        } else {
            AnyValue::Origin {
                server_id: raw & SERVER_ID_MASK,
            }
        }
    }

    pub fn encode(&self) -> u32 {
        match self {
            AnyValue::Unspecified => 0,
            AnyValue::Origin { server_id } => server_id & SERVER_ID_MASK,
            AnyValue::Replicated { server_id } => REPLICATED_BIT | (server_id & SERVER_ID_MASK),
            AnyValue::NoLogging => RESERVED_BIT | NO_LOGGING_CODE,
            AnyValue::Reflect => RESERVED_BIT | REFLECT_CODE,
            AnyValue::Refresh => RESERVED_BIT | REFRESH_CODE,
            AnyValue::Read => RESERVED_BIT | READ_CODE,
            AnyValue::Reserved(raw) => *raw,
        }
    }

    /// Returns the server id the change should be attributed to in the replication log, or
    /// `None` if the change must not be logged at all.
    ///
    /// `local_server_id` is used for untagged and refresh changes; replicated changes are only
    /// logged when `log_replica_updates` is enabled.
    pub fn logging_server_id(&self, local_server_id: u32, log_replica_updates: bool) -> Option<u32> {
        match self {
            AnyValue::Unspecified | AnyValue::Refresh => Some(local_server_id),
            AnyValue::Origin { server_id } => Some(*server_id),
            AnyValue::Replicated { server_id } if log_replica_updates => Some(*server_id),
            AnyValue::Replicated { .. } => None,
            AnyValue::NoLogging | AnyValue::Reflect | AnyValue::Read | AnyValue::Reserved(_) => {
                None
            }
        }
    }
}

impl Default for AnyValue {
    fn default() -> Self {
        AnyValue::Unspecified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies that every kind of tag decodes to the variant it was encoded from.
    #[test]
    fn test_decode_encoded() {
        let values = vec![
            AnyValue::Unspecified,
            AnyValue::Origin { server_id: 12 },
            AnyValue::Replicated { server_id: 99 },
            AnyValue::NoLogging,
            AnyValue::Reflect,
            AnyValue::Refresh,
            AnyValue::Read,
        ];

        for value in values {
            assert_eq!(AnyValue::decode(value.encode()), value);
        }
    }

    /// Verifies the raw layout of the reserved codes and that unknown reserved codes are kept.
    #[test]
    fn test_reserved_layout() {
        assert_eq!(AnyValue::NoLogging.encode(), 0x8000_007f);
        assert_eq!(AnyValue::decode(0x8000_0001), AnyValue::Reserved(0x8000_0001));
        assert_eq!(
            AnyValue::decode(0x4000_0005),
            AnyValue::Replicated { server_id: 5 }
        );
    }

    /// Verifies which tags are logged and under which server id.
    #[test]
    fn test_logging_server_id() {
        assert_eq!(AnyValue::Unspecified.logging_server_id(7, false), Some(7));
        assert_eq!(
            AnyValue::Origin { server_id: 3 }.logging_server_id(7, false),
            Some(3)
        );
        assert_eq!(
            AnyValue::Replicated { server_id: 3 }.logging_server_id(7, false),
            None
        );
        assert_eq!(
            AnyValue::Replicated { server_id: 3 }.logging_server_id(7, true),
            Some(3)
        );
        assert_eq!(AnyValue::NoLogging.logging_server_id(7, true), None);
        assert_eq!(AnyValue::Read.logging_server_id(7, true), None);
        assert_eq!(AnyValue::Refresh.logging_server_id(7, false), Some(7));
    }
}
