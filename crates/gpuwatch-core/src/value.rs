// Copyright 2025 eraflo
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

//! Field values as returned by the fetch engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchResult};
use crate::field::FieldId;

/// Longest text value kept, in bytes.
pub const MAX_TEXT_LEN: usize = 256;

/// The payload of a fetched field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldData {
    /// An integer quantity.
    Integer(i64),
    /// A floating-point quantity.
    Double(f64),
    /// A short text value (at most [`MAX_TEXT_LEN`] bytes).
    Text(String),
}

impl FieldData {
    /// Builds a text payload, truncating on a char boundary if needed.
    pub fn text(value: impl Into<String>) -> Self {
        let mut value = value.into();
        if value.len() > MAX_TEXT_LEN {
            let mut cut = MAX_TEXT_LEN;
            while !value.is_char_boundary(cut) {
                cut -= 1;
            }
            value.truncate(cut);
        }
        FieldData::Text(value)
    }

    /// The integer payload, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldData::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The float payload, if this is one.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            FieldData::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// The text payload, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldData::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldData::Integer(v) => write!(f, "{v}"),
            FieldData::Double(v) => write!(f, "{v}"),
            FieldData::Text(v) => f.write_str(v),
        }
    }
}

impl Default for FieldData {
    fn default() -> Self {
        FieldData::Integer(0)
    }
}

/// One fetch result.
///
/// A value is produced fresh by every fetch; once stored in the cache it is
/// only ever replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// The field that was requested.
    pub field: FieldId,
    /// Translated status of the fetch.
    pub status: FetchResult<()>,
    /// Capture time, in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// The payload. Meaningful only when `status` is `Ok`.
    pub data: FieldData,
    /// Set when the fetch queued a background refresh. Not an error.
    pub refresh_pending: bool,
}

impl FieldValue {
    /// An empty value with `NotSupported` status, the state of a field that
    /// has never been populated.
    pub fn unpopulated(field: FieldId, timestamp_ms: u64) -> Self {
        Self {
            field,
            status: Err(FetchError::NotSupported),
            timestamp_ms,
            data: FieldData::default(),
            refresh_pending: false,
        }
    }

    /// A successful value.
    pub fn ok(field: FieldId, timestamp_ms: u64, data: FieldData) -> Self {
        Self {
            field,
            status: Ok(()),
            timestamp_ms,
            data,
            refresh_pending: false,
        }
    }

    /// Whether the status is `Ok`.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// The integer payload of a successful value.
    pub fn integer(&self) -> Option<i64> {
        self.status.ok().and_then(|_| self.data.as_integer())
    }
}
