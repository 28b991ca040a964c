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

//! # GPUWatch Core
//!
//! Foundational crate containing the field table, value types, the hardware
//! capability contract and the status taxonomy shared by the fetch engine and
//! its backends.

#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod field;
pub mod hardware;
pub mod status;
pub mod value;

pub use clock::{Clock, SystemClock};
pub use error::{FetchError, FetchResult};
pub use field::{FieldId, FieldKey, FieldKind};
pub use hardware::{DeviceQuery, HwResult, HwStatus};
pub use value::{FieldData, FieldValue};
