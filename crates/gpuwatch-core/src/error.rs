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

//! The status taxonomy reported by every fetch and counter operation.

use serde::{Deserialize, Serialize};

/// A convenience alias for results whose failure is a [`FetchError`].
pub type FetchResult<T> = Result<T, FetchError>;

/// The failure kinds surfaced by the fetch engine.
///
/// Native hardware codes are translated into this set exactly once, at the
/// hardware boundary (see [`crate::status`]). Success is the `Ok` side of a
/// [`FetchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum FetchError {
    /// An argument or output target was invalid.
    #[error("bad parameter")]
    BadParameter,
    /// The field is not recognised, or the hardware lacks the capability.
    #[error("not supported")]
    NotSupported,
    /// The requested object does not exist.
    #[error("not found")]
    NotFound,
    /// No free counter slot, or an allocation failed.
    #[error("insufficient resources")]
    InsufficientResources,
    /// The hardware layer hit a file access problem.
    #[error("file error")]
    FileError,
    /// The hardware reported that no data is available.
    #[error("no data")]
    NoData,
    /// The caller lacks permission for the hardware operation.
    #[error("permission denied")]
    PermissionError,
    /// A counter is already active for the resolved raw field.
    #[error("already exists")]
    AlreadyExists,
    /// Catch-all for native codes without a dedicated mapping.
    #[error("unknown error")]
    UnknownError,
    /// A fetch completed but its value carries a failure status.
    #[error("hardware query failed")]
    HardwareQueryError,
}
