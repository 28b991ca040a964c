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

//! Engine-level failures that are not fetch statuses.

use std::path::PathBuf;

/// Errors raised while setting up or running the fetch engine itself.
///
/// Per-field failures are never reported here; they travel inside
/// [`gpuwatch_core::FieldValue::status`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The refresh worker thread could not be spawned.
    #[error("failed to spawn refresh worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
    /// A configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    ConfigIo {
        /// The file that failed to load.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration text was not valid RON for [`crate::FetcherConfig`].
    #[error("invalid config: {0}")]
    ConfigParse(#[from] ron::error::SpannedError),
}
