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

//! Configuration for the fetch engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Configuration for a [`crate::MetricFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// How long a cached PCIe throughput sample stays fresh.
    pub pcie_cache_ttl_ms: u64,
    /// Name given to the refresh worker thread.
    pub worker_thread_name: String,
    /// Whether shutdown tears down every live counter handle.
    pub release_counters_on_shutdown: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            pcie_cache_ttl_ms: 30_000,
            worker_thread_name: "gpuwatch-refresh".to_string(),
            release_counters_on_shutdown: true,
        }
    }
}

impl FetcherConfig {
    /// Parses a configuration from RON text. Missing fields take their defaults.
    pub fn from_ron_str(text: &str) -> Result<Self, EngineError> {
        Ok(ron::from_str(text)?)
    }

    /// Loads a configuration from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_ron_str(&text)?;
        log::info!("Loaded fetcher config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_struct_takes_defaults() {
        let config = FetcherConfig::from_ron_str("()").unwrap();
        assert_eq!(config, FetcherConfig::default());
    }

    #[test]
    fn partial_config_overrides_named_fields() {
        let config = FetcherConfig::from_ron_str("(pcie_cache_ttl_ms: 500)").unwrap();
        assert_eq!(config.pcie_cache_ttl_ms, 500);
        assert_eq!(config.worker_thread_name, "gpuwatch-refresh");
        assert!(config.release_counters_on_shutdown);
    }

    #[test]
    fn malformed_text_is_a_parse_error() {
        let err = FetcherConfig::from_ron_str("(pcie_cache_ttl_ms: \"soon\")").unwrap_err();
        assert!(matches!(err, EngineError::ConfigParse(_)));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = FetcherConfig::load("/definitely/not/here.ron").unwrap_err();
        match err {
            EngineError::ConfigIo { path, .. } => {
                assert_eq!(path, Path::new("/definitely/not/here.ron"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
