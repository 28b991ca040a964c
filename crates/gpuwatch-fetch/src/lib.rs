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

//! # GPUWatch Fetch
//!
//! The metric-acquisition engine. [`MetricFetcher`] classifies each requested
//! field and either queries the hardware directly, reads a performance counter
//! through the [`CounterRegistry`], or serves the [`FieldCache`] while the
//! refresh worker revalidates expired entries in the background.

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod counters;
pub mod error;
pub mod fetcher;
pub mod stats;
mod worker;

pub use cache::{CacheEntry, FieldCache, Freshness};
pub use config::FetcherConfig;
pub use counters::CounterRegistry;
pub use error::EngineError;
pub use fetcher::{derived_rate, MetricFetcher};
pub use stats::{FetchStats, FetchStatsSnapshot};
