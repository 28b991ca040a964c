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

//! Lock-free fetch statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running totals describing how fetches were served.
#[derive(Debug, Default)]
pub struct FetchStats {
    fetches: AtomicU64,
    cache_hits: AtomicU64,
    refreshes_enqueued: AtomicU64,
    refreshes_executed: AtomicU64,
    refreshes_skipped: AtomicU64,
    hardware_failures: AtomicU64,
    last_latency_ms: AtomicU64,
}

/// A point-in-time copy of [`FetchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStatsSnapshot {
    /// Calls to `fetch`.
    pub fetches: u64,
    /// Cached-async fetches answered from a fresh entry.
    pub cache_hits: u64,
    /// Refresh tasks pushed onto the worker queue.
    pub refreshes_enqueued: u64,
    /// Refresh tasks that issued a hardware call.
    pub refreshes_executed: u64,
    /// Refresh tasks dropped because the entry was already fresh.
    pub refreshes_skipped: u64,
    /// Fetches that ended with a genuine failure status.
    pub hardware_failures: u64,
    /// Latency of the most recent fetch.
    pub last_latency_ms: u64,
}

impl FetchStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueued(&self) {
        self.refreshes_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_executed(&self) {
        self.refreshes_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.hardware_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_latency(&self, latency_ms: u64) {
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    /// Copies the current totals.
    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            refreshes_enqueued: self.refreshes_enqueued.load(Ordering::Relaxed),
            refreshes_executed: self.refreshes_executed.load(Ordering::Relaxed),
            refreshes_skipped: self.refreshes_skipped.load(Ordering::Relaxed),
            hardware_failures: self.hardware_failures.load(Ordering::Relaxed),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let stats = FetchStats::new();
        stats.record_fetch();
        stats.record_fetch();
        stats.record_cache_hit();
        stats.record_enqueued();
        stats.record_skipped();
        stats.record_latency(7);

        let snap = stats.snapshot();
        assert_eq!(snap.fetches, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.refreshes_enqueued, 1);
        assert_eq!(snap.refreshes_executed, 0);
        assert_eq!(snap.refreshes_skipped, 1);
        assert_eq!(snap.last_latency_ms, 7);
    }
}
