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

//! The public fetch entry point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use gpuwatch_core::field::{AsyncQuery, EccTotal, InstantQuery};
use gpuwatch_core::hardware::{CounterReading, GpuBlock};
use gpuwatch_core::{
    Clock, DeviceQuery, FetchError, FetchResult, FieldData, FieldId, FieldKey, FieldKind,
    FieldValue, HwResult, HwStatus, SystemClock,
};

use crate::cache::{FieldCache, Freshness};
use crate::config::FetcherConfig;
use crate::counters::CounterRegistry;
use crate::error::EngineError;
use crate::stats::{FetchStats, FetchStatsSnapshot};
use crate::worker::{self, Refresher};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Rate derived from an accumulated count: `(value * scale) / running_seconds`.
///
/// A zero running window yields zero.
pub fn derived_rate(reading: &CounterReading, scale: u64) -> i64 {
    if reading.time_running_ns == 0 {
        return 0;
    }
    let seconds = reading.time_running_ns as f64 / NANOS_PER_SEC;
    (reading.value as f64 * scale as f64 / seconds) as i64
}

/// Converts an unsigned hardware quantity, clamping at `i64::MAX`.
pub(crate) fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// How a fetch was served, before it becomes a [`FieldValue`].
enum Served {
    Hardware(HwResult<FieldData>),
    Cached(FieldValue),
}

/// Fetches field values, choosing per field between a direct hardware query,
/// a counter read, or the stale-while-revalidate cache.
///
/// The refresh worker is started explicitly with [`start`](Self::start) and
/// stopped with [`shutdown`](Self::shutdown); both are idempotent and dropping
/// the fetcher shuts it down.
#[derive(Debug)]
pub struct MetricFetcher {
    hw: Arc<dyn DeviceQuery>,
    clock: Arc<dyn Clock>,
    config: FetcherConfig,
    cache: Arc<FieldCache>,
    counters: CounterRegistry,
    stats: Arc<FetchStats>,
    refresher: Arc<Refresher>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MetricFetcher {
    /// Creates a fetcher on the system clock. The worker is not started.
    pub fn new(hw: Arc<dyn DeviceQuery>, config: FetcherConfig) -> Self {
        Self::with_clock(hw, Arc::new(SystemClock), config)
    }

    /// Creates a fetcher with an explicit clock.
    pub fn with_clock(hw: Arc<dyn DeviceQuery>, clock: Arc<dyn Clock>, config: FetcherConfig) -> Self {
        let cache = Arc::new(FieldCache::new());
        let stats = Arc::new(FetchStats::new());
        let refresher = Arc::new(Refresher {
            cache: Arc::clone(&cache),
            hw: Arc::clone(&hw),
            clock: Arc::clone(&clock),
            stats: Arc::clone(&stats),
            pcie_ttl_ms: config.pcie_cache_ttl_ms,
        });
        Self {
            counters: CounterRegistry::new(Arc::clone(&hw)),
            hw,
            clock,
            config,
            cache,
            stats,
            refresher,
            worker: Mutex::new(None),
        }
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the refresh worker. Does nothing if it is already running.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut slot = self.worker_slot();
        if slot.is_some() {
            return Ok(());
        }
        let handle = worker::spawn(&self.config.worker_thread_name, Arc::clone(&self.refresher))?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stops the refresh worker and discards queued refreshes.
    ///
    /// The worker finishes the task it is executing, if any. Safe to call any
    /// number of times.
    pub fn shutdown(&self) {
        // The cache is stopped under the slot lock; `start` cannot interleave.
        let handle = {
            let mut slot = self.worker_slot();
            let discarded = self.cache.stop();
            if discarded > 0 {
                log::debug!("Discarded {discarded} queued refresh(es) at shutdown");
            }
            slot.take()
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Refresh worker panicked");
            }
        }
        if self.config.release_counters_on_shutdown {
            self.counters.release_all();
        }
    }

    /// Whether the refresh worker is running.
    pub fn is_running(&self) -> bool {
        self.worker_slot().is_some()
    }

    /// Fetches one field. Never fails; the outcome is in the value's status.
    ///
    /// Unrecognised fields yield `NotSupported` without touching the hardware.
    pub fn fetch(&self, device: u32, field: FieldId) -> FieldValue {
        let started = self.clock.now_ms();
        self.stats.record_fetch();

        let Some(kind) = field.kind() else {
            let latency = self.clock.now_ms().saturating_sub(started);
            self.stats.record_latency(latency);
            self.stats.record_failure();
            log::error!(
                "Fail to fetch field {} which is not supported, latency {latency}",
                field.0
            );
            return FieldValue::unpopulated(field, started);
        };

        let key = FieldKey::new(device, field);
        let served = match kind {
            FieldKind::Instant(query) => Served::Hardware(self.read_instant(device, query)),
            FieldKind::Aggregate(total) => Served::Hardware(Ok(self.read_ecc_total(device, total))),
            FieldKind::Counter(_) => Served::Hardware(self.read_counter(key)),
            FieldKind::DerivedCounter { scale } => {
                Served::Hardware(self.read_derived_counter(key, scale))
            }
            FieldKind::CachedAsync(query) => Served::Cached(self.read_cached(key, query, started)),
        };

        let mut native = None;
        let value = match served {
            Served::Hardware(Ok(data)) => FieldValue::ok(field, started, data),
            Served::Hardware(Err(status)) => {
                native = Some(status);
                FieldValue {
                    status: Err(status.into()),
                    ..FieldValue::unpopulated(field, started)
                }
            }
            Served::Cached(value) => value,
        };

        let latency = self.clock.now_ms().saturating_sub(started);
        self.stats.record_latency(latency);
        match value.status {
            Ok(()) => log::debug!("Fetch {key}:{}, latency {latency}", value.data),
            Err(err) if value.refresh_pending => {
                log::debug!("Async fetch {key} ({err}), latency {latency}")
            }
            Err(err) => {
                self.stats.record_failure();
                match native {
                    Some(native) => log::error!(
                        "Fail to fetch {key} with native status {native}, latency {latency}"
                    ),
                    None => log::error!("Fail to fetch {key}: {err}, latency {latency}"),
                }
            }
        }
        value
    }

    /// Fetches one field using the daemon-facing convention: `NotSupported`
    /// for unrecognised fields, `HardwareQueryError` for any failed fetch.
    pub fn fetch_checked(&self, device: u32, field: FieldId) -> FetchResult<FieldValue> {
        if !field.is_supported() {
            return Err(FetchError::NotSupported);
        }
        let value = self.fetch(device, field);
        match value.status {
            Ok(()) => Ok(value),
            Err(_) => Err(FetchError::HardwareQueryError),
        }
    }

    /// Acquires the counter a field needs.
    ///
    /// Counter-backed fields go through the registry. Other recognised fields
    /// need no counter and succeed without effect.
    pub fn acquire_counter(&self, device: u32, field: FieldId) -> FetchResult<()> {
        match field.kind() {
            None => Err(FetchError::NotSupported),
            Some(kind) if kind.uses_counter() => self.counters.acquire(FieldKey::new(device, field)),
            Some(_) => Ok(()),
        }
    }

    /// Releases the counter stored under exactly `(device, field)`.
    pub fn release_counter(&self, device: u32, field: FieldId) -> FetchResult<()> {
        match field.kind() {
            Some(kind) if kind.uses_counter() => self.counters.release(FieldKey::new(device, field)),
            _ => Err(FetchError::NotSupported),
        }
    }

    /// The cached value for a key, without scheduling a refresh.
    pub fn cached_value(&self, key: FieldKey) -> Option<FieldValue> {
        self.cache.peek(key)
    }

    /// Number of refresh tasks waiting for the worker.
    pub fn pending_refreshes(&self) -> usize {
        self.cache.pending()
    }

    /// Number of live counters.
    pub fn active_counters(&self) -> usize {
        self.counters.active_count()
    }

    /// The counter registry.
    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    /// Copies the fetch statistics.
    pub fn stats(&self) -> FetchStatsSnapshot {
        self.stats.snapshot()
    }

    /// The active configuration.
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    fn read_instant(&self, device: u32, query: InstantQuery) -> HwResult<FieldData> {
        let hw = &self.hw;
        let data = match query {
            InstantQuery::DeviceCount => FieldData::Integer(i64::from(hw.device_count()?)),
            InstantQuery::Name => FieldData::text(hw.device_name(device)?),
            InstantQuery::MemoryUsage => FieldData::Integer(clamp_to_i64(hw.memory_usage(device)?)),
            InstantQuery::MemoryTotal => FieldData::Integer(clamp_to_i64(hw.memory_total(device)?)),
            InstantQuery::Power => FieldData::Integer(clamp_to_i64(hw.power_average(device)?)),
            InstantQuery::Clock(domain) => {
                let freqs = hw.clock_frequencies(device, domain)?;
                let current = freqs.current_hz().ok_or(HwStatus::UnexpectedData)?;
                FieldData::Integer(clamp_to_i64(current))
            }
            InstantQuery::Busy => FieldData::Integer(i64::from(hw.busy_percent(device)?)),
            InstantQuery::Temperature(sensor) => FieldData::Integer(hw.temperature(device, sensor)?),
        };
        Ok(data)
    }

    /// Sums ECC counts over every block that answers. Blocks that fail are
    /// skipped; the total is reported even when none answer.
    fn read_ecc_total(&self, device: u32, total: EccTotal) -> FieldData {
        let mut correctable = 0u64;
        let mut uncorrectable = 0u64;
        for block in GpuBlock::ALL {
            if let Err(status) = self.hw.ecc_status(device, block) {
                log::info!(
                    "Get the ECC status of block {} on GPU {device} failed: {status}",
                    block.name()
                );
                continue;
            }
            if let Ok(count) = self.hw.ecc_count(device, block) {
                correctable = correctable.saturating_add(count.correctable);
                uncorrectable = uncorrectable.saturating_add(count.uncorrectable);
            }
        }
        let sum = match total {
            EccTotal::Correctable => correctable,
            EccTotal::Uncorrectable => uncorrectable,
        };
        FieldData::Integer(clamp_to_i64(sum))
    }

    fn read_counter(&self, key: FieldKey) -> HwResult<FieldData> {
        let reading = self.counters.read(key).ok_or(HwStatus::NotSupported)??;
        Ok(FieldData::Integer(clamp_to_i64(reading.value)))
    }

    fn read_derived_counter(&self, key: FieldKey, scale: u64) -> HwResult<FieldData> {
        let reading = self.counters.read(key).ok_or(HwStatus::NotSupported)??;
        Ok(FieldData::Integer(derived_rate(&reading, scale)))
    }

    fn read_cached(&self, key: FieldKey, query: AsyncQuery, now_ms: u64) -> FieldValue {
        let read = self.cache.read_or_schedule(key, query, now_ms);
        if read.scheduled {
            self.stats.record_enqueued();
            log::debug!("Start async fetch {key} to cache.");
        } else if read.freshness == Freshness::Fresh {
            self.stats.record_cache_hit();
            log::trace!("Fetch {key} from cache");
        }

        let mut value = match read.value {
            Some(cached) => FieldValue {
                timestamp_ms: now_ms,
                ..cached
            },
            None => FieldValue::unpopulated(key.field, now_ms),
        };
        value.refresh_pending = read.scheduled;
        value
    }
}

impl Drop for MetricFetcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_rate_scales_by_running_seconds() {
        let reading = CounterReading {
            value: 1_000,
            time_enabled_ns: 2_000_000_000,
            time_running_ns: 2_000_000_000,
        };
        assert_eq!(derived_rate(&reading, 32), 16_000);
    }

    #[test]
    fn derived_rate_of_empty_window_is_zero() {
        let reading = CounterReading {
            value: 123_456,
            time_enabled_ns: 10,
            time_running_ns: 0,
        };
        assert_eq!(derived_rate(&reading, 32), 0);
    }

    #[test]
    fn clamp_saturates_above_i64_max() {
        assert_eq!(clamp_to_i64(42), 42);
        assert_eq!(clamp_to_i64(i64::MAX as u64), i64::MAX);
        assert_eq!(clamp_to_i64(u64::MAX), i64::MAX);
    }

    #[test]
    fn derived_rate_handles_sub_second_windows() {
        let reading = CounterReading {
            value: 10,
            time_enabled_ns: 0,
            time_running_ns: 500_000_000,
        };
        assert_eq!(derived_rate(&reading, 32), 640);
    }
}
