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

//! The background refresh worker.

use std::sync::Arc;
use std::thread;

use gpuwatch_core::field::AsyncQuery;
use gpuwatch_core::hardware::PcieThroughput;
use gpuwatch_core::{Clock, DeviceQuery, FetchError, FieldData, FieldId, FieldKey, HwStatus};

use crate::cache::{FieldCache, Freshness, RefreshTask};
use crate::error::EngineError;
use crate::fetcher::clamp_to_i64;
use crate::stats::FetchStats;

/// Everything a refresh needs, shared between the engine and its worker.
#[derive(Debug)]
pub(crate) struct Refresher {
    pub cache: Arc<FieldCache>,
    pub hw: Arc<dyn DeviceQuery>,
    pub clock: Arc<dyn Clock>,
    pub stats: Arc<FetchStats>,
    pub pcie_ttl_ms: u64,
}

impl Refresher {
    /// Executes one queued task.
    pub fn run(&self, task: RefreshTask) {
        match task.query {
            AsyncQuery::PcieThroughput => self.refresh_pcie(task.key),
        }
    }

    /// One hardware call populates both PCIe fields of the device.
    fn refresh_pcie(&self, key: FieldKey) {
        // A duplicate task may already have been served.
        if self.cache.freshness(key, self.clock.now_ms()) == Freshness::Fresh {
            self.stats.record_skipped();
            log::trace!("Skip refresh of {key}: already fresh");
            return;
        }

        let result = self.hw.pcie_throughput(key.device);
        let now = self.clock.now_ms();
        self.stats.record_executed();

        let tx = key.with_field(FieldId::PCIE_TX);
        let rx = key.with_field(FieldId::PCIE_RX);
        let (status, updates) = match result {
            Ok(PcieThroughput { sent, received, .. }) => (
                Ok(()),
                [
                    (tx, Some(FieldData::Integer(clamp_to_i64(sent)))),
                    (rx, Some(FieldData::Integer(clamp_to_i64(received)))),
                ],
            ),
            Err(native) => (Err(FetchError::from(native)), [(tx, None), (rx, None)]),
        };
        self.cache.store_refresh(&updates, status, now, self.pcie_ttl_ms);

        match result {
            Ok(_) => log::debug!("Async updated {}:PCIE_RX and PCIE_TX in cache", key.device),
            Err(HwStatus::NotSupported) => {
                log::error!("PCIe throughput not supported on GPU {}", key.device)
            }
            Err(native) => log::warn!(
                "PCIe throughput refresh failed on GPU {} with native status {native}",
                key.device
            ),
        }
    }
}

/// Spawns the worker thread. It drains the queue until the cache is stopped.
pub(crate) fn spawn(
    name: &str,
    refresher: Arc<Refresher>,
) -> Result<thread::JoinHandle<()>, EngineError> {
    refresher.cache.mark_running();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            log::info!("Refresh worker started.");
            while let Some(task) = refresher.cache.next_task() {
                refresher.run(task);
            }
            log::info!("Refresh worker stopped.");
        })
        .map_err(EngineError::WorkerSpawn)
}
