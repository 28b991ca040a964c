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

//! Polls every known field of a simulated two-GPU node.
//!
//! Usage: `sandbox [config.ron]`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use gpuwatch_core::field::FIELD_TABLE;
use gpuwatch_core::hardware::{CounterEvent, CounterReading, PcieThroughput};
use gpuwatch_core::FieldKind;
use gpuwatch_fetch::{FetcherConfig, MetricFetcher};
use gpuwatch_infra::{HwCall, SimulatedDevice, SimulatedGpu};

const DEVICES: u32 = 2;

fn simulated_node() -> SimulatedGpu {
    let gpu = SimulatedGpu::with_devices(DEVICES as usize);
    for device in 0..DEVICES {
        gpu.update_device(device, |d: &mut SimulatedDevice| {
            d.name = format!("Simulated Instinct #{device}");
            d.busy_percent = 40 + device * 25;
            d.counter_slots = 8;
            d.pcie = Some(PcieThroughput {
                sent: 1_200_000 * u64::from(device + 1),
                received: 800_000 * u64::from(device + 1),
                max_packet_size: 256,
            });
            d.counter_readings.insert(
                CounterEvent::Xgmi0BeatsTx,
                CounterReading {
                    value: 3_000_000,
                    time_enabled_ns: 1_000_000_000,
                    time_running_ns: 1_000_000_000,
                },
            );
        });
    }
    gpu.set_latency(HwCall::PcieThroughput, Duration::from_millis(100));
    gpu
}

fn poll(fetcher: &MetricFetcher) {
    for device in 0..DEVICES {
        for spec in FIELD_TABLE {
            let value = fetcher.fetch(device, spec.id);
            match value.status {
                Ok(()) => println!("GPU {device} {:<20} {}", spec.name, value.data),
                Err(err) if value.refresh_pending => {
                    println!("GPU {device} {:<20} <refreshing: {err}>", spec.name)
                }
                Err(err) => println!("GPU {device} {:<20} <{err}>", spec.name),
            }
        }
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => FetcherConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => FetcherConfig::default(),
    };

    let fetcher = MetricFetcher::new(Arc::new(simulated_node()), config);
    fetcher.start().context("starting the refresh worker")?;

    for device in 0..DEVICES {
        for spec in FIELD_TABLE {
            if let FieldKind::Counter(_) = spec.kind {
                if let Err(err) = fetcher.acquire_counter(device, spec.id) {
                    log::warn!("Counter {} unavailable on GPU {device}: {err}", spec.name);
                }
            }
        }
    }

    log::info!("First pass: PCIe values are still being measured.");
    poll(&fetcher);

    thread::sleep(Duration::from_millis(500));
    log::info!("Second pass: served from cache.");
    poll(&fetcher);

    log::info!("Stats: {:?}", fetcher.stats());
    fetcher.shutdown();
    Ok(())
}
