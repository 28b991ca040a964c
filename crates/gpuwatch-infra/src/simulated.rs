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

//! A simulated GPU backend.
//!
//! [`SimulatedGpu`] implements [`DeviceQuery`] over in-memory device models.
//! It counts every call per [`HwCall`], lets tests inject a native failure
//! for any call, and tracks the counters it has handed out so leaks are
//! observable.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use gpuwatch_core::hardware::{
    ClockDomain, CounterEvent, CounterGroup, CounterReading, ErrorCount, Frequencies, GpuBlock,
    PcieThroughput, RasState, RawCounter, TempSensor,
};
use gpuwatch_core::{DeviceQuery, HwResult, HwStatus};

/// The individual calls of the [`DeviceQuery`] contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwCall {
    /// `device_count`
    DeviceCount,
    /// `device_name`
    DeviceName,
    /// `memory_usage`
    MemoryUsage,
    /// `memory_total`
    MemoryTotal,
    /// `power_average`
    PowerAverage,
    /// `clock_frequencies`
    ClockFrequencies,
    /// `busy_percent`
    BusyPercent,
    /// `temperature`
    Temperature,
    /// `ecc_status`
    EccStatus,
    /// `ecc_count`
    EccCount,
    /// `pcie_throughput`
    PcieThroughput,
    /// `counter_group_supported`
    CounterGroupSupported,
    /// `available_counters`
    AvailableCounters,
    /// `counter_create`
    CounterCreate,
    /// `counter_start`
    CounterStart,
    /// `counter_stop`
    CounterStop,
    /// `counter_destroy`
    CounterDestroy,
    /// `counter_read`
    CounterRead,
}

/// The observable state of one simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    /// Device name.
    pub name: String,
    /// VRAM in use, bytes.
    pub memory_used: u64,
    /// VRAM capacity, bytes.
    pub memory_total: u64,
    /// Average power, microwatts.
    pub power_uw: u64,
    /// System clock table.
    pub system_clock: Frequencies,
    /// Memory clock table.
    pub memory_clock: Frequencies,
    /// Busy percentage.
    pub busy_percent: u32,
    /// Edge temperature, millidegrees.
    pub edge_temp_mc: i64,
    /// Memory temperature, millidegrees.
    pub memory_temp_mc: i64,
    /// ECC totals of blocks that report ECC. Other blocks answer `NotSupported`.
    pub ecc: HashMap<GpuBlock, ErrorCount>,
    /// Blocks whose status query succeeds but whose count query fails.
    pub failing_ecc_counts: Vec<GpuBlock>,
    /// PCIe sample, or `None` when the device cannot measure PCIe traffic.
    pub pcie: Option<PcieThroughput>,
    /// Whether the XGMI counter group exists.
    pub xgmi_supported: bool,
    /// Counter slots in the XGMI group.
    pub counter_slots: u32,
    /// What a counter for each event reads.
    pub counter_readings: HashMap<CounterEvent, CounterReading>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        let mut ecc = HashMap::new();
        ecc.insert(GpuBlock::Umc, ErrorCount::default());
        ecc.insert(GpuBlock::Gfx, ErrorCount::default());
        Self {
            name: "Simulated GPU".to_string(),
            memory_used: 2 << 30,
            memory_total: 32 << 30,
            power_uw: 120_000_000,
            system_clock: Frequencies {
                supported_hz: vec![500_000_000, 1_100_000_000, 1_500_000_000],
                current: 1,
            },
            memory_clock: Frequencies {
                supported_hz: vec![167_000_000, 1_000_000_000],
                current: 1,
            },
            busy_percent: 0,
            edge_temp_mc: 35_000,
            memory_temp_mc: 40_000,
            ecc,
            failing_ecc_counts: Vec::new(),
            pcie: Some(PcieThroughput {
                sent: 0,
                received: 0,
                max_packet_size: 256,
            }),
            xgmi_supported: true,
            counter_slots: 4,
            counter_readings: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct SimCounter {
    device: u32,
    event: CounterEvent,
    running: bool,
}

#[derive(Debug, Default)]
struct SimState {
    devices: Vec<SimulatedDevice>,
    calls: HashMap<HwCall, u64>,
    faults: HashMap<HwCall, HwStatus>,
    counters: HashMap<u64, SimCounter>,
    next_counter: u64,
    latencies: HashMap<HwCall, Duration>,
    callers: HashMap<HwCall, Option<String>>,
}

impl SimState {
    fn enter(&mut self, call: HwCall) -> HwResult<()> {
        *self.calls.entry(call).or_insert(0) += 1;
        self.callers
            .insert(call, thread::current().name().map(str::to_string));
        match self.faults.get(&call) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    fn device(&self, device: u32) -> HwResult<&SimulatedDevice> {
        self.devices
            .get(device as usize)
            .ok_or(HwStatus::InvalidArgs)
    }

    fn counter(&mut self, counter: RawCounter) -> HwResult<&mut SimCounter> {
        self.counters
            .get_mut(&counter.0)
            .ok_or(HwStatus::InvalidArgs)
    }

    fn live_on(&self, device: u32) -> u32 {
        self.counters.values().filter(|c| c.device == device).count() as u32
    }
}

/// An in-memory GPU implementing [`DeviceQuery`].
#[derive(Debug, Default)]
pub struct SimulatedGpu {
    state: Mutex<SimState>,
}

impl SimulatedGpu {
    /// Creates a backend over the given devices.
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            state: Mutex::new(SimState {
                devices,
                ..SimState::default()
            }),
        }
    }

    /// Creates a backend with `count` default devices.
    pub fn with_devices(count: usize) -> Self {
        Self::new(vec![SimulatedDevice::default(); count])
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutates one device's model.
    ///
    /// # Panics
    /// Panics if `device` does not exist.
    pub fn update_device(&self, device: u32, f: impl FnOnce(&mut SimulatedDevice)) {
        let mut state = self.lock();
        f(&mut state.devices[device as usize]);
    }

    /// Makes every subsequent `call` fail with `status`.
    pub fn inject_fault(&self, call: HwCall, status: HwStatus) {
        self.lock().faults.insert(call, status);
    }

    /// Removes an injected fault.
    pub fn clear_fault(&self, call: HwCall) {
        self.lock().faults.remove(&call);
    }

    /// Delays `call` by `latency`. Honoured by PCIe throughput queries and
    /// counter reads, after the call is counted and with the simulator lock
    /// released.
    pub fn set_latency(&self, call: HwCall, latency: Duration) {
        self.lock().latencies.insert(call, latency);
    }

    /// Name of the thread that made the most recent `call`.
    pub fn last_caller(&self, call: HwCall) -> Option<String> {
        self.lock().callers.get(&call).cloned().flatten()
    }

    fn after_latency<T>(&self, call: HwCall, result: HwResult<T>) -> HwResult<T> {
        let latency = self.lock().latencies.get(&call).copied();
        if let Some(latency) = latency {
            thread::sleep(latency);
        }
        result
    }

    /// How many times `call` was made.
    pub fn calls(&self, call: HwCall) -> u64 {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Total number of calls of any kind.
    pub fn total_calls(&self) -> u64 {
        self.lock().calls.values().sum()
    }

    /// Counters created and not yet destroyed.
    pub fn live_counters(&self) -> usize {
        self.lock().counters.len()
    }

    /// Live counters that are currently started.
    pub fn running_counters(&self) -> usize {
        self.lock().counters.values().filter(|c| c.running).count()
    }
}

impl DeviceQuery for SimulatedGpu {
    fn device_count(&self) -> HwResult<u32> {
        let mut state = self.lock();
        state.enter(HwCall::DeviceCount)?;
        Ok(state.devices.len() as u32)
    }

    fn device_name(&self, device: u32) -> HwResult<String> {
        let mut state = self.lock();
        state.enter(HwCall::DeviceName)?;
        Ok(state.device(device)?.name.clone())
    }

    fn memory_usage(&self, device: u32) -> HwResult<u64> {
        let mut state = self.lock();
        state.enter(HwCall::MemoryUsage)?;
        Ok(state.device(device)?.memory_used)
    }

    fn memory_total(&self, device: u32) -> HwResult<u64> {
        let mut state = self.lock();
        state.enter(HwCall::MemoryTotal)?;
        Ok(state.device(device)?.memory_total)
    }

    fn power_average(&self, device: u32) -> HwResult<u64> {
        let mut state = self.lock();
        state.enter(HwCall::PowerAverage)?;
        Ok(state.device(device)?.power_uw)
    }

    fn clock_frequencies(&self, device: u32, domain: ClockDomain) -> HwResult<Frequencies> {
        let mut state = self.lock();
        state.enter(HwCall::ClockFrequencies)?;
        let dev = state.device(device)?;
        Ok(match domain {
            ClockDomain::System => dev.system_clock.clone(),
            ClockDomain::Memory => dev.memory_clock.clone(),
        })
    }

    fn busy_percent(&self, device: u32) -> HwResult<u32> {
        let mut state = self.lock();
        state.enter(HwCall::BusyPercent)?;
        Ok(state.device(device)?.busy_percent)
    }

    fn temperature(&self, device: u32, sensor: TempSensor) -> HwResult<i64> {
        let mut state = self.lock();
        state.enter(HwCall::Temperature)?;
        let dev = state.device(device)?;
        Ok(match sensor {
            TempSensor::Edge => dev.edge_temp_mc,
            TempSensor::Memory => dev.memory_temp_mc,
        })
    }

    fn ecc_status(&self, device: u32, block: GpuBlock) -> HwResult<RasState> {
        let mut state = self.lock();
        state.enter(HwCall::EccStatus)?;
        let dev = state.device(device)?;
        if dev.ecc.contains_key(&block) {
            Ok(RasState::Enabled)
        } else {
            Err(HwStatus::NotSupported)
        }
    }

    fn ecc_count(&self, device: u32, block: GpuBlock) -> HwResult<ErrorCount> {
        let mut state = self.lock();
        state.enter(HwCall::EccCount)?;
        let dev = state.device(device)?;
        if dev.failing_ecc_counts.contains(&block) {
            return Err(HwStatus::FileError);
        }
        dev.ecc.get(&block).copied().ok_or(HwStatus::NotSupported)
    }

    fn pcie_throughput(&self, device: u32) -> HwResult<PcieThroughput> {
        let result = {
            let mut state = self.lock();
            state
                .enter(HwCall::PcieThroughput)
                .and_then(|_| state.device(device))
                .and_then(|dev| dev.pcie.ok_or(HwStatus::NotSupported))
        };
        self.after_latency(HwCall::PcieThroughput, result)
    }

    fn counter_group_supported(&self, device: u32, group: CounterGroup) -> HwResult<()> {
        let mut state = self.lock();
        state.enter(HwCall::CounterGroupSupported)?;
        let dev = state.device(device)?;
        let supported = match group {
            CounterGroup::Xgmi => dev.xgmi_supported,
        };
        if supported {
            Ok(())
        } else {
            Err(HwStatus::NotSupported)
        }
    }

    fn available_counters(&self, device: u32, _group: CounterGroup) -> HwResult<u32> {
        let mut state = self.lock();
        state.enter(HwCall::AvailableCounters)?;
        let slots = state.device(device)?.counter_slots;
        Ok(slots.saturating_sub(state.live_on(device)))
    }

    fn counter_create(&self, device: u32, event: CounterEvent) -> HwResult<RawCounter> {
        let mut state = self.lock();
        state.enter(HwCall::CounterCreate)?;
        let slots = state.device(device)?.counter_slots;
        if state.live_on(device) >= slots {
            return Err(HwStatus::OutOfResources);
        }
        state.next_counter += 1;
        let id = state.next_counter;
        state.counters.insert(
            id,
            SimCounter {
                device,
                event,
                running: false,
            },
        );
        log::trace!("Simulated counter {id} created for {event:?} on GPU {device}");
        Ok(RawCounter(id))
    }

    fn counter_start(&self, counter: RawCounter) -> HwResult<()> {
        let mut state = self.lock();
        state.enter(HwCall::CounterStart)?;
        state.counter(counter)?.running = true;
        Ok(())
    }

    fn counter_stop(&self, counter: RawCounter) -> HwResult<()> {
        let mut state = self.lock();
        state.enter(HwCall::CounterStop)?;
        state.counter(counter)?.running = false;
        Ok(())
    }

    fn counter_destroy(&self, counter: RawCounter) -> HwResult<()> {
        let mut state = self.lock();
        state.enter(HwCall::CounterDestroy)?;
        state
            .counters
            .remove(&counter.0)
            .map(|_| ())
            .ok_or(HwStatus::InvalidArgs)
    }

    fn counter_read(&self, counter: RawCounter) -> HwResult<CounterReading> {
        let result = {
            let mut state = self.lock();
            state.enter(HwCall::CounterRead).and_then(|_| {
                let (device, event) = {
                    let c = state.counter(counter)?;
                    (c.device, c.event)
                };
                Ok(state
                    .device(device)?
                    .counter_readings
                    .get(&event)
                    .copied()
                    .unwrap_or_default())
            })
        };
        self.after_latency(HwCall::CounterRead, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_are_counted_per_kind() {
        let gpu = SimulatedGpu::with_devices(2);
        assert_eq!(gpu.device_count(), Ok(2));
        gpu.busy_percent(0).unwrap();
        gpu.busy_percent(1).unwrap();
        assert_eq!(gpu.calls(HwCall::DeviceCount), 1);
        assert_eq!(gpu.calls(HwCall::BusyPercent), 2);
        assert_eq!(gpu.total_calls(), 3);
    }

    #[test]
    fn injected_faults_fail_until_cleared() {
        let gpu = SimulatedGpu::with_devices(1);
        gpu.inject_fault(HwCall::MemoryTotal, HwStatus::Permission);
        assert_eq!(gpu.memory_total(0), Err(HwStatus::Permission));
        gpu.clear_fault(HwCall::MemoryTotal);
        assert_eq!(gpu.memory_total(0), Ok(32 << 30));
    }

    #[test]
    fn calls_remember_the_calling_thread() {
        let gpu = std::sync::Arc::new(SimulatedGpu::with_devices(1));
        let remote = std::sync::Arc::clone(&gpu);
        thread::Builder::new()
            .name("sampler".to_string())
            .spawn(move || remote.busy_percent(0))
            .unwrap()
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(gpu.last_caller(HwCall::BusyPercent).as_deref(), Some("sampler"));
        assert_eq!(gpu.last_caller(HwCall::DeviceCount), None);
    }

    #[test]
    fn unknown_device_is_invalid_args() {
        let gpu = SimulatedGpu::with_devices(1);
        assert_eq!(gpu.device_name(5), Err(HwStatus::InvalidArgs));
    }

    #[test]
    fn counter_slots_are_finite() {
        let gpu = SimulatedGpu::with_devices(1);
        gpu.update_device(0, |d| d.counter_slots = 1);

        let first = gpu.counter_create(0, CounterEvent::Xgmi0NopTx).unwrap();
        assert_eq!(gpu.available_counters(0, CounterGroup::Xgmi), Ok(0));
        assert_eq!(
            gpu.counter_create(0, CounterEvent::Xgmi1NopTx),
            Err(HwStatus::OutOfResources)
        );

        gpu.counter_destroy(first).unwrap();
        assert_eq!(gpu.available_counters(0, CounterGroup::Xgmi), Ok(1));
        assert_eq!(gpu.live_counters(), 0);
    }

    #[test]
    fn counters_read_the_device_model() {
        let gpu = SimulatedGpu::with_devices(1);
        let reading = CounterReading {
            value: 77,
            time_enabled_ns: 5,
            time_running_ns: 5,
        };
        gpu.update_device(0, |d| {
            d.counter_readings.insert(CounterEvent::Xgmi0BeatsTx, reading);
        });
        let counter = gpu.counter_create(0, CounterEvent::Xgmi0BeatsTx).unwrap();
        gpu.counter_start(counter).unwrap();
        assert_eq!(gpu.running_counters(), 1);
        assert_eq!(gpu.counter_read(counter), Ok(reading));
    }

    #[test]
    fn destroyed_counters_cannot_be_used() {
        let gpu = SimulatedGpu::with_devices(1);
        let counter = gpu.counter_create(0, CounterEvent::Xgmi0NopTx).unwrap();
        gpu.counter_destroy(counter).unwrap();
        assert_eq!(gpu.counter_read(counter), Err(HwStatus::InvalidArgs));
        assert_eq!(gpu.counter_stop(counter), Err(HwStatus::InvalidArgs));
    }

    #[test]
    fn ecc_blocks_without_bookkeeping_are_unsupported() {
        let gpu = SimulatedGpu::with_devices(1);
        assert_eq!(gpu.ecc_status(0, GpuBlock::Umc), Ok(RasState::Enabled));
        assert_eq!(gpu.ecc_status(0, GpuBlock::Fuse), Err(HwStatus::NotSupported));
    }
}
