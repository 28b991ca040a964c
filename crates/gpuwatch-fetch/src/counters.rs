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

//! Ownership of live hardware performance counters.
//!
//! The registry is the only holder of counter identities. Callers name a
//! counter by its [`FieldKey`]; the raw handle never leaves this module, so it
//! cannot be used after release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gpuwatch_core::hardware::{CounterEvent, CounterReading, RawCounter};
use gpuwatch_core::{DeviceQuery, FetchError, FetchResult, FieldKey, FieldKind, HwResult};

#[derive(Debug)]
struct CounterSlot {
    counter: RawCounter,
    last_reading: CounterReading,
}

/// Registry of active counters keyed by raw (device, field).
///
/// At most one live counter exists per raw key. Pseudo fields resolve to the
/// raw field backing them. Acquisition and release make their hardware calls
/// while holding the lock; counter reads do not.
#[derive(Debug)]
pub struct CounterRegistry {
    hw: Arc<dyn DeviceQuery>,
    slots: Mutex<HashMap<FieldKey, CounterSlot>>,
}

impl CounterRegistry {
    /// Creates an empty registry over a hardware backend.
    pub fn new(hw: Arc<dyn DeviceQuery>) -> Self {
        Self {
            hw,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FieldKey, CounterSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_in(slots: &HashMap<FieldKey, CounterSlot>, key: FieldKey) -> Option<FieldKey> {
        if slots.contains_key(&key) {
            return Some(key);
        }
        let raw = key.with_field(key.field.raw_source()?);
        slots.contains_key(&raw).then_some(raw)
    }

    /// Creates and starts the counter backing `key`.
    ///
    /// Fails with `AlreadyExists` when a counter is already live for the
    /// resolved raw key, and `NotSupported` when the field is not counter
    /// backed. Any failing hardware step aborts the acquisition; nothing is
    /// retained.
    pub fn acquire(&self, key: FieldKey) -> FetchResult<()> {
        let raw_key = key.with_field(key.field.counter_field());
        let Some(FieldKind::Counter(event)) = raw_key.field.kind() else {
            return Err(FetchError::NotSupported);
        };

        let mut slots = self.lock();
        if Self::resolve_in(&slots, key).is_some() {
            return Err(FetchError::AlreadyExists);
        }

        let counter = self.create_counter(raw_key.device, event)?;
        slots.insert(
            raw_key,
            CounterSlot {
                counter,
                last_reading: CounterReading::default(),
            },
        );
        log::info!("Acquired counter {:?} for {raw_key}", counter);
        Ok(())
    }

    fn create_counter(&self, device: u32, event: CounterEvent) -> FetchResult<RawCounter> {
        let group = event.group();
        self.hw.counter_group_supported(device, group)?;

        let available = self.hw.available_counters(device, group)?;
        if available == 0 {
            return Err(FetchError::InsufficientResources);
        }

        let counter = self.hw.counter_create(device, event)?;
        if let Err(status) = self.hw.counter_start(counter) {
            if let Err(destroy) = self.hw.counter_destroy(counter) {
                log::warn!("Failed to destroy unstarted counter {counter:?}: {destroy}");
            }
            return Err(status.into());
        }
        Ok(counter)
    }

    /// Stops and destroys the counter stored under exactly `key`.
    ///
    /// The entry is evicted even when the hardware reports a failure. Destroy
    /// is only attempted after a successful stop.
    pub fn release(&self, key: FieldKey) -> FetchResult<()> {
        let mut slots = self.lock();
        let slot = slots.remove(&key).ok_or(FetchError::NotSupported)?;

        if let Err(status) = self.hw.counter_stop(slot.counter) {
            log::warn!("Failed to stop counter for {key}: {status}");
            return Err(status.into());
        }
        self.hw.counter_destroy(slot.counter)?;
        log::info!("Released counter for {key}");
        Ok(())
    }

    /// Tears down every live counter. Failures are logged, not returned.
    pub fn release_all(&self) -> usize {
        let mut slots = self.lock();
        let released = slots.len();
        for (key, slot) in slots.drain() {
            let result = self
                .hw
                .counter_stop(slot.counter)
                .and_then(|_| self.hw.counter_destroy(slot.counter));
            if let Err(status) = result {
                log::warn!("Failed to tear down counter for {key}: {status}");
            }
        }
        if released > 0 {
            log::info!("Released {released} counter(s)");
        }
        released
    }

    /// The key a counter for `key` is stored under: `key` itself, or its raw
    /// source for pseudo fields.
    pub fn resolve(&self, key: FieldKey) -> Option<FieldKey> {
        Self::resolve_in(&self.lock(), key)
    }

    /// Reads the counter backing `key`. `None` when no counter resolves.
    ///
    /// The hardware read runs with the lock released; a counter released in
    /// the meantime is not updated.
    pub fn read(&self, key: FieldKey) -> Option<HwResult<CounterReading>> {
        let (resolved, counter) = {
            let slots = self.lock();
            let resolved = Self::resolve_in(&slots, key)?;
            (resolved, slots.get(&resolved)?.counter)
        };
        let result = self.hw.counter_read(counter);
        if let Ok(reading) = result {
            if let Some(slot) = self.lock().get_mut(&resolved) {
                if slot.counter == counter {
                    slot.last_reading = reading;
                }
            }
        }
        Some(result)
    }

    /// The most recent successful reading of the counter backing `key`.
    pub fn last_reading(&self, key: FieldKey) -> Option<CounterReading> {
        let slots = self.lock();
        let resolved = Self::resolve_in(&slots, key)?;
        slots.get(&resolved).map(|slot| slot.last_reading)
    }

    /// Whether a counter is stored under exactly `key`.
    pub fn is_active(&self, key: FieldKey) -> bool {
        self.lock().contains_key(&key)
    }

    /// Number of live counters.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}
