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

//! A clock that only moves when told to.

use std::sync::atomic::{AtomicU64, Ordering};

use gpuwatch_core::Clock;

/// A [`Clock`] whose time is set explicitly, for deterministic expiry.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
    tick_ms: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
            tick_ms: AtomicU64::new(0),
        }
    }

    /// Makes every read advance the clock by `tick_ms` after returning the
    /// current time, so consecutive reads observe elapsed time.
    pub fn set_tick(&self, tick_ms: u64) {
        self.tick_ms.store(tick_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        let tick = self.tick_ms.load(Ordering::SeqCst);
        self.now_ms.fetch_add(tick, Ordering::SeqCst)
    }
}
