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

//! The field cache and the refresh queue it shares a lock with.
//!
//! One mutex guards both the cached entries and the pending refresh tasks.
//! Callers only hold it for point lookups, inserts and queue pushes; hardware
//! calls always happen with the lock released.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use gpuwatch_core::field::AsyncQuery;
use gpuwatch_core::{FetchResult, FieldData, FieldKey, FieldValue};

/// A cached value with its refresh bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The last stored value.
    pub value: FieldValue,
    /// When the entry was last refreshed, in milliseconds since the epoch.
    pub last_refresh_ms: u64,
    /// How long the entry stays fresh after a refresh.
    pub ttl_ms: u64,
}

impl CacheEntry {
    /// An entry is fresh iff `now < last_refresh + ttl`.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms < self.last_refresh_ms.saturating_add(self.ttl_ms)
    }
}

/// Freshness of a key at lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No entry exists yet.
    Unpopulated,
    /// The entry is within its ttl.
    Fresh,
    /// The entry has expired.
    Stale,
}

/// Outcome of a cached-async read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead {
    /// The best value currently cached, if any.
    pub value: Option<FieldValue>,
    /// Freshness observed under the lock.
    pub freshness: Freshness,
    /// Whether a refresh task was queued by this read.
    pub scheduled: bool,
}

/// A pending refresh of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RefreshTask {
    pub key: FieldKey,
    pub query: AsyncQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerPhase {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<FieldKey, CacheEntry>,
    queue: VecDeque<RefreshTask>,
    phase: WorkerPhase,
}

/// Per-(device, field) cache with lazy ttl expiry and a FIFO refresh queue.
///
/// Refresh requests are not deduplicated; a duplicate costs one freshness
/// check when the worker reaches it.
#[derive(Debug)]
pub struct FieldCache {
    state: Mutex<CacheState>,
    wakeup: Condvar,
}

impl FieldCache {
    /// Creates an empty cache whose queue accepts tasks but is not yet drained.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                queue: VecDeque::new(),
                phase: WorkerPhase::Idle,
            }),
            wakeup: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached value and, when it is missing or stale, queues a
    /// refresh. Never blocks on hardware.
    pub(crate) fn read_or_schedule(&self, key: FieldKey, query: AsyncQuery, now_ms: u64) -> CacheRead {
        let read = {
            let mut state = self.lock();
            let (value, freshness) = match state.entries.get(&key) {
                Some(entry) if entry.is_fresh(now_ms) => (Some(entry.value.clone()), Freshness::Fresh),
                Some(entry) => (Some(entry.value.clone()), Freshness::Stale),
                None => (None, Freshness::Unpopulated),
            };
            let scheduled = freshness != Freshness::Fresh && state.phase != WorkerPhase::Stopped;
            if scheduled {
                state.queue.push_back(RefreshTask { key, query });
            }
            CacheRead {
                value,
                freshness,
                scheduled,
            }
        };
        if read.scheduled {
            self.wakeup.notify_all();
        }
        read
    }

    /// Freshness of a key without side effects.
    pub fn freshness(&self, key: FieldKey, now_ms: u64) -> Freshness {
        match self.lock().entries.get(&key) {
            Some(entry) if entry.is_fresh(now_ms) => Freshness::Fresh,
            Some(_) => Freshness::Stale,
            None => Freshness::Unpopulated,
        }
    }

    /// The cached value for a key, without scheduling anything.
    pub fn peek(&self, key: FieldKey) -> Option<FieldValue> {
        self.lock().entries.get(&key).map(|entry| entry.value.clone())
    }

    /// The full entry for a key.
    pub fn entry(&self, key: FieldKey) -> Option<CacheEntry> {
        self.lock().entries.get(&key).cloned()
    }

    /// Number of populated entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no entry has been populated yet.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of refresh tasks waiting for the worker.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Stores the outcome of one refresh for every key it covers, under a
    /// single lock.
    ///
    /// Each listed key gets the new status, timestamp and ttl. A key's payload
    /// is replaced only when a new payload is supplied; otherwise the
    /// previously cached payload is kept.
    pub(crate) fn store_refresh(
        &self,
        updates: &[(FieldKey, Option<FieldData>)],
        status: FetchResult<()>,
        now_ms: u64,
        ttl_ms: u64,
    ) {
        let mut state = self.lock();
        for (key, data) in updates {
            let data = match (data, state.entries.get(key)) {
                (Some(data), _) => data.clone(),
                (None, Some(previous)) => previous.value.data.clone(),
                (None, None) => FieldData::default(),
            };
            let value = FieldValue {
                field: key.field,
                status,
                timestamp_ms: now_ms,
                data,
                refresh_pending: false,
            };
            state.entries.insert(
                *key,
                CacheEntry {
                    value,
                    last_refresh_ms: now_ms,
                    ttl_ms,
                },
            );
        }
    }

    /// Blocks until a task is queued or the worker is stopped. Returns `None`
    /// once stopped.
    pub(crate) fn next_task(&self) -> Option<RefreshTask> {
        let mut state = self.lock();
        loop {
            if state.phase == WorkerPhase::Stopped {
                return None;
            }
            if let Some(task) = state.queue.pop_front() {
                return Some(task);
            }
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn mark_running(&self) {
        self.lock().phase = WorkerPhase::Running;
    }

    /// Stops accepting and serving tasks; anything still queued is dropped.
    pub(crate) fn stop(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            state.phase = WorkerPhase::Stopped;
            let discarded = state.queue.len();
            state.queue.clear();
            discarded
        };
        self.wakeup.notify_all();
        discarded
    }
}

impl Default for FieldCache {
    fn default() -> Self {
        Self::new()
    }
}
