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

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gpuwatch_core::hardware::PcieThroughput;
use gpuwatch_core::{FetchError, FieldId, FieldKey, HwStatus};
use gpuwatch_fetch::{FetcherConfig, MetricFetcher};
use gpuwatch_infra::{HwCall, ManualClock, SimulatedGpu};

const TTL_MS: u64 = 30_000;
const WAIT: Duration = Duration::from_secs(5);

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for the refresh worker");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Waits until every queued refresh has either run or been skipped.
fn wait_for_idle_worker(fetcher: &MetricFetcher) {
    wait_until(|| {
        let stats = fetcher.stats();
        stats.refreshes_executed + stats.refreshes_skipped == stats.refreshes_enqueued
    });
}

fn setup(sent: u64, received: u64) -> (Arc<SimulatedGpu>, Arc<ManualClock>, MetricFetcher) {
    let gpu = Arc::new(SimulatedGpu::with_devices(2));
    set_pcie(&gpu, sent, received);
    let clock = Arc::new(ManualClock::new(1_000_000));
    let fetcher = MetricFetcher::with_clock(gpu.clone(), clock.clone(), FetcherConfig::default());
    (gpu, clock, fetcher)
}

fn set_pcie(gpu: &SimulatedGpu, sent: u64, received: u64) {
    gpu.update_device(0, |d| {
        d.pcie = Some(PcieThroughput {
            sent,
            received,
            max_packet_size: 256,
        })
    });
}

fn tx() -> FieldKey {
    FieldKey::new(0, FieldId::PCIE_TX)
}

#[test]
fn test_first_fetch_schedules_a_refresh_and_returns_immediately() {
    let (gpu, _clock, fetcher) = setup(10, 20);

    let value = fetcher.fetch(0, FieldId::PCIE_TX);

    assert!(value.refresh_pending);
    assert_eq!(value.status, Err(FetchError::NotSupported));
    assert_eq!(fetcher.pending_refreshes(), 1);
    // Nothing runs until the worker is started.
    assert_eq!(gpu.calls(HwCall::PcieThroughput), 0);
    assert_eq!(fetcher.stats().hardware_failures, 0);
}

#[test]
fn test_one_refresh_populates_both_pcie_fields() {
    let (gpu, _clock, fetcher) = setup(111, 222);
    fetcher.start().unwrap();

    fetcher.fetch(0, FieldId::PCIE_TX);
    wait_until(|| fetcher.cached_value(tx()).is_some());
    wait_for_idle_worker(&fetcher);

    let tx_value = fetcher.fetch(0, FieldId::PCIE_TX);
    let rx_value = fetcher.fetch(0, FieldId::PCIE_RX);
    assert_eq!(tx_value.integer(), Some(111));
    assert_eq!(rx_value.integer(), Some(222));
    assert!(!tx_value.refresh_pending);
    assert!(!rx_value.refresh_pending);
    assert_eq!(gpu.calls(HwCall::PcieThroughput), 1);
    assert_eq!(fetcher.stats().cache_hits, 2);
}

#[test]
fn test_ttl_window_controls_hardware_calls() {
    // --- 1. ARRANGE ---
    let (gpu, clock, fetcher) = setup(5, 6);
    fetcher.start().unwrap();
    fetcher.fetch(0, FieldId::PCIE_TX);
    wait_until(|| fetcher.cached_value(tx()).is_some());
    wait_for_idle_worker(&fetcher);
    assert_eq!(gpu.calls(HwCall::PcieThroughput), 1);

    // --- 2. ACT & ASSERT: inside the window, no hardware call ---
    clock.advance(TTL_MS - 1);
    let fresh = fetcher.fetch(0, FieldId::PCIE_TX);
    assert_eq!(fresh.integer(), Some(5));
    assert!(!fresh.refresh_pending);
    assert_eq!(fetcher.pending_refreshes(), 0);
    assert_eq!(gpu.calls(HwCall::PcieThroughput), 1);

    // --- 3. ACT & ASSERT: at expiry, the old value comes back and one refresh runs ---
    set_pcie(&gpu, 50, 60);
    clock.advance(1);
    let stale = fetcher.fetch(0, FieldId::PCIE_TX);
    assert_eq!(stale.integer(), Some(5));
    assert!(stale.refresh_pending);

    wait_until(|| fetcher.cached_value(tx()).and_then(|v| v.integer()) == Some(50));
    wait_for_idle_worker(&fetcher);
    assert_eq!(gpu.calls(HwCall::PcieThroughput), 2);
    assert_eq!(fetcher.fetch(0, FieldId::PCIE_RX).integer(), Some(60));
}

#[test]
fn test_concurrent_stale_fetches_share_one_refresh() {
    let (gpu, clock, fetcher) = setup(1, 2);
    let fetcher = Arc::new(fetcher);
    fetcher.start().unwrap();
    fetcher.fetch(0, FieldId::PCIE_TX);
    wait_until(|| fetcher.cached_value(tx()).is_some());
    wait_for_idle_worker(&fetcher);

    clock.advance(TTL_MS);
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let fetcher = Arc::clone(&fetcher);
            let field = if i % 2 == 0 { FieldId::PCIE_TX } else { FieldId::PCIE_RX };
            thread::spawn(move || fetcher.fetch(0, field))
        })
        .collect();
    for handle in handles {
        let value = handle.join().unwrap();
        assert_eq!(value.status, Ok(()));
    }
    wait_for_idle_worker(&fetcher);

    assert_eq!(gpu.calls(HwCall::PcieThroughput), 2);
    let stats = fetcher.stats();
    assert_eq!(stats.refreshes_executed, 2);
    assert_eq!(stats.refreshes_skipped, stats.refreshes_enqueued - 2);
}

#[test]
fn test_devices_are_cached_independently() {
    let (gpu, _clock, fetcher) = setup(7, 8);
    gpu.update_device(1, |d| {
        d.pcie = Some(PcieThroughput {
            sent: 70,
            received: 80,
            max_packet_size: 512,
        })
    });
    fetcher.start().unwrap();

    fetcher.fetch(0, FieldId::PCIE_RX);
    fetcher.fetch(1, FieldId::PCIE_RX);
    wait_until(|| {
        fetcher.cached_value(FieldKey::new(0, FieldId::PCIE_RX)).is_some()
            && fetcher.cached_value(FieldKey::new(1, FieldId::PCIE_RX)).is_some()
    });

    assert_eq!(fetcher.fetch(0, FieldId::PCIE_RX).integer(), Some(8));
    assert_eq!(fetcher.fetch(1, FieldId::PCIE_RX).integer(), Some(80));
}

#[test]
fn test_failed_refresh_is_cached_with_its_status() {
    let (gpu, clock, fetcher) = setup(0, 0);
    gpu.inject_fault(HwCall::PcieThroughput, HwStatus::NotSupported);
    fetcher.start().unwrap();

    fetcher.fetch(0, FieldId::PCIE_TX);
    wait_until(|| fetcher.cached_value(tx()).is_some());
    wait_for_idle_worker(&fetcher);

    // The failure is served from cache for a full ttl.
    let value = fetcher.fetch(0, FieldId::PCIE_TX);
    assert_eq!(value.status, Err(FetchError::NotSupported));
    assert!(!value.refresh_pending);
    clock.advance(TTL_MS / 2);
    fetcher.fetch(0, FieldId::PCIE_RX);
    assert_eq!(gpu.calls(HwCall::PcieThroughput), 1);
    assert_eq!(fetcher.pending_refreshes(), 0);
}

#[test]
fn test_failure_after_success_keeps_the_last_payload() {
    let (gpu, clock, fetcher) = setup(9, 9);
    fetcher.start().unwrap();
    fetcher.fetch(0, FieldId::PCIE_TX);
    wait_until(|| fetcher.cached_value(tx()).is_some());
    wait_for_idle_worker(&fetcher);

    gpu.inject_fault(HwCall::PcieThroughput, HwStatus::Busy);
    clock.advance(TTL_MS);
    fetcher.fetch(0, FieldId::PCIE_TX);
    wait_until(|| fetcher.cached_value(tx()).map(|v| v.is_ok()) == Some(false));

    let cached = fetcher.cached_value(tx()).unwrap();
    assert_eq!(cached.status, Err(FetchError::UnknownError));
    assert_eq!(cached.data.as_integer(), Some(9));
}

#[test]
fn test_slow_measurements_do_not_block_fetch() {
    let gpu = Arc::new(SimulatedGpu::with_devices(1));
    gpu.set_latency(HwCall::PcieThroughput, Duration::from_millis(500));
    let fetcher = MetricFetcher::new(gpu.clone(), FetcherConfig::default());
    fetcher.start().unwrap();

    let started = Instant::now();
    for _ in 0..5 {
        fetcher.fetch(0, FieldId::PCIE_TX);
        fetcher.fetch(0, FieldId::PCIE_RX);
    }

    assert!(started.elapsed() < Duration::from_millis(400));
    fetcher.shutdown();
}

#[test]
fn test_shutdown_discards_queued_refreshes() {
    let (gpu, _clock, fetcher) = setup(1, 1);
    for device in 0..2 {
        fetcher.fetch(device, FieldId::PCIE_TX);
        fetcher.fetch(device, FieldId::PCIE_RX);
    }
    assert_eq!(fetcher.pending_refreshes(), 4);

    fetcher.shutdown();

    assert_eq!(fetcher.pending_refreshes(), 0);
    assert_eq!(gpu.calls(HwCall::PcieThroughput), 0);

    // No work is accepted afterwards.
    let value = fetcher.fetch(0, FieldId::PCIE_TX);
    assert!(!value.refresh_pending);
    assert_eq!(fetcher.pending_refreshes(), 0);
}

#[test]
fn test_shutdown_waits_for_the_running_refresh() {
    let (gpu, _clock, fetcher) = setup(3, 4);
    gpu.set_latency(HwCall::PcieThroughput, Duration::from_millis(200));
    fetcher.start().unwrap();

    fetcher.fetch(0, FieldId::PCIE_TX);
    wait_until(|| gpu.calls(HwCall::PcieThroughput) == 1);
    fetcher.shutdown();

    assert!(!fetcher.is_running());
    assert_eq!(
        fetcher.cached_value(tx()).and_then(|v| v.integer()),
        Some(3)
    );
}

#[test]
fn test_start_and_shutdown_are_idempotent() {
    let (_gpu, _clock, fetcher) = setup(0, 0);

    fetcher.start().unwrap();
    fetcher.start().unwrap();
    assert!(fetcher.is_running());

    fetcher.shutdown();
    fetcher.shutdown();
    assert!(!fetcher.is_running());
}

#[test]
fn test_refreshes_run_on_the_named_worker_thread() {
    let gpu = Arc::new(SimulatedGpu::with_devices(1));
    let config = FetcherConfig {
        worker_thread_name: "pcie-poller".to_string(),
        ..FetcherConfig::default()
    };
    let fetcher = MetricFetcher::new(gpu.clone(), config);
    fetcher.start().unwrap();

    fetcher.fetch(0, FieldId::PCIE_TX);
    wait_until(|| fetcher.cached_value(tx()).is_some());

    assert_eq!(
        gpu.last_caller(HwCall::PcieThroughput).as_deref(),
        Some("pcie-poller")
    );
}

#[test]
fn test_racing_start_and_shutdown_leave_a_consistent_worker() {
    for _ in 0..20 {
        // --- 1. ARRANGE ---
        let (_gpu, _clock, fetcher) = setup(4, 4);
        let fetcher = Arc::new(fetcher);

        // --- 2. ACT ---
        let starter = {
            let fetcher = Arc::clone(&fetcher);
            thread::spawn(move || fetcher.start().unwrap())
        };
        let stopper = {
            let fetcher = Arc::clone(&fetcher);
            thread::spawn(move || fetcher.shutdown())
        };
        starter.join().unwrap();
        stopper.join().unwrap();

        // --- 3. ASSERT ---
        // A worker reported as running must still be serving refreshes.
        fetcher.fetch(0, FieldId::PCIE_TX);
        if fetcher.is_running() {
            wait_until(|| fetcher.cached_value(tx()).is_some());
        } else {
            assert_eq!(fetcher.pending_refreshes(), 0);
        }
        fetcher.shutdown();
    }
}
