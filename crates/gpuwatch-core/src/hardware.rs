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

//! The hardware query capability consumed by the fetch engine.
//!
//! Backends (a vendor library binding, a simulator) implement [`DeviceQuery`].
//! Every call is synchronous, may be slow, and reports a native [`HwStatus`]
//! on failure. The engine translates those codes once, in [`crate::status`].

use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

/// Result of a single hardware call.
pub type HwResult<T> = Result<T, HwStatus>;

/// Native failure codes reported by the hardware query library.
///
/// Success is the `Ok` side of a [`HwResult`]; numeric code `0` therefore has
/// no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HwStatus {
    /// Invalid arguments were passed.
    InvalidArgs,
    /// The device or function does not support the request.
    NotSupported,
    /// A sysfs/driver file could not be accessed.
    FileError,
    /// Insufficient privileges.
    Permission,
    /// Out of memory or counter resources.
    OutOfResources,
    /// An internal exception was caught by the library.
    InternalException,
    /// An input index was out of bounds.
    InputOutOfBounds,
    /// The library was not initialised.
    InitError,
    /// The function is not implemented.
    NotYetImplemented,
    /// An item was not found.
    NotFound,
    /// An output buffer was too small.
    InsufficientSize,
    /// The call was interrupted.
    Interrupt,
    /// The returned data had an unexpected size.
    UnexpectedSize,
    /// No data was available.
    NoData,
    /// The returned data was malformed.
    UnexpectedData,
    /// The device was busy.
    Busy,
    /// A reference counter overflowed.
    RefcountOverflow,
    /// The library reported an unknown error.
    UnknownError,
    /// A numeric code this crate does not know about.
    Other(u32),
}

impl HwStatus {
    /// Maps a raw numeric code to a status. Returns `None` for success (`0`).
    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            0 => return None,
            1 => Self::InvalidArgs,
            2 => Self::NotSupported,
            3 => Self::FileError,
            4 => Self::Permission,
            5 => Self::OutOfResources,
            6 => Self::InternalException,
            7 => Self::InputOutOfBounds,
            8 => Self::InitError,
            9 => Self::NotYetImplemented,
            10 => Self::NotFound,
            11 => Self::InsufficientSize,
            12 => Self::Interrupt,
            13 => Self::UnexpectedSize,
            14 => Self::NoData,
            15 => Self::UnexpectedData,
            16 => Self::Busy,
            17 => Self::RefcountOverflow,
            u32::MAX => Self::UnknownError,
            other => Self::Other(other),
        };
        Some(status)
    }

    /// Returns the raw numeric code for this status.
    pub fn code(self) -> u32 {
        match self {
            Self::InvalidArgs => 1,
            Self::NotSupported => 2,
            Self::FileError => 3,
            Self::Permission => 4,
            Self::OutOfResources => 5,
            Self::InternalException => 6,
            Self::InputOutOfBounds => 7,
            Self::InitError => 8,
            Self::NotYetImplemented => 9,
            Self::NotFound => 10,
            Self::InsufficientSize => 11,
            Self::Interrupt => 12,
            Self::UnexpectedSize => 13,
            Self::NoData => 14,
            Self::UnexpectedData => 15,
            Self::Busy => 16,
            Self::RefcountOverflow => 17,
            Self::UnknownError => u32::MAX,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for HwStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (code {})", self.code())
    }
}

/// Clock domains whose current frequency can be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockDomain {
    /// The graphics/system clock.
    System,
    /// The memory clock.
    Memory,
}

/// The frequency table of a clock domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frequencies {
    /// Supported frequencies in Hz.
    pub supported_hz: Vec<u64>,
    /// Index of the active entry in `supported_hz`.
    pub current: usize,
}

impl Frequencies {
    /// The active frequency, if `current` indexes a supported entry.
    pub fn current_hz(&self) -> Option<u64> {
        self.supported_hz.get(self.current).copied()
    }
}

/// Temperature sensors exposed by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TempSensor {
    /// The die edge sensor.
    Edge,
    /// The on-package memory sensor.
    Memory,
}

/// Hardware sub-blocks that keep their own ECC bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u64)]
pub enum GpuBlock {
    /// Unified memory controller.
    Umc = 1 << 0,
    /// System DMA.
    Sdma = 1 << 1,
    /// Graphics engine.
    Gfx = 1 << 2,
    /// Memory management hub.
    Mmhub = 1 << 3,
    /// ATC hub.
    Athub = 1 << 4,
    /// PCIe bus interface.
    PcieBif = 1 << 5,
    /// Host data path.
    Hdp = 1 << 6,
    /// XGMI WAFL link.
    XgmiWafl = 1 << 7,
    /// Data fabric.
    Df = 1 << 8,
    /// System management network.
    Smn = 1 << 9,
    /// Security engine.
    Sem = 1 << 10,
    /// Microprocessor 0.
    Mp0 = 1 << 11,
    /// Microprocessor 1.
    Mp1 = 1 << 12,
    /// Fuse block.
    Fuse = 1 << 13,
}

impl GpuBlock {
    /// Every block, in ascending bit order.
    pub const ALL: [GpuBlock; 14] = [
        GpuBlock::Umc,
        GpuBlock::Sdma,
        GpuBlock::Gfx,
        GpuBlock::Mmhub,
        GpuBlock::Athub,
        GpuBlock::PcieBif,
        GpuBlock::Hdp,
        GpuBlock::XgmiWafl,
        GpuBlock::Df,
        GpuBlock::Smn,
        GpuBlock::Sem,
        GpuBlock::Mp0,
        GpuBlock::Mp1,
        GpuBlock::Fuse,
    ];

    /// The block's bit-flag value.
    pub fn bit(self) -> u64 {
        self as u64
    }

    /// Short human-readable block name.
    pub fn name(self) -> &'static str {
        match self {
            GpuBlock::Umc => "UMC",
            GpuBlock::Sdma => "SDMA",
            GpuBlock::Gfx => "GFX",
            GpuBlock::Mmhub => "MMHUB",
            GpuBlock::Athub => "ATHUB",
            GpuBlock::PcieBif => "PCIE_BIF",
            GpuBlock::Hdp => "HDP",
            GpuBlock::XgmiWafl => "XGMI_WAFL",
            GpuBlock::Df => "DF",
            GpuBlock::Smn => "SMN",
            GpuBlock::Sem => "SEM",
            GpuBlock::Mp0 => "MP0",
            GpuBlock::Mp1 => "MP1",
            GpuBlock::Fuse => "FUSE",
        }
    }
}

/// RAS (ECC) state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasState {
    /// No errors present.
    None,
    /// ECC is disabled for the block.
    Disabled,
    /// A parity error of unknown kind.
    Parity,
    /// A single correctable error.
    SingleCorrectable,
    /// Multiple uncorrectable errors.
    MultipleUncorrectable,
    /// The block's data is poisoned.
    Poison,
    /// ECC is enabled.
    Enabled,
}

/// Per-block ECC error totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCount {
    /// Correctable error count.
    pub correctable: u64,
    /// Uncorrectable error count.
    pub uncorrectable: u64,
}

/// Result of one PCIe throughput measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PcieThroughput {
    /// Packets sent during the sample window.
    pub sent: u64,
    /// Packets received during the sample window.
    pub received: u64,
    /// Maximum packet size in bytes.
    pub max_packet_size: u64,
}

/// Groups of performance counters sharing hardware slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterGroup {
    /// XGMI link counters.
    Xgmi,
}

/// Raw hardware counter events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterEvent {
    /// NOPs sent on XGMI link 0.
    Xgmi0NopTx,
    /// Outgoing requests on XGMI link 0.
    Xgmi0RequestTx,
    /// Outgoing responses on XGMI link 0.
    Xgmi0ResponseTx,
    /// Data beats sent on XGMI link 0.
    Xgmi0BeatsTx,
    /// NOPs sent on XGMI link 1.
    Xgmi1NopTx,
    /// Outgoing requests on XGMI link 1.
    Xgmi1RequestTx,
    /// Outgoing responses on XGMI link 1.
    Xgmi1ResponseTx,
    /// Data beats sent on XGMI link 1.
    Xgmi1BeatsTx,
}

impl CounterEvent {
    /// The counter group this event is allocated from.
    pub fn group(self) -> CounterGroup {
        CounterGroup::Xgmi
    }
}

/// Opaque identity of a live hardware counter, issued by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawCounter(pub u64);

/// A counter's accumulated value and its activity window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterReading {
    /// Accumulated event count.
    pub value: u64,
    /// Time the counter has been enabled, in nanoseconds.
    pub time_enabled_ns: u64,
    /// Time the counter has actually been counting, in nanoseconds.
    pub time_running_ns: u64,
}

/// The synchronous hardware query capability.
///
/// Implementations must be callable from the caller threads and from the
/// refresh worker at the same time.
pub trait DeviceQuery: Send + Sync + Debug + 'static {
    /// Number of devices the library can monitor.
    fn device_count(&self) -> HwResult<u32>;

    /// Marketing name of the device.
    fn device_name(&self, device: u32) -> HwResult<String>;

    /// VRAM currently in use, in bytes.
    fn memory_usage(&self, device: u32) -> HwResult<u64>;

    /// Total VRAM, in bytes.
    fn memory_total(&self, device: u32) -> HwResult<u64>;

    /// Average power draw, in microwatts.
    fn power_average(&self, device: u32) -> HwResult<u64>;

    /// Frequency table of a clock domain.
    fn clock_frequencies(&self, device: u32, domain: ClockDomain) -> HwResult<Frequencies>;

    /// Busy percentage (0-100).
    fn busy_percent(&self, device: u32) -> HwResult<u32>;

    /// Current temperature in millidegrees Celsius.
    fn temperature(&self, device: u32, sensor: TempSensor) -> HwResult<i64>;

    /// ECC state of one block.
    fn ecc_status(&self, device: u32, block: GpuBlock) -> HwResult<RasState>;

    /// ECC error totals of one block.
    fn ecc_count(&self, device: u32, block: GpuBlock) -> HwResult<ErrorCount>;

    /// PCIe traffic sampled over roughly one second. Expensive.
    fn pcie_throughput(&self, device: u32) -> HwResult<PcieThroughput>;

    /// Checks that a counter group is available on the device.
    fn counter_group_supported(&self, device: u32, group: CounterGroup) -> HwResult<()>;

    /// Number of free counter slots in a group.
    fn available_counters(&self, device: u32, group: CounterGroup) -> HwResult<u32>;

    /// Allocates a counter for an event.
    fn counter_create(&self, device: u32, event: CounterEvent) -> HwResult<RawCounter>;

    /// Starts counting.
    fn counter_start(&self, counter: RawCounter) -> HwResult<()>;

    /// Stops counting.
    fn counter_stop(&self, counter: RawCounter) -> HwResult<()>;

    /// Frees the counter and its hardware resources.
    fn counter_destroy(&self, counter: RawCounter) -> HwResult<()>;

    /// Reads the accumulated value and activity window.
    fn counter_read(&self, counter: RawCounter) -> HwResult<CounterReading>;
}
