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

//! Field identifiers, the static field table, and field-kind classification.
//!
//! Adding a field means adding one row to [`FIELD_TABLE`]; the fetch engine
//! dispatches on the [`FieldKind`] found there and never on raw identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hardware::{ClockDomain, CounterEvent, TempSensor};

/// Identifier of one telemetry quantity.
///
/// Any `u32` is representable so identifiers received from clients can be
/// carried around before they are validated; only the associated constants
/// are recognised by [`FieldId::spec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub u32);

#[allow(missing_docs)]
impl FieldId {
    pub const GPU_COUNT: FieldId = FieldId(1);
    pub const DEV_NAME: FieldId = FieldId(2);
    pub const GPU_CLOCK: FieldId = FieldId(100);
    pub const MEM_CLOCK: FieldId = FieldId(101);
    pub const MEMORY_TEMP: FieldId = FieldId(200);
    pub const GPU_TEMP: FieldId = FieldId(201);
    pub const POWER_USAGE: FieldId = FieldId(300);
    pub const PCIE_TX: FieldId = FieldId(400);
    pub const PCIE_RX: FieldId = FieldId(401);
    pub const GPU_UTIL: FieldId = FieldId(500);
    pub const GPU_MEMORY_USAGE: FieldId = FieldId(501);
    pub const GPU_MEMORY_TOTAL: FieldId = FieldId(502);
    pub const ECC_CORRECT_TOTAL: FieldId = FieldId(600);
    pub const ECC_UNCORRECT_TOTAL: FieldId = FieldId(601);
    pub const XGMI_0_NOP_TX: FieldId = FieldId(700);
    pub const XGMI_0_REQUEST_TX: FieldId = FieldId(701);
    pub const XGMI_0_RESPONSE_TX: FieldId = FieldId(702);
    pub const XGMI_0_BEATS_TX: FieldId = FieldId(703);
    pub const XGMI_1_NOP_TX: FieldId = FieldId(704);
    pub const XGMI_1_REQUEST_TX: FieldId = FieldId(705);
    pub const XGMI_1_RESPONSE_TX: FieldId = FieldId(706);
    pub const XGMI_1_BEATS_TX: FieldId = FieldId(707);
    pub const XGMI_0_THROUGHPUT: FieldId = FieldId(708);
    pub const XGMI_1_THROUGHPUT: FieldId = FieldId(709);
}

impl FieldId {
    /// The table row for this field, if it is recognised.
    pub fn spec(self) -> Option<&'static FieldSpec> {
        FIELD_TABLE.iter().find(|spec| spec.id == self)
    }

    /// The dispatch kind for this field, if it is recognised.
    pub fn kind(self) -> Option<FieldKind> {
        self.spec().map(|spec| spec.kind)
    }

    /// Whether the field appears in the field table.
    pub fn is_supported(self) -> bool {
        self.spec().is_some()
    }

    /// Display name, or `None` for unrecognised identifiers.
    pub fn name(self) -> Option<&'static str> {
        self.spec().map(|spec| spec.name)
    }

    /// Looks a field up by its display name (case-sensitive).
    pub fn from_name(name: &str) -> Option<FieldId> {
        FIELD_TABLE
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.id)
    }

    /// For a pseudo (derived) field, the raw field whose counter backs it.
    pub fn raw_source(self) -> Option<FieldId> {
        PSEUDO_FIELDS
            .iter()
            .find(|(derived, _)| *derived == self)
            .map(|(_, raw)| *raw)
    }

    /// The field a counter handle is stored under: the raw source for pseudo
    /// fields, the field itself otherwise.
    pub fn counter_field(self) -> FieldId {
        self.raw_source().unwrap_or(self)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "UNKNOWN_FIELD({})", self.0),
        }
    }
}

/// Identity of a cache entry or counter handle: one field on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    /// Device index.
    pub device: u32,
    /// Field identifier.
    pub field: FieldId,
}

impl FieldKey {
    /// Creates a key.
    pub fn new(device: u32, field: FieldId) -> Self {
        Self { device, field }
    }

    /// The same device with a different field.
    pub fn with_field(self, field: FieldId) -> Self {
        Self { field, ..self }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.field)
    }
}

/// How a field's value is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One direct hardware query.
    Instant(InstantQuery),
    /// A sum over per-block hardware queries.
    Aggregate(EccTotal),
    /// A read of the field's own performance counter.
    Counter(CounterEvent),
    /// A transformation of another field's counter reading.
    DerivedCounter {
        /// Multiplier applied to the raw count before dividing by running time.
        scale: u64,
    },
    /// A value served from the cache and refreshed in the background.
    CachedAsync(AsyncQuery),
}

impl FieldKind {
    /// Whether the kind is backed by a counter handle.
    pub fn uses_counter(self) -> bool {
        matches!(self, FieldKind::Counter(_) | FieldKind::DerivedCounter { .. })
    }
}

/// The single hardware query behind an instant field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstantQuery {
    /// Number of monitored devices.
    DeviceCount,
    /// Device name (text).
    Name,
    /// VRAM in use.
    MemoryUsage,
    /// VRAM capacity.
    MemoryTotal,
    /// Average power.
    Power,
    /// Current frequency of a clock domain.
    Clock(ClockDomain),
    /// Busy percentage.
    Busy,
    /// Current temperature of a sensor.
    Temperature(TempSensor),
}

/// Which ECC total an aggregate field reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccTotal {
    /// Correctable errors.
    Correctable,
    /// Uncorrectable errors.
    Uncorrectable,
}

/// Expensive queries served through the refresh worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncQuery {
    /// PCIe sent/received, populating both PCIe fields from one call.
    PcieThroughput,
}

/// One row of the field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Identifier.
    pub id: FieldId,
    /// Display name.
    pub name: &'static str,
    /// Dispatch kind.
    pub kind: FieldKind,
}

const fn row(id: FieldId, name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { id, name, kind }
}

/// Bytes moved per XGMI data beat.
pub const XGMI_BYTES_PER_BEAT: u64 = 32;

/// Every recognised field.
pub static FIELD_TABLE: &[FieldSpec] = &[
    row(FieldId::GPU_COUNT, "GPU_COUNT", FieldKind::Instant(InstantQuery::DeviceCount)),
    row(FieldId::DEV_NAME, "DEV_NAME", FieldKind::Instant(InstantQuery::Name)),
    row(
        FieldId::GPU_CLOCK,
        "GPU_CLOCK",
        FieldKind::Instant(InstantQuery::Clock(ClockDomain::System)),
    ),
    row(
        FieldId::MEM_CLOCK,
        "MEM_CLOCK",
        FieldKind::Instant(InstantQuery::Clock(ClockDomain::Memory)),
    ),
    row(
        FieldId::MEMORY_TEMP,
        "MEMORY_TEMP",
        FieldKind::Instant(InstantQuery::Temperature(TempSensor::Memory)),
    ),
    row(
        FieldId::GPU_TEMP,
        "GPU_TEMP",
        FieldKind::Instant(InstantQuery::Temperature(TempSensor::Edge)),
    ),
    row(FieldId::POWER_USAGE, "POWER_USAGE", FieldKind::Instant(InstantQuery::Power)),
    row(FieldId::PCIE_TX, "PCIE_TX", FieldKind::CachedAsync(AsyncQuery::PcieThroughput)),
    row(FieldId::PCIE_RX, "PCIE_RX", FieldKind::CachedAsync(AsyncQuery::PcieThroughput)),
    row(FieldId::GPU_UTIL, "GPU_UTIL", FieldKind::Instant(InstantQuery::Busy)),
    row(
        FieldId::GPU_MEMORY_USAGE,
        "GPU_MEMORY_USAGE",
        FieldKind::Instant(InstantQuery::MemoryUsage),
    ),
    row(
        FieldId::GPU_MEMORY_TOTAL,
        "GPU_MEMORY_TOTAL",
        FieldKind::Instant(InstantQuery::MemoryTotal),
    ),
    row(
        FieldId::ECC_CORRECT_TOTAL,
        "ECC_CORRECT_TOTAL",
        FieldKind::Aggregate(EccTotal::Correctable),
    ),
    row(
        FieldId::ECC_UNCORRECT_TOTAL,
        "ECC_UNCORRECT_TOTAL",
        FieldKind::Aggregate(EccTotal::Uncorrectable),
    ),
    row(FieldId::XGMI_0_NOP_TX, "XGMI_0_NOP_TX", FieldKind::Counter(CounterEvent::Xgmi0NopTx)),
    row(
        FieldId::XGMI_0_REQUEST_TX,
        "XGMI_0_REQUEST_TX",
        FieldKind::Counter(CounterEvent::Xgmi0RequestTx),
    ),
    row(
        FieldId::XGMI_0_RESPONSE_TX,
        "XGMI_0_RESPONSE_TX",
        FieldKind::Counter(CounterEvent::Xgmi0ResponseTx),
    ),
    row(
        FieldId::XGMI_0_BEATS_TX,
        "XGMI_0_BEATS_TX",
        FieldKind::Counter(CounterEvent::Xgmi0BeatsTx),
    ),
    row(FieldId::XGMI_1_NOP_TX, "XGMI_1_NOP_TX", FieldKind::Counter(CounterEvent::Xgmi1NopTx)),
    row(
        FieldId::XGMI_1_REQUEST_TX,
        "XGMI_1_REQUEST_TX",
        FieldKind::Counter(CounterEvent::Xgmi1RequestTx),
    ),
    row(
        FieldId::XGMI_1_RESPONSE_TX,
        "XGMI_1_RESPONSE_TX",
        FieldKind::Counter(CounterEvent::Xgmi1ResponseTx),
    ),
    row(
        FieldId::XGMI_1_BEATS_TX,
        "XGMI_1_BEATS_TX",
        FieldKind::Counter(CounterEvent::Xgmi1BeatsTx),
    ),
    row(
        FieldId::XGMI_0_THROUGHPUT,
        "XGMI_0_THROUGHPUT",
        FieldKind::DerivedCounter {
            scale: XGMI_BYTES_PER_BEAT,
        },
    ),
    row(
        FieldId::XGMI_1_THROUGHPUT,
        "XGMI_1_THROUGHPUT",
        FieldKind::DerivedCounter {
            scale: XGMI_BYTES_PER_BEAT,
        },
    ),
];

/// Pseudo fields and the raw field whose counter they are computed from.
pub static PSEUDO_FIELDS: &[(FieldId, FieldId)] = &[
    (FieldId::XGMI_0_THROUGHPUT, FieldId::XGMI_0_BEATS_TX),
    (FieldId::XGMI_1_THROUGHPUT, FieldId::XGMI_1_BEATS_TX),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_ids_and_names_are_unique() {
        let ids: HashSet<_> = FIELD_TABLE.iter().map(|s| s.id).collect();
        let names: HashSet<_> = FIELD_TABLE.iter().map(|s| s.name).collect();
        assert_eq!(ids.len(), FIELD_TABLE.len());
        assert_eq!(names.len(), FIELD_TABLE.len());
    }

    #[test]
    fn unknown_ids_are_unsupported() {
        let bogus = FieldId(9999);
        assert!(!bogus.is_supported());
        assert_eq!(bogus.kind(), None);
        assert_eq!(bogus.to_string(), "UNKNOWN_FIELD(9999)");
    }

    #[test]
    fn name_lookup_round_trips() {
        for spec in FIELD_TABLE {
            assert_eq!(FieldId::from_name(spec.name), Some(spec.id));
        }
        assert_eq!(FieldId::from_name("gpu_temp"), None);
    }

    #[test]
    fn every_pseudo_field_is_derived_from_a_raw_counter() {
        for (derived, raw) in PSEUDO_FIELDS {
            assert!(matches!(
                derived.kind(),
                Some(FieldKind::DerivedCounter { .. })
            ));
            assert!(matches!(raw.kind(), Some(FieldKind::Counter(_))));
        }
    }

    #[test]
    fn every_derived_field_has_a_pseudo_mapping() {
        for spec in FIELD_TABLE {
            if let FieldKind::DerivedCounter { .. } = spec.kind {
                assert!(spec.id.raw_source().is_some(), "{}", spec.name);
            }
        }
    }

    #[test]
    fn counter_field_resolves_pseudo_fields_only() {
        assert_eq!(
            FieldId::XGMI_1_THROUGHPUT.counter_field(),
            FieldId::XGMI_1_BEATS_TX
        );
        assert_eq!(
            FieldId::XGMI_1_NOP_TX.counter_field(),
            FieldId::XGMI_1_NOP_TX
        );
    }

    #[test]
    fn pcie_fields_share_the_async_strategy() {
        assert_eq!(FieldId::PCIE_TX.kind(), FieldId::PCIE_RX.kind());
        assert_eq!(
            FieldId::PCIE_TX.kind(),
            Some(FieldKind::CachedAsync(AsyncQuery::PcieThroughput))
        );
    }

    #[test]
    fn key_display_uses_field_names() {
        let key = FieldKey::new(3, FieldId::GPU_TEMP);
        assert_eq!(key.to_string(), "3:GPU_TEMP");
        assert_eq!(key.with_field(FieldId::PCIE_RX).field, FieldId::PCIE_RX);
    }
}
