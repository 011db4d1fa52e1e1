// Firmware offline-dump configuration table detection
//
// The boot firmware publishes a small fixed table describing whether the
// last reset was abnormal and whether the bootloader is capable of writing
// an offline memory dump. The table is external mutable state outside the
// process; this module captures it as a read-only snapshot once per
// pipeline run.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

/// Lowest configuration table version this service understands
pub const CONFIG_TABLE_MIN_VERSION: u32 = 1;

/// Highest configuration table version this service understands
pub const CONFIG_TABLE_MAX_VERSION: u32 = 2;

/// Capability bit: dump written to a dedicated raw partition
pub const RAW_DUMP_VIA_DEDICATED_PARTITION: u32 = 0x1;

/// Capability bit: dump written through a disk region map
pub const RAW_DUMP_VIA_DISK_MAP: u32 = 0x2;

/// Snapshot of the firmware offline crash-dump configuration table
///
/// Field layout mirrors the firmware structure: three u32 values read in
/// one shot. The snapshot is immutable for the lifetime of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationTable {
    /// Table protocol version; must be 1 or 2
    pub version: u32,
    /// Non-zero when the last reset was abnormal
    pub abnormal_reset_occurred: u32,
    /// Capability bitmask (dedicated partition / disk map)
    pub offline_memory_dump_capable: u32,
}

/// Offline-dump support tier reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    /// No offline dump support
    None,
    /// Basic support: dump to the dedicated raw partition
    DedicatedPartition,
    /// Full support: dump through a disk region map
    DiskMap,
}

impl ConfigurationTable {
    /// Whether the firmware flagged the last reset as abnormal
    pub fn abnormal_reset(&self) -> bool {
        self.abnormal_reset_occurred != 0
    }

    /// Project the capability bitmask onto the support tier
    ///
    /// The disk-map bit outranks the dedicated-partition bit when both are
    /// set; unknown high bits do not grant any tier.
    pub fn capability_tier(&self) -> CapabilityTier {
        if self.offline_memory_dump_capable & RAW_DUMP_VIA_DISK_MAP != 0 {
            CapabilityTier::DiskMap
        } else if self.offline_memory_dump_capable & RAW_DUMP_VIA_DEDICATED_PARTITION != 0 {
            CapabilityTier::DedicatedPartition
        } else {
            CapabilityTier::None
        }
    }
}

/// Source of the firmware configuration table
///
/// The real implementation reads the fixed memory-mapped firmware
/// structure; tests substitute a static snapshot. A single read per run,
/// no other side effects.
pub trait FirmwareTable {
    /// Read the configuration table snapshot
    fn read_table(&self) -> ConfigurationTable;
}

/// Read and validate the firmware configuration table
///
/// Returns the snapshot when the protocol version is in the supported
/// {1, 2} set. Out-of-range versions indicate a firmware/protocol mismatch
/// and are reported as `UnsupportedVersion`, never clamped; the failure is
/// non-fatal to the caller but stops pipeline progression.
pub fn detect<T: FirmwareTable>(source: &T) -> Result<ConfigurationTable, DetectError> {
    let table = source.read_table();

    if table.version < CONFIG_TABLE_MIN_VERSION || table.version > CONFIG_TABLE_MAX_VERSION {
        warn!(
            "[Firmware] Configuration table version mismatch: expected {}..={}, got {}",
            CONFIG_TABLE_MIN_VERSION, CONFIG_TABLE_MAX_VERSION, table.version
        );
        return Err(DetectError::UnsupportedVersion {
            version: table.version,
        });
    }

    info!(
        "[Firmware] Configuration table: version={}, abnormal_reset={}, capable={:#x}",
        table.version,
        table.abnormal_reset(),
        table.offline_memory_dump_capable
    );

    Ok(table)
}
