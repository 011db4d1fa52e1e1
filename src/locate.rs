// Partition locator - finds the raw dump left behind by the bootloader
//
// Discovery order matches the bootloader contract: the dedicated raw-dump
// partition on embedded flash first, then file-based fragments on a
// removable card. Every malformed discovery fails with its own error kind;
// nothing is auto-corrected or retried within a run.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::collate::FragmentStore;
use crate::config::LocatorConfig;
use crate::error::{log_locate_error, LocateError};
use crate::storage::{BlockStorage, DiskHandle, MediaKind, PartitionInfo, RAW_DUMP_PARTITION_GUID};

/// Where the bootloader wrote the dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpLocation {
    Invalid,
    EmbeddedFlash,
    RemovableCard,
}

/// How the dump is stored at that location
///
/// Orthogonal to `DumpLocation`: a removable-card dump may be a raw
/// partition image or a discrete file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpFormat {
    Invalid,
    Raw,
    File,
}

/// A located raw dump region plus its classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedDump {
    pub disk: DiskHandle,
    /// Byte offset of the dump region on the disk
    pub offset: u64,
    /// Region length in bytes
    pub length: u64,
    location: DumpLocation,
    format: DumpFormat,
    /// Sequence number of the backing fragment, for file-based dumps
    sequence: Option<u32>,
}

impl LocatedDump {
    #[cfg(test)]
    pub(crate) fn for_tests(
        disk: DiskHandle,
        offset: u64,
        length: u64,
        location: DumpLocation,
        format: DumpFormat,
    ) -> Self {
        Self {
            disk,
            offset,
            length,
            location,
            format,
            sequence: None,
        }
    }

    /// Storage medium classification
    pub fn location(&self) -> DumpLocation {
        self.location
    }

    /// Storage format classification
    pub fn format(&self) -> DumpFormat {
        self.format
    }

    /// Sequence number of the backing fragment, for file-based dumps
    pub fn fragment_sequence(&self) -> Option<u32> {
        self.sequence
    }
}

/// Locate the raw dump on storage
///
/// Scans the partition namespace for the dedicated raw-dump partition GUID;
/// if absent, falls back to fragment discovery on removable media. An
/// `Invalid` classification on either the location or format axis is a hard
/// failure surfaced to the caller.
pub fn locate<S, F>(
    storage: &S,
    fragments: &F,
    config: &LocatorConfig,
) -> Result<LocatedDump, LocateError>
where
    S: BlockStorage,
    F: FragmentStore,
{
    info!("[Locate] Searching for the dedicated raw-dump partition");
    let partitions = storage.enumerate_partitions()?;

    if let Some(partition) = partitions
        .iter()
        .find(|p| p.type_guid == RAW_DUMP_PARTITION_GUID)
    {
        let located = classify_partition(partition, config)?;
        info!(
            "[Locate] Raw dump partition found: disk={}, offset={:#x}, length={:#x}",
            located.disk.0, located.offset, located.length
        );
        return Ok(located);
    }

    info!("[Locate] No dedicated partition; searching removable media for dump fragments");
    let mut candidates = fragments.fragments()?;
    candidates.retain(|f| f.is_eligible());
    candidates.sort_by_key(|f| f.sequence);

    let fragment = match candidates.first() {
        Some(fragment) => fragment,
        None => {
            let err = LocateError::Unknown {
                details: "no raw dump partition and no eligible fragments".to_string(),
            };
            log_locate_error(&err, "locate");
            return Err(err);
        }
    };

    if !fragment.disk.is_valid() {
        let err = LocateError::InvalidDiskHandle {
            disk: fragment.disk.0,
        };
        log_locate_error(&err, "locate/fragment");
        return Err(err);
    }

    info!(
        "[Locate] File-based dump fragment found: sequence={}, length={:#x}",
        fragment.sequence, fragment.length
    );
    Ok(LocatedDump {
        disk: fragment.disk,
        offset: fragment.offset,
        length: fragment.length,
        location: DumpLocation::RemovableCard,
        format: DumpFormat::File,
        sequence: Some(fragment.sequence),
    })
}

fn classify_partition(
    partition: &PartitionInfo,
    config: &LocatorConfig,
) -> Result<LocatedDump, LocateError> {
    if !partition.disk.is_valid() {
        let err = LocateError::InvalidDiskHandle {
            disk: partition.disk.0,
        };
        log_locate_error(&err, "locate/partition");
        return Err(err);
    }

    if partition.offset == 0 || partition.offset % config.sector_size != 0 {
        let err = LocateError::InvalidOffset {
            offset: partition.offset,
        };
        log_locate_error(&err, "locate/partition");
        return Err(err);
    }

    if partition.length < config.min_partition_length {
        warn!(
            "[Locate] Partition length {:#x} below minimum {:#x}",
            partition.length, config.min_partition_length
        );
        let err = LocateError::InvalidPartitionLength {
            length: partition.length,
        };
        log_locate_error(&err, "locate/partition");
        return Err(err);
    }

    let (location, format) = match partition.media {
        MediaKind::Fixed => (DumpLocation::EmbeddedFlash, DumpFormat::Raw),
        MediaKind::Removable => (DumpLocation::RemovableCard, DumpFormat::Raw),
        MediaKind::Unknown => {
            let err = LocateError::Unknown {
                details: "partition media classification is invalid".to_string(),
            };
            log_locate_error(&err, "locate/partition");
            return Err(err);
        }
    };

    Ok(LocatedDump {
        disk: partition.disk,
        offset: partition.offset,
        length: partition.length,
        location,
        format,
        sequence: None,
    })
}
