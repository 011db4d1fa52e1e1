// Raw block-storage access boundary
//
// The service never talks to platform storage drivers directly; everything
// goes through the narrow `BlockStorage` trait. Failures from the
// collaborator surface as `StorageError::Unavailable` and propagate through
// the pipeline unchanged.

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// GPT partition type GUID of the dedicated raw-dump partition,
/// in on-disk byte order
pub const RAW_DUMP_PARTITION_GUID: [u8; 16] = [
    0x23, 0xB3, 0xC9, 0x66, 0xFC, 0xF7, 0xB6, 0x48, 0xBF, 0x96, 0x6F, 0x32, 0xE3, 0x35, 0xA4,
    0x28,
];

/// Opaque handle identifying a disk within the storage collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskHandle(pub u32);

impl DiskHandle {
    /// Sentinel the collaborator uses for an unopenable disk
    pub const INVALID: DiskHandle = DiskHandle(u32::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Physical media backing a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Embedded flash (eMMC)
    Fixed,
    /// Removable card (SD)
    Removable,
    /// Collaborator could not classify the media
    Unknown,
}

/// One candidate region from partition enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub disk: DiskHandle,
    /// Partition type GUID in on-disk byte order
    pub type_guid: [u8; 16],
    /// Byte offset of the partition from the start of the disk
    pub offset: u64,
    /// Partition length in bytes
    pub length: u64,
    pub media: MediaKind,
}

/// Narrow raw block-read interface onto platform storage
///
/// Reads may block on I/O; timeout policy belongs to the implementor, not
/// this core. Implementations must return `StorageError::Unavailable` for
/// any failure, including short reads.
pub trait BlockStorage {
    /// Enumerate candidate partitions across all disks
    fn enumerate_partitions(&self) -> Result<Vec<PartitionInfo>, StorageError>;

    /// Read `length` bytes from `disk` starting at byte `offset`
    fn read_blocks(&self, disk: DiskHandle, offset: u64, length: usize)
        -> Result<Vec<u8>, StorageError>;
}

/// A bounded window onto one disk, used by the dump verifiers
///
/// All reads are relative to the region start and clamped to the region
/// length, so a verifier can never wander outside the located partition.
#[derive(Debug, Clone, Copy)]
pub struct DumpRegion<'a, S: BlockStorage> {
    storage: &'a S,
    disk: DiskHandle,
    offset: u64,
    length: u64,
}

impl<'a, S: BlockStorage> DumpRegion<'a, S> {
    pub fn new(storage: &'a S, disk: DiskHandle, offset: u64, length: u64) -> Self {
        Self {
            storage,
            disk,
            offset,
            length,
        }
    }

    /// Region length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Read `length` bytes at `rel_offset` from the region start
    ///
    /// Reads crossing the region end fail as `Unavailable` rather than
    /// returning truncated data.
    pub fn read_at(&self, rel_offset: u64, length: usize) -> Result<Vec<u8>, StorageError> {
        let end = rel_offset
            .checked_add(length as u64)
            .ok_or_else(|| StorageError::Unavailable {
                details: format!("read range overflows at offset {:#x}", rel_offset),
            })?;
        if end > self.length {
            return Err(StorageError::Unavailable {
                details: format!(
                    "read of {:#x} bytes at {:#x} exceeds region length {:#x}",
                    length, rel_offset, self.length
                ),
            });
        }
        self.storage
            .read_blocks(self.disk, self.offset + rel_offset, length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemStorage;

    #[test]
    fn test_region_reads_are_relative_and_bounded() {
        let mut storage = MemStorage::new();
        let disk = storage.add_disk(vec![0u8; 64]);
        storage.disk_data_mut(disk)[10] = 0xAB;

        let region = DumpRegion::new(&storage, disk, 8, 16);
        let bytes = region.read_at(2, 1).expect("in-bounds read");
        assert_eq!(bytes, vec![0xAB]);

        assert!(region.read_at(15, 2).is_err(), "read past region end");
        assert!(region.read_at(u64::MAX, 2).is_err(), "offset overflow");
    }

    #[test]
    fn test_invalid_disk_handle_sentinel() {
        assert!(!DiskHandle::INVALID.is_valid());
        assert!(DiskHandle(0).is_valid());
    }
}
