// Test support: in-memory collaborators and dump image builders
//
// Shared by unit tests and the integration suite, and used by the CLI
// inspector to wrap an image file as a disk. Nothing here touches real
// storage or firmware.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::collate::{FragmentInfo, FragmentStore};
use crate::config::ServiceConfig;
use crate::error::StorageError;
use crate::firmware::{ConfigurationTable, FirmwareTable, RAW_DUMP_VIA_DEDICATED_PARTITION};
use crate::instance::DumpInstance;
use crate::rawdump::{
    RAW_DUMP_FLAGS_VALID, RAW_DUMP_HEADER_LEN, RAW_DUMP_HEADER_SIGNATURE, RAW_DUMP_HEADER_VERSION,
    RAW_DUMP_SECTION_LEN, RAW_DUMP_SECTION_NAME_LEN, RAW_DUMP_SECTION_VERSION,
};
use crate::service::SubmissionSink;
use crate::storage::{BlockStorage, DiskHandle, MediaKind, PartitionInfo, RAW_DUMP_PARTITION_GUID};

/// In-memory block storage and fragment store
///
/// Disks are plain byte vectors; partitions and fragments are registered
/// explicitly. Reads are counted so tests can assert that the readiness
/// gate precedes all storage I/O.
pub struct MemStorage {
    disks: Vec<Vec<u8>>,
    partitions: Vec<PartitionInfo>,
    fragments: Vec<FragmentInfo>,
    processed: Mutex<HashSet<u32>>,
    reads: Mutex<u64>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            disks: Vec::new(),
            partitions: Vec::new(),
            fragments: Vec::new(),
            processed: Mutex::new(HashSet::new()),
            reads: Mutex::new(0),
        }
    }

    pub fn add_disk(&mut self, data: Vec<u8>) -> DiskHandle {
        self.disks.push(data);
        DiskHandle((self.disks.len() - 1) as u32)
    }

    pub fn disk_data_mut(&mut self, disk: DiskHandle) -> &mut Vec<u8> {
        &mut self.disks[disk.0 as usize]
    }

    pub fn add_partition(
        &mut self,
        disk: DiskHandle,
        type_guid: [u8; 16],
        offset: u64,
        length: u64,
        media: MediaKind,
    ) {
        self.partitions.push(PartitionInfo {
            disk,
            type_guid,
            offset,
            length,
            media,
        });
    }

    /// Place a dump image on a fresh disk and register the dedicated
    /// raw-dump partition over it
    pub fn add_raw_partition(&mut self, image: Vec<u8>, offset: u64) -> DiskHandle {
        let length = image.len() as u64;
        let mut data = vec![0u8; offset as usize];
        data.extend_from_slice(&image);
        let disk = self.add_disk(data);
        self.add_partition(disk, RAW_DUMP_PARTITION_GUID, offset, length, MediaKind::Fixed);
        disk
    }

    pub fn add_fragment(&mut self, disk: DiskHandle, sequence: u32, offset: u64, length: u64) {
        self.add_fragment_with_markers(disk, sequence, offset, length, false, false);
    }

    pub fn add_fragment_with_markers(
        &mut self,
        disk: DiskHandle,
        sequence: u32,
        offset: u64,
        length: u64,
        has_error_marker: bool,
        processed: bool,
    ) {
        self.fragments.push(FragmentInfo {
            sequence,
            disk,
            offset,
            length,
            has_error_marker,
            processed,
        });
    }

    /// Whether `mark_processed` was called for this sequence number
    pub fn is_processed(&self, sequence: u32) -> bool {
        match self.processed.lock() {
            Ok(set) => set.contains(&sequence),
            Err(_) => false,
        }
    }

    /// Number of `read_blocks` calls so far
    pub fn read_count(&self) -> u64 {
        match self.reads.lock() {
            Ok(count) => *count,
            Err(_) => u64::MAX,
        }
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStorage for MemStorage {
    fn enumerate_partitions(&self) -> Result<Vec<PartitionInfo>, StorageError> {
        Ok(self.partitions.clone())
    }

    fn read_blocks(
        &self,
        disk: DiskHandle,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, StorageError> {
        if let Ok(mut count) = self.reads.lock() {
            *count += 1;
        }
        let data = self
            .disks
            .get(disk.0 as usize)
            .ok_or_else(|| StorageError::Unavailable {
                details: format!("no such disk: {}", disk.0),
            })?;
        let start = offset as usize;
        let end = start.checked_add(length).filter(|&e| e <= data.len());
        match end {
            Some(end) => Ok(data[start..end].to_vec()),
            None => Err(StorageError::Unavailable {
                details: format!(
                    "read of {:#x} bytes at {:#x} beyond disk end {:#x}",
                    length,
                    offset,
                    data.len()
                ),
            }),
        }
    }
}

impl FragmentStore for MemStorage {
    fn fragments(&self) -> Result<Vec<FragmentInfo>, StorageError> {
        let processed = self
            .processed
            .lock()
            .map_err(|_| StorageError::Unavailable {
                details: "fragment bookkeeping lock poisoned".to_string(),
            })?;
        Ok(self
            .fragments
            .iter()
            .map(|f| FragmentInfo {
                processed: f.processed || processed.contains(&f.sequence),
                ..*f
            })
            .collect())
    }

    fn mark_processed(&self, sequence: u32) -> Result<(), StorageError> {
        let mut processed = self
            .processed
            .lock()
            .map_err(|_| StorageError::Unavailable {
                details: "fragment bookkeeping lock poisoned".to_string(),
            })?;
        processed.insert(sequence);
        Ok(())
    }
}

/// Firmware source returning a fixed configuration table
pub struct StaticFirmware(pub ConfigurationTable);

impl StaticFirmware {
    /// Abnormal reset recorded, dedicated-partition capability present
    pub fn abnormal_reset() -> Self {
        Self(ConfigurationTable {
            version: 1,
            abnormal_reset_occurred: 1,
            offline_memory_dump_capable: RAW_DUMP_VIA_DEDICATED_PARTITION,
        })
    }

    /// Clean boot, capability present but no dump expected
    pub fn clean_boot() -> Self {
        Self(ConfigurationTable {
            version: 1,
            abnormal_reset_occurred: 0,
            offline_memory_dump_capable: RAW_DUMP_VIA_DEDICATED_PARTITION,
        })
    }
}

impl FirmwareTable for StaticFirmware {
    fn read_table(&self) -> ConfigurationTable {
        self.0
    }
}

/// Submission sink that records instance ids, optionally failing
pub struct RecordingSink {
    submitted: Mutex<Vec<u64>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn submissions(&self) -> usize {
        match self.submitted.lock() {
            Ok(ids) => ids.len(),
            Err(_) => 0,
        }
    }

    pub fn distinct_instances(&self) -> usize {
        match self.submitted.lock() {
            Ok(ids) => {
                let unique: HashSet<u64> = ids.iter().copied().collect();
                unique.len()
            }
            Err(_) => 0,
        }
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionSink for RecordingSink {
    fn submit(&self, instance: &DumpInstance) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("sink configured to fail");
        }
        let mut ids = self
            .submitted
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?;
        ids.push(instance.id.0);
        Ok(())
    }
}

struct SectionSpec {
    raw_type: u32,
    size: u64,
    ddr_base: u64,
    name: &'static str,
    flags: u32,
}

/// Builds well-formed dump images, with hooks to corrupt them
///
/// Payload offsets are laid out sequentially after the section table;
/// `dump_size` covers header, table, and payloads. The image is padded to
/// `total_size` so it can stand in for a whole partition.
pub struct DumpImageBuilder {
    signature: u64,
    header_version: u32,
    header_flags: u32,
    declared_sections: Option<u32>,
    total_size: usize,
    sections: Vec<SectionSpec>,
}

impl DumpImageBuilder {
    pub fn new() -> Self {
        Self {
            signature: RAW_DUMP_HEADER_SIGNATURE,
            header_version: RAW_DUMP_HEADER_VERSION,
            header_flags: RAW_DUMP_FLAGS_VALID,
            declared_sections: None,
            total_size: 0x1000,
            sections: Vec::new(),
        }
    }

    pub fn ddr_section(mut self, base: u64, size: u64) -> Self {
        self.sections.push(SectionSpec {
            raw_type: 1,
            size,
            ddr_base: base,
            name: "DDR_CS0",
            flags: RAW_DUMP_FLAGS_VALID,
        });
        self
    }

    pub fn cpu_context_section(mut self, size: u64) -> Self {
        self.sections.push(SectionSpec {
            raw_type: 2,
            size,
            ddr_base: 0,
            name: "CPU_CONTEXT",
            flags: RAW_DUMP_FLAGS_VALID,
        });
        self
    }

    pub fn sv_section(mut self, size: u64) -> Self {
        self.sections.push(SectionSpec {
            raw_type: 3,
            size,
            ddr_base: 0,
            name: "SV_DIAG",
            flags: RAW_DUMP_FLAGS_VALID,
        });
        self
    }

    pub fn bad_signature(mut self) -> Self {
        self.signature = 0;
        self
    }

    pub fn header_version(mut self, version: u32) -> Self {
        self.header_version = version;
        self
    }

    pub fn header_flags(mut self, flags: u32) -> Self {
        self.header_flags = flags;
        self
    }

    /// Override the declared section count without changing the table
    pub fn declared_sections(mut self, count: u32) -> Self {
        self.declared_sections = Some(count);
        self
    }

    pub fn total_size(mut self, total_size: usize) -> Self {
        self.total_size = total_size;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let table_len = self.sections.len() * RAW_DUMP_SECTION_LEN;
        let payload_start = RAW_DUMP_HEADER_LEN + table_len;
        let payload_total: u64 = self.sections.iter().map(|s| s.size).sum();
        let dump_size = payload_start as u64 + payload_total;
        let sections_count = self
            .declared_sections
            .unwrap_or(self.sections.len() as u32);

        let mut image = vec![0u8; RAW_DUMP_HEADER_LEN];
        image[0..8].copy_from_slice(&self.signature.to_le_bytes());
        image[8..12].copy_from_slice(&self.header_version.to_le_bytes());
        image[12..16].copy_from_slice(&self.header_flags.to_le_bytes());
        image[36..44].copy_from_slice(&dump_size.to_le_bytes());
        image[44..52].copy_from_slice(&dump_size.to_le_bytes());
        image[52..56].copy_from_slice(&sections_count.to_le_bytes());

        let mut offset = payload_start as u64;
        for section in &self.sections {
            let mut d = vec![0u8; RAW_DUMP_SECTION_LEN];
            d[0..4].copy_from_slice(&section.flags.to_le_bytes());
            d[4..8].copy_from_slice(&RAW_DUMP_SECTION_VERSION.to_le_bytes());
            d[8..12].copy_from_slice(&section.raw_type.to_le_bytes());
            d[12..20].copy_from_slice(&offset.to_le_bytes());
            d[20..28].copy_from_slice(&section.size.to_le_bytes());
            d[28..36].copy_from_slice(&section.ddr_base.to_le_bytes());
            let name = section.name.as_bytes();
            let name_len = name.len().min(RAW_DUMP_SECTION_NAME_LEN - 1);
            d[44..44 + name_len].copy_from_slice(&name[..name_len]);
            image.extend_from_slice(&d);
            offset += section.size;
        }

        image.resize(image.len() + payload_total as usize, 0xDD);
        if image.len() < self.total_size {
            image.resize(self.total_size, 0);
        }
        image
    }
}

impl Default for DumpImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Service configuration sized for small in-memory test images
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.locator.min_partition_length = 512;
    config
}
