// Raw dump header parsing and verification

use log::{error, info};
use serde::Serialize;

use crate::error::VerifyError;
use crate::rawdump::{
    read_u32, read_u64, RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE, RAW_DUMP_FLAGS_VALID,
    RAW_DUMP_HEADER_LEN, RAW_DUMP_HEADER_SIGNATURE, RAW_DUMP_HEADER_VERSION,
};
use crate::storage::{BlockStorage, DumpRegion};

/// Decoded raw dump header
///
/// Fields mirror the packed on-disk layout one for one; decoding performs
/// no validation beyond length. Judging the values is `verify_header`'s
/// job, so an inspector can still show a corrupt header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawDumpHeader {
    pub signature: u64,
    pub version: u32,
    pub flags: u32,
    pub os_data: u64,
    pub cpu_context: u64,
    pub reset_trigger: u32,
    /// Bytes actually written by the bootloader
    pub dump_size: u64,
    /// Bytes the bootloader wanted to write
    pub total_dump_size_required: u64,
    pub sections_count: u32,
}

impl RawDumpHeader {
    /// Decode the packed header from the start of a dump region
    pub fn parse(bytes: &[u8]) -> Result<Self, VerifyError> {
        if bytes.len() < RAW_DUMP_HEADER_LEN {
            return Err(VerifyError::InvalidHeader {
                reason: format!(
                    "header needs {} bytes, got {}",
                    RAW_DUMP_HEADER_LEN,
                    bytes.len()
                ),
            });
        }
        Ok(Self {
            signature: read_u64(bytes, 0),
            version: read_u32(bytes, 8),
            flags: read_u32(bytes, 12),
            os_data: read_u64(bytes, 16),
            cpu_context: read_u64(bytes, 24),
            reset_trigger: read_u32(bytes, 32),
            dump_size: read_u64(bytes, 36),
            total_dump_size_required: read_u64(bytes, 44),
            sections_count: read_u32(bytes, 52),
        })
    }

    /// The bootloader ran out of storage before finishing the dump
    pub fn is_truncated(&self) -> bool {
        self.flags & RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE != 0
    }
}

/// Which header checks passed, in check order
///
/// Kept even on failure so logs and the inspector show exactly how far a
/// corrupt header got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeaderChecklist {
    pub signature_valid: bool,
    pub version_valid: bool,
    pub flags_valid: bool,
    pub dump_size_valid: bool,
    pub sections_count_valid: bool,
}

impl HeaderChecklist {
    pub fn is_complete(&self) -> bool {
        self.signature_valid
            && self.version_valid
            && self.flags_valid
            && self.dump_size_valid
            && self.sections_count_valid
    }

    /// Run every check against a decoded header
    pub fn evaluate(header: &RawDumpHeader, region_length: u64) -> Self {
        let known_flags = RAW_DUMP_FLAGS_VALID | RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE;
        Self {
            signature_valid: header.signature == RAW_DUMP_HEADER_SIGNATURE,
            version_valid: header.version == RAW_DUMP_HEADER_VERSION,
            flags_valid: header.flags & RAW_DUMP_FLAGS_VALID != 0
                && header.flags & !known_flags == 0,
            dump_size_valid: header.dump_size != 0 && header.dump_size <= region_length,
            sections_count_valid: header.sections_count != 0,
        }
    }

    fn first_failure(&self, header: &RawDumpHeader) -> Option<String> {
        if !self.signature_valid {
            return Some(format!("bad signature {:#x}", header.signature));
        }
        if !self.version_valid {
            return Some(format!("unsupported header version {:#x}", header.version));
        }
        if !self.flags_valid {
            return Some(format!("bad flags {:#x}", header.flags));
        }
        if !self.dump_size_valid {
            return Some(format!("bad dump size {:#x}", header.dump_size));
        }
        if !self.sections_count_valid {
            return Some("zero sections count".to_string());
        }
        None
    }
}

/// A header that passed every check, with its checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifiedHeader {
    pub header: RawDumpHeader,
    pub checklist: HeaderChecklist,
}

/// Read and verify the raw dump header at the start of a region
///
/// Any failed check aborts the run; nothing downstream ever sees an
/// unverified header.
pub fn verify_header<S: BlockStorage>(
    region: &DumpRegion<'_, S>,
) -> Result<VerifiedHeader, VerifyError> {
    let bytes = region.read_at(0, RAW_DUMP_HEADER_LEN)?;
    let header = RawDumpHeader::parse(&bytes)?;
    let checklist = HeaderChecklist::evaluate(&header, region.len());

    if let Some(reason) = checklist.first_failure(&header) {
        error!(
            "[Verify] Header rejected: {} (checklist: {:?})",
            reason, checklist
        );
        return Err(VerifyError::InvalidHeader { reason });
    }

    info!(
        "[Verify] Header ok: dump_size={:#x}, sections={}, truncated={}",
        header.dump_size,
        header.sections_count,
        header.is_truncated()
    );
    Ok(VerifiedHeader { header, checklist })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DumpRegion;
    use crate::testing::MemStorage;

    fn header_bytes(
        signature: u64,
        version: u32,
        flags: u32,
        dump_size: u64,
        sections_count: u32,
    ) -> Vec<u8> {
        let mut bytes = vec![0u8; RAW_DUMP_HEADER_LEN];
        bytes[0..8].copy_from_slice(&signature.to_le_bytes());
        bytes[8..12].copy_from_slice(&version.to_le_bytes());
        bytes[12..16].copy_from_slice(&flags.to_le_bytes());
        bytes[36..44].copy_from_slice(&dump_size.to_le_bytes());
        bytes[52..56].copy_from_slice(&sections_count.to_le_bytes());
        bytes
    }

    fn good_bytes() -> Vec<u8> {
        header_bytes(
            RAW_DUMP_HEADER_SIGNATURE,
            RAW_DUMP_HEADER_VERSION,
            RAW_DUMP_FLAGS_VALID,
            0x400,
            3,
        )
    }

    #[test]
    fn test_parse_decodes_packed_fields() {
        let mut bytes = good_bytes();
        bytes[32..36].copy_from_slice(&7u32.to_le_bytes());
        let header = RawDumpHeader::parse(&bytes).expect("well-formed header");
        assert_eq!(header.signature, RAW_DUMP_HEADER_SIGNATURE);
        assert_eq!(header.version, RAW_DUMP_HEADER_VERSION);
        assert_eq!(header.reset_trigger, 7);
        assert_eq!(header.dump_size, 0x400);
        assert_eq!(header.sections_count, 3);
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        assert!(matches!(
            RawDumpHeader::parse(&[0u8; 20]),
            Err(VerifyError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_checklist_flags_each_failure() {
        let header = RawDumpHeader::parse(&header_bytes(0xDEAD, 0x999, 0x8, 0, 0))
            .expect("parse is judgement-free");
        let checklist = HeaderChecklist::evaluate(&header, 0x10000);
        assert!(!checklist.signature_valid);
        assert!(!checklist.version_valid);
        assert!(!checklist.flags_valid);
        assert!(!checklist.dump_size_valid);
        assert!(!checklist.sections_count_valid);
        assert!(!checklist.is_complete());
    }

    #[test]
    fn test_truncated_dump_flag_is_still_valid() {
        let header = RawDumpHeader::parse(&header_bytes(
            RAW_DUMP_HEADER_SIGNATURE,
            RAW_DUMP_HEADER_VERSION,
            RAW_DUMP_FLAGS_VALID | RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE,
            0x400,
            2,
        ))
        .expect("parse");
        let checklist = HeaderChecklist::evaluate(&header, 0x10000);
        assert!(checklist.flags_valid);
        assert!(header.is_truncated());
    }

    #[test]
    fn test_dump_size_must_fit_region() {
        let header = RawDumpHeader::parse(&good_bytes()).expect("parse");
        let checklist = HeaderChecklist::evaluate(&header, 0x100);
        assert!(!checklist.dump_size_valid, "dump larger than its region");
    }

    #[test]
    fn test_verify_header_accepts_good_region() {
        let mut storage = MemStorage::new();
        let disk = storage.add_disk(good_bytes());
        storage.disk_data_mut(disk).resize(0x1000, 0);

        let region = DumpRegion::new(&storage, disk, 0, 0x1000);
        let verified = verify_header(&region).expect("good header");
        assert!(verified.checklist.is_complete());
        assert_eq!(verified.header.sections_count, 3);
    }

    #[test]
    fn test_verify_header_rejects_bad_signature() {
        let mut bytes = good_bytes();
        bytes[0] = 0;
        let mut storage = MemStorage::new();
        let disk = storage.add_disk(bytes);
        storage.disk_data_mut(disk).resize(0x1000, 0);

        let region = DumpRegion::new(&storage, disk, 0, 0x1000);
        assert!(matches!(
            verify_header(&region),
            Err(VerifyError::InvalidHeader { .. })
        ));
    }
}
