// Raw dump binary structure
//
// On-disk layout written by the secondary bootloader after an abnormal
// reset: a fixed packed header, immediately followed by the section
// descriptor table, followed by section payloads. All fields are
// little-endian and unaligned, so parsing is explicit byte-slice reads.

pub mod header;
pub mod section;

pub use header::{verify_header, HeaderChecklist, RawDumpHeader, VerifiedHeader};
pub use section::{verify_section_table, SectionDescriptor, SectionStats, SectionTable, SectionType};

/// "Raw_Dmp!" in little-endian byte order
pub const RAW_DUMP_HEADER_SIGNATURE: u64 = 0x21706D44_5F776152;

/// Raw dump header format version
pub const RAW_DUMP_HEADER_VERSION: u32 = 0x0000_1000;

/// Header/section flag: the dump completed
pub const RAW_DUMP_FLAGS_VALID: u32 = 0x1;

/// Header/section flag: the dump ran out of storage partway
pub const RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE: u32 = 0x2;

/// Per-section header format version
pub const RAW_DUMP_SECTION_VERSION: u32 = 0x0000_1000;

/// Packed raw dump header size in bytes
pub const RAW_DUMP_HEADER_LEN: usize = 56;

/// Packed section descriptor size in bytes
pub const RAW_DUMP_SECTION_LEN: usize = 64;

/// Section name field length in bytes
pub const RAW_DUMP_SECTION_NAME_LEN: usize = 20;

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}
