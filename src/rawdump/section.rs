// Section descriptor table parsing and verification

use log::{error, info};
use serde::Serialize;

use crate::config::SectionLimits;
use crate::error::VerifyError;
use crate::rawdump::{
    read_u32, read_u64, RawDumpHeader, RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE, RAW_DUMP_FLAGS_VALID,
    RAW_DUMP_HEADER_LEN, RAW_DUMP_SECTION_LEN, RAW_DUMP_SECTION_NAME_LEN, RAW_DUMP_SECTION_VERSION,
};
use crate::storage::{BlockStorage, DumpRegion};

/// Payload carried by one dump section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Reserved,
    /// A contiguous range of physical DDR memory
    DdrRange,
    /// Saved CPU register context
    CpuContext,
    /// Silicon-vendor specific blob
    SvSpecific,
}

impl SectionType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(SectionType::Reserved),
            1 => Some(SectionType::DdrRange),
            2 => Some(SectionType::CpuContext),
            3 => Some(SectionType::SvSpecific),
            _ => None,
        }
    }
}

/// Decoded section descriptor
///
/// Like the header, decoding is judgement-free; `raw_type` is kept so an
/// inspector can display descriptors the verifier would reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionDescriptor {
    pub flags: u32,
    pub version: u32,
    pub raw_type: u32,
    /// Payload offset from the start of the dump region
    pub offset: u64,
    /// Payload size in bytes
    pub size: u64,
    /// Physical DDR base address; meaningful only for DDR-range sections
    pub ddr_base: u64,
    /// NUL-terminated ASCII name from the descriptor
    pub name: String,
}

impl SectionDescriptor {
    /// Decode one packed descriptor
    pub fn parse(bytes: &[u8]) -> Result<Self, VerifyError> {
        if bytes.len() < RAW_DUMP_SECTION_LEN {
            return Err(VerifyError::InvalidSectionTable {
                reason: format!(
                    "descriptor needs {} bytes, got {}",
                    RAW_DUMP_SECTION_LEN,
                    bytes.len()
                ),
            });
        }
        let name_bytes = &bytes[44..44 + RAW_DUMP_SECTION_NAME_LEN];
        let name_end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(RAW_DUMP_SECTION_NAME_LEN);
        Ok(Self {
            flags: read_u32(bytes, 0),
            version: read_u32(bytes, 4),
            raw_type: read_u32(bytes, 8),
            offset: read_u64(bytes, 12),
            size: read_u64(bytes, 20),
            ddr_base: read_u64(bytes, 28),
            name: String::from_utf8_lossy(&name_bytes[..name_end]).into_owned(),
        })
    }

    pub fn section_type(&self) -> Option<SectionType> {
        SectionType::from_raw(self.raw_type)
    }
}

/// Per-type section tally for logs and the inspector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectionStats {
    pub reserved_count: u32,
    pub ddr_count: u32,
    pub cpu_context_count: u32,
    pub sv_count: u32,
    pub ddr_bytes: u64,
    pub cpu_context_bytes: u64,
    pub sv_bytes: u64,
    pub largest_sv_bytes: u64,
}

/// A section table that passed every structural check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionTable {
    pub sections: Vec<SectionDescriptor>,
    pub stats: SectionStats,
}

impl SectionTable {
    /// DDR-range sections in table order
    pub fn ddr_sections(&self) -> impl Iterator<Item = &SectionDescriptor> {
        self.sections
            .iter()
            .filter(|s| s.section_type() == Some(SectionType::DdrRange))
    }
}

/// Read and verify the section table following a verified header
///
/// Checks run in one deterministic pass over the descriptors: per-section
/// version/flags/type, the insufficient-storage flag confined to the final
/// section, DDR ranges ascending and non-overlapping, and cumulative
/// payload coverage within the located region.
pub fn verify_section_table<S: BlockStorage>(
    region: &DumpRegion<'_, S>,
    header: &RawDumpHeader,
    limits: &SectionLimits,
) -> Result<SectionTable, VerifyError> {
    let count = header.sections_count;
    if count == 0 {
        return fail("header declares no sections");
    }
    if count > limits.max_sections {
        return fail(&format!(
            "{} sections exceeds the limit of {}",
            count, limits.max_sections
        ));
    }

    let table_len = count as u64 * RAW_DUMP_SECTION_LEN as u64;
    let table_end = RAW_DUMP_HEADER_LEN as u64 + table_len;
    if table_end > region.len() {
        return fail(&format!(
            "table of {} descriptors does not fit a {:#x}-byte region",
            count,
            region.len()
        ));
    }

    let bytes = region.read_at(RAW_DUMP_HEADER_LEN as u64, table_len as usize)?;

    let mut sections = Vec::with_capacity(count as usize);
    let mut stats = SectionStats::default();
    let mut payload_total: u64 = 0;
    let mut prev_ddr: Option<(u64, u64)> = None;

    for index in 0..count as usize {
        let start = index * RAW_DUMP_SECTION_LEN;
        let section = SectionDescriptor::parse(&bytes[start..start + RAW_DUMP_SECTION_LEN])?;

        if section.version != RAW_DUMP_SECTION_VERSION {
            return fail(&format!(
                "section {} has unsupported version {:#x}",
                index, section.version
            ));
        }

        let known_flags = RAW_DUMP_FLAGS_VALID | RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE;
        if section.flags & RAW_DUMP_FLAGS_VALID == 0 || section.flags & !known_flags != 0 {
            return fail(&format!(
                "section {} has bad flags {:#x}",
                index, section.flags
            ));
        }
        let is_last = index as u32 == count - 1;
        if section.flags & RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE != 0 && !is_last {
            // Only the section the bootloader was writing when storage ran
            // out may carry the truncation flag.
            return fail(&format!(
                "section {} carries the insufficient-storage flag but is not last",
                index
            ));
        }

        let section_type = match section.section_type() {
            Some(t) => t,
            None => {
                return fail(&format!(
                    "section {} has unknown type {}",
                    index, section.raw_type
                ))
            }
        };

        payload_total = match payload_total.checked_add(section.size) {
            Some(total) => total,
            None => return fail(&format!("section {} overflows the payload total", index)),
        };

        match section_type {
            SectionType::Reserved => stats.reserved_count += 1,
            SectionType::DdrRange => {
                let end = match section
                    .ddr_base
                    .checked_add(section.size)
                    .and_then(|e| e.checked_sub(1))
                {
                    Some(end) if section.size > 0 => end,
                    _ => {
                        return fail(&format!(
                            "section {} has an unrepresentable DDR range: base {:#x}, size {:#x}",
                            index, section.ddr_base, section.size
                        ))
                    }
                };
                if let Some((_, prev_end)) = prev_ddr {
                    if section.ddr_base <= prev_end {
                        return fail(&format!(
                            "section {} DDR range is out of order or overlapping",
                            index
                        ));
                    }
                }
                prev_ddr = Some((section.ddr_base, end));
                stats.ddr_count += 1;
                stats.ddr_bytes += section.size;
            }
            SectionType::CpuContext => {
                stats.cpu_context_count += 1;
                stats.cpu_context_bytes += section.size;
            }
            SectionType::SvSpecific => {
                stats.sv_count += 1;
                stats.sv_bytes += section.size;
                stats.largest_sv_bytes = stats.largest_sv_bytes.max(section.size);
            }
        }

        sections.push(section);
    }

    if stats.ddr_count == 0 {
        return fail("no DDR-range sections");
    }
    if stats.ddr_count > limits.max_ddr_sections {
        return fail(&format!(
            "{} DDR sections exceeds the limit of {}",
            stats.ddr_count, limits.max_ddr_sections
        ));
    }

    match table_end.checked_add(payload_total) {
        Some(total) if total <= region.len() => {}
        _ => {
            return fail(&format!(
                "section payloads of {:#x} bytes exceed the region",
                payload_total
            ))
        }
    }

    info!(
        "[Verify] Section table ok: {} sections ({} DDR, {} CPU context, {} SV)",
        sections.len(),
        stats.ddr_count,
        stats.cpu_context_count,
        stats.sv_count
    );
    Ok(SectionTable { sections, stats })
}

fn fail(reason: &str) -> Result<SectionTable, VerifyError> {
    error!("[Verify] Section table rejected: {}", reason);
    Err(VerifyError::InvalidSectionTable {
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rawdump::{RAW_DUMP_HEADER_SIGNATURE, RAW_DUMP_HEADER_VERSION};
    use crate::storage::DumpRegion;
    use crate::testing::MemStorage;

    fn descriptor(flags: u32, raw_type: u32, offset: u64, size: u64, ddr_base: u64) -> Vec<u8> {
        let mut bytes = vec![0u8; RAW_DUMP_SECTION_LEN];
        bytes[0..4].copy_from_slice(&flags.to_le_bytes());
        bytes[4..8].copy_from_slice(&RAW_DUMP_SECTION_VERSION.to_le_bytes());
        bytes[8..12].copy_from_slice(&raw_type.to_le_bytes());
        bytes[12..20].copy_from_slice(&offset.to_le_bytes());
        bytes[20..28].copy_from_slice(&size.to_le_bytes());
        bytes[28..36].copy_from_slice(&ddr_base.to_le_bytes());
        bytes[44..47].copy_from_slice(b"DDR");
        bytes
    }

    fn header_for(sections_count: u32) -> RawDumpHeader {
        RawDumpHeader {
            signature: RAW_DUMP_HEADER_SIGNATURE,
            version: RAW_DUMP_HEADER_VERSION,
            flags: RAW_DUMP_FLAGS_VALID,
            os_data: 0,
            cpu_context: 0,
            reset_trigger: 0,
            dump_size: 0x1000,
            total_dump_size_required: 0x1000,
            sections_count,
        }
    }

    fn region_with(descriptors: &[Vec<u8>]) -> MemStorage {
        let mut image = vec![0u8; RAW_DUMP_HEADER_LEN];
        for d in descriptors {
            image.extend_from_slice(d);
        }
        image.resize(0x10000, 0);
        let mut storage = MemStorage::new();
        storage.add_disk(image);
        storage
    }

    fn limits() -> SectionLimits {
        SectionLimits {
            max_sections: 16,
            max_ddr_sections: 4,
        }
    }

    #[test]
    fn test_good_table_tallies_stats() {
        let storage = region_with(&[
            descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x200, 0x100, 0x8000_0000),
            descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x300, 0x100, 0x9000_0000),
            descriptor(RAW_DUMP_FLAGS_VALID, 2, 0x400, 0x40, 0),
            descriptor(RAW_DUMP_FLAGS_VALID, 3, 0x440, 0x80, 0),
        ]);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x10000);

        let table =
            verify_section_table(&region, &header_for(4), &limits()).expect("valid table");
        assert_eq!(table.sections.len(), 4);
        assert_eq!(table.stats.ddr_count, 2);
        assert_eq!(table.stats.cpu_context_count, 1);
        assert_eq!(table.stats.sv_count, 1);
        assert_eq!(table.stats.ddr_bytes, 0x200);
        assert_eq!(table.stats.largest_sv_bytes, 0x80);
        assert_eq!(table.ddr_sections().count(), 2);
        assert_eq!(table.sections[0].name, "DDR");
    }

    #[test]
    fn test_unknown_section_type_rejected() {
        let storage = region_with(&[
            descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x100, 0x40, 0x8000_0000),
            descriptor(RAW_DUMP_FLAGS_VALID, 9, 0x140, 0x40, 0),
        ]);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x10000);

        assert!(matches!(
            verify_section_table(&region, &header_for(2), &limits()),
            Err(VerifyError::InvalidSectionTable { .. })
        ));
    }

    #[test]
    fn test_truncation_flag_only_on_last_section() {
        let truncated_first = region_with(&[
            descriptor(
                RAW_DUMP_FLAGS_VALID | RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE,
                1,
                0x100,
                0x40,
                0x8000_0000,
            ),
            descriptor(RAW_DUMP_FLAGS_VALID, 2, 0x140, 0x40, 0),
        ]);
        let region = DumpRegion::new(&truncated_first, crate::storage::DiskHandle(0), 0, 0x10000);
        assert!(verify_section_table(&region, &header_for(2), &limits()).is_err());

        let truncated_last = region_with(&[
            descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x100, 0x40, 0x8000_0000),
            descriptor(
                RAW_DUMP_FLAGS_VALID | RAW_DUMP_FLAGS_INSUFFICIENT_STORAGE,
                2,
                0x140,
                0x40,
                0,
            ),
        ]);
        let region = DumpRegion::new(&truncated_last, crate::storage::DiskHandle(0), 0, 0x10000);
        assert!(verify_section_table(&region, &header_for(2), &limits()).is_ok());
    }

    #[test]
    fn test_ddr_overlap_rejected() {
        let storage = region_with(&[
            descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x100, 0x1000, 0x8000_0000),
            descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x1100, 0x1000, 0x8000_0800),
        ]);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x10000);

        assert!(verify_section_table(&region, &header_for(2), &limits()).is_err());
    }

    #[test]
    fn test_ddr_descending_order_rejected() {
        let storage = region_with(&[
            descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x100, 0x40, 0x9000_0000),
            descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x140, 0x40, 0x8000_0000),
        ]);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x10000);

        assert!(verify_section_table(&region, &header_for(2), &limits()).is_err());
    }

    #[test]
    fn test_table_must_fit_region() {
        let storage = region_with(&[descriptor(RAW_DUMP_FLAGS_VALID, 1, 0x100, 0x40, 0x8000_0000)]);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x60);

        assert!(verify_section_table(&region, &header_for(4), &limits()).is_err());
    }

    #[test]
    fn test_section_count_limit_enforced() {
        let storage = region_with(&[]);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x10000);

        assert!(verify_section_table(&region, &header_for(17), &limits()).is_err());
    }

    #[test]
    fn test_ddr_section_limit_enforced() {
        let descriptors: Vec<Vec<u8>> = (0..5)
            .map(|i| {
                descriptor(
                    RAW_DUMP_FLAGS_VALID,
                    1,
                    0x100 + i * 0x40,
                    0x40,
                    0x8000_0000 + i * 0x1000,
                )
            })
            .collect();
        let storage = region_with(&descriptors);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x10000);

        assert!(verify_section_table(&region, &header_for(5), &limits()).is_err());
    }

    #[test]
    fn test_table_without_ddr_sections_rejected() {
        let storage = region_with(&[descriptor(RAW_DUMP_FLAGS_VALID, 2, 0x100, 0x40, 0)]);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x10000);

        assert!(verify_section_table(&region, &header_for(1), &limits()).is_err());
    }

    #[test]
    fn test_payloads_must_fit_region() {
        let storage = region_with(&[descriptor(
            RAW_DUMP_FLAGS_VALID,
            1,
            0x100,
            0x2_0000,
            0x8000_0000,
        )]);
        let region = DumpRegion::new(&storage, crate::storage::DiskHandle(0), 0, 0x10000);

        assert!(verify_section_table(&region, &header_for(1), &limits()).is_err());
    }
}
