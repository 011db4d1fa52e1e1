// DDR memory map construction
//
// Maps each verified DDR-range section to the physical address range it
// captured. Descriptor order is preserved one to one; a table whose DDR
// ranges are unordered or overlapping is rejected here even though the
// section verifier already checks, so the map never depends on upstream
// having run.

use log::info;
use serde::Serialize;

use crate::error::MemoryMapError;
use crate::rawdump::SectionTable;

/// One DDR range and where its capture lives in the dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DdrMapEntry {
    /// First physical address covered
    pub base: u64,
    /// Last physical address covered, inclusive
    pub end: u64,
    pub size: u64,
    /// Payload offset within the dump region
    pub offset: u64,
    /// Physically adjacent to the previous entry with no hole
    pub contiguous: bool,
}

/// Ordered physical-memory map of the captured DDR ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DdrMemoryMap {
    pub entries: Vec<DdrMapEntry>,
    /// Total DDR bytes captured
    pub total_bytes: u64,
    /// Gaps between consecutive ranges; holes are legal, just counted
    pub hole_count: u32,
}

/// Build the DDR memory map from a verified section table
pub fn build(table: &SectionTable) -> Result<DdrMemoryMap, MemoryMapError> {
    let mut map = DdrMemoryMap::default();

    for (index, section) in table.ddr_sections().enumerate() {
        if section.size == 0 {
            return Err(MemoryMapError::ZeroLengthSection { index });
        }
        let end = section
            .ddr_base
            .checked_add(section.size - 1)
            .ok_or(MemoryMapError::AddressOverflow {
                index,
                base: section.ddr_base,
                size: section.size,
            })?;

        let contiguous = match map.entries.last() {
            None => false,
            Some(prev) => {
                if section.ddr_base < prev.base {
                    return Err(MemoryMapError::OutOfOrder { index });
                }
                if section.ddr_base <= prev.end {
                    return Err(MemoryMapError::Overlap { index });
                }
                let adjacent = section.ddr_base == prev.end + 1;
                if !adjacent {
                    map.hole_count += 1;
                }
                adjacent
            }
        };

        map.total_bytes += section.size;
        map.entries.push(DdrMapEntry {
            base: section.ddr_base,
            end,
            size: section.size,
            offset: section.offset,
            contiguous,
        });
    }

    info!(
        "[MemoryMap] {} DDR ranges, {:#x} bytes, {} hole(s)",
        map.entries.len(),
        map.total_bytes,
        map.hole_count
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rawdump::{SectionDescriptor, SectionStats, RAW_DUMP_SECTION_VERSION};

    fn ddr(base: u64, size: u64, offset: u64) -> SectionDescriptor {
        SectionDescriptor {
            flags: 0x1,
            version: RAW_DUMP_SECTION_VERSION,
            raw_type: 1,
            offset,
            size,
            ddr_base: base,
            name: "DDR_CS0".to_string(),
        }
    }

    fn table(sections: Vec<SectionDescriptor>) -> SectionTable {
        SectionTable {
            sections,
            stats: SectionStats::default(),
        }
    }

    #[test]
    fn test_contiguous_ranges_map_without_holes() {
        let table = table(vec![
            ddr(0x8000_0000, 0x1000, 0x200),
            ddr(0x8000_1000, 0x1000, 0x1200),
            ddr(0x8000_2000, 0x1000, 0x2200),
        ]);

        let map = build(&table).expect("contiguous ranges");
        assert_eq!(map.entries.len(), 3);
        assert_eq!(map.total_bytes, 0x3000);
        assert_eq!(map.hole_count, 0);
        assert!(!map.entries[0].contiguous, "first range has no predecessor");
        assert!(map.entries[1].contiguous);
        assert!(map.entries[2].contiguous);
        assert_eq!(map.entries[0].end, 0x8000_0FFF);
        assert_eq!(map.entries[1].offset, 0x1200);
    }

    #[test]
    fn test_holes_are_counted_not_rejected() {
        let table = table(vec![
            ddr(0x8000_0000, 0x1000, 0x200),
            ddr(0x9000_0000, 0x1000, 0x1200),
        ]);

        let map = build(&table).expect("holes are legal");
        assert_eq!(map.hole_count, 1);
        assert!(!map.entries[1].contiguous);
    }

    #[test]
    fn test_map_entries_mirror_their_descriptors() {
        let sections = vec![
            ddr(0x8000_0000, 0x1000, 0x200),
            ddr(0x8000_2000, 0x800, 0x1200),
            ddr(0x9000_0000, 0x400, 0x1A00),
        ];

        let map = build(&table(sections.clone())).expect("valid ranges");
        assert_eq!(map.entries.len(), sections.len());
        for (entry, section) in map.entries.iter().zip(&sections) {
            assert_eq!(entry.base, section.ddr_base);
            assert_eq!(entry.size, section.size);
            assert_eq!(entry.offset, section.offset);
            assert_eq!(entry.end, section.ddr_base + section.size - 1);
        }
    }

    #[test]
    fn test_zero_length_range_rejected() {
        let table = table(vec![ddr(0x8000_0000, 0, 0x200)]);
        assert_eq!(
            build(&table),
            Err(MemoryMapError::ZeroLengthSection { index: 0 })
        );
    }

    #[test]
    fn test_address_overflow_rejected() {
        let table = table(vec![ddr(u64::MAX - 0x10, 0x100, 0x200)]);
        assert!(matches!(
            build(&table),
            Err(MemoryMapError::AddressOverflow { index: 0, .. })
        ));
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let table = table(vec![
            ddr(0x8000_0000, 0x2000, 0x200),
            ddr(0x8000_1000, 0x2000, 0x2200),
        ]);
        assert_eq!(build(&table), Err(MemoryMapError::Overlap { index: 1 }));
    }

    #[test]
    fn test_descending_ranges_rejected() {
        let table = table(vec![
            ddr(0x9000_0000, 0x1000, 0x200),
            ddr(0x8000_0000, 0x1000, 0x1200),
        ]);
        assert_eq!(build(&table), Err(MemoryMapError::OutOfOrder { index: 1 }));
    }

    #[test]
    fn test_non_ddr_sections_are_ignored() {
        let mut sections = vec![ddr(0x8000_0000, 0x1000, 0x200)];
        sections.push(SectionDescriptor {
            raw_type: 2,
            ..ddr(0, 0x40, 0x1200)
        });

        let map = build(&table(sections)).expect("cpu context sections are not mapped");
        assert_eq!(map.entries.len(), 1);
    }
}
