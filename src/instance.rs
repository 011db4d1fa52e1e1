// Dump instance assembly and lifetime
//
// One abnormal reset produces at most one dump instance per boot. The
// manager holds the assembled instance in a shared slot and hands the same
// one back on repeat requests for the same underlying dump, so a retried
// pipeline run never produces a second copy of a multi-gigabyte capture.

use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::Serialize;

use crate::error::InstanceError;
use crate::locate::{DumpFormat, DumpLocation, LocatedDump};
use crate::memmap::DdrMemoryMap;
use crate::rawdump::{SectionTable, VerifiedHeader};

/// Identity of one physical dump, stable across pipeline re-runs
///
/// Derived from where the dump sits on storage and what its header says,
/// so re-discovering the same bytes yields the same id while a different
/// dump (or a rewritten partition) yields a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DumpInstanceId(pub u64);

impl DumpInstanceId {
    /// Derive the identity from the located region and its verified header
    pub fn derive(located: &LocatedDump, verified: &VerifiedHeader) -> Self {
        // FNV-1a over the identity-bearing fields.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut mix = |value: u64| {
            for byte in value.to_le_bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
            }
        };
        mix(located.disk.0 as u64);
        mix(located.offset);
        mix(located.length);
        mix(verified.header.os_data);
        mix(verified.header.cpu_context);
        mix(verified.header.reset_trigger as u64);
        mix(verified.header.dump_size);
        mix(verified.header.sections_count as u64);
        Self(hash)
    }
}

/// A fully assembled, verified crash dump ready for submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DumpInstance {
    pub id: DumpInstanceId,
    pub header: VerifiedHeader,
    pub sections: SectionTable,
    pub memory_map: DdrMemoryMap,
    pub location: DumpLocation,
    pub format: DumpFormat,
    /// Total stitched length when the dump was collated from fragments
    pub collated_length: Option<u64>,
}

/// Shared slot enforcing the one-instance-per-boot rule
pub struct DumpInstanceManager {
    slot: Mutex<Option<Arc<DumpInstance>>>,
}

impl DumpInstanceManager {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Assemble the dump instance, or return the existing one
    ///
    /// Idempotent for the same underlying dump: repeat calls hand back the
    /// same shared instance. A request for a different dump while one is
    /// held fails rather than silently replacing it.
    pub fn get_instance(
        &self,
        located: &LocatedDump,
        verified: &VerifiedHeader,
        sections: &SectionTable,
        memory_map: &DdrMemoryMap,
        collated_length: Option<u64>,
    ) -> Result<Arc<DumpInstance>, InstanceError> {
        let id = DumpInstanceId::derive(located, verified);
        let mut slot = self.slot.lock().map_err(|_| InstanceError::StatePoisoned)?;

        if let Some(existing) = slot.as_ref() {
            if existing.id == id {
                info!("[Instance] Reusing dump instance {:#x}", id.0);
                return Ok(Arc::clone(existing));
            }
            warn!(
                "[Instance] Refusing to replace instance {:#x} with {:#x}",
                existing.id.0, id.0
            );
            return Err(InstanceError::AlreadyInstantiated {
                existing: existing.id.0,
                requested: id.0,
            });
        }

        let instance = Arc::new(DumpInstance {
            id,
            header: *verified,
            sections: sections.clone(),
            memory_map: memory_map.clone(),
            location: located.location(),
            format: located.format(),
            collated_length,
        });
        info!(
            "[Instance] Assembled dump instance {:#x}: {} sections, {:#x} DDR bytes",
            id.0,
            instance.sections.sections.len(),
            instance.memory_map.total_bytes
        );
        *slot = Some(Arc::clone(&instance));
        Ok(instance)
    }

    /// Drop the held instance so a new dump can be assembled
    pub fn release(&self) -> Result<(), InstanceError> {
        let mut slot = self.slot.lock().map_err(|_| InstanceError::StatePoisoned)?;
        if slot.take().is_some() {
            info!("[Instance] Released dump instance");
        }
        Ok(())
    }
}

impl Default for DumpInstanceManager {
    fn default() -> Self {
        Self::new()
    }
}
