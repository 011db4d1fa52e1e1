// SD fragment collation
//
// File-based dumps on removable cards may be split across numbered
// folders when the bootloader could not write one contiguous file. The
// collator stitches eligible fragments back into one logical dump in
// sequence order. Raw partition dumps never need collation.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{CollateError, StorageError};
use crate::locate::{DumpFormat, LocatedDump};
use crate::storage::{BlockStorage, DiskHandle};

/// One file-based dump fragment as discovered on removable media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    /// Folder sequence number the bootloader assigned
    pub sequence: u32,
    pub disk: DiskHandle,
    /// Byte offset of the fragment payload on the disk
    pub offset: u64,
    /// Fragment payload length in bytes
    pub length: u64,
    /// An error marker file sits next to this fragment
    pub has_error_marker: bool,
    /// A processed marker file sits next to this fragment
    pub processed: bool,
}

impl FragmentInfo {
    /// Whether the collator may consume this fragment
    ///
    /// Fragments flagged with an error marker were abandoned mid-write by
    /// the bootloader; processed ones were already handed off in an
    /// earlier run. Neither participates again.
    pub fn is_eligible(&self) -> bool {
        !self.has_error_marker && !self.processed && self.length > 0
    }
}

/// Discovery and bookkeeping interface for file-based dump fragments
pub trait FragmentStore {
    /// Enumerate every dump fragment present on removable media
    fn fragments(&self) -> Result<Vec<FragmentInfo>, StorageError>;

    /// Persist the processed marker for a consumed fragment
    fn mark_processed(&self, sequence: u32) -> Result<(), StorageError>;
}

/// A fully stitched multi-fragment dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollatedDump {
    /// Fragment payloads concatenated in sequence order
    pub data: Vec<u8>,
    /// Sum of the collated fragment lengths in bytes
    pub total_length: u64,
    /// Number of fragments stitched together
    pub fragment_count: u32,
    /// Sequence numbers of the stitched fragments, in order
    pub sequences: Vec<u32>,
}

/// Collation outcome for a located dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collation {
    /// Raw-format dump, or at most one eligible fragment
    NotNeeded,
    /// Two or more fragments were stitched into one logical dump
    Collated(CollatedDump),
}

/// Collate a file-based dump split across removable-card fragments
///
/// Eligible fragments are ordered by sequence number and must be strictly
/// consecutive; a duplicate or a gap aborts the run rather than producing
/// a silently incomplete dump. Collation never marks fragments processed:
/// that happens only after the dump is handed off, so a failed run leaves
/// the fragments discoverable for the next boot's retry.
pub fn collate<S, F>(
    storage: &S,
    store: &F,
    located: &LocatedDump,
) -> Result<Collation, CollateError>
where
    S: BlockStorage,
    F: FragmentStore,
{
    if located.format() != DumpFormat::File {
        debug!("[Collate] Raw-format dump, collation not needed");
        return Ok(Collation::NotNeeded);
    }

    let mut fragments = store.fragments()?;
    fragments.retain(|f| f.is_eligible());
    fragments.sort_by_key(|f| f.sequence);

    if fragments.len() <= 1 {
        debug!(
            "[Collate] {} eligible fragment(s), collation not needed",
            fragments.len()
        );
        return Ok(Collation::NotNeeded);
    }

    let mut expected = fragments[0].sequence;
    let mut data = Vec::new();
    for fragment in &fragments {
        if fragment.sequence < expected {
            return Err(CollateError::DuplicateSequence {
                sequence: fragment.sequence,
            });
        }
        if fragment.sequence > expected {
            return Err(CollateError::SequenceGap {
                expected,
                found: fragment.sequence,
            });
        }

        let bytes = storage.read_blocks(fragment.disk, fragment.offset, fragment.length as usize)?;
        data.extend_from_slice(&bytes);
        expected += 1;
    }

    let total_length = data.len() as u64;
    info!(
        "[Collate] Stitched {} fragments into {:#x} bytes",
        fragments.len(),
        total_length
    );
    Ok(Collation::Collated(CollatedDump {
        data,
        total_length,
        fragment_count: fragments.len() as u32,
        sequences: fragments.iter().map(|f| f.sequence).collect(),
    }))
}
