// Raw dump verification, memory map, collation, and instance error types

use crate::error::{ErrorCode, StorageError};
use std::fmt;

/// Verification error code constants
///
/// Error code range: 3001-3003
pub struct VerifyErrorCodes {}

impl VerifyErrorCodes {
    /// Raw dump header failed validation
    pub const INVALID_HEADER: i32 = 3001;

    /// Section table failed validation
    pub const INVALID_SECTION_TABLE: i32 = 3002;

    /// Storage failed while reading the dump region
    pub const STORAGE: i32 = 3003;
}

/// Raw dump structure verification errors
///
/// Both verifiers run a single deterministic pass; an invalid structure is
/// terminal for the current dump attempt but not for the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Raw dump header signature/version/flags/size check failed
    InvalidHeader { reason: String },

    /// Section descriptor table violated a structural invariant
    InvalidSectionTable { reason: String },

    /// The dump region could not be read
    Storage(StorageError),
}

impl ErrorCode for VerifyError {
    fn code(&self) -> i32 {
        match self {
            VerifyError::InvalidHeader { .. } => VerifyErrorCodes::INVALID_HEADER,
            VerifyError::InvalidSectionTable { .. } => VerifyErrorCodes::INVALID_SECTION_TABLE,
            VerifyError::Storage(_) => VerifyErrorCodes::STORAGE,
        }
    }

    fn message(&self) -> String {
        match self {
            VerifyError::InvalidHeader { reason } => {
                format!("Invalid raw dump header: {}", reason)
            }
            VerifyError::InvalidSectionTable { reason } => {
                format!("Invalid section table: {}", reason)
            }
            VerifyError::Storage(err) => err.message(),
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for VerifyError {}

impl From<StorageError> for VerifyError {
    fn from(err: StorageError) -> Self {
        VerifyError::Storage(err)
    }
}

/// Memory map error code constants
///
/// Error code range: 4001-4004
pub struct MemoryMapErrorCodes {}

impl MemoryMapErrorCodes {
    /// A DDR section has zero length
    pub const ZERO_LENGTH_SECTION: i32 = 4001;

    /// A DDR section's base + size overflows the addressable range
    pub const ADDRESS_OVERFLOW: i32 = 4002;

    /// Two DDR sections overlap in physical address space
    pub const OVERLAP: i32 = 4003;

    /// DDR sections are not sorted ascending by base address
    pub const OUT_OF_ORDER: i32 = 4004;
}

/// DDR memory map construction errors
///
/// The builder re-verifies ordering and overlap independently of the
/// section table verifier; violations are rejected, never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMapError {
    /// DDR section at `index` has zero length
    ZeroLengthSection { index: usize },

    /// DDR section at `index` wraps past the end of the address space
    AddressOverflow { index: usize, base: u64, size: u64 },

    /// DDR section at `index` overlaps its predecessor
    Overlap { index: usize },

    /// DDR section at `index` starts below its predecessor
    OutOfOrder { index: usize },
}

impl ErrorCode for MemoryMapError {
    fn code(&self) -> i32 {
        match self {
            MemoryMapError::ZeroLengthSection { .. } => MemoryMapErrorCodes::ZERO_LENGTH_SECTION,
            MemoryMapError::AddressOverflow { .. } => MemoryMapErrorCodes::ADDRESS_OVERFLOW,
            MemoryMapError::Overlap { .. } => MemoryMapErrorCodes::OVERLAP,
            MemoryMapError::OutOfOrder { .. } => MemoryMapErrorCodes::OUT_OF_ORDER,
        }
    }

    fn message(&self) -> String {
        match self {
            MemoryMapError::ZeroLengthSection { index } => {
                format!("DDR section {} has zero length", index)
            }
            MemoryMapError::AddressOverflow { index, base, size } => {
                format!(
                    "DDR section {} overflows: base {:#x} + size {:#x}",
                    index, base, size
                )
            }
            MemoryMapError::Overlap { index } => {
                format!("DDR section {} overlaps the previous section", index)
            }
            MemoryMapError::OutOfOrder { index } => {
                format!("DDR section {} is not in ascending base order", index)
            }
        }
    }
}

impl fmt::Display for MemoryMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryMapError (code {}): {}",
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for MemoryMapError {}

/// Collation error code constants
///
/// Error code range: 5001-5003
pub struct CollateErrorCodes {}

impl CollateErrorCodes {
    /// Two fragments carry the same sequence number
    pub const DUPLICATE_SEQUENCE: i32 = 5001;

    /// Fragment sequence numbers are not consecutive
    pub const SEQUENCE_GAP: i32 = 5002;

    /// Storage failed while reading a fragment
    pub const STORAGE: i32 = 5003;
}

/// SD raw-dump collation errors
///
/// Ordering comes from fragment sequence metadata, never file timestamps.
/// Zero or one fragment is a success outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollateError {
    /// Two eligible fragments claim the same sequence number
    DuplicateSequence { sequence: u32 },

    /// A fragment is missing from the sequence
    SequenceGap { expected: u32, found: u32 },

    /// A fragment could not be read from the card
    Storage(StorageError),
}

impl ErrorCode for CollateError {
    fn code(&self) -> i32 {
        match self {
            CollateError::DuplicateSequence { .. } => CollateErrorCodes::DUPLICATE_SEQUENCE,
            CollateError::SequenceGap { .. } => CollateErrorCodes::SEQUENCE_GAP,
            CollateError::Storage(_) => CollateErrorCodes::STORAGE,
        }
    }

    fn message(&self) -> String {
        match self {
            CollateError::DuplicateSequence { sequence } => {
                format!("Duplicate fragment sequence number: {}", sequence)
            }
            CollateError::SequenceGap { expected, found } => {
                format!(
                    "Fragment sequence gap: expected {}, found {}",
                    expected, found
                )
            }
            CollateError::Storage(err) => err.message(),
        }
    }
}

impl fmt::Display for CollateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollateError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for CollateError {}

impl From<StorageError> for CollateError {
    fn from(err: StorageError) -> Self {
        CollateError::Storage(err)
    }
}

/// Instance manager error code constants
///
/// Error code range: 6001-6002
pub struct InstanceErrorCodes {}

impl InstanceErrorCodes {
    /// A different dump instance already exists for this boot
    pub const ALREADY_INSTANTIATED: i32 = 6001;

    /// Instance slot mutex was poisoned
    pub const STATE_POISONED: i32 = 6002;
}

/// Dump instance assembly errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceError {
    /// A different underlying dump was already instantiated this boot
    AlreadyInstantiated { existing: u64, requested: u64 },

    /// Instance slot mutex was poisoned
    StatePoisoned,
}

impl ErrorCode for InstanceError {
    fn code(&self) -> i32 {
        match self {
            InstanceError::AlreadyInstantiated { .. } => InstanceErrorCodes::ALREADY_INSTANTIATED,
            InstanceError::StatePoisoned => InstanceErrorCodes::STATE_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            InstanceError::AlreadyInstantiated {
                existing,
                requested,
            } => {
                format!(
                    "Dump instance {:#x} already exists; refusing to build {:#x}",
                    existing, requested
                )
            }
            InstanceError::StatePoisoned => "Dump instance slot lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InstanceError (code {}): {}",
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for InstanceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_error_codes() {
        assert_eq!(
            VerifyError::InvalidHeader {
                reason: "bad signature".to_string()
            }
            .code(),
            VerifyErrorCodes::INVALID_HEADER
        );
        assert_eq!(
            VerifyError::InvalidSectionTable {
                reason: "overlap".to_string()
            }
            .code(),
            VerifyErrorCodes::INVALID_SECTION_TABLE
        );
    }

    #[test]
    fn test_memory_map_error_codes() {
        assert_eq!(
            MemoryMapError::ZeroLengthSection { index: 1 }.code(),
            MemoryMapErrorCodes::ZERO_LENGTH_SECTION
        );
        assert_eq!(
            MemoryMapError::AddressOverflow {
                index: 0,
                base: u64::MAX,
                size: 2
            }
            .code(),
            MemoryMapErrorCodes::ADDRESS_OVERFLOW
        );
    }

    #[test]
    fn test_collate_storage_passthrough_keeps_details() {
        let err = CollateError::from(StorageError::Unavailable {
            details: "card removed".to_string(),
        });
        assert_eq!(err.code(), CollateErrorCodes::STORAGE);
        assert!(err.message().contains("card removed"));
    }

    #[test]
    fn test_instance_error_codes() {
        let err = InstanceError::AlreadyInstantiated {
            existing: 1,
            requested: 2,
        };
        assert_eq!(err.code(), InstanceErrorCodes::ALREADY_INSTANTIATED);
        assert_eq!(
            InstanceError::StatePoisoned.code(),
            InstanceErrorCodes::STATE_POISONED
        );
    }
}
