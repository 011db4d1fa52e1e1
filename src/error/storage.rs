// Block storage and partition locator error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Storage error code constants
///
/// Error code range: 2001
pub struct StorageErrorCodes {}

impl StorageErrorCodes {
    /// The raw block-storage collaborator failed
    pub const UNAVAILABLE: i32 = 2001;
}

/// Failures reported by the raw block-storage collaborator
///
/// The core does not interpret storage failures; they propagate unchanged
/// from the collaborator through whichever stage hit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Storage could not be read (I/O failure, missing disk, short read)
    Unavailable { details: String },
}

impl ErrorCode for StorageError {
    fn code(&self) -> i32 {
        match self {
            StorageError::Unavailable { .. } => StorageErrorCodes::UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            StorageError::Unavailable { details } => {
                format!("Storage unavailable: {}", details)
            }
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for StorageError {}

/// Locate error code constants
///
/// Error code range: 2101-2104
pub struct LocateErrorCodes {}

impl LocateErrorCodes {
    /// Discovered partition entry carries an invalid disk handle
    pub const INVALID_DISK_HANDLE: i32 = 2101;

    /// Discovered partition entry carries an invalid byte offset
    pub const INVALID_OFFSET: i32 = 2102;

    /// Discovered partition entry carries an invalid length
    pub const INVALID_PARTITION_LENGTH: i32 = 2103;

    /// No recognizable dump partition, or an unclassifiable one
    pub const UNKNOWN: i32 = 2104;
}

/// Dump partition discovery errors
///
/// Each malformed discovery fails distinctly; none is retried within a
/// single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    /// Partition entry references a disk handle the collaborator marked invalid
    InvalidDiskHandle { disk: u32 },

    /// Partition offset is zero or not sector aligned
    InvalidOffset { offset: u64 },

    /// Partition length is below the configured minimum
    InvalidPartitionLength { length: u64 },

    /// No dump found, or the location/format classification came back invalid
    Unknown { details: String },

    /// The storage collaborator failed during the scan
    Storage(StorageError),
}

impl ErrorCode for LocateError {
    fn code(&self) -> i32 {
        match self {
            LocateError::InvalidDiskHandle { .. } => LocateErrorCodes::INVALID_DISK_HANDLE,
            LocateError::InvalidOffset { .. } => LocateErrorCodes::INVALID_OFFSET,
            LocateError::InvalidPartitionLength { .. } => {
                LocateErrorCodes::INVALID_PARTITION_LENGTH
            }
            LocateError::Unknown { .. } => LocateErrorCodes::UNKNOWN,
            LocateError::Storage(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            LocateError::InvalidDiskHandle { disk } => {
                format!("Invalid disk handle: {}", disk)
            }
            LocateError::InvalidOffset { offset } => {
                format!("Invalid partition offset: {:#x}", offset)
            }
            LocateError::InvalidPartitionLength { length } => {
                format!("Invalid partition length: {:#x}", length)
            }
            LocateError::Unknown { details } => {
                format!("Dump partition not located: {}", details)
            }
            LocateError::Storage(err) => err.message(),
        }
    }
}

impl fmt::Display for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LocateError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for LocateError {}

impl From<StorageError> for LocateError {
    fn from(err: StorageError) -> Self {
        LocateError::Storage(err)
    }
}

/// Log a locate error with structured context
///
/// Logs discovery failures with the error code, the component, and the
/// scan context. Non-blocking, never panics.
pub fn log_locate_error(err: &LocateError, context: &str) {
    error!(
        "Locate error in {}: code={}, component=PartitionLocator, message={}",
        context,
        err.code(),
        err.message()
    );
}
