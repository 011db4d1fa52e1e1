// Error types for the offline crash-dump service
//
// This module defines custom error types for every pipeline stage,
// providing structured error handling with stable numeric codes matching
// the service's historical return-code contract.

mod dump;
mod firmware;
mod storage;

pub use dump::{
    CollateError, CollateErrorCodes, InstanceError, InstanceErrorCodes, MemoryMapError,
    MemoryMapErrorCodes, VerifyError, VerifyErrorCodes,
};
pub use firmware::{DetectError, DetectErrorCodes};
pub use storage::{log_locate_error, LocateError, LocateErrorCodes, StorageError, StorageErrorCodes};

use std::fmt;

use log::error;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the service boundary. Codes are banded per pipeline stage:
/// detect 1001+, storage/locate 2001+, verify 3001+, memory map 4001+,
/// collate 5001+, instance 6001+.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Aggregate error surfaced by the check-and-submit orchestrator.
///
/// Each stage reports its own kind; the orchestrator wraps but never masks
/// the original variant, so the submission collaborator and logs always see
/// the stage-specific taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpError {
    /// Firmware configuration table detection failed
    Detect(DetectError),

    /// Raw block storage collaborator failed
    Storage(StorageError),

    /// Dump partition discovery failed
    Locate(LocateError),

    /// Raw dump header or section table verification failed
    Verify(VerifyError),

    /// DDR memory map construction failed
    MemoryMap(MemoryMapError),

    /// SD fragment collation failed
    Collate(CollateError),

    /// Dump instance assembly failed
    Instance(InstanceError),

    /// Failure with no more specific taxonomy (e.g. submission hand-off)
    Unknown { details: String },
}

impl ErrorCode for DumpError {
    fn code(&self) -> i32 {
        match self {
            DumpError::Detect(err) => err.code(),
            DumpError::Storage(err) => err.code(),
            DumpError::Locate(err) => err.code(),
            DumpError::Verify(err) => err.code(),
            DumpError::MemoryMap(err) => err.code(),
            DumpError::Collate(err) => err.code(),
            DumpError::Instance(err) => err.code(),
            DumpError::Unknown { .. } => 9001,
        }
    }

    fn message(&self) -> String {
        match self {
            DumpError::Detect(err) => err.message(),
            DumpError::Storage(err) => err.message(),
            DumpError::Locate(err) => err.message(),
            DumpError::Verify(err) => err.message(),
            DumpError::MemoryMap(err) => err.message(),
            DumpError::Collate(err) => err.message(),
            DumpError::Instance(err) => err.message(),
            DumpError::Unknown { details } => format!("Unknown failure: {}", details),
        }
    }
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DumpError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for DumpError {}

impl From<DetectError> for DumpError {
    fn from(err: DetectError) -> Self {
        DumpError::Detect(err)
    }
}

impl From<StorageError> for DumpError {
    fn from(err: StorageError) -> Self {
        DumpError::Storage(err)
    }
}

impl From<LocateError> for DumpError {
    fn from(err: LocateError) -> Self {
        // Storage failures keep their own taxonomy regardless of which
        // stage hit them.
        match err {
            LocateError::Storage(inner) => DumpError::Storage(inner),
            other => DumpError::Locate(other),
        }
    }
}

impl From<VerifyError> for DumpError {
    fn from(err: VerifyError) -> Self {
        DumpError::Verify(err)
    }
}

impl From<MemoryMapError> for DumpError {
    fn from(err: MemoryMapError) -> Self {
        DumpError::MemoryMap(err)
    }
}

impl From<CollateError> for DumpError {
    fn from(err: CollateError) -> Self {
        DumpError::Collate(err)
    }
}

impl From<InstanceError> for DumpError {
    fn from(err: InstanceError) -> Self {
        DumpError::Instance(err)
    }
}

/// Log a pipeline error with structured context
///
/// Logs the stage-specific error code and message along with the pipeline
/// context in which the failure occurred. Non-blocking, never panics.
pub fn log_dump_error(err: &DumpError, context: &str) {
    error!(
        "Dump pipeline error in {}: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_error_preserves_stage_code() {
        let err = DumpError::from(DetectError::UnsupportedVersion { version: 7 });
        assert_eq!(err.code(), DetectErrorCodes::UNSUPPORTED_VERSION);

        let err = DumpError::from(LocateError::InvalidOffset { offset: 0 });
        assert_eq!(err.code(), LocateErrorCodes::INVALID_OFFSET);
    }

    #[test]
    fn test_unknown_code_outside_stage_bands() {
        let err = DumpError::Unknown {
            details: "submission sink rejected the dump".to_string(),
        };
        assert_eq!(err.code(), 9001);
    }
}
