// Firmware configuration table error types and constants

use crate::error::ErrorCode;
use std::fmt;

/// Detection error code constants
///
/// Error code range: 1001
pub struct DetectErrorCodes {}

impl DetectErrorCodes {
    /// Configuration table version is outside the supported {1, 2} set
    pub const UNSUPPORTED_VERSION: i32 = 1001;
}

/// Errors from reading the firmware offline-dump configuration table
///
/// The table itself is a fixed read-only snapshot; the only structured
/// failure is a protocol version the service does not understand. An
/// unsupported version is reported as-is, never clamped into range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectError {
    /// Configuration table carries a version outside {1, 2}
    UnsupportedVersion { version: u32 },
}

impl ErrorCode for DetectError {
    fn code(&self) -> i32 {
        match self {
            DetectError::UnsupportedVersion { .. } => DetectErrorCodes::UNSUPPORTED_VERSION,
        }
    }

    fn message(&self) -> String {
        match self {
            DetectError::UnsupportedVersion { version } => {
                format!("Unsupported configuration table version: {}", version)
            }
        }
    }
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DetectError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for DetectError {}
