// Offline Crash-Dump Service Core
// Detects, verifies, and submits bootloader raw memory dumps

// Module declarations
pub mod collate;
pub mod config;
pub mod error;
pub mod firmware;
pub mod instance;
pub mod locate;
pub mod memmap;
pub mod rawdump;
pub mod readiness;
pub mod service;
pub mod storage;
pub mod testing;

// Re-exports for convenience
pub use config::ServiceConfig;
pub use error::{DumpError, ErrorCode};
pub use service::{OfflineDumpService, PipelineFailure, RunOutcome, SkipReason, SubmissionSink};

/// Initialize logging for binaries and tests
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
