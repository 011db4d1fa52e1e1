// Readiness evaluation - decides whether a raw dump is enabled and expected
//
// Pure projections of the firmware configuration table plus persisted
// device settings. No storage I/O happens here; the orchestrator uses the
// result to gate the entire dump pipeline.

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::DumpSettings;
use crate::firmware::{CapabilityTier, ConfigurationTable};

/// Outcome of the readiness evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    /// Offline dumps are enabled by the persisted device setting
    pub is_dump_enabled: bool,
    /// A raw dump is expected to exist on storage after this boot
    pub is_dump_expected: bool,
}

/// Step-by-step expansion of the dump-expectation check
///
/// Mirrors the progress mask the bootloader contract defines: each field is
/// a deterministic boolean projection of already-validated input, so there
/// are no partial or error states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationChecklist {
    /// All checks below passed
    pub is_good: bool,
    /// The firmware recorded a non-zero abnormal-reset value
    pub reset_non_zero: bool,
    /// The persisted use-capability value is present
    pub capability_present: bool,
    /// The persisted use-capability value is non-zero
    pub capability_set: bool,
}

/// Expand the dump-expectation check into its individual steps
pub fn expectation_checklist(
    table: &ConfigurationTable,
    settings: &DumpSettings,
) -> ExpectationChecklist {
    let mut checklist = ExpectationChecklist::default();

    checklist.reset_non_zero = table.abnormal_reset();
    checklist.capability_present = settings.use_capability.is_some();
    checklist.capability_set = settings.use_capability.unwrap_or(0) != 0;

    checklist.is_good = checklist.reset_non_zero
        && table.capability_tier() >= CapabilityTier::DedicatedPartition
        && checklist.capability_present
        && checklist.capability_set;

    checklist
}

/// Evaluate dump readiness from the configuration table and device settings
///
/// A dump is expected when the abnormal-reset flag is set, the firmware
/// reports at least basic offline-dump capability, and the persisted
/// use-capability value is present and set. `is_dump_enabled` reflects only
/// the persisted device setting. Replay mode forces expectation for
/// reprocessing captured images; the checklist stays honest about what the
/// firmware actually reported.
pub fn evaluate(table: &ConfigurationTable, settings: &DumpSettings) -> Readiness {
    let checklist = expectation_checklist(table, settings);

    let mut expected = checklist.is_good;
    if settings.replay_mode && !expected {
        info!("[Readiness] Replay mode: treating a raw dump as expected");
        expected = true;
    }

    Readiness {
        is_dump_enabled: settings.enabled,
        is_dump_expected: expected,
    }
}
