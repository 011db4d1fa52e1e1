// Check-and-submit orchestrator
//
// Runs the pipeline as a straight line with early exits: detect the
// firmware table, gate on readiness, locate the dump, collate fragments,
// verify the header and section table, build the memory map, assemble the
// instance, hand it to the submission collaborator. No storage I/O happens
// before the readiness gate passes.

use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;

use crate::collate::{collate, Collation, FragmentStore};
use crate::config::{SectionLimits, ServiceConfig};
use crate::error::{log_dump_error, DumpError, StorageError};
use crate::firmware::{detect, FirmwareTable};
use crate::instance::{DumpInstance, DumpInstanceManager};
use crate::locate::locate;
use crate::memmap::{self, DdrMemoryMap};
use crate::rawdump::{verify_header, verify_section_table, SectionTable, VerifiedHeader};
use crate::readiness;
use crate::storage::{BlockStorage, DiskHandle, DumpRegion, PartitionInfo};

/// Hand-off point for an assembled dump
///
/// The sink owns transport and retry policy; this core treats any sink
/// failure as terminal for the run.
pub trait SubmissionSink {
    fn submit(&self, instance: &DumpInstance) -> anyhow::Result<()>;
}

/// How far a pipeline run got, stage by stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DumpProgress {
    pub table_detected: bool,
    pub readiness_evaluated: bool,
    pub dump_located: bool,
    pub fragments_collated: bool,
    pub header_verified: bool,
    pub sections_verified: bool,
    pub memory_map_built: bool,
    pub instance_built: bool,
    pub submitted: bool,
}

/// Why a run ended without touching storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Offline dumps are disabled by the persisted device setting
    Disabled,
    /// No abnormal reset, or the firmware lacks dump capability
    NoDumpExpected,
}

/// Terminal state of one check-and-submit run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// A dump was assembled and handed to the submission sink
    Submitted { progress: DumpProgress },
    /// The readiness gate ended the run; storage was never touched
    Skipped {
        reason: SkipReason,
        progress: DumpProgress,
    },
}

/// An aborted run: the stage error plus how far the pipeline got
///
/// The progress checklist travels with the error so callers and logs see
/// the abort point, not just the error kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFailure {
    pub error: DumpError,
    pub progress: DumpProgress,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The offline crash-dump service core
///
/// Borrows its collaborators so one backing store can serve both the block
/// and fragment roles. All state lives in the instance manager; everything
/// else is re-derived on every run.
pub struct OfflineDumpService<'a, S, F, T, K>
where
    S: BlockStorage,
    F: FragmentStore,
    T: FirmwareTable,
    K: SubmissionSink,
{
    storage: &'a S,
    fragments: &'a F,
    firmware: &'a T,
    sink: &'a K,
    config: ServiceConfig,
    instances: DumpInstanceManager,
}

impl<'a, S, F, T, K> OfflineDumpService<'a, S, F, T, K>
where
    S: BlockStorage,
    F: FragmentStore,
    T: FirmwareTable,
    K: SubmissionSink,
{
    pub fn new(
        storage: &'a S,
        fragments: &'a F,
        firmware: &'a T,
        sink: &'a K,
        config: ServiceConfig,
    ) -> Self {
        Self {
            storage,
            fragments,
            firmware,
            sink,
            config,
            instances: DumpInstanceManager::new(),
        }
    }

    /// Run the full pipeline once
    ///
    /// Idempotent per dump: a second run over the same dump reuses the held
    /// instance and resubmits it. Every failure carries the stage-specific
    /// error plus the progress checklist, and is logged before it is
    /// returned.
    pub fn check_and_submit(&self) -> Result<RunOutcome, PipelineFailure> {
        let _span = tracing::info_span!("dump_pipeline").entered();
        let mut progress = DumpProgress::default();
        match self.run_pipeline(&mut progress) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                log_dump_error(&error, "check_and_submit");
                error!("[Service] Pipeline aborted; progress: {:?}", progress);
                Err(PipelineFailure { error, progress })
            }
        }
    }

    /// Drop the held dump instance
    pub fn release_instance(&self) -> Result<(), DumpError> {
        Ok(self.instances.release()?)
    }

    fn run_pipeline(&self, progress: &mut DumpProgress) -> Result<RunOutcome, DumpError> {
        let table = detect(self.firmware)?;
        progress.table_detected = true;

        let readiness = readiness::evaluate(&table, &self.config.dump);
        progress.readiness_evaluated = true;
        if !readiness.is_dump_enabled {
            info!("[Service] Offline dumps disabled; nothing to do");
            return Ok(RunOutcome::Skipped {
                reason: SkipReason::Disabled,
                progress: *progress,
            });
        }
        if !readiness.is_dump_expected {
            info!("[Service] No dump expected this boot; nothing to do");
            return Ok(RunOutcome::Skipped {
                reason: SkipReason::NoDumpExpected,
                progress: *progress,
            });
        }

        let located = locate(self.storage, self.fragments, &self.config.locator)?;
        progress.dump_located = true;

        let collation = collate(self.storage, self.fragments, &located)?;
        progress.fragments_collated = true;

        let (verified, sections, memory_map, collated_length) = match &collation {
            Collation::NotNeeded => {
                let region =
                    DumpRegion::new(self.storage, located.disk, located.offset, located.length);
                let (v, s, m) =
                    verify_and_map(&region, &self.config.limits, progress)?;
                (v, s, m, None)
            }
            Collation::Collated(collated) => {
                let backing = CollatedBacking {
                    data: &collated.data,
                };
                let region =
                    DumpRegion::new(&backing, DiskHandle(0), 0, collated.total_length);
                let (v, s, m) =
                    verify_and_map(&region, &self.config.limits, progress)?;
                (v, s, m, Some(collated.total_length))
            }
        };

        let instance =
            self.instances
                .get_instance(&located, &verified, &sections, &memory_map, collated_length)?;
        progress.instance_built = true;

        self.submit(&instance)?;
        progress.submitted = true;

        // Fragments are consumed only once the dump is in the sink's hands;
        // an aborted run must leave them discoverable for the next boot.
        match &collation {
            Collation::Collated(collated) => {
                for sequence in &collated.sequences {
                    self.fragments.mark_processed(*sequence)?;
                }
            }
            Collation::NotNeeded => {
                if let Some(sequence) = located.fragment_sequence() {
                    self.fragments.mark_processed(sequence)?;
                }
            }
        }

        info!(
            "[Service] Dump {:#x} submitted: {} sections, {:#x} DDR bytes",
            instance.id.0,
            instance.sections.sections.len(),
            instance.memory_map.total_bytes
        );
        Ok(RunOutcome::Submitted { progress: *progress })
    }

    fn submit(&self, instance: &Arc<DumpInstance>) -> Result<(), DumpError> {
        self.sink.submit(instance).map_err(|err| {
            warn!("[Service] Submission sink rejected dump {:#x}", instance.id.0);
            DumpError::Unknown {
                details: format!("submission failed: {}", err),
            }
        })
    }
}

fn verify_and_map<S: BlockStorage>(
    region: &DumpRegion<'_, S>,
    limits: &SectionLimits,
    progress: &mut DumpProgress,
) -> Result<(VerifiedHeader, SectionTable, DdrMemoryMap), DumpError> {
    let verified = verify_header(region)?;
    progress.header_verified = true;

    let sections = verify_section_table(region, &verified.header, limits)?;
    progress.sections_verified = true;

    let memory_map = memmap::build(&sections)?;
    progress.memory_map_built = true;

    Ok((verified, sections, memory_map))
}

/// In-memory backing for a collated multi-fragment dump
struct CollatedBacking<'a> {
    data: &'a [u8],
}

impl BlockStorage for CollatedBacking<'_> {
    fn enumerate_partitions(&self) -> Result<Vec<PartitionInfo>, StorageError> {
        Ok(Vec::new())
    }

    fn read_blocks(
        &self,
        _disk: DiskHandle,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, StorageError> {
        let start = offset as usize;
        let end = start.checked_add(length).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => Ok(self.data[start..end].to_vec()),
            None => Err(StorageError::Unavailable {
                details: format!(
                    "collated read of {:#x} bytes at {:#x} out of range",
                    length, offset
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpSettings;
    use crate::testing::{DumpImageBuilder, MemStorage, RecordingSink, StaticFirmware};

    fn config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.locator.min_partition_length = 512;
        config
    }

    #[test]
    fn test_disabled_setting_skips_without_storage_io() {
        let storage = MemStorage::new();
        let firmware = StaticFirmware::abnormal_reset();
        let sink = RecordingSink::new();
        let mut cfg = config();
        cfg.dump = DumpSettings {
            enabled: false,
            ..DumpSettings::default()
        };

        let service = OfflineDumpService::new(&storage, &storage, &firmware, &sink, cfg);
        let outcome = service.check_and_submit().expect("skip is a success");
        assert!(matches!(
            outcome,
            RunOutcome::Skipped {
                reason: SkipReason::Disabled,
                ..
            }
        ));
        assert_eq!(storage.read_count(), 0, "gate must precede storage I/O");
        assert_eq!(sink.submissions(), 0);
    }

    #[test]
    fn test_clean_boot_skips_without_storage_io() {
        let storage = MemStorage::new();
        let firmware = StaticFirmware::clean_boot();
        let sink = RecordingSink::new();

        let service = OfflineDumpService::new(&storage, &storage, &firmware, &sink, config());
        let outcome = service.check_and_submit().expect("skip is a success");
        assert!(matches!(
            outcome,
            RunOutcome::Skipped {
                reason: SkipReason::NoDumpExpected,
                ..
            }
        ));
        assert_eq!(storage.read_count(), 0);
    }

    #[test]
    fn test_verification_failure_stops_before_instance() {
        let mut storage = MemStorage::new();
        let image = DumpImageBuilder::new()
            .ddr_section(0x8000_0000, 0x100)
            .bad_signature()
            .build();
        storage.add_raw_partition(image, 4096);
        let firmware = StaticFirmware::abnormal_reset();
        let sink = RecordingSink::new();

        let service = OfflineDumpService::new(&storage, &storage, &firmware, &sink, config());
        match service.check_and_submit() {
            Err(failure) => {
                assert!(matches!(failure.error, DumpError::Verify(_)));
                assert!(failure.progress.dump_located, "abort point must be visible");
                assert!(!failure.progress.header_verified);
                assert!(!failure.progress.instance_built);
            }
            other => panic!("expected a verification failure, got {:?}", other),
        }
        assert_eq!(sink.submissions(), 0);
    }

    #[test]
    fn test_repeat_run_resubmits_the_same_instance() {
        let mut storage = MemStorage::new();
        let image = DumpImageBuilder::new()
            .ddr_section(0x8000_0000, 0x100)
            .build();
        storage.add_raw_partition(image, 4096);
        let firmware = StaticFirmware::abnormal_reset();
        let sink = RecordingSink::new();

        let service = OfflineDumpService::new(&storage, &storage, &firmware, &sink, config());
        service.check_and_submit().expect("first run");
        service.check_and_submit().expect("second run");
        assert_eq!(sink.submissions(), 2);
        assert_eq!(sink.distinct_instances(), 1, "one dump, one instance");
    }

    #[test]
    fn test_sink_failure_is_unknown_error() {
        let mut storage = MemStorage::new();
        let image = DumpImageBuilder::new()
            .ddr_section(0x8000_0000, 0x100)
            .build();
        storage.add_raw_partition(image, 4096);
        let firmware = StaticFirmware::abnormal_reset();
        let sink = RecordingSink::failing();

        let service = OfflineDumpService::new(&storage, &storage, &firmware, &sink, config());
        match service.check_and_submit() {
            Err(failure) => {
                assert!(matches!(failure.error, DumpError::Unknown { .. }));
                assert!(failure.progress.instance_built);
                assert!(!failure.progress.submitted);
            }
            other => panic!("expected a sink failure, got {:?}", other),
        }
    }
}
