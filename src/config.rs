//! Service configuration for the offline crash-dump pipeline
//!
//! This module provides runtime configuration loading from JSON files.
//! The enabled/use-capability values mirror persisted device settings that
//! the platform writes outside this service; everything else tunes
//! validation limits without recompilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub dump: DumpSettings,
    pub locator: LocatorConfig,
    pub limits: SectionLimits,
}

/// Persisted device settings consulted by the readiness evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpSettings {
    /// Whether offline crash dumps are enabled on this device
    pub enabled: bool,
    /// Persisted use-capability value; `None` means the variable is absent
    pub use_capability: Option<u32>,
    /// Treat a dump as expected regardless of the abnormal-reset flag,
    /// for reprocessing captured images on another device
    pub replay_mode: bool,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            use_capability: Some(1),
            replay_mode: false,
        }
    }
}

/// Partition discovery parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Minimum acceptable dump partition length in bytes
    pub min_partition_length: u64,
    /// Sector size the partition offset must align to
    pub sector_size: u64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            // Production devices reserve at least 2 GiB for the raw dump
            // partition; smaller regions are misdiscoveries.
            min_partition_length: 2 * 1024 * 1024 * 1024,
            sector_size: 512,
        }
    }
}

/// Section table validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionLimits {
    /// Maximum total sections a header may declare
    pub max_sections: u32,
    /// Maximum DDR-range sections allowed in one dump
    pub max_ddr_sections: u32,
}

impl Default for SectionLimits {
    fn default() -> Self {
        Self {
            max_sections: 256,
            max_ddr_sections: 10,
        }
    }
}

impl Default for ServiceConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            dump: DumpSettings::default(),
            locator: LocatorConfig::default(),
            limits: SectionLimits::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// * Loaded configuration, or defaults when the file is missing or
    ///   fails to parse (logged, never fatal)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}
