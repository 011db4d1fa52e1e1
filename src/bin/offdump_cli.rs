use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use offdump::error::ErrorCode;
use offdump::instance::DumpInstance;
use offdump::memmap::{self, DdrMemoryMap};
use offdump::rawdump::{verify_header, verify_section_table, RawDumpHeader, RAW_DUMP_HEADER_LEN};
use offdump::service::SubmissionSink;
use offdump::storage::DumpRegion;
use offdump::testing::{MemStorage, StaticFirmware};
use offdump::{OfflineDumpService, ServiceConfig};

#[derive(Parser, Debug)]
#[command(
    name = "offdump-cli",
    about = "Offline crash-dump image inspector and pipeline harness"
)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify a captured dump image and print its structure
    Inspect {
        /// Raw dump image file (partition capture)
        image: PathBuf,
        /// Decode the header without judging it
        #[arg(long)]
        header_only: bool,
    },
    /// Run the full pipeline against a captured image
    Run {
        /// Raw dump image file (partition capture)
        image: PathBuf,
        /// Treat the dump as expected regardless of reset state
        #[arg(long)]
        replay: bool,
    },
}

fn main() -> ExitCode {
    offdump::init_logging();
    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("offdump-cli error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ServiceConfig::load_from_file(path),
        None => ServiceConfig::default(),
    };
    match cli.command {
        Commands::Inspect { image, header_only } => inspect(&image, header_only, config),
        Commands::Run { image, replay } => run(&image, replay, config),
    }
}

#[derive(Serialize)]
struct InspectReport {
    header: offdump::rawdump::VerifiedHeader,
    sections: offdump::rawdump::SectionTable,
    memory_map: DdrMemoryMap,
}

fn inspect(image: &PathBuf, header_only: bool, config: ServiceConfig) -> Result<()> {
    let data = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let length = data.len() as u64;

    if header_only {
        let header = RawDumpHeader::parse(&data)
            .map_err(|err| anyhow::anyhow!("(code {}) {}", err.code(), err.message()))?;
        println!("{}", serde_json::to_string_pretty(&header)?);
        return Ok(());
    }

    anyhow::ensure!(
        data.len() >= RAW_DUMP_HEADER_LEN,
        "image is too short to hold a dump header"
    );

    let mut storage = MemStorage::new();
    let disk = storage.add_disk(data);
    let region = DumpRegion::new(&storage, disk, 0, length);

    let verified = verify_header(&region)
        .map_err(|err| anyhow::anyhow!("(code {}) {}", err.code(), err.message()))?;
    let sections = verify_section_table(&region, &verified.header, &config.limits)
        .map_err(|err| anyhow::anyhow!("(code {}) {}", err.code(), err.message()))?;
    let memory_map = memmap::build(&sections)
        .map_err(|err| anyhow::anyhow!("(code {}) {}", err.code(), err.message()))?;

    let report = InspectReport {
        header: verified,
        sections,
        memory_map,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Sink that prints the assembled instance instead of uploading it
struct PrintSink;

impl SubmissionSink for PrintSink {
    fn submit(&self, instance: &DumpInstance) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(instance)?);
        Ok(())
    }
}

fn run(image: &PathBuf, replay: bool, mut config: ServiceConfig) -> Result<()> {
    let data = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let length = data.len() as u64;
    // Captured images are smaller than real partitions; don't let the
    // production minimum reject them.
    config.locator.min_partition_length = config.locator.min_partition_length.min(length);
    config.dump.replay_mode = config.dump.replay_mode || replay;

    let mut storage = MemStorage::new();
    storage.add_raw_partition(data, config.locator.sector_size);

    let firmware = if replay {
        StaticFirmware::clean_boot()
    } else {
        StaticFirmware::abnormal_reset()
    };
    let sink = PrintSink;

    let service = OfflineDumpService::new(&storage, &storage, &firmware, &sink, config);
    let outcome = service.check_and_submit().map_err(|failure| {
        anyhow::anyhow!(
            "(code {}) {}; progress: {:?}",
            failure.error.code(),
            failure.error.message(),
            failure.progress
        )
    })?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
