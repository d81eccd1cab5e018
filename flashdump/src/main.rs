mod logging;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use flashdump_core::config::DumpConfig;
use flashdump_core::device::Device;
use flashdump_core::dump;
use flashdump_core::engine::{BlockProgress, TransferState};
use flashdump_core::flash::{AddressRangeSource, FlashRegion, FlashSource, OffsetSource};
use flashdump_core::platform::{self, DeviceFlashReader, SdCardBackend};
use flashdump_core::report::FatalErrorReporter;
use flashdump_core::storage::StorageBackend;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "flashdump")]
#[command(about = "Dump a device's flash to a file on removable storage", version)]
struct Cli {
    /// Log every dumped block
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Copy the flash window out of physical memory (needs access to /dev/mem)
    Address,
    /// Read a flash device node or image file.
    Device,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the flash to a file on the removable card
    Dump {
        /// Block device holding the card (prompted for if omitted)
        #[arg(short, long, conflicts_with = "no_mount")]
        device: Option<PathBuf>,

        /// Write into the mount point as is, without mounting anything
        #[arg(long)]
        no_mount: bool,

        /// Where to read the flash from
        #[arg(long, value_enum)]
        source: SourceKind,

        /// Flash device node or image file to read with `--source device`
        #[arg(long, required_if_eq("source", "device"))]
        flash: Option<PathBuf>,

        /// First offset to read with `--source device` (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_number, default_value = "0")]
        offset: u64,

        /// Number of bytes to read with `--source device` [default: rest of the flash]
        #[arg(long, value_parser = parse_number)]
        length: Option<u64>,
    },
    /// List available removable devices
    List,
}

fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| format!("'{s}' is not a number: {e}"))
}

/// Presents an interactive menu for the user to select a device.
fn select_device(devices: &[Device], prompt: &str) -> Result<Device> {
    if devices.is_empty() {
        return Err(anyhow!("No removable devices found."));
    }

    let items: Vec<String> = devices.iter().map(|d| d.to_string()).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;

    Ok(devices[selection].clone())
}

/// Builds the flash source selected on the command line.
fn open_source(
    config: &DumpConfig,
    kind: SourceKind,
    flash: Option<PathBuf>,
    offset: u64,
    length: Option<u64>,
) -> Result<Box<dyn FlashSource>> {
    match kind {
        SourceKind::Address => {
            let window = platform::map_physical_window(&config.memory_device, config.physical_window())
                .with_context(|| {
                    format!(
                        "Could not map the flash window from {}",
                        config.memory_device.display()
                    )
                })?;
            Ok(Box::new(AddressRangeSource::new(config.flash_window, window)?))
        }
        SourceKind::Device => {
            let path = flash.ok_or_else(|| anyhow!("--flash is required with --source device"))?;
            let reader = DeviceFlashReader::open(&path)
                .with_context(|| format!("Could not open flash at {}", path.display()))?;
            let end = match length {
                Some(len) => offset
                    .checked_add(len)
                    .ok_or_else(|| anyhow!("offset 0x{offset:X} + length 0x{len:X} overflows"))?,
                None => reader.size()?,
            };
            Ok(Box::new(OffsetSource::new(FlashRegion::new(offset, end), reader)?))
        }
    }
}

fn run_dump(
    device: Option<PathBuf>,
    no_mount: bool,
    kind: SourceKind,
    flash: Option<PathBuf>,
    offset: u64,
    length: Option<u64>,
) -> Result<()> {
    let config = DumpConfig::default();

    let mut card = if no_mount {
        None
    } else {
        let device = match device {
            Some(device) => device,
            None => {
                let devices = platform::get_removable_devices()?;
                select_device(&devices, "Select the card to dump onto")?.path
            }
        };
        Some(SdCardBackend::new(device))
    };

    let mut source = open_source(&config, kind, flash, offset, length)?;
    let timestamp = chrono::Utc::now().timestamp();

    let bar_style = ProgressStyle::default_bar()
        .template(
            "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        )?
        .progress_chars("■ ");
    let dump_pb = ProgressBar::new(0);

    let on_start = |path: &Path, len: u64| {
        println!("  Mount:  {}", style(config.mount_point.display()).cyan());
        println!("  Output: {}", style(path.display()).cyan());
        println!();
        dump_pb.set_length(len);
        dump_pb.set_prefix("Dumping");
        dump_pb.set_style(bar_style.clone());
    };
    let on_progress = |block: &BlockProgress| {
        dump_pb.set_position(block.progress.bytes_written);
        dump_pb.set_message(format!("0x{:X}", block.range.end));
    };

    let storage = card.as_mut().map(|c| c as &mut dyn StorageBackend);
    let result = dump::run(&config, storage, &mut source, timestamp, on_start, on_progress);

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            dump_pb.finish_and_clear();
            return Err(e.into());
        }
    };

    let bytes = report.outcome.progress.bytes_written;
    match report.outcome.state {
        TransferState::Exhausted => dump_pb.finish_with_message("Dump complete."),
        TransferState::WriteFailed(e) => {
            dump_pb.abandon_with_message("❌ Write failed.");
            println!(
                "{} {:#}. Keeping the {} bytes dumped so far.",
                style("WARNING:").yellow().bold(),
                anyhow::Error::from(e),
                bytes
            );
        }
    }

    println!(
        "\n✨ Dumped {} bytes to {}.",
        bytes,
        style(report.path.display()).cyan()
    );
    if let Some(sha256) = report.sha256 {
        println!("  SHA-256: {}", sha256);
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = platform::get_removable_devices()?;
    if devices.is_empty() {
        println!("No removable devices found.");
        return Ok(());
    }

    println!("Found {} removable devices:", devices.len());
    println!(
        "\n  {:<12} {:<25} {:<10} {:<16} {}",
        "DEVICE", "NAME", "SIZE", "PARTITION 0", "LOCATION"
    );
    println!("  {:-<12} {:-<25} {:-<10} {:-<16} {:-<20}", "", "", "", "", "");
    for device in devices {
        let location = if device.mount_point.is_empty() {
            "(Not mounted)".to_string()
        } else {
            device.mount_point
        };
        let partition = match device.partition_type {
            Some(tag) => format!("0x{:02X} {}", tag, flashdump_core::mbr::type_name(tag)),
            None => "-".to_string(),
        };
        println!(
            "  {:<12} {:<25} {:>8.1} GB  {:<16} {}",
            device.path.display(),
            device.name,
            device.size_gb,
            partition,
            location
        );
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Dump {
            device,
            no_mount,
            source,
            flash,
            offset,
            length,
        } => run_dump(device, no_mount, source, flash, offset, length),
        Commands::List => list_devices(),
    }
}

/// The line written to stderr before exiting on an error.
fn fatal_message(e: &anyhow::Error) -> String {
    format!("{} {e:#}", style("ERROR:").for_stderr().red().bold())
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // Everything `run` acquired has been released by the time it returns.
    if let Err(e) = run(cli) {
        FatalErrorReporter::new()
            .with_stderr()
            .fatal(&fatal_message(&e));
    }
}
