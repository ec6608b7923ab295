use std::path::PathBuf;

use clap::{Args, Subcommand};
use pmemdma_driver::DeviceConfig;

use crate::exit::{config_error, CliResult};
use crate::output::OutputFormat;

pub mod bench;
pub mod copy;
pub mod info;
pub mod selftest;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show device configuration and channel states.
    Info(InfoArgs),
    /// Copy one span within a mapped region through a DMA channel.
    Copy(CopyArgs),
    /// Compare a DMA transfer against a plain memcpy of the same span.
    Bench(BenchArgs),
    /// Run driver health checks against an in-memory device.
    Selftest(SelftestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run(args, device, format),
        Command::Copy(args) => copy::run(args, device, format),
        Command::Bench(args) => bench::run(args, device, format),
        Command::Selftest(args) => selftest::run(args, device, format),
        Command::Version(args) => version::run(args, format),
    }
}

/// Device options shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct DeviceArgs {
    /// JSON device configuration file.
    #[arg(long, value_name = "FILE", global = true, env = "PMEMDMA_CONFIG")]
    pub config: Option<PathBuf>,
    /// Number of DMA channels (overrides the config file).
    #[arg(long, value_name = "N", global = true)]
    pub channels: Option<usize>,
}

impl DeviceArgs {
    /// Load the config file, if any, and apply flag overrides.
    pub fn resolve(&self) -> CliResult<DeviceConfig> {
        let mut config = match &self.config {
            Some(path) => DeviceConfig::from_json_file(path)
                .map_err(|err| config_error(&format!("load {}", path.display()), err))?,
            None => DeviceConfig::default(),
        };
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        config
            .validate()
            .map_err(|err| config_error("invalid device configuration", err))?;
        Ok(config)
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_u64(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid number: {input}"))
}

#[derive(Args, Debug, Default)]
pub struct InfoArgs {}

#[derive(Args, Debug)]
pub struct CopyArgs {
    /// DAX device or file to map (also the transfer's target name).
    pub region: PathBuf,
    /// Source offset in bytes.
    #[arg(long, value_parser = parse_u64)]
    pub src: u64,
    /// Destination offset in bytes.
    #[arg(long, value_parser = parse_u64)]
    pub dst: u64,
    /// Bytes to copy.
    #[arg(long, value_parser = parse_u64)]
    pub size: u64,
    /// Bytes to map. Defaults to the file size; required for character devices.
    #[arg(long, value_parser = parse_u64)]
    pub len: Option<u64>,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// DAX device or file to map.
    #[arg(required_unless_present = "in_memory")]
    pub region: Option<PathBuf>,
    /// Bytes per transfer.
    #[arg(long, value_parser = parse_u64, default_value = "0x2000000")]
    pub size: u64,
    /// Destination offset in units of `size`.
    #[arg(long, value_parser = parse_u64, default_value = "0x10")]
    pub dst_index: u64,
    /// Use an in-memory region instead of mapping a file.
    #[arg(long, conflicts_with = "region")]
    pub in_memory: bool,
}

#[derive(Args, Debug, Default)]
pub struct SelftestArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
