use serde::Serialize;
use tracing::info;

use crate::cmd::{CopyArgs, DeviceArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{hex, mib_per_sec, print_fields, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct CopyOutput {
    schema_id: &'static str,
    region: String,
    channel: u64,
    src_offset: u64,
    dst_offset: u64,
    bytes: u64,
    elapsed_us: u128,
    mib_per_sec: f64,
}

#[cfg(unix)]
pub fn run(args: CopyArgs, device_args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    use std::sync::Arc;

    use pmemdma_driver::{DmaDevice, TransferRequest};
    use pmemdma_region::{MappedRegion, MmapRegion};

    use crate::exit::{driver_error, region_error};

    let config = device_args.resolve()?;
    let region = match args.len {
        Some(len) => MmapRegion::open_with_len(&args.region, len),
        None => MmapRegion::open(&args.region),
    }
    .map_err(|err| region_error("map region", err))?;
    let region = Arc::new(region);
    let target = region.name().to_string();

    let device = DmaDevice::builder(config)
        .region_arc(region.clone())
        .build()
        .map_err(|err| driver_error("build device", err))?;
    let ctx = device.open();
    let channel = ctx
        .acquire()
        .map_err(|err| driver_error("acquire channel", err))?;

    let report = ctx
        .submit(&TransferRequest::new(
            channel, &target, args.src, args.dst, args.size,
        ))
        .map_err(|err| driver_error("transfer", err))?;
    region
        .flush()
        .map_err(|err| region_error("flush region", err))?;
    info!(channel, bytes = report.bytes, elapsed = ?report.elapsed, "copy finished");

    let out = CopyOutput {
        schema_id: "https://schemas.3leaps.dev/pmemdma/cli/v1/copy-report.schema.json",
        region: target,
        channel,
        src_offset: args.src,
        dst_offset: args.dst,
        bytes: report.bytes,
        elapsed_us: report.elapsed.as_micros(),
        mib_per_sec: mib_per_sec(report.bytes, report.elapsed.as_secs_f64()),
    };
    print_copy(&out, format);
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub fn run(_args: CopyArgs, _device_args: &DeviceArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "mapping a region requires a unix platform",
    ))
}

fn print_copy(out: &CopyOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            &["CHANNEL", "SRC", "DST", "BYTES", "ELAPSED", "MiB/s"],
            vec![vec![
                out.channel.to_string(),
                hex(out.src_offset),
                hex(out.dst_offset),
                out.bytes.to_string(),
                format!("{}us", out.elapsed_us),
                out.mib_per_sec.to_string(),
            ]],
        ),
        OutputFormat::Pretty => print_fields(
            "Copy",
            &[
                ("Region", out.region.clone()),
                ("Channel", out.channel.to_string()),
                ("Source", hex(out.src_offset)),
                ("Destination", hex(out.dst_offset)),
                ("Bytes", hex(out.bytes)),
                ("Elapsed", format!("{}us", out.elapsed_us)),
                ("Throughput", format!("{} MiB/s", out.mib_per_sec)),
            ],
        ),
        OutputFormat::Raw => println!("{}", out.bytes),
    }
}
