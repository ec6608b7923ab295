use std::sync::Arc;
use std::time::Instant;

use pmemdma_driver::{DmaDevice, TransferRequest};
use pmemdma_region::{HeapRegion, MappedRegion};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::{BenchArgs, DeviceArgs};
use crate::exit::{driver_error, region_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{hex, mib_per_sec, print_fields, print_json, print_table, OutputFormat};

const IN_MEMORY_NAME: &str = "pmemdma-bench";

#[derive(Serialize)]
struct BenchOutput {
    schema_id: &'static str,
    region: String,
    size: u64,
    dst_offset: u64,
    channel: u64,
    dma_seconds: f64,
    memcpy_seconds: f64,
    dma_mib_per_sec: f64,
    memcpy_mib_per_sec: f64,
    verified: bool,
}

pub fn run(args: BenchArgs, device_args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    if args.size == 0 {
        return Err(CliError::new(USAGE, "size must be greater than zero"));
    }
    let dst_offset = args
        .dst_index
        .checked_mul(args.size)
        .ok_or_else(|| CliError::new(USAGE, "dst-index * size overflows"))?;
    let len = usize::try_from(args.size)
        .map_err(|_| CliError::new(USAGE, "size does not fit in memory"))?;

    let config = device_args.resolve()?;
    let region = open_region(&args, dst_offset)?;
    let target = region.name().to_string();
    let device = DmaDevice::builder(config)
        .region_arc(Arc::clone(&region))
        .build()
        .map_err(|err| driver_error("build device", err))?;

    // DMA pass.
    let data = pattern(len, 0x2545_f491_4f6c_dd1d);
    stage(region.as_ref(), &data)?;
    let ctx = device.open();
    let channel = ctx
        .acquire()
        .map_err(|err| driver_error("acquire channel", err))?;
    let started = Instant::now();
    ctx.submit(&TransferRequest::new(channel, &target, 0, dst_offset, args.size))
        .map_err(|err| driver_error("dma transfer", err))?;
    let dma_seconds = started.elapsed().as_secs_f64();
    verify(region.as_ref(), dst_offset, &data, "dma")?;

    // memcpy pass over the same spans, bypassing the channel.
    let data = pattern(len, 0x9e37_79b9_7f4a_7c15);
    stage(region.as_ref(), &data)?;
    let started = Instant::now();
    region
        .copy_span(0, dst_offset, args.size)
        .map_err(|err| region_error("memcpy", err))?;
    let memcpy_seconds = started.elapsed().as_secs_f64();
    verify(region.as_ref(), dst_offset, &data, "memcpy")?;

    info!(dma_seconds, memcpy_seconds, size = args.size, "bench finished");

    let out = BenchOutput {
        schema_id: "https://schemas.3leaps.dev/pmemdma/cli/v1/bench-report.schema.json",
        region: target,
        size: args.size,
        dst_offset,
        channel,
        dma_seconds,
        memcpy_seconds,
        dma_mib_per_sec: mib_per_sec(args.size, dma_seconds),
        memcpy_mib_per_sec: mib_per_sec(args.size, memcpy_seconds),
        verified: true,
    };
    print_bench(&out, format);
    Ok(SUCCESS)
}

fn open_region(args: &BenchArgs, dst_offset: u64) -> CliResult<Arc<dyn MappedRegion>> {
    if args.in_memory {
        let extent = dst_offset
            .checked_add(args.size)
            .and_then(|end| usize::try_from(end).ok())
            .ok_or_else(|| CliError::new(USAGE, "in-memory region does not fit in memory"))?;
        debug!(extent, "allocating in-memory region");
        let region = HeapRegion::try_new(IN_MEMORY_NAME, extent)
            .map_err(|err| region_error("allocate in-memory region", err))?;
        return Ok(Arc::new(region));
    }

    let Some(path) = &args.region else {
        return Err(CliError::new(USAGE, "a region path or --in-memory is required"));
    };
    map_region(path)
}

#[cfg(unix)]
fn map_region(path: &std::path::Path) -> CliResult<Arc<dyn MappedRegion>> {
    let region =
        pmemdma_region::MmapRegion::open(path).map_err(|err| region_error("map region", err))?;
    Ok(Arc::new(region))
}

#[cfg(not(unix))]
fn map_region(_path: &std::path::Path) -> CliResult<Arc<dyn MappedRegion>> {
    Err(CliError::new(
        USAGE,
        "mapping a region requires a unix platform; use --in-memory",
    ))
}

/// Write `data` at offset 0 and read it back.
fn stage(region: &dyn MappedRegion, data: &[u8]) -> CliResult<()> {
    region
        .write_span(0, data)
        .map_err(|err| region_error("write source", err))?;
    verify(region, 0, data, "source")
}

fn verify(region: &dyn MappedRegion, offset: u64, expected: &[u8], what: &str) -> CliResult<()> {
    let mut actual = vec![0u8; expected.len()];
    region
        .read_span(offset, &mut actual)
        .map_err(|err| region_error("read back", err))?;
    if actual != expected {
        return Err(CliError::new(
            DATA_INVALID,
            format!("{what}: data at {offset:#x} differs from what was written"),
        ));
    }
    Ok(())
}

/// Deterministic xorshift64 byte stream.
fn pattern(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

fn print_bench(out: &BenchOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            &["METHOD", "SIZE", "SECONDS", "MiB/s"],
            vec![
                vec![
                    "dma".to_string(),
                    hex(out.size),
                    format!("{:.6}", out.dma_seconds),
                    out.dma_mib_per_sec.to_string(),
                ],
                vec![
                    "memcpy".to_string(),
                    hex(out.size),
                    format!("{:.6}", out.memcpy_seconds),
                    out.memcpy_mib_per_sec.to_string(),
                ],
            ],
        ),
        OutputFormat::Pretty => {
            println!("DMA vs memcpy (data size: {})", hex(out.size));
            print_fields(
                "Result",
                &[
                    ("Region", out.region.clone()),
                    ("Destination", hex(out.dst_offset)),
                    ("Channel", out.channel.to_string()),
                    ("DMA", format!("{:.6} s", out.dma_seconds)),
                    ("memcpy", format!("{:.6} s", out.memcpy_seconds)),
                ],
            );
        }
        OutputFormat::Raw => println!("{} {}", out.dma_seconds, out.memcpy_seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_is_deterministic_and_sized() {
        let a = pattern(13, 7);
        assert_eq!(a.len(), 13);
        assert_eq!(a, pattern(13, 7));
        assert_ne!(a, pattern(13, 8));
    }

    #[test]
    fn verify_detects_mismatch() {
        let region = HeapRegion::new("bench", 32);
        stage(&region, &[1, 2, 3, 4]).unwrap();
        assert!(verify(&region, 0, &[1, 2, 3, 4], "x").is_ok());
        let err = verify(&region, 16, &[1, 2, 3, 4], "x").unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }
}
