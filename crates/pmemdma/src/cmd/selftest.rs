use std::sync::{Arc, Barrier};
use std::thread;

use bytes::BytesMut;
use pmemdma_codec::{
    decode_reply, encode_command, Command, Reply, Transfer, ACQUIRE_CHANNEL, GET_CHANNEL_COUNT,
};
use pmemdma_driver::{DeviceConfig, DmaDevice, DriverError, TransferRequest};
use pmemdma_region::{HeapRegion, MappedRegion};
use serde::Serialize;

use crate::cmd::{DeviceArgs, SelftestArgs};
use crate::exit::{driver_error, CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

const REGION: &str = "selftest";
const SPAN: u64 = 0x1000;
const DST_INDEX: u64 = 0x10;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn from_outcome(name: &'static str, outcome: Result<String, String>) -> Self {
        match outcome {
            Ok(detail) => Self {
                name,
                status: CheckStatus::Pass,
                detail,
            },
            Err(detail) => Self {
                name,
                status: CheckStatus::Fail,
                detail,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct SelftestOutput {
    schema_id: &'static str,
    channels: usize,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: SelftestArgs, device_args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let config = device_args.resolve()?;
    let channels = config.channels;
    let (device, region) = build_device(config).map_err(|err| driver_error("build device", err))?;

    let mut checks = vec![
        CheckResult::from_outcome("channel_count", channel_count_check(&device)),
        CheckResult::from_outcome("idempotent_acquire", idempotent_acquire_check(&device)),
    ];
    checks.push(if channels < 2 {
        CheckResult {
            name: "distinct_channels",
            status: CheckStatus::Skip,
            detail: "needs at least two channels".to_string(),
        }
    } else {
        CheckResult::from_outcome("distinct_channels", distinct_channels_check(&device))
    });
    checks.push(CheckResult::from_outcome(
        "round_trip",
        round_trip_check(&device, region.as_ref()),
    ));
    checks.push(CheckResult::from_outcome(
        "unauthorized_channel",
        unauthorized_check(&device, region.as_ref()),
    ));
    checks.push(CheckResult::from_outcome(
        "zero_size",
        zero_size_check(&device, region.as_ref()),
    ));

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = SelftestOutput {
        schema_id: "https://schemas.3leaps.dev/pmemdma/cli/v1/selftest-report.schema.json",
        channels,
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };
    print_selftest(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn build_device(config: DeviceConfig) -> Result<(DmaDevice, Arc<HeapRegion>), DriverError> {
    let region = Arc::new(HeapRegion::new(REGION, ((DST_INDEX + 1) * SPAN) as usize));
    let device = DmaDevice::builder(config)
        .region_arc(region.clone())
        .build()?;
    Ok((device, region))
}

fn ioctl_reply(ctx: &pmemdma_driver::Context, opcode: u32, width: usize) -> Result<Reply, String> {
    let mut arg = vec![0u8; width];
    ctx.ioctl(opcode, &mut arg).map_err(|err| err.to_string())?;
    decode_reply(opcode, &arg).map_err(|err| err.to_string())
}

fn channel_count_check(device: &DmaDevice) -> Result<String, String> {
    let ctx = device.open();
    let first = ioctl_reply(&ctx, GET_CHANNEL_COUNT, 4)?;
    let second = ioctl_reply(&ctx, GET_CHANNEL_COUNT, 4)?;
    match (first, second) {
        (Reply::ChannelCount(a), Reply::ChannelCount(b)) if a == b && a > 0 => {
            Ok(format!("{a} channels"))
        }
        other => Err(format!("unstable or empty channel count: {other:?}")),
    }
}

fn idempotent_acquire_check(device: &DmaDevice) -> Result<String, String> {
    let ctx = device.open();
    let first = ioctl_reply(&ctx, ACQUIRE_CHANNEL, 8)?;
    let second = ioctl_reply(&ctx, ACQUIRE_CHANNEL, 8)?;
    if first != second {
        return Err(format!("acquire returned {first:?} then {second:?}"));
    }
    Ok(format!("{first:?} on both calls"))
}

fn distinct_channels_check(device: &DmaDevice) -> Result<String, String> {
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let device = device.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ctx = device.open();
                barrier.wait();
                ctx.acquire().map(|id| (ctx, id))
            })
        })
        .collect();

    let mut held = Vec::new();
    for handle in handles {
        let result = handle
            .join()
            .map_err(|_| "acquiring thread panicked".to_string())?;
        held.push(result.map_err(|err| err.to_string())?);
    }
    let (a, b) = (held[0].1, held[1].1);
    if a == b {
        return Err(format!("two contexts both received channel {a}"));
    }
    Ok(format!("channels {a} and {b}"))
}

fn round_trip_check(device: &DmaDevice, region: &dyn MappedRegion) -> Result<String, String> {
    let data: Vec<u8> = (0..SPAN).map(|i| (i * 31 % 251) as u8).collect();
    region.write_span(0, &data).map_err(|err| err.to_string())?;

    let ctx = device.open();
    let channel = ctx.acquire().map_err(|err| err.to_string())?;
    let dst = DST_INDEX * SPAN;
    ctx.submit(&TransferRequest::new(channel, REGION, 0, dst, SPAN))
        .map_err(|err| err.to_string())?;

    let mut copied = vec![0u8; data.len()];
    region
        .read_span(dst, &mut copied)
        .map_err(|err| err.to_string())?;
    if copied != data {
        return Err(format!("data at {dst:#x} differs from source"));
    }
    Ok(format!("{SPAN:#x} bytes to {dst:#x} on channel {channel}"))
}

fn unauthorized_check(device: &DmaDevice, region: &dyn MappedRegion) -> Result<String, String> {
    let dst = DST_INDEX * SPAN;
    let mut before = vec![0u8; SPAN as usize];
    region
        .read_span(dst, &mut before)
        .map_err(|err| err.to_string())?;

    let ctx = device.open();
    let mut arg = BytesMut::new();
    let opcode = encode_command(
        &Command::SubmitIdPrefixed {
            channel_id: 255,
            transfer: Transfer::new(REGION, 0, dst, SPAN),
        },
        &mut arg,
    )
    .map_err(|err| err.to_string())?;

    match ctx.ioctl(opcode, &mut arg) {
        Err(err @ DriverError::Unauthorized { .. }) if err.errno() == libc::ENODEV => {}
        Err(err) => return Err(format!("expected no-device, got {err}")),
        Ok(()) => return Err("transfer on channel 255 was accepted".to_string()),
    }

    let mut after = vec![0u8; SPAN as usize];
    region
        .read_span(dst, &mut after)
        .map_err(|err| err.to_string())?;
    if before != after {
        return Err("rejected transfer modified the destination".to_string());
    }
    Ok("channel 255 rejected as no such device".to_string())
}

fn zero_size_check(device: &DmaDevice, region: &dyn MappedRegion) -> Result<String, String> {
    let ctx = device.open();
    let channel = ctx.acquire().map_err(|err| err.to_string())?;
    let mut before = vec![0u8; 2 * SPAN as usize];
    region
        .read_span(0, &mut before)
        .map_err(|err| err.to_string())?;

    let report = ctx
        .submit(&TransferRequest::new(channel, REGION, 0, SPAN, 0))
        .map_err(|err| err.to_string())?;

    let mut after = vec![0u8; before.len()];
    region
        .read_span(0, &mut after)
        .map_err(|err| err.to_string())?;
    if report.bytes != 0 || before != after {
        return Err("zero-size transfer changed the region".to_string());
    }
    Ok("no bytes moved".to_string())
}

fn print_selftest(output: &SelftestOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => print_table(
            &["CHECK", "STATUS", "DETAIL"],
            output
                .checks
                .iter()
                .map(|c| {
                    vec![
                        c.name.to_string(),
                        status_text(c.status).to_string(),
                        c.detail.clone(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            println!("pmemdma selftest ({} channels)\n", output.channels);
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Skip => "SKIP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(channels: usize) -> (DmaDevice, Arc<HeapRegion>) {
        build_device(DeviceConfig {
            channels,
            ..DeviceConfig::default()
        })
        .expect("device should build")
    }

    #[test]
    fn all_checks_pass_on_default_device() {
        let (device, region) = device(4);
        assert!(channel_count_check(&device).is_ok());
        assert!(idempotent_acquire_check(&device).is_ok());
        assert!(distinct_channels_check(&device).is_ok());
        assert!(round_trip_check(&device, region.as_ref()).is_ok());
        assert!(unauthorized_check(&device, region.as_ref()).is_ok());
        assert!(zero_size_check(&device, region.as_ref()).is_ok());
    }

    #[test]
    fn selftest_output_has_overall_status() {
        let output = SelftestOutput {
            schema_id: "x",
            channels: 1,
            checks: vec![CheckResult::from_outcome("x", Ok("ok".to_string()))],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("selftest output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }
}
