use pmemdma_driver::{AllocationPolicy, ChannelState, DmaDevice};
use serde::Serialize;

use crate::cmd::{DeviceArgs, InfoArgs};
use crate::exit::{driver_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct ChannelInfo {
    id: u64,
    state: String,
}

#[derive(Serialize)]
struct InfoOutput {
    schema_id: &'static str,
    name: String,
    channels: usize,
    allocation: AllocationPolicy,
    restore_on_failure: bool,
    channel_states: Vec<ChannelInfo>,
}

pub fn run(_args: InfoArgs, device_args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let config = device_args.resolve()?;
    let device = DmaDevice::builder(config)
        .build()
        .map_err(|err| driver_error("build device", err))?;

    let channel_states = (0..device.channel_count() as u64)
        .map(|id| ChannelInfo {
            id,
            state: match device.channel_state(id) {
                Some(ChannelState::Assigned(ctx)) => ctx.to_string(),
                _ => "free".to_string(),
            },
        })
        .collect();

    let config = device.config();
    let out = InfoOutput {
        schema_id: "https://schemas.3leaps.dev/pmemdma/cli/v1/device-info.schema.json",
        name: config.name.clone(),
        channels: device.channel_count(),
        allocation: config.allocation,
        restore_on_failure: config.restore_on_failure,
        channel_states,
    };

    print_info(&out, format);
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            print_table(
                &["CHANNEL", "STATE"],
                out.channel_states
                    .iter()
                    .map(|c| vec![c.id.to_string(), c.state.clone()])
                    .collect(),
            );
        }
        OutputFormat::Pretty => {
            print_fields(
                "Device Info",
                &[
                    ("Name", out.name.clone()),
                    ("Channels", out.channels.to_string()),
                    ("Allocation", format!("{:?}", out.allocation)),
                    ("Restore on failure", out.restore_on_failure.to_string()),
                ],
            );
        }
        OutputFormat::Raw => {
            println!("{}", out.channels);
        }
    }
}
