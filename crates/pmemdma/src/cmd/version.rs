use pmemdma_codec::{
    ioc_size, ACQUIRE_CHANNEL, ACQUIRE_CHANNEL_U32, DMA_IOCTL_MAGIC, GET_CHANNEL_COUNT,
    SUBMIT_ID_PREFIXED, SUBMIT_REQUEST_ONLY, SUBMIT_WITH_RESULT,
};
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{hex, print_fields, print_json, print_table, OutputFormat};

/// Every opcode the control endpoint accepts.
const COMMANDS: [(&str, u32); 6] = [
    ("get_channel_count", GET_CHANNEL_COUNT),
    ("acquire_channel", ACQUIRE_CHANNEL),
    ("acquire_channel_u32", ACQUIRE_CHANNEL_U32),
    ("submit_id_prefixed", SUBMIT_ID_PREFIXED),
    ("submit_request_only", SUBMIT_REQUEST_ONLY),
    ("submit_with_result", SUBMIT_WITH_RESULT),
];

#[derive(Serialize)]
struct VersionOutput {
    schema_id: &'static str,
    name: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<BuildInfo>,
}

#[derive(Serialize)]
struct BuildInfo {
    target: &'static str,
    os: &'static str,
    arch: &'static str,
    git_hash: &'static str,
    features: Vec<&'static str>,
    ioctl_magic: String,
    commands: Vec<CommandInfo>,
}

#[derive(Serialize)]
struct CommandInfo {
    name: &'static str,
    opcode: String,
    record_size: usize,
}

fn build_info() -> BuildInfo {
    let mut features = vec!["cli"];
    if cfg!(feature = "async") {
        features.push("async");
    }
    if cfg!(unix) {
        features.push("mmap");
    }

    BuildInfo {
        target: option_env!("PMEMDMA_BUILD_TARGET").unwrap_or("unknown"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown"),
        features,
        ioctl_magic: hex(u64::from(DMA_IOCTL_MAGIC)),
        commands: COMMANDS
            .iter()
            .map(|&(name, opcode)| CommandInfo {
                name,
                opcode: format!("{opcode:#010x}"),
                record_size: ioc_size(opcode),
            })
            .collect(),
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let out = VersionOutput {
        schema_id: "https://schemas.3leaps.dev/pmemdma/cli/v1/version.schema.json",
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        build: args.extended.then(build_info),
    };

    print_version(&out, format);
    Ok(SUCCESS)
}

fn print_version(out: &VersionOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Raw => println!("{} {}", out.name, out.version),
        OutputFormat::Table | OutputFormat::Pretty => {
            let Some(build) = &out.build else {
                println!("{} {}", out.name, out.version);
                return;
            };
            print_fields(
                out.name,
                &[
                    ("version", out.version.to_string()),
                    ("target", build.target.to_string()),
                    ("os", build.os.to_string()),
                    ("arch", build.arch.to_string()),
                    ("git_hash", build.git_hash.to_string()),
                    ("features", build.features.join(", ")),
                    ("ioctl_magic", build.ioctl_magic.clone()),
                ],
            );
            if matches!(format, OutputFormat::Table) {
                print_table(
                    &["COMMAND", "OPCODE", "RECORD"],
                    build
                        .commands
                        .iter()
                        .map(|cmd| {
                            vec![
                                cmd.name.to_string(),
                                cmd.opcode.clone(),
                                cmd.record_size.to_string(),
                            ]
                        })
                        .collect(),
                );
            }
        }
    }
}
