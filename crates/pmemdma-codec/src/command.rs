use bytes::{Buf, BufMut, BytesMut};
use tracing::debug;

use crate::error::{CodecError, Result};
use crate::ioctl::{ioc_type, ior, iow, iowr, DMA_IOCTL_MAGIC};

/// Name field width in the id-prefixed submit record.
pub const ID_PREFIXED_NAME_LEN: usize = 32;
/// Name field width in the request-only and with-result submit records.
pub const REQUEST_NAME_LEN: usize = 64;

/// Offsets and size trailing every submit record: three `u64`s.
const SPAN_FIELDS_LEN: usize = 3 * 8;

/// `u64 channel_id, [u8; 32] name, u64 src, u64 dst, u64 size`.
pub const ID_PREFIXED_SIZE: usize = 8 + ID_PREFIXED_NAME_LEN + SPAN_FIELDS_LEN;
/// `[u8; 64] name, u64 src, u64 dst, u64 size`.
pub const REQUEST_ONLY_SIZE: usize = REQUEST_NAME_LEN + SPAN_FIELDS_LEN;
/// Request-only record followed by an `i32` result code.
pub const WITH_RESULT_SIZE: usize = REQUEST_ONLY_SIZE + 4;

pub const GET_CHANNEL_COUNT: u32 = ior(DMA_IOCTL_MAGIC, 0, 4);
pub const ACQUIRE_CHANNEL: u32 = ior(DMA_IOCTL_MAGIC, 1, 8);
pub const ACQUIRE_CHANNEL_U32: u32 = ior(DMA_IOCTL_MAGIC, 1, 4);
pub const SUBMIT_ID_PREFIXED: u32 = iow(DMA_IOCTL_MAGIC, 0, ID_PREFIXED_SIZE);
pub const SUBMIT_REQUEST_ONLY: u32 = iow(DMA_IOCTL_MAGIC, 0, REQUEST_ONLY_SIZE);
pub const SUBMIT_WITH_RESULT: u32 = iowr(DMA_IOCTL_MAGIC, 0, WITH_RESULT_SIZE);

/// Width of a channel-id out-parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdWidth {
    U32,
    U64,
}

impl IdWidth {
    pub fn bytes(self) -> usize {
        match self {
            IdWidth::U32 => 4,
            IdWidth::U64 => 8,
        }
    }
}

/// The copy parameters shared by every submit layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Name of the mapped region the offsets are relative to.
    pub target_name: String,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

impl Transfer {
    pub fn new(target_name: impl Into<String>, src_offset: u64, dst_offset: u64, size: u64) -> Self {
        Self {
            target_name: target_name.into(),
            src_offset,
            dst_offset,
            size,
        }
    }
}

/// A decoded control command, one variant per command number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Report how many channels the driver owns.
    GetChannelCount,
    /// Acquire (or re-read) the caller's channel.
    AcquireChannel { width: IdWidth },
    /// Submit a transfer on an explicitly named channel.
    SubmitIdPrefixed { channel_id: u64, transfer: Transfer },
    /// Submit a transfer on the caller's assigned channel.
    SubmitRequestOnly { transfer: Transfer },
    /// Like `SubmitRequestOnly`, with the status echoed into the record.
    SubmitWithResult { transfer: Transfer },
}

impl Command {
    /// The ioctl number this command travels under.
    pub fn opcode(&self) -> u32 {
        match self {
            Command::GetChannelCount => GET_CHANNEL_COUNT,
            Command::AcquireChannel {
                width: IdWidth::U64,
            } => ACQUIRE_CHANNEL,
            Command::AcquireChannel {
                width: IdWidth::U32,
            } => ACQUIRE_CHANNEL_U32,
            Command::SubmitIdPrefixed { .. } => SUBMIT_ID_PREFIXED,
            Command::SubmitRequestOnly { .. } => SUBMIT_REQUEST_ONLY,
            Command::SubmitWithResult { .. } => SUBMIT_WITH_RESULT,
        }
    }

    /// Size of the argument record.
    pub fn payload_size(&self) -> usize {
        payload_size(self.opcode()).unwrap_or(0)
    }

    /// Short human-readable name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetChannelCount => "get_channel_count",
            Command::AcquireChannel { .. } => "acquire_channel",
            Command::SubmitIdPrefixed { .. } => "submit_id_prefixed",
            Command::SubmitRequestOnly { .. } => "submit_request_only",
            Command::SubmitWithResult { .. } => "submit_with_result",
        }
    }

    /// The transfer carried by a submit command.
    pub fn transfer(&self) -> Option<&Transfer> {
        match self {
            Command::SubmitIdPrefixed { transfer, .. }
            | Command::SubmitRequestOnly { transfer }
            | Command::SubmitWithResult { transfer } => Some(transfer),
            _ => None,
        }
    }
}

fn payload_size(opcode: u32) -> Option<usize> {
    match opcode {
        GET_CHANNEL_COUNT => Some(4),
        ACQUIRE_CHANNEL => Some(8),
        ACQUIRE_CHANNEL_U32 => Some(4),
        SUBMIT_ID_PREFIXED => Some(ID_PREFIXED_SIZE),
        SUBMIT_REQUEST_ONLY => Some(REQUEST_ONLY_SIZE),
        SUBMIT_WITH_RESULT => Some(WITH_RESULT_SIZE),
        _ => None,
    }
}

/// Validate a command number and return the size of its argument record.
pub fn record_size(opcode: u32) -> Result<usize> {
    if ioc_type(opcode) != DMA_IOCTL_MAGIC {
        return Err(CodecError::WrongMagic { opcode });
    }
    payload_size(opcode).ok_or(CodecError::UnknownCommand { opcode })
}

pub(crate) fn check_len(needed: usize, got: usize) -> Result<()> {
    if got < needed {
        return Err(CodecError::ShortBuffer { needed, got });
    }
    Ok(())
}

/// Decode the command carried by `opcode` and its argument record.
///
/// Read-direction commands only need `arg` large enough to receive the reply;
/// its contents are ignored. Trailing bytes past the record are ignored.
pub fn decode_command(opcode: u32, arg: &[u8]) -> Result<Command> {
    let needed = record_size(opcode)?;
    check_len(needed, arg.len())?;

    let mut src = &arg[..needed];
    let command = match opcode {
        GET_CHANNEL_COUNT => Command::GetChannelCount,
        ACQUIRE_CHANNEL => Command::AcquireChannel {
            width: IdWidth::U64,
        },
        ACQUIRE_CHANNEL_U32 => Command::AcquireChannel {
            width: IdWidth::U32,
        },
        SUBMIT_ID_PREFIXED => {
            let channel_id = src.get_u64_ne();
            let transfer = get_transfer(&mut src, ID_PREFIXED_NAME_LEN)?;
            Command::SubmitIdPrefixed {
                channel_id,
                transfer,
            }
        }
        SUBMIT_REQUEST_ONLY => Command::SubmitRequestOnly {
            transfer: get_transfer(&mut src, REQUEST_NAME_LEN)?,
        },
        SUBMIT_WITH_RESULT => Command::SubmitWithResult {
            transfer: get_transfer(&mut src, REQUEST_NAME_LEN)?,
        },
        _ => return Err(CodecError::UnknownCommand { opcode }),
    };

    debug!(opcode = format_args!("{opcode:#010x}"), command = command.name(), "decoded command");
    Ok(command)
}

/// Encode `command` into its argument record and return the command number.
///
/// Read-direction commands encode a zeroed out-parameter of the right width.
/// The with-result record is encoded with a zero result field.
pub fn encode_command(command: &Command, dst: &mut BytesMut) -> Result<u32> {
    let opcode = command.opcode();
    dst.reserve(command.payload_size());

    match command {
        Command::GetChannelCount => dst.put_u32_ne(0),
        Command::AcquireChannel { width } => dst.put_bytes(0, width.bytes()),
        Command::SubmitIdPrefixed {
            channel_id,
            transfer,
        } => {
            // Validate before writing anything so a failed encode leaves `dst` as it was.
            let name = name_field(&transfer.target_name, ID_PREFIXED_NAME_LEN)?;
            dst.put_u64_ne(*channel_id);
            put_transfer(dst, &name, transfer);
        }
        Command::SubmitRequestOnly { transfer } => {
            let name = name_field(&transfer.target_name, REQUEST_NAME_LEN)?;
            put_transfer(dst, &name, transfer);
        }
        Command::SubmitWithResult { transfer } => {
            let name = name_field(&transfer.target_name, REQUEST_NAME_LEN)?;
            put_transfer(dst, &name, transfer);
            dst.put_i32_ne(0);
        }
    }

    Ok(opcode)
}

fn get_transfer(src: &mut &[u8], name_len: usize) -> Result<Transfer> {
    let target_name = parse_name(&src[..name_len])?;
    src.advance(name_len);
    let src_offset = src.get_u64_ne();
    let dst_offset = src.get_u64_ne();
    let size = src.get_u64_ne();
    Ok(Transfer {
        target_name,
        src_offset,
        dst_offset,
        size,
    })
}

fn put_transfer(dst: &mut BytesMut, name: &[u8], transfer: &Transfer) {
    dst.put_slice(name);
    dst.put_u64_ne(transfer.src_offset);
    dst.put_u64_ne(transfer.dst_offset);
    dst.put_u64_ne(transfer.size);
}

/// Read a NUL-terminated name from a fixed field.
fn parse_name(field: &[u8]) -> Result<String> {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidName)
}

/// Lay a name out in a zero-padded fixed field, keeping room for the NUL.
fn name_field(name: &str, width: usize) -> Result<Vec<u8>> {
    if name.as_bytes().contains(&0) {
        return Err(CodecError::InvalidName);
    }
    if name.len() >= width {
        return Err(CodecError::NameTooLong {
            len: name.len(),
            max: width - 1,
        });
    }
    let mut field = vec![0u8; width];
    field[..name.len()].copy_from_slice(name.as_bytes());
    Ok(field)
}
