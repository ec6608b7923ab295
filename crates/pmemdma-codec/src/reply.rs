use bytes::{Buf, BufMut};

use crate::command::{
    check_len, record_size, ACQUIRE_CHANNEL, ACQUIRE_CHANNEL_U32, GET_CHANNEL_COUNT,
    REQUEST_ONLY_SIZE, SUBMIT_ID_PREFIXED, SUBMIT_REQUEST_ONLY, SUBMIT_WITH_RESULT,
};
use crate::error::{CodecError, Result};

/// What the driver hands back through a command's argument record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Number of channels (`u32` out-parameter).
    ChannelCount(u32),
    /// Assigned channel id (`u32` or `u64` out-parameter).
    ChannelId(u64),
    /// Transfer status: 0 on success, a negative errno otherwise.
    Status(i32),
}

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Reply::ChannelCount(_) => "channel_count",
            Reply::ChannelId(_) => "channel_id",
            Reply::Status(_) => "status",
        }
    }
}

/// Write `reply` into the argument record of `opcode`.
///
/// Write-only submit layouts carry no out-parameter; a status reply for them is
/// accepted and leaves `arg` untouched (the status travels as the call's
/// return value instead).
pub fn encode_reply(opcode: u32, reply: &Reply, arg: &mut [u8]) -> Result<()> {
    let needed = record_size(opcode)?;
    check_len(needed, arg.len())?;

    match (opcode, *reply) {
        (GET_CHANNEL_COUNT, Reply::ChannelCount(count)) => {
            (&mut arg[..4]).put_u32_ne(count);
        }
        (ACQUIRE_CHANNEL, Reply::ChannelId(id)) => {
            (&mut arg[..8]).put_u64_ne(id);
        }
        (ACQUIRE_CHANNEL_U32, Reply::ChannelId(id)) => {
            let narrow = u32::try_from(id).map_err(|_| CodecError::ValueTooWide {
                value: id,
                width: 4,
            })?;
            (&mut arg[..4]).put_u32_ne(narrow);
        }
        (SUBMIT_WITH_RESULT, Reply::Status(code)) => {
            (&mut arg[REQUEST_ONLY_SIZE..REQUEST_ONLY_SIZE + 4]).put_i32_ne(code);
        }
        (SUBMIT_ID_PREFIXED | SUBMIT_REQUEST_ONLY, Reply::Status(_)) => {}
        (opcode, reply) => {
            return Err(CodecError::ReplyMismatch {
                opcode,
                reply: reply.kind(),
            })
        }
    }
    Ok(())
}

/// Read the reply the driver left in the argument record of `opcode`.
///
/// Write-only submit layouts have nothing to read and decode as `Status(0)`;
/// their real status is the call's return value.
pub fn decode_reply(opcode: u32, arg: &[u8]) -> Result<Reply> {
    let needed = record_size(opcode)?;
    check_len(needed, arg.len())?;

    let mut src = arg;
    let reply = match opcode {
        GET_CHANNEL_COUNT => Reply::ChannelCount(src.get_u32_ne()),
        ACQUIRE_CHANNEL => Reply::ChannelId(src.get_u64_ne()),
        ACQUIRE_CHANNEL_U32 => Reply::ChannelId(u64::from(src.get_u32_ne())),
        SUBMIT_WITH_RESULT => {
            src.advance(REQUEST_ONLY_SIZE);
            Reply::Status(src.get_i32_ne())
        }
        _ => Reply::Status(0),
    };
    Ok(reply)
}
