//! Fixed-layout binary commands for the pmemdma control endpoint.
//!
//! Every control call is an ioctl-style pair of a 32-bit command number and an
//! argument buffer. The command number carries direction, a magic family tag
//! (`0xad`), an ordinal and the argument size, so each layout decodes to
//! exactly one [`Command`] variant:
//!
//! | Command | Number | Argument |
//! |---|---|---|
//! | channel count | `_IOR(0xad, 0, u32)` | out: `u32` |
//! | acquire channel | `_IOR(0xad, 1, u64)` / `_IOR(0xad, 1, u32)` | out: channel id |
//! | submit (id-prefixed) | `_IOW(0xad, 0, 64)` | `u64 id, [u8; 32] name, u64 src, u64 dst, u64 size` |
//! | submit (request-only) | `_IOW(0xad, 0, 88)` | `[u8; 64] name, u64 src, u64 dst, u64 size` |
//! | submit (with result) | `_IOWR(0xad, 0, 92)` | request-only record + `i32 result` |
//!
//! The codec checks shapes only. Authorization and range checks belong to the
//! driver.

pub mod command;
pub mod error;
pub mod ioctl;
pub mod reply;

pub use command::{
    decode_command, encode_command, record_size, Command, IdWidth, Transfer, ACQUIRE_CHANNEL,
    ACQUIRE_CHANNEL_U32, GET_CHANNEL_COUNT, ID_PREFIXED_NAME_LEN, ID_PREFIXED_SIZE,
    REQUEST_NAME_LEN, REQUEST_ONLY_SIZE, SUBMIT_ID_PREFIXED, SUBMIT_REQUEST_ONLY,
    SUBMIT_WITH_RESULT, WITH_RESULT_SIZE,
};
pub use error::{CodecError, Result};
pub use ioctl::{ioc_dir, ioc_nr, ioc_size, ioc_type, DMA_IOCTL_MAGIC};
pub use reply::{decode_reply, encode_reply, Reply};
