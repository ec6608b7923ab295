/// Errors that can occur while decoding or encoding control commands.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The command number belongs to another ioctl family.
    #[error("command {opcode:#010x} has wrong magic (expected 0xad)")]
    WrongMagic { opcode: u32 },

    /// The command number is in our family but no layout matches it.
    #[error("unknown command {opcode:#010x}")]
    UnknownCommand { opcode: u32 },

    /// The argument buffer is smaller than the command's layout.
    #[error("argument buffer too short ({got} bytes, need {needed})")]
    ShortBuffer { needed: usize, got: usize },

    /// A target name does not fit its fixed field (including the NUL terminator).
    #[error("target name too long ({len} bytes, max {max})")]
    NameTooLong { len: usize, max: usize },

    /// A target name is not valid UTF-8 or contains an interior NUL.
    #[error("target name is not a valid C string")]
    InvalidName,

    /// A reply value does not fit the out-parameter width of the command.
    #[error("value {value} does not fit a {width}-byte out-parameter")]
    ValueTooWide { value: u64, width: usize },

    /// The reply kind does not belong to the command being answered.
    #[error("reply {reply} does not match command {opcode:#010x}")]
    ReplyMismatch { opcode: u32, reply: &'static str },
}

pub type Result<T> = std::result::Result<T, CodecError>;
