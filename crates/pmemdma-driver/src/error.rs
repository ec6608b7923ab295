use std::path::PathBuf;
use std::time::Duration;

use pmemdma_codec::CodecError;
use pmemdma_region::RegionError;

use crate::channel::ChannelId;

/// Failures reported by a channel's copy engine once a transfer has started.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HardwareError {
    /// The completion never arrived.
    #[error("transfer timed out after {0:?}")]
    TimedOut(Duration),

    /// The engine signalled completion but the transfer did not finish.
    #[error("transfer completed with status in-progress")]
    Incomplete,

    /// The engine reported an error mid-flight.
    #[error("engine fault: {0}")]
    Fault(String),
}

/// Invalid driver configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The driver must own at least one channel.
    #[error("channel count must be greater than zero")]
    NoChannels,

    /// More channels than ids we hand out.
    #[error("too many channels ({requested}, max {max})")]
    TooManyChannels { requested: usize, max: usize },

    /// Custom engines were supplied but not one per channel.
    #[error("engine count {engines} does not match channel count {channels}")]
    EngineCountMismatch { engines: usize, channels: usize },

    /// Two regions were registered under the same name.
    #[error("duplicate region name {0:?}")]
    DuplicateRegion(String),

    /// Failed to read a configuration file.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("invalid configuration json: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors returned by driver operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Every channel is assigned. Retry once another context closes.
    #[error("no free DMA channel ({total} channels, all assigned)")]
    ResourceExhausted { total: usize },

    /// The named channel is not the caller's. Reported to callers as "no such device".
    #[error("{}", describe_unauthorized(.channel))]
    Unauthorized { channel: Option<ChannelId> },

    /// No mapped region carries the requested name.
    #[error("no mapped region named {name:?}")]
    InvalidTarget { name: String },

    /// The requested span runs past the region.
    #[error("span {offset:#x}+{size:#x} exceeds region extent {extent:#x}")]
    OutOfRange { offset: u64, size: u64, extent: u64 },

    /// The copy started and failed.
    #[error("hardware failure on channel {channel}: {source}")]
    HardwareFailure {
        channel: ChannelId,
        #[source]
        source: HardwareError,
    },

    /// The command or its argument buffer is malformed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Region access failed outside of a transfer.
    #[error("region error: {0}")]
    Region(#[from] RegionError),

    /// The driver could not be configured.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A blocking transfer task was lost before reporting.
    #[error("internal error: {0}")]
    Internal(String),
}

fn describe_unauthorized(channel: &Option<ChannelId>) -> String {
    match channel {
        Some(id) => format!("channel {id} is not assigned to this context"),
        None => "no channel is assigned to this context".to_string(),
    }
}

impl DriverError {
    /// The positive errno the control endpoint reports for this error.
    pub fn errno(&self) -> i32 {
        match self {
            DriverError::ResourceExhausted { .. } => libc::EAGAIN,
            DriverError::Unauthorized { .. } => libc::ENODEV,
            DriverError::InvalidTarget { .. } => libc::ENOENT,
            DriverError::OutOfRange { .. } => libc::ERANGE,
            DriverError::HardwareFailure { source, .. } => match source {
                HardwareError::TimedOut(_) => libc::ETIMEDOUT,
                HardwareError::Incomplete => libc::EBUSY,
                HardwareError::Fault(_) => libc::EIO,
            },
            DriverError::Codec(CodecError::ShortBuffer { .. }) => libc::EFAULT,
            DriverError::Codec(_) => libc::EINVAL,
            DriverError::Region(_) | DriverError::Internal(_) => libc::EIO,
            DriverError::Config(_) => libc::EINVAL,
        }
    }

    /// True for failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::ResourceExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_reads_as_no_such_device() {
        let err = DriverError::Unauthorized { channel: Some(255) };
        assert_eq!(err.errno(), libc::ENODEV);
        assert_eq!(err.to_string(), "channel 255 is not assigned to this context");

        let err = DriverError::Unauthorized { channel: None };
        assert_eq!(err.to_string(), "no channel is assigned to this context");
    }

    #[test]
    fn every_kind_has_a_distinct_errno() {
        let errors = [
            DriverError::ResourceExhausted { total: 1 },
            DriverError::Unauthorized { channel: Some(0) },
            DriverError::InvalidTarget {
                name: "x".to_string(),
            },
            DriverError::OutOfRange {
                offset: 0,
                size: 1,
                extent: 0,
            },
            DriverError::HardwareFailure {
                channel: 0,
                source: HardwareError::TimedOut(Duration::from_secs(5)),
            },
            DriverError::HardwareFailure {
                channel: 0,
                source: HardwareError::Incomplete,
            },
            DriverError::HardwareFailure {
                channel: 0,
                source: HardwareError::Fault("parity".to_string()),
            },
        ];
        let mut codes: Vec<i32> = errors.iter().map(DriverError::errno).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn only_exhaustion_is_retryable() {
        assert!(DriverError::ResourceExhausted { total: 4 }.is_retryable());
        assert!(!DriverError::Unauthorized { channel: None }.is_retryable());
    }

    #[test]
    fn short_buffer_maps_to_efault() {
        let err = DriverError::from(CodecError::ShortBuffer { needed: 8, got: 4 });
        assert_eq!(err.errno(), libc::EFAULT);
        let err = DriverError::from(CodecError::UnknownCommand { opcode: 0 });
        assert_eq!(err.errno(), libc::EINVAL);
    }
}
