use std::fmt;
use std::io;

use pmemdma_driver::{ConfigError, DriverError};
use pmemdma_region::RegionError;

// Codes 3 and up are stable for scripts; 64 follows sysexits EX_USAGE.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const DEVICE_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn region_error(context: &str, err: RegionError) -> CliError {
    match err {
        RegionError::Open { source, .. } | RegionError::Map { source, .. } => {
            io_error(context, source)
        }
        RegionError::Alloc { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(USAGE, format!("{context}: {other}")),
    }
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    match err {
        ConfigError::Read { source, .. } => io_error(context, source),
        ConfigError::Parse(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(USAGE, format!("{context}: {other}")),
    }
}

pub fn driver_error(context: &str, err: DriverError) -> CliError {
    match err {
        DriverError::Region(err) => region_error(context, err),
        DriverError::Config(err) => config_error(context, err),
        DriverError::Unauthorized { .. } => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        DriverError::InvalidTarget { .. } | DriverError::OutOfRange { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        DriverError::ResourceExhausted { .. } | DriverError::HardwareFailure { .. } => {
            CliError::new(DEVICE_ERROR, format!("{context}: {err}"))
        }
        DriverError::Codec(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        DriverError::Internal(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_map_to_exit_codes() {
        let err = driver_error("copy", DriverError::Unauthorized { channel: Some(255) });
        assert_eq!(err.code, PERMISSION_DENIED);
        assert!(err.message.starts_with("copy: channel 255"));

        let err = driver_error(
            "copy",
            DriverError::OutOfRange {
                offset: 0,
                size: 2,
                extent: 1,
            },
        );
        assert_eq!(err.code, USAGE);

        let err = driver_error("acquire", DriverError::ResourceExhausted { total: 4 });
        assert_eq!(err.code, DEVICE_ERROR);
    }

    #[test]
    fn missing_region_file_is_failure() {
        let err = region_error(
            "open",
            RegionError::Open {
                path: "/nonexistent".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn unallocatable_region_is_failure() {
        let err = region_error(
            "allocate in-memory region",
            RegionError::Alloc {
                name: "pmemdma-bench".into(),
                len: u64::MAX,
            },
        );
        assert_eq!(err.code, FAILURE);
        assert!(err.message.contains("cannot allocate"));
    }
}
