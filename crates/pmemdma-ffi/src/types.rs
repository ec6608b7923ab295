use std::ffi::c_void;

use pmemdma_driver::{Context, DmaDevice};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmemdmaResult {
    Ok = 0,
    InvalidArgument = 1,
    NoDevice = 2,
    ResourceExhausted = 3,
    InvalidTarget = 4,
    OutOfRange = 5,
    HardwareFailure = 6,
    ProtocolError = 7,
    RegionError = 8,
    ConfigError = 9,
    Internal = 99,
}

#[allow(dead_code)]
pub const PMEMDMA_OK: PmemdmaResult = PmemdmaResult::Ok;
#[allow(dead_code)]
pub const PMEMDMA_ERR_INVALID_ARGUMENT: PmemdmaResult = PmemdmaResult::InvalidArgument;
#[allow(dead_code)]
pub const PMEMDMA_ERR_NO_DEVICE: PmemdmaResult = PmemdmaResult::NoDevice;
#[allow(dead_code)]
pub const PMEMDMA_ERR_RESOURCE_EXHAUSTED: PmemdmaResult = PmemdmaResult::ResourceExhausted;
#[allow(dead_code)]
pub const PMEMDMA_ERR_INVALID_TARGET: PmemdmaResult = PmemdmaResult::InvalidTarget;
#[allow(dead_code)]
pub const PMEMDMA_ERR_OUT_OF_RANGE: PmemdmaResult = PmemdmaResult::OutOfRange;
#[allow(dead_code)]
pub const PMEMDMA_ERR_HARDWARE: PmemdmaResult = PmemdmaResult::HardwareFailure;
#[allow(dead_code)]
pub const PMEMDMA_ERR_PROTOCOL: PmemdmaResult = PmemdmaResult::ProtocolError;
#[allow(dead_code)]
pub const PMEMDMA_ERR_REGION: PmemdmaResult = PmemdmaResult::RegionError;
#[allow(dead_code)]
pub const PMEMDMA_ERR_CONFIG: PmemdmaResult = PmemdmaResult::ConfigError;
#[allow(dead_code)]
pub const PMEMDMA_ERR_INTERNAL: PmemdmaResult = PmemdmaResult::Internal;

pub type PmemdmaDeviceHandle = *mut c_void;
pub type PmemdmaContextHandle = *mut c_void;

pub(crate) struct DeviceHandle {
    pub(crate) device: DmaDevice,
}

pub(crate) struct ContextHandle {
    pub(crate) context: Context,
}
