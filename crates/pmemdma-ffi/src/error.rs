use std::any::Any;
use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use pmemdma_driver::DriverError;

use crate::types::PmemdmaResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let message = message.into();
    let sanitized = message.replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> PmemdmaResult {
    set_error_message(message);
    PmemdmaResult::InvalidArgument
}

/// Record a panic caught in `entry`, keeping its message when it has one.
pub(crate) fn set_panic_error(entry: &str, payload: &(dyn Any + Send)) {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str));
    match detail {
        Some(detail) => set_error_message(format!("panic in {entry}: {detail}")),
        None => set_error_message(format!("panic in {entry}")),
    }
}

pub(crate) fn map_driver_error(err: &DriverError) -> PmemdmaResult {
    set_error_message(err.to_string());
    match err {
        DriverError::ResourceExhausted { .. } => PmemdmaResult::ResourceExhausted,
        DriverError::Unauthorized { .. } => PmemdmaResult::NoDevice,
        DriverError::InvalidTarget { .. } => PmemdmaResult::InvalidTarget,
        DriverError::OutOfRange { .. } => PmemdmaResult::OutOfRange,
        DriverError::HardwareFailure { .. } => PmemdmaResult::HardwareFailure,
        DriverError::Codec(_) => PmemdmaResult::ProtocolError,
        DriverError::Region(_) => PmemdmaResult::RegionError,
        DriverError::Config(_) => PmemdmaResult::ConfigError,
        DriverError::Internal(_) => PmemdmaResult::Internal,
    }
}

/// Record `err` and return the negative errno the ioctl entry point reports.
pub(crate) fn errno_for(err: &DriverError) -> i32 {
    set_error_message(err.to_string());
    -err.errno()
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
