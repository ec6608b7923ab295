//! pmemdma-ffi: C-ABI exports for the pmemdma driver.
//!
//! C clients build a device, open one context per caller and drive it with
//! [`pmemdma_ioctl`], passing the same packed records the kernel interface
//! uses.

mod args;
mod device;
mod error;
mod types;

use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;

pub use device::{
    pmemdma_close, pmemdma_device_channel_count, pmemdma_device_free, pmemdma_device_new,
    pmemdma_ioctl, pmemdma_open, pmemdma_region_read, pmemdma_region_write,
};
#[cfg(unix)]
pub use device::pmemdma_device_open_path;
pub use types::{
    PmemdmaContextHandle, PmemdmaDeviceHandle, PmemdmaResult, PMEMDMA_ERR_CONFIG,
    PMEMDMA_ERR_HARDWARE, PMEMDMA_ERR_INTERNAL, PMEMDMA_ERR_INVALID_ARGUMENT,
    PMEMDMA_ERR_INVALID_TARGET, PMEMDMA_ERR_NO_DEVICE, PMEMDMA_ERR_OUT_OF_RANGE,
    PMEMDMA_ERR_PROTOCOL, PMEMDMA_ERR_REGION, PMEMDMA_ERR_RESOURCE_EXHAUSTED, PMEMDMA_OK,
};

/// Run the body of the exported function `entry`, turning a panic into
/// `on_panic` and a last-error message naming `entry`.
fn ffi_boundary<T>(entry: &'static str, on_panic: T, f: impl FnOnce() -> T) -> T {
    std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        error::set_panic_error(entry, &*payload);
        on_panic
    })
}

static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Library version as a static NUL-terminated string. Never null.
#[no_mangle]
pub extern "C" fn pmemdma_version() -> *const c_char {
    VERSION.as_ptr().cast()
}

/// The ioctl type byte every accepted opcode carries.
#[no_mangle]
pub extern "C" fn pmemdma_ioctl_magic() -> u32 {
    pmemdma_codec::DMA_IOCTL_MAGIC
}

/// Forget the last failure recorded on the calling thread.
#[no_mangle]
pub extern "C" fn pmemdma_clear_error() {
    ffi_boundary("pmemdma_clear_error", (), error::clear_error_state);
}

/// Message describing the last failure on the calling thread, or an empty string.
#[no_mangle]
pub extern "C" fn pmemdma_last_error() -> *const c_char {
    ffi_boundary("pmemdma_last_error", std::ptr::null(), error::last_error_ptr)
}
