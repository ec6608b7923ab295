use std::ffi::c_void;
use std::os::raw::c_char;

use pmemdma_codec::{ioc_size, ioc_type, record_size, DMA_IOCTL_MAGIC};
use pmemdma_driver::{DeviceConfig, DmaDevice, DriverError};
use pmemdma_region::HeapRegion;

use crate::args;
use crate::error;
use crate::types::{
    ContextHandle, DeviceHandle, PmemdmaContextHandle, PmemdmaDeviceHandle, PmemdmaResult,
};

fn with_device<T>(handle: PmemdmaDeviceHandle, on_error: T, f: impl FnOnce(&DeviceHandle) -> T) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("device handle cannot be null");
        return on_error;
    }

    let device_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &*(handle as *mut DeviceHandle) }
    };

    f(device_handle)
}

fn with_context<T>(
    handle: PmemdmaContextHandle,
    on_error: T,
    f: impl FnOnce(&ContextHandle) -> T,
) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("context handle cannot be null");
        return on_error;
    }

    let context_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &*(handle as *mut ContextHandle) }
    };

    f(context_handle)
}

fn config_with_channels(num_channels: u32) -> DeviceConfig {
    DeviceConfig {
        channels: num_channels as usize,
        ..DeviceConfig::default()
    }
}

fn into_handle(result: pmemdma_driver::Result<DmaDevice>) -> PmemdmaDeviceHandle {
    match result {
        Ok(device) => Box::into_raw(Box::new(DeviceHandle { device })) as PmemdmaDeviceHandle,
        Err(err) => {
            let _ = error::map_driver_error(&err);
            std::ptr::null_mut()
        }
    }
}

/// Create a device with `num_channels` channels over a zeroed in-memory region.
///
/// # Safety
/// `region_name` must be a non-null pointer to a valid UTF-8, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn pmemdma_device_new(
    num_channels: u32,
    region_name: *const c_char,
    region_len: u64,
) -> PmemdmaDeviceHandle {
    crate::ffi_boundary("pmemdma_device_new", std::ptr::null_mut(), || {
        error::clear_error_state();

        let name = {
            // SAFETY: We validate null and UTF-8 in helper.
            match unsafe { args::required_str_arg(region_name, "region_name") } {
                Some(v) => v,
                None => return std::ptr::null_mut(),
            }
        };
        let Ok(len) = usize::try_from(region_len) else {
            let _ = error::set_invalid_argument("region_len does not fit in memory");
            return std::ptr::null_mut();
        };

        // The channel count is checked before the region is allocated.
        let config = config_with_channels(num_channels);
        if let Err(err) = config.validate() {
            let _ = error::map_driver_error(&DriverError::from(err));
            return std::ptr::null_mut();
        }
        let region = match HeapRegion::try_new(name, len) {
            Ok(region) => region,
            Err(err) => {
                let _ = error::map_driver_error(&DriverError::from(err));
                return std::ptr::null_mut();
            }
        };

        into_handle(DmaDevice::new(config, region))
    })
}

/// Create a device over a DAX device or file mapped at `path`.
///
/// A `len` of zero maps the whole file. Character devices need an explicit length.
///
/// # Safety
/// `path` must be a non-null pointer to a valid UTF-8, NUL-terminated C string.
#[cfg(unix)]
#[no_mangle]
pub unsafe extern "C" fn pmemdma_device_open_path(
    path: *const c_char,
    len: u64,
    num_channels: u32,
) -> PmemdmaDeviceHandle {
    crate::ffi_boundary("pmemdma_device_open_path", std::ptr::null_mut(), || {
        error::clear_error_state();

        let path = {
            // SAFETY: We validate null and UTF-8 in helper.
            match unsafe { args::required_str_arg(path, "path") } {
                Some(v) => v,
                None => return std::ptr::null_mut(),
            }
        };

        let region = if len == 0 {
            pmemdma_region::MmapRegion::open(path)
        } else {
            pmemdma_region::MmapRegion::open_with_len(path, len)
        };
        match region {
            Ok(region) => into_handle(DmaDevice::new(config_with_channels(num_channels), region)),
            Err(err) => {
                let _ = error::map_driver_error(&err.into());
                std::ptr::null_mut()
            }
        }
    })
}

/// Number of channels owned by `device`, or 0 if the handle is null.
///
/// # Safety
/// `device` must be null or a handle returned by a `pmemdma_device_*` constructor.
#[no_mangle]
pub unsafe extern "C" fn pmemdma_device_channel_count(device: PmemdmaDeviceHandle) -> u32 {
    crate::ffi_boundary("pmemdma_device_channel_count", 0, || {
        with_device(device, 0, |handle| handle.device.channel_count() as u32)
    })
}

/// Free a device handle. Contexts opened from it stay usable until closed.
///
/// # Safety
/// `device` must be null or a handle returned by a `pmemdma_device_*` constructor.
#[no_mangle]
pub unsafe extern "C" fn pmemdma_device_free(device: PmemdmaDeviceHandle) {
    crate::ffi_boundary("pmemdma_device_free", (), || {
        if device.is_null() {
            return;
        }

        // SAFETY: Handle was allocated by Box::into_raw in this crate.
        unsafe {
            drop(Box::from_raw(device as *mut DeviceHandle));
        }
    });
}

/// Open a calling context on `device`.
///
/// # Safety
/// `device` must be a valid handle returned by a `pmemdma_device_*` constructor.
#[no_mangle]
pub unsafe extern "C" fn pmemdma_open(device: PmemdmaDeviceHandle) -> PmemdmaContextHandle {
    crate::ffi_boundary("pmemdma_open", std::ptr::null_mut(), || {
        error::clear_error_state();

        with_device(device, std::ptr::null_mut(), |handle| {
            let context = handle.device.open();
            Box::into_raw(Box::new(ContextHandle { context })) as PmemdmaContextHandle
        })
    })
}

/// Close a context, releasing its channel.
///
/// # Safety
/// `ctx` must be null or a handle returned by `pmemdma_open`.
#[no_mangle]
pub unsafe extern "C" fn pmemdma_close(ctx: PmemdmaContextHandle) {
    crate::ffi_boundary("pmemdma_close", (), || {
        if ctx.is_null() {
            return;
        }

        // SAFETY: Handle was allocated by Box::into_raw in this crate.
        unsafe {
            drop(Box::from_raw(ctx as *mut ContextHandle));
        }
    });
}

/// Issue a control command on `ctx`.
///
/// `arg` points at the command's packed record; its size is taken from the
/// command number. Returns 0 on success or a negative errno.
///
/// # Safety
/// `ctx` must be a valid handle returned by `pmemdma_open`. `arg` must be null
/// or valid for reads and writes of the record size encoded in `cmd`.
#[no_mangle]
pub unsafe extern "C" fn pmemdma_ioctl(ctx: PmemdmaContextHandle, cmd: u32, arg: *mut c_void) -> i32 {
    crate::ffi_boundary("pmemdma_ioctl", -libc::EIO, || {
        error::clear_error_state();

        with_context(ctx, -libc::EBADF, |handle| {
            if ioc_type(cmd) != DMA_IOCTL_MAGIC {
                error::set_error_message(format!("command {cmd:#010x} is not a DMA command"));
                return -libc::EINVAL;
            }
            if let Err(err) = record_size(cmd) {
                return error::errno_for(&err.into());
            }
            if arg.is_null() {
                error::set_error_message("argument buffer cannot be null");
                return -libc::EFAULT;
            }

            let record = {
                // SAFETY: Non-null was checked above; the caller guarantees the
                // record size encoded in `cmd` is readable and writable.
                unsafe { std::slice::from_raw_parts_mut(arg as *mut u8, ioc_size(cmd)) }
            };
            match handle.context.ioctl(cmd, record) {
                Ok(()) => 0,
                Err(err) => error::errno_for(&err),
            }
        })
    })
}

/// Copy `len` bytes at `offset` of the region named `region_name` into `out`.
///
/// # Safety
/// `device` must be a valid device handle, `region_name` a valid C string, and
/// `out` writable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn pmemdma_region_read(
    device: PmemdmaDeviceHandle,
    region_name: *const c_char,
    offset: u64,
    out: *mut u8,
    len: usize,
) -> PmemdmaResult {
    crate::ffi_boundary("pmemdma_region_read", PmemdmaResult::Internal, || {
        error::clear_error_state();

        with_device(device, PmemdmaResult::InvalidArgument, |handle| {
            // SAFETY: We validate null and UTF-8 in helper.
            let Some(name) = (unsafe { args::required_str_arg(region_name, "region_name") }) else {
                return PmemdmaResult::InvalidArgument;
            };
            // SAFETY: Null/len contract is validated in helper.
            let Some(out) = (unsafe { args::bytes_arg_mut(out, len, "out") }) else {
                return PmemdmaResult::InvalidArgument;
            };
            let Some(region) = handle.device.region(name) else {
                return error::map_driver_error(&pmemdma_driver::DriverError::InvalidTarget {
                    name: name.to_string(),
                });
            };
            match region.read_span(offset, out) {
                Ok(()) => PmemdmaResult::Ok,
                Err(err) => error::map_driver_error(&err.into()),
            }
        })
    })
}

/// Write `len` bytes from `data` at `offset` of the region named `region_name`.
///
/// # Safety
/// `device` must be a valid device handle, `region_name` a valid C string, and
/// `data` readable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn pmemdma_region_write(
    device: PmemdmaDeviceHandle,
    region_name: *const c_char,
    offset: u64,
    data: *const u8,
    len: usize,
) -> PmemdmaResult {
    crate::ffi_boundary("pmemdma_region_write", PmemdmaResult::Internal, || {
        error::clear_error_state();

        with_device(device, PmemdmaResult::InvalidArgument, |handle| {
            // SAFETY: We validate null and UTF-8 in helper.
            let Some(name) = (unsafe { args::required_str_arg(region_name, "region_name") }) else {
                return PmemdmaResult::InvalidArgument;
            };
            // SAFETY: Null/len contract is validated in helper.
            let Some(data) = (unsafe { args::bytes_arg(data, len, "data") }) else {
                return PmemdmaResult::InvalidArgument;
            };
            let Some(region) = handle.device.region(name) else {
                return error::map_driver_error(&pmemdma_driver::DriverError::InvalidTarget {
                    name: name.to_string(),
                });
            };
            match region.write_span(offset, data) {
                Ok(()) => PmemdmaResult::Ok,
                Err(err) => error::map_driver_error(&err.into()),
            }
        })
    })
}
