//! DMA channel arbitration and synchronous copies over persistent memory.
//!
//! pmemdma hands out a fixed pool of DMA channels to concurrent callers, one
//! channel per caller, and executes blocking memory-to-memory copies between
//! offsets of a mapped persistent-memory region. Callers talk to it through
//! typed handles or a packed ioctl-style command protocol.
//!
//! # Crate Structure
//!
//! - [`region`]: Bounds-checked views over mapped regions (heap or `mmap`)
//! - [`codec`]: ioctl command numbers and fixed-layout records
//! - [`driver`]: Channel registry, context binding and transfer dispatch
//!
//! ```
//! use pmemdma::driver::{DeviceConfig, DmaDevice, TransferRequest};
//! use pmemdma::region::HeapRegion;
//!
//! let device = DmaDevice::new(DeviceConfig::default(), HeapRegion::new("/dev/dax0.0", 4096))?;
//! let ctx = device.open();
//! let channel = ctx.acquire()?;
//! let report = ctx.submit(&TransferRequest::new(channel, "/dev/dax0.0", 0, 2048, 1024))?;
//! assert_eq!(report.bytes, 1024);
//! # Ok::<(), pmemdma::driver::DriverError>(())
//! ```

/// Re-export region types.
pub mod region {
    pub use pmemdma_region::*;
}

/// Re-export codec types.
pub mod codec {
    pub use pmemdma_codec::*;
}

/// Re-export driver types.
pub mod driver {
    pub use pmemdma_driver::*;
}
