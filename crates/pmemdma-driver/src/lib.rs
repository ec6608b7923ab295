//! DMA channel arbitration and synchronous transfer dispatch.
//!
//! A [`DmaDevice`] owns a fixed table of channels, each backed by a
//! [`CopyEngine`]. Callers open a [`Context`] (one per handle), acquire at most
//! one channel for it, and submit copies between offsets of a named
//! [`MappedRegion`](pmemdma_region::MappedRegion). Every submit blocks until the
//! copy has completed or failed; nothing is queued.
//!
//! Layers, leaves first:
//! - [`channel`] / [`registry`]: the channel table and atomic claiming
//! - [`binding`]: which context holds which channel
//! - [`engine`]: the per-channel copy hardware abstraction
//! - [`dispatcher`]: authorization, validation and execution of transfers
//! - [`device`]: the driver instance, context handles and the ioctl entry point

pub mod binding;
pub mod channel;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod registry;

pub use binding::ContextBinding;
pub use channel::{Channel, ChannelId, ChannelState, ContextId};
pub use config::{AllocationPolicy, DeviceConfig, MAX_CHANNELS};
pub use device::{Context, DmaDevice, DmaDeviceBuilder};
pub use dispatcher::{Dispatcher, TransferReport, TransferRequest};
pub use engine::{CopyEngine, CpuCopyEngine};
pub use error::{ConfigError, DriverError, HardwareError, Result};
pub use registry::ChannelRegistry;
