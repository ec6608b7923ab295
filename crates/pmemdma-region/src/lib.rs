//! Byte-addressable views over mapped persistent-memory regions.
//!
//! This is the lowest layer of pmemdma. The driver never touches raw memory
//! itself; every transfer goes through a [`MappedRegion`]:
//! - [`HeapRegion`] keeps the bytes in process memory (tests, simulation)
//! - [`MmapRegion`] maps a DAX device or regular file with `mmap(2)` (unix)
//!
//! All offsets are relative to the start of the region and every access is
//! bounds-checked before any byte moves.

pub mod error;
pub mod heap;
pub mod traits;

#[cfg(unix)]
pub mod mmap;

pub use error::{RegionError, Result};
pub use heap::HeapRegion;
pub use traits::{check_span, MappedRegion};

#[cfg(unix)]
pub use mmap::MmapRegion;
