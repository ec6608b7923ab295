use crate::error::{RegionError, Result};

/// A named, byte-addressable span of mapped memory.
///
/// Implementations provide the three primitives the transfer dispatcher needs.
/// The region is shared mutable state owned outside the driver: no locking is
/// promised across calls, and callers racing on the same bytes get whatever
/// interleaving the platform gives them.
pub trait MappedRegion: Send + Sync {
    /// Name clients use to address this region (e.g. `/dev/dax0.0`).
    fn name(&self) -> &str;

    /// Extent of the region in bytes.
    fn len(&self) -> u64;

    /// True when the region has no addressable bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read_span(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Copy `data` into the region starting at `offset`.
    fn write_span(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Copy `size` bytes from `src` to `dst` within the region.
    ///
    /// Overlapping spans behave like `memmove`.
    fn copy_span(&self, src: u64, dst: u64, size: u64) -> Result<()>;
}

/// Check that `offset..offset + size` lies within `extent`.
///
/// Overflow of `offset + size` is reported as out of bounds.
pub fn check_span(offset: u64, size: u64, extent: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= extent => Ok(()),
        _ => Err(RegionError::OutOfBounds {
            offset,
            size,
            extent,
        }),
    }
}
