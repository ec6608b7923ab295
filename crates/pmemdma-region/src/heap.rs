use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{RegionError, Result};
use crate::traits::{check_span, MappedRegion};

/// A region held in process memory.
///
/// Useful wherever a real DAX mapping is unavailable: unit tests, the CLI's
/// in-memory mode, and clients embedding the driver for simulation.
pub struct HeapRegion {
    name: String,
    bytes: RwLock<Vec<u8>>,
}

impl HeapRegion {
    /// Create a zero-filled region of `len` bytes.
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            bytes: RwLock::new(vec![0u8; len]),
        }
    }

    /// Like [`new`](Self::new), but reports an allocation failure instead of
    /// aborting. Use it for lengths that come from outside the process.
    pub fn try_new(name: impl Into<String>, len: usize) -> Result<Self> {
        let name = name.into();
        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(len).is_err() {
            return Err(RegionError::Alloc {
                name,
                len: len as u64,
            });
        }
        bytes.resize(len, 0);
        Ok(Self {
            name,
            bytes: RwLock::new(bytes),
        })
    }

    /// Create a region initialised with `bytes`.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes: RwLock::new(bytes),
        }
    }

    /// Copy the whole region out.
    pub fn snapshot(&self) -> Vec<u8> {
        self.read_guard().clone()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.bytes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MappedRegion for HeapRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.read_guard().len() as u64
    }

    fn read_span(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.read_guard();
        check_span(offset, buf.len() as u64, bytes.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_span(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut bytes = self.write_guard();
        check_span(offset, data.len() as u64, bytes.len() as u64)?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn copy_span(&self, src: u64, dst: u64, size: u64) -> Result<()> {
        let mut bytes = self.write_guard();
        let extent = bytes.len() as u64;
        check_span(src, size, extent)?;
        check_span(dst, size, extent)?;
        let (src, dst, size) = (src as usize, dst as usize, size as usize);
        bytes.copy_within(src..src + size, dst);
        Ok(())
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapRegion")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegionError;

    #[test]
    fn new_region_is_zeroed() {
        let region = HeapRegion::new("heap0", 32);
        assert_eq!(region.name(), "heap0");
        assert_eq!(region.len(), 32);
        assert!(region.snapshot().iter().all(|b| *b == 0));
    }

    #[test]
    fn try_new_reports_unsatisfiable_length() {
        let err = HeapRegion::try_new("heap0", usize::MAX).unwrap_err();
        assert!(matches!(err, RegionError::Alloc { len, .. } if len == usize::MAX as u64));

        let region = HeapRegion::try_new("heap0", 16).unwrap();
        assert_eq!(region.len(), 16);
        assert!(region.snapshot().iter().all(|b| *b == 0));
    }

    #[test]
    fn write_then_read_span() {
        let region = HeapRegion::new("heap0", 32);
        region.write_span(4, b"pmem").unwrap();

        let mut out = [0u8; 4];
        region.read_span(4, &mut out).unwrap();
        assert_eq!(&out, b"pmem");
    }

    #[test]
    fn copy_disjoint_spans() {
        let region = HeapRegion::from_bytes("heap0", (0u8..16).collect());
        region.copy_span(0, 8, 8).unwrap();

        let bytes = region.snapshot();
        assert_eq!(&bytes[8..16], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(&bytes[0..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn copy_overlapping_spans_behaves_like_memmove() {
        let region = HeapRegion::from_bytes("heap0", (0u8..8).collect());
        region.copy_span(0, 2, 6).unwrap();
        assert_eq!(region.snapshot(), vec![0, 1, 0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn out_of_bounds_access_leaves_region_untouched() {
        let region = HeapRegion::new("heap0", 16);
        let err = region.write_span(12, b"too long").unwrap_err();
        assert!(matches!(err, RegionError::OutOfBounds { .. }));

        let err = region.copy_span(0, 10, 8).unwrap_err();
        assert!(matches!(err, RegionError::OutOfBounds { .. }));
        assert!(region.snapshot().iter().all(|b| *b == 0));
    }

    #[test]
    fn zero_length_copy_is_ok() {
        let region = HeapRegion::new("heap0", 4);
        region.copy_span(4, 0, 0).unwrap();
    }
}
