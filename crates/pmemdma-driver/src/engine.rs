use pmemdma_region::MappedRegion;

use crate::error::HardwareError;

/// The copy hardware behind one channel.
///
/// `copy` must not return until the transfer has finished or failed. Spans are
/// validated by the dispatcher before the engine sees them.
pub trait CopyEngine: Send + Sync {
    /// Short label for logs and diagnostics.
    fn name(&self) -> &str;

    /// Copy `size` bytes from `src` to `dst` within `region`, synchronously.
    fn copy(
        &self,
        region: &dyn MappedRegion,
        src: u64,
        dst: u64,
        size: u64,
    ) -> Result<(), HardwareError>;

    /// Abort outstanding work. Called when the owning context releases the channel.
    fn terminate(&self) {}
}

/// Performs copies on the CPU through the region itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuCopyEngine;

impl CopyEngine for CpuCopyEngine {
    fn name(&self) -> &str {
        "cpu-memcpy"
    }

    fn copy(
        &self,
        region: &dyn MappedRegion,
        src: u64,
        dst: u64,
        size: u64,
    ) -> Result<(), HardwareError> {
        region
            .copy_span(src, dst, size)
            .map_err(|err| HardwareError::Fault(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use pmemdma_region::HeapRegion;

    use super::*;

    #[test]
    fn cpu_engine_copies_through_region() {
        let region = HeapRegion::from_bytes("heap0", (0u8..8).chain([0; 8]).collect());
        CpuCopyEngine.copy(&region, 0, 8, 8).unwrap();
        assert_eq!(&region.snapshot()[8..], &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn cpu_engine_reports_region_errors_as_faults() {
        let region = HeapRegion::new("heap0", 8);
        let err = CpuCopyEngine.copy(&region, 0, 4, 8).unwrap_err();
        assert!(matches!(err, HardwareError::Fault(_)));
    }
}
