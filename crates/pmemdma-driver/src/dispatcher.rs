use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pmemdma_codec::Transfer;
use pmemdma_region::{check_span, MappedRegion};
use tracing::{debug, warn};

use crate::binding::ContextBinding;
use crate::channel::{ChannelId, ContextId};
use crate::error::{DriverError, Result};
use crate::registry::ChannelRegistry;

/// A copy job submitted by a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Must be the channel currently assigned to the submitting context.
    pub channel_id: ChannelId,
    /// Region the offsets are relative to.
    pub target_name: String,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

impl TransferRequest {
    pub fn new(
        channel_id: ChannelId,
        target_name: impl Into<String>,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Self {
        Self {
            channel_id,
            target_name: target_name.into(),
            src_offset,
            dst_offset,
            size,
        }
    }

    /// Attach a channel id to decoded wire parameters.
    pub fn from_transfer(channel_id: ChannelId, transfer: &Transfer) -> Self {
        Self {
            channel_id,
            target_name: transfer.target_name.clone(),
            src_offset: transfer.src_offset,
            dst_offset: transfer.dst_offset,
            size: transfer.size,
        }
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub channel_id: ChannelId,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Authorizes, validates and executes transfers.
pub struct Dispatcher {
    registry: Arc<ChannelRegistry>,
    binding: Arc<ContextBinding>,
    regions: HashMap<String, Arc<dyn MappedRegion>>,
    restore_on_failure: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        binding: Arc<ContextBinding>,
        regions: HashMap<String, Arc<dyn MappedRegion>>,
        restore_on_failure: bool,
    ) -> Self {
        Self {
            registry,
            binding,
            regions,
            restore_on_failure,
        }
    }

    /// Look up a mapped region by name.
    pub fn region(&self, name: &str) -> Option<&Arc<dyn MappedRegion>> {
        self.regions.get(name)
    }

    /// Names of all mapped regions.
    pub fn region_names(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    /// Execute `request` on behalf of `ctx`, blocking until the copy finishes.
    ///
    /// Validation failures are reported before any byte moves. A size of zero
    /// succeeds once the caller is authorized and the target exists.
    pub fn submit(&self, ctx: ContextId, request: &TransferRequest) -> Result<TransferReport> {
        let channel_id = request.channel_id;
        debug!(
            %ctx,
            channel = channel_id,
            target = %request.target_name,
            src = format_args!("{:#x}", request.src_offset),
            dst = format_args!("{:#x}", request.dst_offset),
            size = format_args!("{:#x}", request.size),
            "submit transfer"
        );

        if !self.binding.is_owner(ctx, channel_id) {
            warn!(%ctx, channel = channel_id, "rejected transfer on unassigned channel");
            return Err(DriverError::Unauthorized {
                channel: Some(channel_id),
            });
        }
        let channel = self
            .registry
            .get(channel_id)
            .ok_or(DriverError::Unauthorized {
                channel: Some(channel_id),
            })?;

        let region = self
            .regions
            .get(&request.target_name)
            .ok_or_else(|| DriverError::InvalidTarget {
                name: request.target_name.clone(),
            })?;

        if request.size == 0 {
            return Ok(TransferReport {
                channel_id,
                bytes: 0,
                elapsed: Duration::ZERO,
            });
        }

        let extent = region.len();
        for offset in [request.src_offset, request.dst_offset] {
            check_span(offset, request.size, extent).map_err(|_| DriverError::OutOfRange {
                offset,
                size: request.size,
                extent,
            })?;
        }

        let snapshot = if self.restore_on_failure {
            Some(self.snapshot(region.as_ref(), request)?)
        } else {
            None
        };

        let started = Instant::now();
        let outcome = channel.engine().copy(
            region.as_ref(),
            request.src_offset,
            request.dst_offset,
            request.size,
        );
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                debug!(%ctx, channel = channel_id, ?elapsed, "transfer completed");
                Ok(TransferReport {
                    channel_id,
                    bytes: request.size,
                    elapsed,
                })
            }
            Err(source) => {
                warn!(%ctx, channel = channel_id, error = %source, "transfer failed");
                if let Some(saved) = snapshot {
                    if let Err(err) = region.write_span(request.dst_offset, &saved) {
                        warn!(channel = channel_id, error = %err, "failed restoring destination");
                    }
                }
                Err(DriverError::HardwareFailure {
                    channel: channel_id,
                    source,
                })
            }
        }
    }

    fn snapshot(&self, region: &dyn MappedRegion, request: &TransferRequest) -> Result<Vec<u8>> {
        let len = usize::try_from(request.size).map_err(|_| DriverError::OutOfRange {
            offset: request.dst_offset,
            size: request.size,
            extent: region.len(),
        })?;
        let mut saved = vec![0u8; len];
        region.read_span(request.dst_offset, &mut saved)?;
        Ok(saved)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("regions", &self.regions.keys().collect::<Vec<_>>())
            .field("restore_on_failure", &self.restore_on_failure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pmemdma_region::HeapRegion;

    use super::*;
    use crate::config::AllocationPolicy;
    use crate::engine::{CopyEngine, CpuCopyEngine};
    use crate::error::HardwareError;

    const REGION: &str = "/dev/dax0.0";

    /// Writes half of the destination, then reports a fault.
    struct TornEngine;

    impl CopyEngine for TornEngine {
        fn name(&self) -> &str {
            "torn"
        }

        fn copy(
            &self,
            region: &dyn MappedRegion,
            src: u64,
            dst: u64,
            size: u64,
        ) -> std::result::Result<(), HardwareError> {
            region
                .copy_span(src, dst, size / 2)
                .map_err(|err| HardwareError::Fault(err.to_string()))?;
            Err(HardwareError::Fault("descriptor error".to_string()))
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        registry: Arc<ChannelRegistry>,
        binding: Arc<ContextBinding>,
        region: Arc<HeapRegion>,
    }

    fn fixture(engine: Arc<dyn CopyEngine>, restore_on_failure: bool) -> Fixture {
        let registry = Arc::new(ChannelRegistry::new(
            vec![engine, Arc::new(CpuCopyEngine)],
            AllocationPolicy::LowestFree,
        ));
        let binding = Arc::new(ContextBinding::new());
        let region = Arc::new(HeapRegion::from_bytes(
            REGION,
            (0..64u32).map(|i| i as u8).collect(),
        ));
        let mut regions: HashMap<String, Arc<dyn MappedRegion>> = HashMap::new();
        regions.insert(REGION.to_string(), region.clone());
        Fixture {
            dispatcher: Dispatcher::new(
                Arc::clone(&registry),
                Arc::clone(&binding),
                regions,
                restore_on_failure,
            ),
            registry,
            binding,
            region,
        }
    }

    fn acquired(fx: &Fixture, raw: u64) -> (ContextId, ChannelId) {
        let ctx = ContextId::new(raw);
        let id = fx.registry.acquire(ctx, &fx.binding).unwrap();
        (ctx, id)
    }

    #[test]
    fn copies_between_offsets() {
        let fx = fixture(Arc::new(CpuCopyEngine), true);
        let (ctx, id) = acquired(&fx, 1);

        let report = fx
            .dispatcher
            .submit(ctx, &TransferRequest::new(id, REGION, 0, 32, 16))
            .unwrap();

        assert_eq!(report.bytes, 16);
        assert_eq!(report.channel_id, id);
        let bytes = fx.region.snapshot();
        assert_eq!(&bytes[32..48], &bytes[0..16]);
    }

    #[test]
    fn unacquired_channel_is_unauthorized() {
        let fx = fixture(Arc::new(CpuCopyEngine), true);
        let before = fx.region.snapshot();

        let err = fx
            .dispatcher
            .submit(
                ContextId::new(1),
                &TransferRequest::new(255, REGION, 0, 32, 16),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            DriverError::Unauthorized { channel: Some(255) }
        ));
        assert_eq!(err.errno(), libc::ENODEV);
        assert_eq!(fx.region.snapshot(), before);
    }

    #[test]
    fn another_contexts_channel_is_unauthorized() {
        let fx = fixture(Arc::new(CpuCopyEngine), true);
        let (_owner, id) = acquired(&fx, 1);
        let (intruder, _) = acquired(&fx, 2);

        let err = fx
            .dispatcher
            .submit(intruder, &TransferRequest::new(id, REGION, 0, 32, 16))
            .unwrap_err();
        assert!(matches!(err, DriverError::Unauthorized { .. }));
    }

    #[test]
    fn unknown_region_is_invalid_target() {
        let fx = fixture(Arc::new(CpuCopyEngine), true);
        let (ctx, id) = acquired(&fx, 1);

        let err = fx
            .dispatcher
            .submit(ctx, &TransferRequest::new(id, "/dev/dax1.0", 0, 32, 16))
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidTarget { .. }));
    }

    #[test]
    fn spans_past_extent_are_out_of_range() {
        let fx = fixture(Arc::new(CpuCopyEngine), true);
        let (ctx, id) = acquired(&fx, 1);
        let before = fx.region.snapshot();

        for request in [
            TransferRequest::new(id, REGION, 0, 56, 16),
            TransferRequest::new(id, REGION, 56, 0, 16),
            TransferRequest::new(id, REGION, u64::MAX, 0, 2),
        ] {
            let err = fx.dispatcher.submit(ctx, &request).unwrap_err();
            assert!(matches!(err, DriverError::OutOfRange { extent: 64, .. }));
        }
        assert_eq!(fx.region.snapshot(), before);
    }

    #[test]
    fn zero_size_is_noop() {
        let fx = fixture(Arc::new(CpuCopyEngine), true);
        let (ctx, id) = acquired(&fx, 1);
        let before = fx.region.snapshot();

        let report = fx
            .dispatcher
            .submit(ctx, &TransferRequest::new(id, REGION, 1000, 2000, 0))
            .unwrap();
        assert_eq!(report.bytes, 0);
        assert_eq!(fx.region.snapshot(), before);
    }

    #[test]
    fn failed_transfer_restores_destination() {
        let fx = fixture(Arc::new(TornEngine), true);
        let (ctx, id) = acquired(&fx, 1);
        assert_eq!(id, 0);
        let before = fx.region.snapshot();

        let err = fx
            .dispatcher
            .submit(ctx, &TransferRequest::new(id, REGION, 0, 32, 16))
            .unwrap_err();

        assert!(matches!(
            err,
            DriverError::HardwareFailure {
                channel: 0,
                source: HardwareError::Fault(_)
            }
        ));
        assert_eq!(err.errno(), libc::EIO);
        assert_eq!(fx.region.snapshot(), before);
    }

    #[test]
    fn failed_transfer_without_restore_may_be_torn() {
        let fx = fixture(Arc::new(TornEngine), false);
        let (ctx, id) = acquired(&fx, 1);

        assert!(fx
            .dispatcher
            .submit(ctx, &TransferRequest::new(id, REGION, 0, 32, 16))
            .is_err());
        let bytes = fx.region.snapshot();
        assert_eq!(&bytes[32..40], &bytes[0..8]);
    }

    #[test]
    fn from_transfer_keeps_wire_fields() {
        let transfer = Transfer::new(REGION, 1, 2, 3);
        let request = TransferRequest::from_transfer(7, &transfer);
        assert_eq!(request, TransferRequest::new(7, REGION, 1, 2, 3));
    }
}
