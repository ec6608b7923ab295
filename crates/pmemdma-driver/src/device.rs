//! The driver instance and per-caller handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pmemdma_codec::{
    decode_command, encode_reply, Command, Reply, Transfer, SUBMIT_WITH_RESULT,
};
use pmemdma_region::MappedRegion;
use tracing::{debug, info, warn};

use crate::binding::ContextBinding;
use crate::channel::{ChannelId, ChannelState, ContextId};
use crate::config::DeviceConfig;
use crate::dispatcher::{Dispatcher, TransferReport, TransferRequest};
use crate::engine::{CopyEngine, CpuCopyEngine};
use crate::error::{ConfigError, DriverError, Result};
use crate::registry::ChannelRegistry;

/// A DMA driver instance: a fixed channel table plus the regions it can address.
///
/// Cloning is cheap and yields another handle to the same instance.
#[derive(Clone)]
pub struct DmaDevice {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    config: DeviceConfig,
    registry: Arc<ChannelRegistry>,
    binding: Arc<ContextBinding>,
    dispatcher: Dispatcher,
    next_context: AtomicU64,
}

/// Builder for [`DmaDevice`].
pub struct DmaDeviceBuilder {
    config: DeviceConfig,
    regions: Vec<Arc<dyn MappedRegion>>,
    engines: Option<Vec<Arc<dyn CopyEngine>>>,
}

impl DmaDeviceBuilder {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            regions: Vec::new(),
            engines: None,
        }
    }

    /// Make `region` addressable by its name.
    pub fn region<R: MappedRegion + 'static>(self, region: R) -> Self {
        self.region_arc(Arc::new(region))
    }

    /// Like [`region`](Self::region), for a region the caller keeps a handle to.
    pub fn region_arc(mut self, region: Arc<dyn MappedRegion>) -> Self {
        self.regions.push(region);
        self
    }

    /// Use one engine per channel instead of the CPU copy engine.
    pub fn engines(mut self, engines: Vec<Arc<dyn CopyEngine>>) -> Self {
        self.engines = Some(engines);
        self
    }

    pub fn build(self) -> Result<DmaDevice> {
        self.config.validate()?;
        let channels = self.config.channels;

        let engines = match self.engines {
            Some(engines) if engines.len() != channels => {
                return Err(ConfigError::EngineCountMismatch {
                    engines: engines.len(),
                    channels,
                }
                .into())
            }
            Some(engines) => engines,
            None => (0..channels)
                .map(|_| Arc::new(CpuCopyEngine) as Arc<dyn CopyEngine>)
                .collect(),
        };

        let mut regions: HashMap<String, Arc<dyn MappedRegion>> = HashMap::new();
        for region in self.regions {
            let name = region.name().to_string();
            if regions.contains_key(&name) {
                return Err(ConfigError::DuplicateRegion(name).into());
            }
            regions.insert(name, region);
        }

        let registry = Arc::new(ChannelRegistry::new(engines, self.config.allocation));
        let binding = Arc::new(ContextBinding::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&binding),
            regions,
            self.config.restore_on_failure,
        );

        info!(
            device = %self.config.name,
            channels,
            allocation = ?self.config.allocation,
            regions = ?dispatcher.region_names().collect::<Vec<_>>(),
            "device initialized"
        );

        Ok(DmaDevice {
            inner: Arc::new(DeviceInner {
                config: self.config,
                registry,
                binding,
                dispatcher,
                next_context: AtomicU64::new(1),
            }),
        })
    }
}

impl DmaDevice {
    /// A device with CPU copy engines over a single region.
    pub fn new<R: MappedRegion + 'static>(config: DeviceConfig, region: R) -> Result<Self> {
        DmaDeviceBuilder::new(config).region(region).build()
    }

    pub fn builder(config: DeviceConfig) -> DmaDeviceBuilder {
        DmaDeviceBuilder::new(config)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Number of channels. Constant for the lifetime of the device.
    pub fn channel_count(&self) -> usize {
        self.inner.registry.count()
    }

    /// Channels not assigned to any context.
    pub fn free_channels(&self) -> usize {
        self.inner.registry.free_count()
    }

    pub fn channel_state(&self, id: ChannelId) -> Option<ChannelState> {
        self.inner.registry.state(id)
    }

    pub fn region(&self, name: &str) -> Option<Arc<dyn MappedRegion>> {
        self.inner.dispatcher.region(name).cloned()
    }

    /// Open a new calling context. Dropping the last clone of the returned
    /// handle releases its channel.
    pub fn open(&self) -> Context {
        let id = ContextId::new(self.inner.next_context.fetch_add(1, Ordering::Relaxed));
        debug!(ctx = %id, "context opened");
        Context {
            inner: Arc::new(ContextInner {
                id,
                device: Arc::clone(&self.inner),
            }),
        }
    }
}

impl std::fmt::Debug for DmaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaDevice")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

/// One open handle on a [`DmaDevice`].
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    device: Arc<DeviceInner>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let device = &self.device;
        device.registry.release(self.id, &device.binding);
        debug!(ctx = %self.id, "context closed");
    }
}

impl Context {
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn channel_count(&self) -> u32 {
        // Bounded by MAX_CHANNELS at build time.
        self.inner.device.registry.count() as u32
    }

    /// Return this context's channel, assigning a free one on first call.
    pub fn acquire(&self) -> Result<ChannelId> {
        let device = &self.inner.device;
        device.registry.acquire(self.inner.id, &device.binding)
    }

    pub fn assigned_channel(&self) -> Option<ChannelId> {
        self.inner.device.binding.lookup(self.inner.id)
    }

    /// Run a transfer on an explicitly named channel, blocking until it finishes.
    pub fn submit(&self, request: &TransferRequest) -> Result<TransferReport> {
        self.inner.device.dispatcher.submit(self.inner.id, request)
    }

    /// Run a transfer on whatever channel this context holds.
    pub fn submit_on_assigned(&self, transfer: &Transfer) -> Result<TransferReport> {
        let channel = self
            .assigned_channel()
            .ok_or(DriverError::Unauthorized { channel: None })?;
        self.submit(&TransferRequest::from_transfer(channel, transfer))
    }

    /// Run a transfer on a blocking worker thread.
    ///
    /// The awaiting caller observes the same all-or-nothing outcome as
    /// [`submit`](Self::submit).
    #[cfg(feature = "async")]
    pub async fn submit_async(&self, request: TransferRequest) -> Result<TransferReport> {
        let ctx = self.clone();
        tokio::task::spawn_blocking(move || ctx.submit(&request))
            .await
            .map_err(|err| DriverError::Internal(format!("transfer task failed: {err}")))?
    }

    /// Execute a decoded command and return the value it produces.
    pub fn execute(&self, command: &Command) -> Result<Reply> {
        match command {
            Command::GetChannelCount => Ok(Reply::ChannelCount(self.channel_count())),
            Command::AcquireChannel { .. } => self.acquire().map(Reply::ChannelId),
            Command::SubmitIdPrefixed {
                channel_id,
                transfer,
            } => {
                self.submit(&TransferRequest::from_transfer(*channel_id, transfer))?;
                Ok(Reply::Status(0))
            }
            Command::SubmitRequestOnly { transfer } | Command::SubmitWithResult { transfer } => {
                self.submit_on_assigned(transfer)?;
                Ok(Reply::Status(0))
            }
        }
    }

    /// The control endpoint: decode `arg` according to `opcode`, execute, and
    /// write the reply back into `arg`.
    ///
    /// The with-result layout also receives the failure status (a negative
    /// errno) in its result field before the error is returned, including
    /// when the record itself could not be decoded.
    pub fn ioctl(&self, opcode: u32, arg: &mut [u8]) -> Result<()> {
        let command = match decode_command(opcode, arg) {
            Ok(command) => command,
            Err(err) => {
                warn!(ctx = %self.inner.id, opcode = format_args!("{opcode:#010x}"), error = %err, "rejected command");
                let err = DriverError::from(err);
                self.write_status(opcode, &err, arg);
                return Err(err);
            }
        };

        match self.execute(&command) {
            Ok(reply) => {
                encode_reply(opcode, &reply, arg)?;
                Ok(())
            }
            Err(err) => {
                self.write_status(opcode, &err, arg);
                Err(err)
            }
        }
    }

    fn write_status(&self, opcode: u32, err: &DriverError, arg: &mut [u8]) {
        if opcode != SUBMIT_WITH_RESULT {
            return;
        }
        if let Err(encode_err) = encode_reply(opcode, &Reply::Status(-err.errno()), arg) {
            debug!(ctx = %self.inner.id, error = %encode_err, "result field not writable");
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("channel", &self.assigned_channel())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use bytes::BytesMut;
    use pmemdma_codec::{
        decode_reply, encode_command, CodecError, ACQUIRE_CHANNEL, ACQUIRE_CHANNEL_U32,
        GET_CHANNEL_COUNT,
    };
    use pmemdma_region::HeapRegion;

    use super::*;
    use crate::error::HardwareError;

    const DAX: &str = "/dev/dax0.0";

    fn device(channels: usize, len: usize) -> (DmaDevice, Arc<HeapRegion>) {
        let region = Arc::new(HeapRegion::new(DAX, len));
        let config = DeviceConfig {
            channels,
            ..DeviceConfig::default()
        };
        let device = DmaDevice::builder(config)
            .region_arc(region.clone())
            .build()
            .expect("device should build");
        (device, region)
    }

    fn xorshift_fill(buf: &mut [u8], mut state: u64) {
        for byte in buf {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *byte = state as u8;
        }
    }

    fn encoded(command: &Command) -> (u32, Vec<u8>) {
        let mut buf = BytesMut::new();
        let opcode = encode_command(command, &mut buf).expect("command should encode");
        (opcode, buf.to_vec())
    }

    #[test]
    fn channel_count_is_stable() {
        let (device, _) = device(4, 64);
        let ctx = device.open();
        let mut arg = [0u8; 4];
        for _ in 0..3 {
            ctx.ioctl(GET_CHANNEL_COUNT, &mut arg).unwrap();
            assert_eq!(
                decode_reply(GET_CHANNEL_COUNT, &arg).unwrap(),
                Reply::ChannelCount(4)
            );
        }
    }

    #[test]
    fn acquire_is_idempotent_in_both_widths() {
        let (device, _) = device(4, 64);
        let ctx = device.open();

        let mut wide = [0u8; 8];
        ctx.ioctl(ACQUIRE_CHANNEL, &mut wide).unwrap();
        let mut narrow = [0u8; 4];
        ctx.ioctl(ACQUIRE_CHANNEL_U32, &mut narrow).unwrap();

        let first = decode_reply(ACQUIRE_CHANNEL, &wide).unwrap();
        assert_eq!(first, decode_reply(ACQUIRE_CHANNEL_U32, &narrow).unwrap());
        assert_eq!(first, Reply::ChannelId(ctx.acquire().unwrap()));
        assert_eq!(device.free_channels(), 3);
    }

    #[test]
    fn two_mib_round_trip_through_ioctl() {
        let size: u64 = 0x200000;
        let dst = 0x10 * size;
        let (device, region) = device(4, (dst + size) as usize);

        let mut data = vec![0u8; size as usize];
        xorshift_fill(&mut data, 0x9e37_79b9_7f4a_7c15);
        region.write_span(0, &data).unwrap();

        let ctx = device.open();
        let channel = ctx.acquire().unwrap();
        let (opcode, mut arg) = encoded(&Command::SubmitIdPrefixed {
            channel_id: channel,
            transfer: Transfer::new(DAX, 0, dst, size),
        });
        ctx.ioctl(opcode, &mut arg).unwrap();

        let mut copied = vec![0u8; size as usize];
        region.read_span(dst, &mut copied).unwrap();
        assert_eq!(copied, data);
    }

    #[test]
    fn channel_255_is_reported_as_no_device() {
        let (device, region) = device(4, 256);
        let before = region.snapshot();
        let ctx = device.open();

        let (opcode, mut arg) = encoded(&Command::SubmitIdPrefixed {
            channel_id: 255,
            transfer: Transfer::new(DAX, 0, 128, 64),
        });
        let err = ctx.ioctl(opcode, &mut arg).unwrap_err();

        assert_eq!(err.errno(), libc::ENODEV);
        assert_eq!(region.snapshot(), before);
    }

    #[test]
    fn request_only_layout_uses_assigned_channel() {
        let (device, region) = device(2, 128);
        region.write_span(0, &[7u8; 16]).unwrap();
        let ctx = device.open();
        let command = Command::SubmitRequestOnly {
            transfer: Transfer::new(DAX, 0, 64, 16),
        };

        let (opcode, mut arg) = encoded(&command);
        let err = ctx.ioctl(opcode, &mut arg).unwrap_err();
        assert!(matches!(err, DriverError::Unauthorized { channel: None }));

        ctx.acquire().unwrap();
        ctx.ioctl(opcode, &mut arg).unwrap();
        assert_eq!(&region.snapshot()[64..80], &[7u8; 16]);
    }

    #[test]
    fn with_result_layout_echoes_status() {
        let (device, _) = device(2, 128);
        let ctx = device.open();
        ctx.acquire().unwrap();

        let (opcode, mut arg) = encoded(&Command::SubmitWithResult {
            transfer: Transfer::new(DAX, 0, 64, 16),
        });
        assert_eq!(opcode, SUBMIT_WITH_RESULT);
        ctx.ioctl(opcode, &mut arg).unwrap();
        assert_eq!(decode_reply(opcode, &arg).unwrap(), Reply::Status(0));

        let (opcode, mut arg) = encoded(&Command::SubmitWithResult {
            transfer: Transfer::new(DAX, 0, 120, 16),
        });
        let err = ctx.ioctl(opcode, &mut arg).unwrap_err();
        assert!(matches!(err, DriverError::OutOfRange { .. }));
        assert_eq!(
            decode_reply(opcode, &arg).unwrap(),
            Reply::Status(-libc::ERANGE)
        );
    }

    #[test]
    fn undecodable_with_result_record_gets_status() {
        let (device, region) = device(2, 128);
        let before = region.snapshot();
        let ctx = device.open();
        ctx.acquire().unwrap();

        let (opcode, mut arg) = encoded(&Command::SubmitWithResult {
            transfer: Transfer::new(DAX, 0, 64, 16),
        });
        arg[0] = 0xff;
        let err = ctx.ioctl(opcode, &mut arg).unwrap_err();

        assert!(matches!(err, DriverError::Codec(CodecError::InvalidName)));
        assert_eq!(
            decode_reply(opcode, &arg).unwrap(),
            Reply::Status(-libc::EINVAL)
        );
        assert_eq!(region.snapshot(), before);
    }

    #[test]
    fn malformed_commands_are_rejected() {
        let (device, _) = device(1, 64);
        let ctx = device.open();

        let mut arg = [0u8; 8];
        let err = ctx.ioctl(0x8008_ae01, &mut arg).unwrap_err();
        assert!(matches!(err, DriverError::Codec(CodecError::WrongMagic { .. })));
        assert_eq!(err.errno(), libc::EINVAL);

        let err = ctx.ioctl(ACQUIRE_CHANNEL, &mut arg[..4]).unwrap_err();
        assert_eq!(err.errno(), libc::EFAULT);
        assert_eq!(ctx.assigned_channel(), None);
    }

    #[test]
    fn closing_a_context_frees_its_channel() {
        let (device, _) = device(1, 64);
        let first = device.open();
        let second = device.open();

        assert_eq!(first.acquire().unwrap(), 0);
        let err = second.acquire().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.errno(), libc::EAGAIN);

        let clone = first.clone();
        drop(first);
        assert!(second.acquire().is_err());
        drop(clone);

        assert_eq!(second.acquire().unwrap(), 0);
        assert_eq!(
            device.channel_state(0),
            Some(ChannelState::Assigned(second.id()))
        );
    }

    #[test]
    fn concurrent_contexts_get_distinct_channels() {
        let (device, _) = device(8, 64);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let device = device.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let ctx = device.open();
                    barrier.wait();
                    let id = ctx.acquire().expect("a channel should be free");
                    (ctx, id)
                })
            })
            .collect();

        let mut held: Vec<(Context, ChannelId)> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should not panic"))
            .collect();
        let mut ids: Vec<ChannelId> = held.iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);

        held.clear();
        assert_eq!(device.free_channels(), 8);
    }

    #[test]
    fn builder_rejects_bad_setups() {
        let err = DmaDevice::builder(DeviceConfig {
            channels: 0,
            ..DeviceConfig::default()
        })
        .build()
        .unwrap_err();
        assert!(matches!(err, DriverError::Config(ConfigError::NoChannels)));

        let err = DmaDevice::builder(DeviceConfig::default())
            .region(HeapRegion::new(DAX, 8))
            .region(HeapRegion::new(DAX, 16))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::Config(ConfigError::DuplicateRegion(_))
        ));

        let err = DmaDevice::builder(DeviceConfig::default())
            .engines(vec![Arc::new(CpuCopyEngine)])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::Config(ConfigError::EngineCountMismatch {
                engines: 1,
                channels: 4
            })
        ));
    }

    struct StalledEngine;

    impl CopyEngine for StalledEngine {
        fn name(&self) -> &str {
            "stalled"
        }

        fn copy(
            &self,
            _region: &dyn MappedRegion,
            _src: u64,
            _dst: u64,
            _size: u64,
        ) -> std::result::Result<(), HardwareError> {
            Err(HardwareError::TimedOut(std::time::Duration::from_secs(5)))
        }
    }

    /// Signals when a copy starts, then holds it until the gate opens.
    struct GatedEngine {
        entered: Mutex<Sender<()>>,
        gate: Mutex<Receiver<()>>,
    }

    impl CopyEngine for GatedEngine {
        fn name(&self) -> &str {
            "gated"
        }

        fn copy(
            &self,
            region: &dyn MappedRegion,
            src: u64,
            dst: u64,
            size: u64,
        ) -> std::result::Result<(), HardwareError> {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.gate.lock().unwrap().recv();
            CpuCopyEngine.copy(region, src, dst, size)
        }
    }

    #[test]
    fn blocked_transfer_does_not_stall_other_contexts() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let region = Arc::new(HeapRegion::new(DAX, 256));
        region.write_span(0, &[0x3c; 32]).unwrap();

        let gated = GatedEngine {
            entered: Mutex::new(entered_tx),
            gate: Mutex::new(gate_rx),
        };
        let device = DmaDevice::builder(DeviceConfig {
            channels: 2,
            ..DeviceConfig::default()
        })
        .region_arc(region.clone())
        .engines(vec![Arc::new(gated) as Arc<dyn CopyEngine>, Arc::new(CpuCopyEngine)])
        .build()
        .unwrap();

        let first = device.open();
        assert_eq!(first.acquire().unwrap(), 0);
        let worker = {
            let first = first.clone();
            thread::spawn(move || first.submit(&TransferRequest::new(0, DAX, 0, 64, 32)))
        };
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("gated copy should start");

        let second = device.open();
        assert_eq!(second.acquire().unwrap(), 1);
        second
            .submit(&TransferRequest::new(1, DAX, 0, 128, 32))
            .unwrap();
        assert_eq!(&region.snapshot()[128..160], &[0x3c; 32]);
        assert!(!worker.is_finished());

        gate_tx.send(()).unwrap();
        worker.join().expect("worker should not panic").unwrap();
        assert_eq!(&region.snapshot()[64..96], &[0x3c; 32]);
    }

    #[test]
    fn hardware_timeout_surfaces_as_etimedout() {
        let device = DmaDevice::builder(DeviceConfig {
            channels: 1,
            ..DeviceConfig::default()
        })
        .region(HeapRegion::new(DAX, 64))
        .engines(vec![Arc::new(StalledEngine)])
        .build()
        .unwrap();
        let ctx = device.open();
        let channel = ctx.acquire().unwrap();

        let err = ctx
            .submit(&TransferRequest::new(channel, DAX, 0, 32, 16))
            .unwrap_err();
        assert_eq!(err.errno(), libc::ETIMEDOUT);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_submit_completes_before_returning() {
        let (device, region) = device(2, 128);
        region.write_span(0, &[0xa5; 32]).unwrap();
        let ctx = device.open();
        let channel = ctx.acquire().unwrap();

        let report = ctx
            .submit_async(TransferRequest::new(channel, DAX, 0, 64, 32))
            .await
            .unwrap();
        assert_eq!(report.bytes, 32);
        assert_eq!(&region.snapshot()[64..96], &[0xa5; 32]);

        let err = ctx
            .submit_async(TransferRequest::new(channel + 1, DAX, 0, 64, 32))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Unauthorized { .. }));
    }
}
