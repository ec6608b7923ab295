//! Channel records and caller identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::CopyEngine;

/// Stable identity of a channel, `0..count`.
pub type ChannelId = u64;

/// Owner word value of a free channel. Context ids start at 1.
const FREE: u64 = 0;

/// A distinct calling identity: one open handle on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Wrap a raw id. Zero is reserved and never handed out.
    pub(crate) fn new(raw: u64) -> Self {
        debug_assert_ne!(raw, FREE);
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Assignment state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Free,
    Assigned(ContextId),
}

/// One hardware DMA channel.
///
/// The owner word is the only mutable state; it moves between `FREE` and a
/// context id with compare-and-exchange, so two contexts can never hold the
/// same channel.
pub struct Channel {
    id: ChannelId,
    owner: AtomicU64,
    engine: Arc<dyn CopyEngine>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, engine: Arc<dyn CopyEngine>) -> Self {
        Self {
            id,
            owner: AtomicU64::new(FREE),
            engine,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        match self.owner.load(Ordering::Acquire) {
            FREE => ChannelState::Free,
            owner => ChannelState::Assigned(ContextId(owner)),
        }
    }

    /// The copy engine behind this channel.
    pub fn engine(&self) -> &dyn CopyEngine {
        self.engine.as_ref()
    }

    /// Transition `Free -> Assigned(ctx)`. Returns false if the channel was taken.
    pub(crate) fn try_claim(&self, ctx: ContextId) -> bool {
        self.owner
            .compare_exchange(FREE, ctx.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transition `Assigned(ctx) -> Free`. Returns false if `ctx` was not the owner.
    pub(crate) fn release(&self, ctx: ContextId) -> bool {
        self.owner
            .compare_exchange(ctx.0, FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("engine", &self.engine.name())
            .finish()
    }
}
