use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::binding::ContextBinding;
use crate::channel::{Channel, ChannelId, ChannelState, ContextId};
use crate::config::AllocationPolicy;
use crate::engine::CopyEngine;
use crate::error::{DriverError, Result};

/// The fixed table of channels owned by one driver instance.
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    policy: AllocationPolicy,
    cursor: AtomicUsize,
}

impl ChannelRegistry {
    /// Create one channel per engine, with ids `0..engines.len()`.
    pub fn new(engines: Vec<Arc<dyn CopyEngine>>, policy: AllocationPolicy) -> Self {
        let channels = engines
            .into_iter()
            .enumerate()
            .map(|(id, engine)| Channel::new(id as ChannelId, engine))
            .collect();
        Self {
            channels,
            policy,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of channels. Constant for the registry's lifetime.
    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        usize::try_from(id).ok().and_then(|idx| self.channels.get(idx))
    }

    pub fn state(&self, id: ChannelId) -> Option<ChannelState> {
        self.get(id).map(Channel::state)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Number of channels not assigned to any context.
    pub fn free_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|ch| ch.state() == ChannelState::Free)
            .count()
    }

    /// Return the channel bound to `ctx`, claiming a free one if it has none.
    ///
    /// Re-acquisition is idempotent. Concurrent acquisitions from distinct
    /// contexts never receive the same channel.
    pub fn acquire(&self, ctx: ContextId, binding: &ContextBinding) -> Result<ChannelId> {
        let (id, fresh) = binding
            .bind_with(ctx, || self.claim_free(ctx))
            .ok_or(DriverError::ResourceExhausted {
                total: self.count(),
            })?;

        if fresh {
            info!(%ctx, channel = id, "assigned channel");
        } else {
            debug!(%ctx, channel = id, "context already holds a channel");
        }
        Ok(id)
    }

    /// Free the channel bound to `ctx`, if any, and clear the binding.
    pub fn release(&self, ctx: ContextId, binding: &ContextBinding) -> Option<ChannelId> {
        let id = binding.unbind(ctx)?;
        if let Some(channel) = self.get(id) {
            channel.engine().terminate();
            if channel.release(ctx) {
                info!(%ctx, channel = id, "released channel");
            } else {
                debug!(%ctx, channel = id, "channel was not held by context");
            }
        }
        Some(id)
    }

    fn claim_free(&self, ctx: ContextId) -> Option<ChannelId> {
        let count = self.channels.len();
        if count == 0 {
            return None;
        }
        let start = match self.policy {
            AllocationPolicy::LowestFree => 0,
            AllocationPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % count,
        };

        (0..count)
            .map(|step| (start + step) % count)
            .find(|&idx| self.channels[idx].try_claim(ctx))
            .map(|idx| idx as ChannelId)
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels)
            .field("policy", &self.policy)
            .finish()
    }
}
