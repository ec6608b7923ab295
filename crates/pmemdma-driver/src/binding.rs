use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::channel::{ChannelId, ContextId};

/// Which context holds which channel.
///
/// A context is bound to at most one channel. The binding is the sole source
/// of truth for transfer authorization.
#[derive(Debug, Default)]
pub struct ContextBinding {
    bound: Mutex<HashMap<ContextId, ChannelId>>,
}

impl ContextBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the channel bound to `ctx`, or bind the one `claim` yields.
    ///
    /// `claim` runs with the binding held, so concurrent calls for the same
    /// context claim at most one channel between them. The flag is true when
    /// this call created the binding. `None` means `claim` found nothing.
    pub fn bind_with(
        &self,
        ctx: ContextId,
        claim: impl FnOnce() -> Option<ChannelId>,
    ) -> Option<(ChannelId, bool)> {
        let mut bound = self.lock();
        if let Some(&id) = bound.get(&ctx) {
            return Some((id, false));
        }
        let id = claim()?;
        bound.insert(ctx, id);
        Some((id, true))
    }

    pub fn lookup(&self, ctx: ContextId) -> Option<ChannelId> {
        self.lock().get(&ctx).copied()
    }

    /// Remove the binding of `ctx`, returning the channel it held.
    pub fn unbind(&self, ctx: ContextId) -> Option<ChannelId> {
        self.lock().remove(&ctx)
    }

    /// True iff `ctx` is bound to exactly `channel`.
    pub fn is_owner(&self, ctx: ContextId, channel: ChannelId) -> bool {
        self.lookup(ctx) == Some(channel)
    }

    /// Number of contexts currently holding a channel.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContextId, ChannelId>> {
        self.bound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_lookup_unbind() {
        let binding = ContextBinding::new();
        let ctx = ContextId::new(1);

        assert_eq!(binding.lookup(ctx), None);
        assert_eq!(binding.bind_with(ctx, || Some(3)), Some((3, true)));
        assert_eq!(binding.lookup(ctx), Some(3));
        assert_eq!(binding.unbind(ctx), Some(3));
        assert_eq!(binding.lookup(ctx), None);
        assert!(binding.is_empty());
    }

    #[test]
    fn first_bind_wins() {
        let binding = ContextBinding::new();
        let ctx = ContextId::new(1);

        assert_eq!(binding.bind_with(ctx, || Some(0)), Some((0, true)));
        assert_eq!(binding.bind_with(ctx, || Some(1)), Some((0, false)));
        assert_eq!(binding.lookup(ctx), Some(0));
    }

    #[test]
    fn bind_with_skips_claim_when_bound() {
        let binding = ContextBinding::new();
        let ctx = ContextId::new(1);

        assert_eq!(binding.bind_with(ctx, || Some(2)), Some((2, true)));
        let mut claimed = false;
        let result = binding.bind_with(ctx, || {
            claimed = true;
            Some(5)
        });
        assert_eq!(result, Some((2, false)));
        assert!(!claimed);
    }

    #[test]
    fn bind_with_failed_claim_leaves_no_binding() {
        let binding = ContextBinding::new();
        let ctx = ContextId::new(1);

        assert_eq!(binding.bind_with(ctx, || None), None);
        assert_eq!(binding.lookup(ctx), None);
        assert!(binding.is_empty());
    }

    #[test]
    fn ownership_is_per_context() {
        let binding = ContextBinding::new();
        binding.bind_with(ContextId::new(1), || Some(0));
        binding.bind_with(ContextId::new(2), || Some(1));

        assert!(binding.is_owner(ContextId::new(1), 0));
        assert!(!binding.is_owner(ContextId::new(1), 1));
        assert!(!binding.is_owner(ContextId::new(3), 0));
        assert_eq!(binding.len(), 2);
    }
}
