use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::scope::error::ScopeError;
use crate::scope::trace::{SharedTrace, Trace};

/// Fixed pool of capture channels, each bound to at most one trace.
///
/// The allocator never owns a trace. A slot whose trace has been dropped everywhere
/// else stays occupied until [`ChannelAllocator::reap`] notices and frees it.
#[derive(Debug)]
pub struct ChannelAllocator {
    slots: Vec<Option<Weak<Mutex<Trace>>>>,
}

impl ChannelAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently holding a binding, live or not yet reaped.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Lowest free channel index.
    pub fn acquire(&self) -> Result<usize, ScopeError> {
        self.slots
            .iter()
            .position(Option::is_none)
            .ok_or(ScopeError::ChannelsExhausted {
                capacity: self.capacity(),
            })
    }

    pub fn bind(&mut self, trace: &SharedTrace, channel: usize) -> Result<(), ScopeError> {
        let capacity = self.capacity();
        let slot = self
            .slots
            .get_mut(channel)
            .ok_or(ScopeError::ChannelOutOfRange { channel, capacity })?;
        if slot.as_ref().is_some_and(|weak| weak.strong_count() > 0) {
            return Err(ScopeError::ChannelInUse(channel));
        }
        *slot = Some(Arc::downgrade(trace));
        Ok(())
    }

    /// Frees every slot whose trace is gone and returns those channel indices.
    pub fn reap(&mut self) -> Vec<usize> {
        let mut freed = Vec::new();
        for (channel, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|weak| weak.strong_count() == 0) {
                *slot = None;
                freed.push(channel);
            }
        }
        freed
    }

    /// Unbinds `trace` and returns the channel it held.
    pub fn release(&mut self, trace: &SharedTrace) -> Option<usize> {
        let channel = self.channel_of(trace)?;
        self.slots[channel] = None;
        Some(channel)
    }

    /// Unbinds everything and returns the channels that were bound.
    pub fn release_all(&mut self) -> Vec<usize> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(channel, slot)| slot.take().map(|_| channel))
            .collect()
    }

    pub fn channel_of(&self, trace: &SharedTrace) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(trace)))
        })
    }

    pub fn trace_on(&self, channel: usize) -> Option<SharedTrace> {
        self.slots.get(channel)?.as_ref()?.upgrade()
    }

    /// Live bindings in channel order.
    pub fn bound(&self) -> Vec<(usize, SharedTrace)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(channel, slot)| Some((channel, slot.as_ref()?.upgrade()?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::trace::TraceStyle;
    use crate::scope::Probe;

    fn trace(name: &str) -> SharedTrace {
        Trace::new(Probe::pin(name), TraceStyle::default()).shared()
    }

    #[test]
    fn exhausts_then_reuses_dropped_slot() {
        let mut channels = ChannelAllocator::new(16);
        let mut traces = Vec::new();
        for i in 0..16 {
            let t = trace(&format!("pin.{i}"));
            let channel = channels.acquire().unwrap();
            assert_eq!(channel, i);
            channels.bind(&t, channel).unwrap();
            traces.push(t);
        }
        assert!(matches!(
            channels.acquire(),
            Err(ScopeError::ChannelsExhausted { capacity: 16 })
        ));

        drop(traces.remove(5));
        assert_eq!(channels.reap(), vec![5]);
        let replacement = trace("replacement");
        let channel = channels.acquire().unwrap();
        assert_eq!(channel, 5);
        channels.bind(&replacement, channel).unwrap();
        assert!(channels.acquire().is_err());
        assert_eq!(channels.in_use(), 16);
    }

    #[test]
    fn refuses_double_binding() {
        let mut channels = ChannelAllocator::new(2);
        let a = trace("a");
        let b = trace("b");
        channels.bind(&a, 0).unwrap();
        assert!(matches!(channels.bind(&b, 0), Err(ScopeError::ChannelInUse(0))));
        assert!(matches!(
            channels.bind(&b, 2),
            Err(ScopeError::ChannelOutOfRange { channel: 2, capacity: 2 })
        ));
    }

    #[test]
    fn explicit_release_frees_slot() {
        let mut channels = ChannelAllocator::new(2);
        let a = trace("a");
        let b = trace("b");
        channels.bind(&a, 0).unwrap();
        channels.bind(&b, 1).unwrap();
        assert_eq!(channels.channel_of(&b), Some(1));
        assert_eq!(channels.release(&b), Some(1));
        assert_eq!(channels.release(&b), None);
        assert_eq!(channels.acquire().unwrap(), 1);
        assert!(Arc::ptr_eq(&channels.trace_on(0).unwrap(), &a));
        assert_eq!(channels.release_all(), vec![0]);
        assert!(channels.bound().is_empty());
    }

    #[test]
    fn dead_slot_counts_until_reaped() {
        let mut channels = ChannelAllocator::new(1);
        channels.bind(&trace("gone"), 0).unwrap();
        assert!(channels.bound().is_empty());
        assert!(channels.acquire().is_err());
        assert_eq!(channels.reap(), vec![0]);
        assert_eq!(channels.acquire().unwrap(), 0);
    }
}
