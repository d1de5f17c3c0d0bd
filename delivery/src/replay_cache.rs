use std::sync::Mutex;

use ringbuffer::{AllocRingBuffer, RingBuffer};

/// Fixed-capacity circular buffer of serialized records held for one
/// offline node. Overwrites oldest on wrap, exactly
/// like `common::structure::queue::BoundedQueue` overwrites nothing — this
/// is the opposite policy: the newest records always survive, the oldest
/// are the ones sacrificed once the node has been offline long enough to
/// fill the buffer.
pub const REPLAY_CACHE_CAPACITY: usize = 10_000;

pub struct ReplayCache<T> {
    inner: Mutex<AllocRingBuffer<T>>,
}

impl<T: Clone> ReplayCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(AllocRingBuffer::new(capacity)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().unwrap().is_full()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Appends one record, overwriting the oldest entry once full.
    pub fn push(&self, value: T) {
        self.inner.lock().unwrap().push(value);
    }

    /// Drains every buffered record in original push order (oldest first)
    /// and empties the cache. Re-enqueued by the caller back into the
    /// node's normal send queue.
    pub fn drain_in_order(&self) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap();
        let out: Vec<T> = inner.iter().cloned().collect();
        inner.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_push_order_before_wrap() {
        let cache: ReplayCache<i32> = ReplayCache::new(5);
        for i in 1..=3 {
            cache.push(i);
        }
        assert_eq!(cache.drain_in_order(), vec![1, 2, 3]);
    }

    #[test]
    fn wrap_keeps_only_the_newest_capacity_entries_in_order() {
        let cache: ReplayCache<i32> = ReplayCache::new(3);
        for i in 1..=5 {
            cache.push(i);
        }
        // 1 and 2 were dropped; 3,4,5 survive in original order.
        assert_eq!(cache.drain_in_order(), vec![3, 4, 5]);
    }

    #[test]
    fn bounded_loss_on_overflow_keeps_most_recent_in_order() {
        let cache: ReplayCache<u32> = ReplayCache::new(10_000);
        for i in 1..=10_003u32 {
            cache.push(i);
        }
        let drained = cache.drain_in_order();
        assert_eq!(drained.len(), 10_000);
        assert_eq!(drained.first(), Some(&4));
        assert_eq!(drained.last(), Some(&10_003));
    }

    #[test]
    fn drain_empties_the_cache() {
        let cache: ReplayCache<i32> = ReplayCache::new(4);
        cache.push(1);
        cache.drain_in_order();
        assert!(cache.is_empty());
        assert!(cache.drain_in_order().is_empty());
    }
}
