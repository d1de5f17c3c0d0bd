use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Mutex;

/// A capacity-bounded FIFO queue guarded by a single mutex.
///
/// Used by the TCP and WebSocket back-ends for per-subscriber send queues,
/// where a full queue means "drop the newest message and count it" rather
/// than block the sender — that's what distinguishes `push`
/// (drops silently, returns whether it fit) from an unbounded channel.
#[derive(Debug)]
pub struct BoundedQueue<T: Debug> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Debug> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Returns `false` (and drops `val`) if the queue was already full.
    pub fn push(&self, val: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.len() >= self.capacity {
            return false;
        }
        inner.push_back(val);
        true
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_when_full() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(2);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }
}
