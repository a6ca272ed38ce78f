//! Bounded record buffer shared by the batch processors.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// What to do with an incoming record when the queue is at capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DropPolicy {
    /// Evict the oldest queued record to make room for the new one.
    #[default]
    DropOldest,
    /// Refuse the new record and keep the queue unchanged.
    Reject,
}

/// Outcome of a [`RecordQueue::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushResult {
    /// The record was stored without displacing anything.
    Stored,
    /// The record was stored and the oldest queued record was evicted.
    Evicted,
    /// The record was refused.
    Rejected,
}

/// A bounded FIFO buffer of records.
///
/// `push` never blocks the caller: at capacity the [`DropPolicy`] decides
/// whether the oldest record is evicted or the new one refused, and a
/// drop counter records either outcome for observability. `drain` removes
/// records from the front under a single lock acquisition, so records
/// pushed concurrently with a cut always land behind it and belong to the
/// next batch.
#[derive(Debug)]
pub struct RecordQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    policy: DropPolicy,
    dropped: AtomicUsize,
}

impl<T> RecordQueue<T> {
    /// Create a queue with the given capacity and the drop-oldest policy.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_policy(capacity, DropPolicy::DropOldest)
    }

    /// Create a queue with the given capacity and drop policy.
    pub fn with_policy(capacity: usize, policy: DropPolicy) -> Self {
        RecordQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            policy,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Append a record, applying the drop policy when full. Never blocks.
    pub fn push(&self, record: T) -> PushResult {
        let Ok(mut queue) = self.inner.lock() else {
            // A poisoned lock means a panic elsewhere; losing this record
            // is the fail-safe outcome.
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return PushResult::Rejected;
        };
        if queue.len() < self.capacity {
            queue.push_back(record);
            return PushResult::Stored;
        }
        match self.policy {
            DropPolicy::DropOldest => {
                queue.pop_front();
                queue.push_back(record);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushResult::Evicted
            }
            DropPolicy::Reject => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushResult::Rejected
            }
        }
    }

    /// Remove and return up to `max` records from the front of the queue.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let Ok(mut queue) = self.inner.lock() else {
            return Vec::new();
        };
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of records dropped over the lifetime of the queue.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain_preserve_order() {
        let queue = RecordQueue::with_capacity(16);
        for i in 0..5 {
            assert_eq!(queue.push(i), PushResult::Stored);
        }
        assert_eq!(queue.drain(3), vec![0, 1, 2]);
        assert_eq!(queue.drain(10), vec![3, 4]);
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn drop_oldest_keeps_most_recent_records() {
        let queue = RecordQueue::with_capacity(10);
        for i in 0..15 {
            queue.push(i);
        }
        assert_eq!(queue.dropped(), 5);
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.drain(usize::MAX), (5..15).collect::<Vec<_>>());
    }

    #[test]
    fn reject_policy_refuses_new_records() {
        let queue = RecordQueue::with_policy(2, DropPolicy::Reject);
        assert_eq!(queue.push(1), PushResult::Stored);
        assert_eq!(queue.push(2), PushResult::Stored);
        assert_eq!(queue.push(3), PushResult::Rejected);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.drain(usize::MAX), vec![1, 2]);
    }

    #[test]
    fn drain_is_bounded_by_max() {
        let queue = RecordQueue::with_capacity(8);
        for i in 0..8 {
            queue.push(i);
        }
        assert_eq!(queue.drain(3).len(), 3);
        assert_eq!(queue.len(), 5);
    }
}
