//! A bounded FIFO shared between a sink's producer thread and its background
//! worker, with drop-oldest overflow semantics.
//!
//! Plain `flume`/`tokio::mpsc` channels don't let a producer reach into the
//! channel to evict an element, which the database sink's overflow policy
//! requires -- so this is a small hand-rolled queue behind a `Mutex` +
//! `Condvar` instead.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub enum PushOutcome {
    Enqueued,
    DroppedOldest,
    DroppedNewest,
}

pub struct BoundedDropOldest<T> {
    capacity: usize,
    state: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> BoundedDropOldest<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues `item`. If the queue is at capacity, drops the oldest item
    /// first. If a concurrent drain raced the overflow check empty-handed,
    /// drops `item` itself instead (mirrors the documented race behavior).
    pub fn push(&self, item: T) -> PushOutcome {
        let mut queue = self.state.lock().unwrap();
        let outcome = if queue.len() >= self.capacity {
            if queue.pop_front().is_some() {
                queue.push_back(item);
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::DroppedNewest
            }
        } else {
            queue.push_back(item);
            PushOutcome::Enqueued
        };
        drop(queue);
        self.not_empty.notify_one();
        outcome
    }

    /// Blocks up to `timeout` waiting for an item; returns `None` on timeout.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<T> {
        let mut queue = self.state.lock().unwrap();
        if queue.is_empty() {
            let (guard, _timed_out) = self.not_empty.wait_timeout(queue, timeout).unwrap();
            queue = guard;
        }
        queue.pop_front()
    }

    /// Drains up to `n` further items without blocking.
    pub fn drain_up_to(&self, n: usize) -> Vec<T> {
        let mut queue = self.state.lock().unwrap();
        let take = n.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes any thread blocked in `pop_blocking`, used to let a stopping
    /// worker notice the stop flag promptly instead of waiting out its timeout.
    pub fn wake_all(&self) {
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest() {
        let queue = BoundedDropOldest::new(4);
        for i in 0..4 {
            matches!(queue.push(i), PushOutcome::Enqueued);
        }
        let outcome = queue.push(4);
        assert!(matches!(outcome, PushOutcome::DroppedOldest));
        assert_eq!(queue.len(), 4);
        let remaining: Vec<_> = std::iter::from_fn(|| queue.pop_blocking(Duration::from_millis(1))).collect();
        assert_eq!(remaining, vec![1, 2, 3, 4]);
    }

    #[test]
    fn drain_up_to_respects_available_items() {
        let queue = BoundedDropOldest::new(10);
        queue.push(1);
        queue.push(2);
        let drained = queue.drain_up_to(5);
        assert_eq!(drained, vec![1, 2]);
    }
}
