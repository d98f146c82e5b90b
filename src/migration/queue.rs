//! Blocking work queue shared by the worker pool.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO queue with a "no more work" flag.
///
/// `pop` blocks while the queue is empty and still open; once closed, the
/// remaining items are handed out and then every caller gets `None`.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // Workers never panic while holding the lock, the state is always consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn extend<I: IntoIterator<Item = T>>(&self, items: I) {
        self.lock().items.extend(items);
        self.ready.notify_all();
    }

    /// No more items will be pushed
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Next item, blocking until one is available or the queue is closed and empty
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_drains_after_close() {
        let queue = WorkQueue::new();
        queue.extend([1, 2, 3]);
        queue.close();

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_pop_waits_for_push() {
        let queue = WorkQueue::new();

        thread::scope(|s| {
            let consumer = s.spawn(|| queue.pop());
            thread::sleep(Duration::from_millis(20));
            queue.extend(["late"]);
            assert_eq!(consumer.join().unwrap(), Some("late"));
        });
    }

    #[test]
    fn test_every_item_delivered_once() {
        let queue = WorkQueue::new();
        let seen = AtomicUsize::new(0);
        let sum = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while let Some(n) = queue.pop() {
                        seen.fetch_add(1, Ordering::SeqCst);
                        sum.fetch_add(n, Ordering::SeqCst);
                    }
                });
            }
            queue.extend(1..=500);
            queue.close();
        });

        assert_eq!(seen.load(Ordering::SeqCst), 500);
        assert_eq!(sum.load(Ordering::SeqCst), 500 * 501 / 2);
        assert_eq!(queue.pop(), None);
    }
}
