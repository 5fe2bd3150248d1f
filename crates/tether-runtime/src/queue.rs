//! Cross-thread work queue
//!
//! Multi-producer queue with a single logical consumer. Producers never
//! block; the consumer either blocks its thread ([`WorkQueue::dequeue`]) or
//! suspends inside an async runtime ([`WorkQueue::dequeue_async`]). Stopping
//! is irreversible: new items are refused, already queued items are still
//! handed out, and once the queue is empty every dequeue returns `None`
//! immediately.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Thread-safe FIFO with a terminal stopped state.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Wakes blocked (thread) consumers
    available: Condvar,
    /// Wakes suspended (async) consumers
    notify: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Add one item. Returns `false` if the queue is stopped.
    pub fn enqueue(&self, item: T) -> bool {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.items.push_back(item);
        }
        self.available.notify_one();
        self.notify.notify_one();
        true
    }

    /// Add several items atomically with respect to the consumer.
    ///
    /// Returns `false` (and adds nothing) if the queue is stopped.
    pub fn enqueue_many<I>(&self, items: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let added = {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            let before = state.items.len();
            state.items.extend(items);
            state.items.len() - before
        };
        if added > 0 {
            self.available.notify_all();
            self.notify.notify_one();
        }
        true
    }

    /// Take the next item, blocking the calling thread.
    ///
    /// `None` timeout waits without bound. Returns `None` when the timeout
    /// elapses, or when the queue is stopped and drained.
    pub fn dequeue(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        return state.items.pop_front();
                    }
                }
            }
        }
    }

    /// Async form of [`dequeue`](Self::dequeue). Must run inside a tokio
    /// runtime with the time driver enabled.
    pub async fn dequeue_async(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        loop {
            // Registered before the state check so a concurrent enqueue or
            // stop cannot slip between the check and the wait.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.stopped {
                    return None;
                }
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_dequeue();
                    }
                }
            }
        }
    }

    /// Take the next item if one is available right now.
    pub fn try_dequeue(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Refuse further items and wake every waiting consumer.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.available.notify_all();
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
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
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_queue_fifo_order() {
        let queue = WorkQueue::new();
        assert!(queue.enqueue(1));
        assert!(queue.enqueue(2));
        assert!(queue.enqueue_many([3, 4]));
        assert_eq!(queue.len(), 4);

        let drained: Vec<_> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        assert_eq!(drained, vec![1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_dequeue_times_out() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let start = Instant::now();
        assert_eq!(queue.dequeue(Some(Duration::from_millis(20))), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_queue_zero_timeout_polls() {
        let queue = WorkQueue::new();
        assert_eq!(queue.dequeue(Some(Duration::ZERO)), None);
        queue.enqueue("x");
        assert_eq!(queue.dequeue(Some(Duration::ZERO)), Some("x"));
    }

    #[test]
    fn test_queue_stop_refuses_new_items() {
        let queue = WorkQueue::new();
        queue.enqueue(1);
        queue.stop();
        queue.stop();

        assert!(queue.is_stopped());
        assert!(!queue.enqueue(2));
        assert!(!queue.enqueue_many([3, 4]));

        // Items queued before the stop are still delivered
        assert_eq!(queue.dequeue(None), Some(1));
        assert_eq!(queue.dequeue(None), None);
        assert_eq!(queue.dequeue(None), None);
    }

    #[test]
    fn test_queue_stop_unblocks_waiter() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(None))
        };

        thread::sleep(Duration::from_millis(30));
        queue.stop();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn test_queue_blocked_consumer_receives_item() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(Some(Duration::from_secs(5))))
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue(42);
        assert_eq!(waiter.join().unwrap(), Some(42));
    }

    #[test]
    fn test_queue_concurrent_producers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let queue = Arc::new(WorkQueue::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        assert!(queue.enqueue(p * PER_PRODUCER + i));
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        while seen.len() < PRODUCERS * PER_PRODUCER {
            let item = queue
                .dequeue(Some(Duration::from_secs(5)))
                .expect("producer items should arrive");
            assert!(seen.insert(item), "duplicate item {item}");
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn test_queue_async_dequeue() {
        let queue = Arc::new(WorkQueue::new());
        assert_eq!(queue.dequeue_async(Some(Duration::from_millis(10))).await, None);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.enqueue(7);
            })
        };
        assert_eq!(queue.dequeue_async(Some(Duration::from_secs(5))).await, Some(7));
        producer.join().unwrap();
    }

    #[tokio::test]
    async fn test_queue_async_stop_wakes_consumer() {
        let queue: Arc<WorkQueue<u8>> = Arc::new(WorkQueue::new());
        let stopper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.stop();
            })
        };
        assert_eq!(queue.dequeue_async(None).await, None);
        stopper.join().unwrap();
    }
}
