//! Background work queue
//!
//! Generation jobs (height maps, meshes) run on a fixed-size worker pool;
//! finished results land in a lock-protected queue that the owning thread
//! drains once per tick. Jobs are fire-and-forget: no cancellation, no
//! timeouts, and a job whose chunk has since left view still completes and is
//! simply applied to stale state on the next drain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rayon::ThreadPoolBuilder;

/// A bounded worker pool with a FIFO completion queue.
///
/// `submit` never blocks; `drain` empties the whole queue in completion order
/// and never waits for in-flight jobs. The completion queue is the only shared
/// mutable state between workers and the consumer.
pub struct WorkQueue<T> {
    pool: rayon::ThreadPool,
    completed: Arc<Mutex<VecDeque<T>>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Create a queue backed by `num_threads` workers (the rayon default when 0).
    pub fn new(num_threads: usize) -> Self {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to build worker pool");
        Self {
            pool,
            completed: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue `job` for background execution. Its result becomes available
    /// from some later [`WorkQueue::drain`] call.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let completed = Arc::clone(&self.completed);
        self.pool.spawn(move || {
            let result = job();
            completed
                .lock()
                .expect("completion queue poisoned")
                .push_back(result);
        });
    }

    /// Take every completed result, in FIFO order. Call exactly once per tick
    /// from the single consuming thread. An empty queue yields an empty Vec.
    pub fn drain(&self) -> Vec<T> {
        let mut completed = self.completed.lock().expect("completion queue poisoned");
        completed.drain(..).collect()
    }

    /// Completed results waiting to be drained.
    pub fn completed_len(&self) -> usize {
        self.completed.lock().expect("completion queue poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// Poll until `queue` holds `n` completed results or the timeout hits.
    fn wait_for_completed(queue: &WorkQueue<u32>, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.completed_len() < n {
            assert!(Instant::now() < deadline, "timed out waiting for {} results", n);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_drain_empty_queue_is_noop() {
        let queue: WorkQueue<u32> = WorkQueue::new(1);
        assert!(queue.drain().is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_result_is_delivered() {
        let queue = WorkQueue::new(2);
        queue.submit(|| 41 + 1);
        wait_for_completed(&queue, 1);
        assert_eq!(queue.drain(), vec![42]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_fifo_order_within_queue() {
        let queue = WorkQueue::new(2);
        // Force completion order by waiting for each job before submitting
        // the next; drain must then preserve that order.
        queue.submit(|| 1);
        wait_for_completed(&queue, 1);
        queue.submit(|| 2);
        wait_for_completed(&queue, 2);
        queue.submit(|| 3);
        wait_for_completed(&queue, 3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
    }

    #[test]
    fn test_drain_takes_everything_at_once() {
        let queue = WorkQueue::new(4);
        for i in 0..16 {
            queue.submit(move || i);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut collected = Vec::new();
        while collected.len() < 16 {
            assert!(Instant::now() < deadline);
            collected.extend(queue.drain());
            std::thread::sleep(Duration::from_millis(1));
        }
        collected.sort_unstable();
        assert_eq!(collected, (0..16).collect::<Vec<_>>());
    }
}
