use crossbeam::queue::SegQueue;
use std::sync::Arc;

type Task = Box<dyn FnOnce()>;

/// Cooperative deferred-task queue.
///
/// Every "asynchronous" engine operation is submitted here and runs when the
/// owner turns the queue. Tasks run in submission order on whichever thread
/// turns the queue; the engines assume that is a single thread.
pub struct TaskQueue {
    tasks: Arc<SegQueue<Task>>,
}

impl Clone for TaskQueue {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(SegQueue::new()),
        }
    }

    /// Schedule a task for a later turn of the queue
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// Run the oldest pending task. Returns false when the queue was idle.
    pub fn run_once(&self) -> bool {
        match self.tasks.pop() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is idle, including tasks deferred while
    /// draining. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }

    /// Number of tasks currently pending
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Check if nothing is pending
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tasks_run_in_submission_order() {
        let queue = TaskQueue::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            queue.defer(move || order.lock().push(i));
        }
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_deferred_task_can_defer_more() {
        let queue = TaskQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        let inner_count = Arc::clone(&count);
        let inner_queue = queue.clone();
        queue.defer(move || {
            inner_count.fetch_add(1, Ordering::Relaxed);
            let count = Arc::clone(&inner_count);
            inner_queue.defer(move || {
                count.fetch_add(1, Ordering::Relaxed);
            });
        });
        queue.run_until_idle();
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_run_once_leaves_remainder() {
        let queue = TaskQueue::new();
        queue.defer(|| {});
        queue.defer(|| {});
        assert!(queue.run_once());
        assert_eq!(queue.pending(), 1);
    }
}
