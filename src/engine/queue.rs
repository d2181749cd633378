use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};

use crate::tasks::Task;

/// Shared task source for the worker pool.
///
/// A task stays unfinished from `push` until `task_done`, including while a
/// worker holds it, so `pop` keeps waiting when the queue is momentarily
/// empty but a running attempt may still re-enqueue its task.
#[derive(Debug)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    unfinished: AtomicUsize,
    closed: AtomicBool,
    randomize: bool,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(randomize: bool) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            unfinished: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            randomize,
            notify: Notify::new(),
        }
    }

    pub async fn extend(&self, tasks: impl IntoIterator<Item = Task>) {
        let mut guard = self.tasks.lock().await;
        for task in tasks {
            guard.push_back(task);
            self.unfinished.fetch_add(1, Ordering::AcqRel);
        }
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Next task, or `None` once every task is finished or the queue closed.
    pub async fn pop(&self) -> Option<Task> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            if let Some(task) = self.take().await {
                return Some(task);
            }
            if self.unfinished.load(Ordering::Acquire) == 0 {
                return None;
            }
            notified.await;
        }
    }

    async fn take(&self) -> Option<Task> {
        let mut guard = self.tasks.lock().await;
        if guard.is_empty() {
            return None;
        }
        if self.randomize {
            let idx = rand::thread_rng().gen_range(0..guard.len());
            guard.swap_remove_back(idx)
        } else {
            guard.pop_front()
        }
    }

    /// Puts a popped task back without finishing it. Dropped when the queue
    /// is closed.
    pub async fn requeue(&self, task: Task) {
        if self.is_closed() {
            self.task_done();
            return;
        }
        self.tasks.lock().await.push_back(task);
        self.notify.notify_waiters();
    }

    /// Marks one popped task as finished.
    pub fn task_done(&self) {
        let previous = self
            .unfinished
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous <= 1 {
            self.notify.notify_waiters();
        }
    }

    /// Stops all further pops and discards queued tasks. Tasks already
    /// handed to workers run to completion.
    pub async fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut guard = self.tasks.lock().await;
        let dropped = guard.len();
        guard.clear();
        drop(guard);
        let _ = self
            .unfinished
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(dropped)));
        self.notify.notify_waiters();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(n: u16) -> Task {
        Task::new("ssh", n, "h", "u", "p")
    }

    #[tokio::test]
    async fn pops_in_insertion_order() {
        let queue = TaskQueue::new(false);
        queue.extend([task(1), task(2), task(3)]).await;
        let mut ports = Vec::new();
        while let Some(t) = queue.pop().await {
            ports.push(t.port);
            queue.task_done();
        }
        assert_eq!(ports, vec![1, 2, 3]);
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn randomized_pop_yields_every_task() {
        let queue = TaskQueue::new(true);
        queue.extend((1..=50).map(task)).await;
        let mut ports = Vec::new();
        while let Some(t) = queue.pop().await {
            ports.push(t.port);
            queue.task_done();
        }
        ports.sort_unstable();
        assert_eq!(ports, (1..=50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn pop_waits_for_inflight_requeue() {
        let queue = Arc::new(TaskQueue::new(false));
        queue.extend([task(7)]).await;
        let held = queue.pop().await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        queue.requeue(held).await;
        let again = waiter.await.unwrap().unwrap();
        assert_eq!(again.port, 7);
        queue.task_done();
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_discards_queued_and_wakes_waiters() {
        let queue = Arc::new(TaskQueue::new(false));
        queue.extend([task(1), task(2), task(3)]).await;
        let _held = queue.pop().await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                // Drain the rest, then block on the held task.
                let mut seen = 0;
                while queue.pop().await.is_some() {
                    seen += 1;
                    queue.task_done();
                    if seen == 2 {
                        break;
                    }
                }
                queue.pop().await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.close().await, 0);
        assert!(waiter.await.unwrap().is_none());
        assert!(queue.is_closed());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn requeue_after_close_finishes_the_task() {
        let queue = TaskQueue::new(false);
        queue.extend([task(1), task(2)]).await;
        let held = queue.pop().await.unwrap();
        assert_eq!(queue.close().await, 1);
        queue.requeue(held).await;
        assert_eq!(queue.unfinished(), 0);
        assert!(queue.pop().await.is_none());
    }
}
