//! Work queue that terminates when every worker is idle.
//!
//! Download workers both consume and produce tasks: processing a listing adds
//! the files and subdirectories it contains. An empty queue therefore does not
//! mean the work is done, because a busy worker may still add more. The queue
//! only reports exhaustion once all workers are waiting on it at the same time.
//!
//! Waiting workers form a rendezvous sized to the worker count. Every
//! [`TaskQueue::put`] resets it, waking the waiters so they re-check the queue.
//! When the last worker arrives with the queue still empty, every waiter is
//! released with `None`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

struct QueueState<T> {
    tasks: VecDeque<T>,
    /// Workers waiting in the current generation.
    waiting: usize,
    /// Bumped on every put; a waiter counted in an older generation must
    /// count itself again.
    generation: u64,
    done: bool,
}

/// FIFO queue shared by a fixed number of workers.
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    workers: usize,
}

impl<T> TaskQueue<T> {
    /// Creates a queue for exactly `workers` consumers.
    ///
    /// Every consumer must keep calling [`get`](Self::get) until it returns
    /// `None`; a consumer that stops early keeps the others waiting forever.
    pub fn new(workers: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                waiting: 0,
                generation: 0,
                done: false,
            }),
            notify: Notify::new(),
            workers: workers.max(1),
        }
    }

    pub fn put(&self, task: T) {
        {
            let mut state = self.lock();
            state.tasks.push_back(task);
            state.waiting = 0;
            state.generation = state.generation.wrapping_add(1);
        }
        self.notify.notify_waiters();
    }

    /// Claims the next task, waiting while other workers may still add some.
    ///
    /// Returns `None` once the queue is empty and every worker is waiting.
    pub async fn get(&self) -> Option<T> {
        let mut counted_in: Option<u64> = None;
        loop {
            // Registered before the state check so a put in between is not missed.
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(task) = state.tasks.pop_front() {
                    return Some(task);
                }
                if state.done {
                    return None;
                }
                if counted_in != Some(state.generation) {
                    counted_in = Some(state.generation);
                    state.waiting += 1;
                    if state.waiting >= self.workers {
                        state.done = true;
                        drop(state);
                        self.notify.notify_waiters();
                        return None;
                    }
                }
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
