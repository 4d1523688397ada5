//! Bounded-concurrency task pool
//!
//! Runs submitted futures on at most `max_workers` tokio tasks at a time,
//! dispatching queued work in FIFO or priority order. The arbitration engine
//! does not depend on it; it is offered to applications that schedule work
//! next to a simulation.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

/// Errors that can occur when using the worker pool
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    ShutDown,

    #[error("Task was dropped before it ran")]
    Cancelled,

    #[error("Task panicked")]
    TaskPanicked,
}

/// Order in which queued tasks are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchOrder {
    /// Submission order, priority ignored.
    #[default]
    Fifo,
    /// Highest priority first, submission order among equals.
    Priority,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub running: usize,
    pub queued: usize,
    pub completed: u64,
    pub panicked: u64,
}

type BoxedTask = Pin<Box<dyn Future<Output = bool> + Send>>;

struct QueuedTask {
    priority: u8,
    task: BoxedTask,
}

/// Command messages for the dispatcher
enum PoolCommand {
    Submit { priority: u8, task: BoxedTask },
    Finished { panicked: bool },
    GetStats {
        result_tx: oneshot::Sender<PoolStats>,
    },
    Shutdown {
        wait: bool,
        done_tx: oneshot::Sender<()>,
    },
}

/// Result of one submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    result_rx: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    /// Waits for the task's output.
    ///
    /// # Errors
    /// - `PoolError::Cancelled` - Task was dropped by `shutdown(false)`
    /// - `PoolError::TaskPanicked` - Task panicked while running
    pub async fn join(self) -> Result<T, PoolError> {
        self.result_rx.await.map_err(|_| PoolError::Cancelled)?
    }
}

/// Task pool with a fixed number of concurrent workers.
pub struct WorkerPool {
    command_tx: mpsc::UnboundedSender<PoolCommand>,
    closed: Arc<AtomicBool>,
    _handle: tokio::task::JoinHandle<()>,
}

impl WorkerPool {
    /// Creates a pool running at most `workers` tasks at once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize, order: DispatchOrder) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut dispatcher =
            Dispatcher::new(workers.max(1), order, command_tx.downgrade(), command_rx);
        let handle = tokio::spawn(async move {
            dispatcher.run().await;
        });

        Self {
            command_tx,
            closed: Arc::new(AtomicBool::new(false)),
            _handle: handle,
        }
    }

    /// Creates a pool sized to the machine, capped at eight workers.
    pub fn with_default_workers(order: DispatchOrder) -> Self {
        Self::new(num_cpus::get().min(8), order)
    }

    /// Queues `future` for execution.
    ///
    /// `priority` only matters under [`DispatchOrder::Priority`]; higher runs
    /// first.
    ///
    /// # Errors
    /// - `PoolError::ShutDown` - Pool no longer accepts work
    pub fn submit<F, T>(&self, priority: u8, future: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let task: BoxedTask = Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(output) => {
                    let _ = result_tx.send(Ok(output));
                    false
                }
                Err(_) => {
                    let _ = result_tx.send(Err(PoolError::TaskPanicked));
                    true
                }
            }
        });

        self.command_tx
            .send(PoolCommand::Submit { priority, task })
            .map_err(|_| PoolError::ShutDown)?;

        Ok(TaskHandle { result_rx })
    }

    /// Get pool statistics
    ///
    /// # Errors
    /// - `PoolError::ShutDown` - Dispatcher has exited
    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let (result_tx, result_rx) = oneshot::channel();

        self.command_tx
            .send(PoolCommand::GetStats { result_tx })
            .map_err(|_| PoolError::ShutDown)?;

        result_rx.await.map_err(|_| PoolError::ShutDown)
    }

    /// Stops accepting work.
    ///
    /// With `wait`, returns once every queued and running task finished.
    /// Without it, queued tasks are dropped (their handles resolve to
    /// [`PoolError::Cancelled`]) and running tasks are left to finish on
    /// their own.
    pub async fn shutdown(&self, wait: bool) {
        self.closed.store(true, Ordering::Release);

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(PoolCommand::Shutdown { wait, done_tx })
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

/// Internal dispatcher state, owned by its own task
struct Dispatcher {
    max_workers: usize,
    order: DispatchOrder,
    command_tx: mpsc::WeakUnboundedSender<PoolCommand>,
    command_rx: mpsc::UnboundedReceiver<PoolCommand>,
    queue: VecDeque<QueuedTask>,
    running: usize,
    completed: u64,
    panicked: u64,
    draining: Vec<oneshot::Sender<()>>,
}

impl Dispatcher {
    fn new(
        max_workers: usize,
        order: DispatchOrder,
        command_tx: mpsc::WeakUnboundedSender<PoolCommand>,
        command_rx: mpsc::UnboundedReceiver<PoolCommand>,
    ) -> Self {
        Self {
            max_workers,
            order,
            command_tx,
            command_rx,
            queue: VecDeque::new(),
            running: 0,
            completed: 0,
            panicked: 0,
            draining: Vec::new(),
        }
    }

    async fn run(&mut self) {
        tracing::debug!("Worker pool started with {} workers", self.max_workers);

        while let Some(command) = self.command_rx.recv().await {
            match command {
                PoolCommand::Submit { priority, task } => {
                    self.queue_task(QueuedTask { priority, task });
                }
                PoolCommand::Finished { panicked } => {
                    self.running -= 1;
                    self.completed += 1;
                    if panicked {
                        self.panicked += 1;
                    }
                }
                PoolCommand::GetStats { result_tx } => {
                    let _ = result_tx.send(self.stats());
                }
                PoolCommand::Shutdown {
                    wait: false,
                    done_tx,
                } => {
                    tracing::debug!("Worker pool dropping {} queued tasks", self.queue.len());
                    self.queue.clear();
                    let _ = done_tx.send(());
                    for waiter in self.draining.drain(..) {
                        let _ = waiter.send(());
                    }
                    return;
                }
                PoolCommand::Shutdown {
                    wait: true,
                    done_tx,
                } => {
                    self.draining.push(done_tx);
                }
            }

            self.dispatch();

            if !self.draining.is_empty() && self.queue.is_empty() && self.running == 0 {
                for waiter in self.draining.drain(..) {
                    let _ = waiter.send(());
                }
                tracing::debug!("Worker pool drained after {} tasks", self.completed);
                return;
            }
        }
    }

    fn queue_task(&mut self, queued: QueuedTask) {
        match self.order {
            DispatchOrder::Fifo => self.queue.push_back(queued),
            DispatchOrder::Priority => {
                // Insert behind every task of equal or higher priority
                let insert_pos = self
                    .queue
                    .iter()
                    .position(|task| task.priority < queued.priority)
                    .unwrap_or(self.queue.len());
                self.queue.insert(insert_pos, queued);
            }
        }
    }

    fn dispatch(&mut self) {
        while self.running < self.max_workers {
            let Some(queued) = self.queue.pop_front() else {
                break;
            };

            self.running += 1;
            // Weak so a dropped pool lets the dispatcher exit once idle
            let finished_tx = self.command_tx.upgrade();
            tokio::spawn(async move {
                let panicked = queued.task.await;
                if let Some(finished_tx) = finished_tx {
                    let _ = finished_tx.send(PoolCommand::Finished { panicked });
                }
            });
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            running: self.running,
            queued: self.queue.len(),
            completed: self.completed,
            panicked: self.panicked,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[tokio::test]
    async fn test_fifo_runs_in_submission_order() {
        let pool = WorkerPool::new(1, DispatchOrder::Fifo);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|index| {
                let seen = seen.clone();
                pool.submit(5 - index as u8, async move {
                    seen.lock().push(index);
                    index
                })
                .unwrap()
            })
            .collect();

        for (index, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().await.unwrap(), index);
        }
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_priority_order_after_blocker() {
        let pool = WorkerPool::new(1, DispatchOrder::Priority);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = pool
            .submit(0, async move {
                let _ = release_rx.await;
            })
            .unwrap();

        let handles: Vec<_> = [1u8, 5, 3, 5]
            .into_iter()
            .enumerate()
            .map(|(index, priority)| {
                let seen = seen.clone();
                pool.submit(priority, async move {
                    seen.lock().push((priority, index));
                })
                .unwrap()
            })
            .collect();

        tokio::task::yield_now().await;
        release_tx.send(()).unwrap();
        blocker.join().await.unwrap();
        for handle in handles {
            handle.join().await.unwrap();
        }

        assert_eq!(*seen.lock(), vec![(5, 1), (5, 3), (3, 2), (1, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2, DispatchOrder::Fifo);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let current = current.clone();
                let peak = peak.clone();
                pool.submit(0, async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();

        for handle in handles {
            handle.join().await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(2, DispatchOrder::Fifo);
        pool.shutdown(true).await;

        assert_eq!(pool.submit(0, async {}).unwrap_err(), PoolError::ShutDown);
    }

    #[tokio::test]
    async fn test_shutdown_without_wait_cancels_queued() {
        let pool = WorkerPool::new(1, DispatchOrder::Fifo);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = pool
            .submit(0, async move {
                let _ = release_rx.await;
                "finished"
            })
            .unwrap();
        let queued = pool.submit(0, async { "never" }).unwrap();

        pool.shutdown(false).await;
        assert_eq!(queued.join().await.unwrap_err(), PoolError::Cancelled);

        release_tx.send(()).unwrap();
        assert_eq!(running.join().await.unwrap(), "finished");
    }

    #[tokio::test]
    async fn test_shutdown_with_wait_drains_queue() {
        let pool = WorkerPool::new(1, DispatchOrder::Fifo);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = counter.clone();
            pool.submit(0, async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown(true).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_panicking_task_reports_and_pool_continues() {
        let pool = WorkerPool::new(1, DispatchOrder::Fifo);

        let failing = pool
            .submit(0, async {
                let values: Vec<u32> = Vec::new();
                values[0]
            })
            .unwrap();
        let after = pool.submit(0, async { 7 }).unwrap();

        assert_eq!(failing.join().await.unwrap_err(), PoolError::TaskPanicked);
        assert_eq!(after.join().await.unwrap(), 7);

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.queued, 0);
    }
}
