//! Fixed-size pool of stateless workers.
//!
//! Tasks flow through an MPMC channel and each completion comes back on a
//! per-task reply channel, so callers get a future-like handle instead of
//! wiring message listeners. A worker that panics rejects its own task,
//! spawns its replacement, and exits; queued tasks and other workers are
//! unaffected.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::constants::{MAX_POOL_SIZE, MIN_POOL_SIZE_BUSY};
use crate::error::{ChatTrendError, Result};

/// A stateless task executor. One instance is shared by every worker thread.
pub trait TaskRunner: Send + Sync + 'static {
    type Payload: Send + 'static;
    type Output: Send + 'static;

    fn run(&self, payload: Self::Payload) -> Result<Self::Output>;
}

struct Task<R: TaskRunner> {
    payload: R::Payload,
    reply: Sender<Result<R::Output>>,
}

struct PoolShared<R: TaskRunner> {
    runner: R,
    queue: Receiver<Task<R>>,
    terminated: AtomicBool,
    next_worker: AtomicUsize,
}

/// Completion handle for one submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    reply: Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task completes or the pool is torn down.
    pub fn wait(self) -> Result<T> {
        match self.reply.recv() {
            Ok(result) => result,
            Err(_) => Err(ChatTrendError::PoolTerminated),
        }
    }
}

pub struct WorkerPool<R: TaskRunner> {
    shared: Arc<PoolShared<R>>,
    submit: Option<Sender<Task<R>>>,
    size: usize,
}

impl<R: TaskRunner> WorkerPool<R> {
    /// Spawns `size` workers (at least one) sharing `runner`.
    #[must_use]
    pub fn new(size: usize, runner: R) -> Self {
        let size = size.max(1);
        let (submit, queue) = unbounded();
        let shared = Arc::new(PoolShared {
            runner,
            queue,
            terminated: AtomicBool::new(false),
            next_worker: AtomicUsize::new(0),
        });
        for _ in 0..size {
            spawn_worker(Arc::clone(&shared));
        }
        Self {
            shared,
            submit: Some(submit),
            size,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Enqueues one task. Tasks are dispatched FIFO to idle workers.
    pub fn run(&self, payload: R::Payload) -> Result<TaskHandle<R::Output>> {
        if self.shared.terminated.load(Ordering::Acquire) {
            return Err(ChatTrendError::PoolTerminated);
        }
        let submit = self.submit.as_ref().ok_or(ChatTrendError::PoolTerminated)?;
        let (reply_tx, reply_rx) = bounded(1);
        let task = Task {
            payload,
            reply: reply_tx,
        };
        submit
            .send(task)
            .map_err(|_| ChatTrendError::PoolTerminated)?;
        Ok(TaskHandle { reply: reply_rx })
    }

    /// Rejects all queued tasks and shuts every worker down. In-flight tasks
    /// finish; their results are still delivered to their handles.
    pub fn terminate(&mut self) {
        if self.shared.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender disconnects the queue once drained; draining it
        // here rejects tasks that never reached a worker.
        self.submit = None;
        while let Ok(task) = self.shared.queue.try_recv() {
            let _ = task.reply.send(Err(ChatTrendError::PoolTerminated));
        }
    }
}

impl<R: TaskRunner> Drop for WorkerPool<R> {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_worker<R: TaskRunner>(shared: Arc<PoolShared<R>>) {
    let id = shared.next_worker.fetch_add(1, Ordering::Relaxed);
    let builder = thread::Builder::new().name(format!("chattrend-worker-{id}"));
    let spawn_result = builder.spawn(move || worker_loop(shared, id));
    if let Err(err) = spawn_result {
        tracing::error!(worker = id, error = %err, "failed to spawn pool worker");
    }
}

fn worker_loop<R: TaskRunner>(shared: Arc<PoolShared<R>>, id: usize) {
    while let Ok(task) = shared.queue.recv() {
        if shared.terminated.load(Ordering::Acquire) {
            let _ = task.reply.send(Err(ChatTrendError::PoolTerminated));
            continue;
        }
        let Task { payload, reply } = task;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.runner.run(payload)));
        match outcome {
            Ok(result) => {
                let _ = reply.send(result);
            }
            Err(cause) => {
                let reason = panic_reason(cause.as_ref());
                tracing::warn!(worker = id, reason = %reason, "pool worker crashed, respawning");
                let _ = reply.send(Err(ChatTrendError::WorkerCrashed { reason }));
                if !shared.terminated.load(Ordering::Acquire) {
                    spawn_worker(shared);
                }
                return;
            }
        }
    }
}

fn panic_reason(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = cause.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Pool sizing: one less than the available parallelism, at least three when
/// there are at least three work items, never more than four.
#[must_use]
pub fn recommended_pool_size(work_items: usize) -> usize {
    let available = num_cpus::get();
    let floor = if work_items >= MIN_POOL_SIZE_BUSY {
        MIN_POOL_SIZE_BUSY
    } else {
        1
    };
    available.saturating_sub(1).clamp(floor, MAX_POOL_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Doubler;

    impl TaskRunner for Doubler {
        type Payload = u64;
        type Output = u64;

        fn run(&self, payload: u64) -> Result<u64> {
            if payload == 2 {
                panic!("task two always fails");
            }
            Ok(payload * 2)
        }
    }

    #[test]
    fn pool_survives_a_crashing_task() {
        let pool = WorkerPool::new(3, Doubler);
        let handles: Vec<_> = (0..10)
            .map(|i| pool.run(i).expect("submit"))
            .collect();

        let mut ok = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.wait() {
                Ok(_) => ok += 1,
                Err(ChatTrendError::WorkerCrashed { .. }) => failed += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(ok, 9);
        assert_eq!(failed, 1);

        // The replacement worker keeps the pool usable.
        let result = pool.run(21).expect("submit after crash").wait();
        assert_eq!(result.expect("late task"), 42);
    }

    #[test]
    fn terminate_rejects_queued_tasks_and_poisons_run() {
        struct Slow;
        impl TaskRunner for Slow {
            type Payload = ();
            type Output = ();
            fn run(&self, (): ()) -> Result<()> {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            }
        }

        let mut pool = WorkerPool::new(1, Slow);
        let in_flight = pool.run(()).expect("first");
        let queued: Vec<_> = (0..4).map(|_| pool.run(()).expect("queued")).collect();
        // Let the worker pick up the first task before terminating.
        thread::sleep(Duration::from_millis(10));
        pool.terminate();

        // In-flight work drains; most queued tasks are rejected.
        assert!(in_flight.wait().is_ok());
        let rejected = queued
            .into_iter()
            .map(TaskHandle::wait)
            .filter(Result::is_err)
            .count();
        assert!(rejected >= 3, "queued tasks should be rejected");

        assert!(matches!(
            pool.run(()),
            Err(ChatTrendError::PoolTerminated)
        ));
    }

    #[test]
    fn recommended_size_respects_bounds() {
        let busy = recommended_pool_size(10);
        assert!((1..=MAX_POOL_SIZE).contains(&busy));
        let idle = recommended_pool_size(1);
        assert!((1..=MAX_POOL_SIZE).contains(&idle));
        assert!(idle <= busy.max(1));
    }
}
