use super::*;
use executors::*;
use std::{sync::Mutex, thread};

/// A unit of work submitted to a [WorkerPool](WorkerPool)
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// API for the thread pool group tasks run on
///
/// Any pool implementation must implement this trait so it can be used by a
/// [Dispatcher](crate::dispatch::Dispatcher).
/// Usually that means implementing some kind of wrapper
/// type for your particular pool, such as [ExecutorPool](ExecutorPool).
pub trait WorkerPool: Send + Sync {
    /// Run `job` on one of the pool's threads
    fn execute(&self, job: Job);

    /// Change the number of threads in this pool to `threads`
    ///
    /// Implementations must keep running jobs that have already been submitted.
    fn resize(&self, threads: usize);

    /// The current number of threads in this pool
    fn size(&self) -> usize;

    /// Shut this pool down synchronously
    ///
    /// Implementations must only return when the pool
    /// has been shut down, or upon an error.
    fn shutdown(&self) -> Result<(), String>;
}

type ExecutorBuilder<E> = dyn Fn(usize) -> E + Send + Sync;

struct PoolState<E> {
    threads: usize,
    exec: E,
}

/// A resizable wrapper for pools from the [executors](executors) crate
///
/// Executors have a fixed number of threads, so resizing builds a fresh executor
/// and retires the old one asynchronously once its queued jobs are done.
pub struct ExecutorPool<E>
where
    E: Executor + 'static,
{
    builder: Box<ExecutorBuilder<E>>,
    state: Mutex<Option<PoolState<E>>>,
}

impl ExecutorPool<crossbeam_channel_pool::ThreadPool> {
    /// Produce a pool on top of a [crossbeam_channel_pool](executors::crossbeam_channel_pool)
    /// with `threads` threads.
    pub fn with_threads(threads: usize) -> Self {
        ExecutorPool::with(threads, crossbeam_channel_pool::ThreadPool::new)
    }
}

impl<E: Executor + 'static> ExecutorPool<E> {
    /// Produce a new pool of `threads` threads from an executor builder `f`.
    pub fn with<F>(threads: usize, f: F) -> Self
    where
        F: Fn(usize) -> E + Send + Sync + 'static,
    {
        let threads = threads.max(1);
        let exec = f(threads);
        ExecutorPool {
            builder: Box::new(f),
            state: Mutex::new(Some(PoolState { threads, exec })),
        }
    }

    fn current(&self) -> Option<E> {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|state| state.exec.clone())
    }
}

impl<E: Executor + 'static> WorkerPool for ExecutorPool<E> {
    fn execute(&self, job: Job) {
        match self.current() {
            Some(exec) => exec.execute(job),
            None => panic!("Jobs must not be submitted to a pool that has been shut down!"),
        }
    }

    fn resize(&self, threads: usize) {
        let threads = threads.max(1);
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = guard.as_mut() {
            if state.threads != threads {
                let fresh = (self.builder)(threads);
                let retired = std::mem::replace(&mut state.exec, fresh);
                state.threads = threads;
                retire(retired);
            }
        }
    }

    fn size(&self) -> usize {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|state| state.threads).unwrap_or(0)
    }

    fn shutdown(&self) -> Result<(), String> {
        let state = {
            let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        match state {
            Some(state) => state.exec.shutdown_borrowed(),
            None => Err("The pool has already been shut down".to_string()),
        }
    }
}

impl<E: Executor + 'static> Drop for ExecutorPool<E> {
    fn drop(&mut self) {
        let guard = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = guard.take() {
            retire(state.exec);
        }
    }
}

/// Shut `exec` down once all of its queued jobs have run
///
/// The executor handle is kept alive on a separate thread until it has drained,
/// since workers that have not started yet need it to pick up their jobs.
fn retire<E: Executor + 'static>(exec: E) {
    let spawned = thread::Builder::new()
        .name("groupcall-pool-retire".to_string())
        .spawn({
            let exec = exec.clone();
            move || {
                if let Err(e) = exec.shutdown_borrowed() {
                    slog::warn!(
                        default_logger(),
                        "Retired pool did not shut down cleanly: {}",
                        e
                    );
                }
            }
        });
    if spawned.is_err() {
        // No thread to wait on, so block the caller instead.
        let _ = exec.shutdown_borrowed();
    }
}

impl<E: Executor + 'static> fmt::Debug for ExecutorPool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExecutorPool{{ executor={}, threads={} }}",
            std::any::type_name::<E>(),
            self.size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synchronoise::CountdownEvent;
    use std::time::Duration;

    #[test]
    fn pool_runs_jobs() {
        let pool = ExecutorPool::with_threads(2);
        let latch = Arc::new(CountdownEvent::new(10));
        for _ in 0..10 {
            let latch = latch.clone();
            pool.execute(Box::new(move || {
                latch.decrement().expect("decrement");
            }));
        }
        let count = latch.wait_timeout(Duration::from_millis(1000));
        assert_eq!(0, count, "All jobs should have run by now!");
        pool.shutdown().expect("shutdown");
    }

    #[test]
    fn pool_resizes_and_keeps_running() {
        let pool = ExecutorPool::with_threads(1);
        assert_eq!(1, pool.size());
        pool.resize(4);
        assert_eq!(4, pool.size());
        pool.resize(0);
        assert_eq!(1, pool.size(), "Pools must keep at least one thread");
        let latch = Arc::new(CountdownEvent::new(1));
        let latch2 = latch.clone();
        pool.execute(Box::new(move || {
            latch2.decrement().expect("decrement");
        }));
        let count = latch.wait_timeout(Duration::from_millis(1000));
        assert_eq!(0, count, "Job should have run after resizing!");
        pool.shutdown().expect("shutdown");
        assert_eq!(0, pool.size());
        assert!(pool.shutdown().is_err());
    }

    #[test]
    fn resize_runs_jobs_queued_on_the_old_pool() {
        let pool = ExecutorPool::with_threads(1);
        let latch = Arc::new(CountdownEvent::new(20));
        for _ in 0..20 {
            let latch = latch.clone();
            pool.execute(Box::new(move || {
                std::thread::sleep(Duration::from_millis(20));
                latch.decrement().expect("decrement");
            }));
        }
        pool.resize(4);
        let count = latch.wait_timeout(Duration::from_millis(5000));
        assert_eq!(0, count, "Jobs queued before resizing must still run!");
        pool.shutdown().expect("shutdown");
    }

    #[test]
    fn dropping_pool_runs_queued_jobs() {
        let latch = Arc::new(CountdownEvent::new(5));
        {
            let pool = ExecutorPool::with_threads(1);
            for _ in 0..5 {
                let latch = latch.clone();
                pool.execute(Box::new(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    latch.decrement().expect("decrement");
                }));
            }
        }
        let count = latch.wait_timeout(Duration::from_millis(5000));
        assert_eq!(0, count, "Jobs queued before dropping must still run!");
    }
}
