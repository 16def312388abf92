//! Queue-per-thread task pool
//!
//! A fixed set of workers, each blocking on its own [`TaskQueue`]. Tasks
//! may enqueue more work onto any queue while they run, which is how a
//! tree walk expands: a directory task pushes one task per subdirectory,
//! usually onto its own worker's queue so a subtree stays on one thread.
//!
//! ```text
//!  main ──seed──► queue 0   queue 1   ...   queue N-1
//!                   │         │                 │
//!                worker 0  worker 1   ...   worker N-1
//!                   │  ▲
//!                   └──┘ children enqueued back onto own queue
//! ```
//!
//! Termination: an outstanding counter covers queued plus in-flight jobs.
//! Once [`QueuePool::wait`] has been called and the counter reaches zero,
//! every queue is woken with the shutdown flag set and the workers exit.
//! Dropping a pool that was started but never waited on is a forced
//! shutdown: queued work is discarded rather than run.

use crate::error::{PoolError, PoolResult, TaskError, TaskResult};
use crate::walker::queue::{QueueStats, TaskQueue};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Signature of every task function
///
/// Arguments: the scheduler (for enqueuing more work), the id of the
/// worker running the task, the work item, and the shared run context.
pub type TaskFn<W, C> = fn(&Scheduler<W, C>, usize, W, &C) -> TaskResult;

struct Job<W, C> {
    func: TaskFn<W, C>,
    item: W,
}

#[derive(Debug, Default)]
struct Tracker {
    /// Queued plus in-flight jobs
    outstanding: usize,

    /// Set by `wait`: no more work will come from outside the pool
    closed: bool,
}

/// Shared half of the pool, handed to every running task
pub struct Scheduler<W, C> {
    queues: Vec<TaskQueue<Job<W, C>>>,
    tracker: Mutex<Tracker>,
    shutdown: AtomicBool,
    /// Forced shutdown: stop popping, refuse new work
    abort: AtomicBool,
    stats: QueueStats,
}

impl<W, C> Scheduler<W, C> {
    fn new(thread_count: usize) -> Self {
        Self {
            queues: (0..thread_count).map(|_| TaskQueue::new()).collect(),
            tracker: Mutex::new(Tracker::default()),
            shutdown: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            stats: QueueStats::default(),
        }
    }

    /// Number of queues (one per worker)
    pub fn thread_count(&self) -> usize {
        self.queues.len()
    }

    /// Push `item` onto queue `queue % thread_count` to be run by `func`
    ///
    /// Safe from any thread, including from inside a running task. After a
    /// forced shutdown the item is dropped and counted as discarded.
    pub fn enqueue(&self, queue: usize, func: TaskFn<W, C>, item: W) {
        if self.abort.load(Ordering::SeqCst) {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.tracker.lock().outstanding += 1;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        self.queues[queue % self.queues.len()].push(Job { func, item });
    }

    /// Record a subtree that was skipped because its item could not be built
    pub fn record_pruned(&self, err: &TaskError) {
        warn!("Pruned subtree: {}", err);
        self.stats.pruned.fetch_add(1, Ordering::Relaxed);
    }

    /// Jobs queued or running right now
    pub fn outstanding(&self) -> usize {
        self.tracker.lock().outstanding
    }

    /// Pool statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    fn run_job(&self, id: usize, job: Job<W, C>, context: &C) {
        let Job { func, item } = job;

        match panic::catch_unwind(AssertUnwindSafe(|| func(self, id, item, context))) {
            Ok(Ok(())) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                warn!("Worker {}: {}", id, e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                error!("Worker {}: task panicked", id);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.finish_job();
    }

    fn finish_job(&self) {
        let done = {
            let mut tracker = self.tracker.lock();
            tracker.outstanding -= 1;
            tracker.outstanding == 0 && tracker.closed
        };

        if done {
            self.begin_shutdown();
        }
    }

    fn close(&self) {
        let done = {
            let mut tracker = self.tracker.lock();
            tracker.closed = true;
            tracker.outstanding == 0
        };

        if done {
            self.begin_shutdown();
        }
    }

    fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for queue in &self.queues {
            queue.wake_all();
        }
    }

    fn reset(&self) {
        self.tracker.lock().closed = false;
        self.shutdown.store(false, Ordering::SeqCst);
    }

    fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
        self.begin_shutdown();
    }

    /// Throw away anything that never ran (after a forced shutdown)
    fn discard_pending(&self) {
        let discarded: usize = self.queues.iter().map(|q| q.clear()).sum();
        self.stats
            .discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        if discarded > 0 {
            warn!("Discarded {} queued jobs at shutdown", discarded);
            let mut tracker = self.tracker.lock();
            tracker.outstanding = tracker.outstanding.saturating_sub(discarded);
        }
    }
}

/// Owner of the worker threads
///
/// Lifecycle: [`new`](Self::new), seed with [`enqueue`](Self::enqueue),
/// [`start`](Self::start), [`wait`](Self::wait), and finally
/// [`destroy`](Self::destroy) (or drop). A pool may be started again after
/// `wait` returns.
pub struct QueuePool<W, C> {
    scheduler: Arc<Scheduler<W, C>>,
    handles: Vec<JoinHandle<()>>,
}

impl<W, C> QueuePool<W, C>
where
    W: Send + 'static,
    C: Send + Sync + 'static,
{
    /// Allocate `thread_count` queues. No threads run until `start`.
    pub fn new(thread_count: usize) -> PoolResult<Self> {
        if thread_count == 0 {
            return Err(PoolError::NoThreads);
        }

        Ok(Self {
            scheduler: Arc::new(Scheduler::new(thread_count)),
            handles: Vec::with_capacity(thread_count),
        })
    }

    /// Push work from outside the pool
    pub fn enqueue(&self, queue: usize, func: TaskFn<W, C>, item: W) {
        self.scheduler.enqueue(queue, func, item);
    }

    /// Spawn the workers. Returns how many actually started.
    ///
    /// Callers compare the result against [`thread_count`](Self::thread_count);
    /// a short count means the run cannot complete and the pool should be
    /// dropped.
    pub fn start(&mut self, context: Arc<C>) -> usize {
        let mut started = 0;

        for id in 0..self.scheduler.thread_count() {
            let scheduler = Arc::clone(&self.scheduler);
            let context = Arc::clone(&context);

            match thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker_loop(id, scheduler, context))
            {
                Ok(handle) => {
                    self.handles.push(handle);
                    self.scheduler
                        .stats
                        .threads_started
                        .fetch_add(1, Ordering::Relaxed);
                    started += 1;
                }
                Err(e) => {
                    error!("Failed to start worker {}: {}", id, e);
                    break;
                }
            }
        }

        started
    }

    /// Block until all outstanding work is done and every worker has exited
    ///
    /// No external enqueues may happen after this is called until it
    /// returns. Afterwards the pool can be seeded and started again.
    pub fn wait(&mut self) {
        self.scheduler.close();
        self.join_workers();
        self.scheduler.reset();
    }

    /// Join any remaining workers and release the pool
    pub fn destroy(self) {
        drop(self);
    }

    /// Handle for enqueuing and reading statistics
    pub fn scheduler(&self) -> &Scheduler<W, C> {
        &self.scheduler
    }

    /// Number of workers this pool runs
    pub fn thread_count(&self) -> usize {
        self.scheduler.thread_count()
    }

    /// Worker threads started over the pool's lifetime
    pub fn threads_started(&self) -> u64 {
        self.scheduler.stats.threads_started.load(Ordering::Relaxed)
    }

    /// Worker threads that have exited
    pub fn threads_completed(&self) -> u64 {
        self.scheduler.stats.threads_completed.load(Ordering::Relaxed)
    }

    /// Tasks that returned Ok
    pub fn tasks_completed(&self) -> u64 {
        self.scheduler.stats.completed.load(Ordering::Relaxed)
    }

    /// Tasks that returned an error or panicked
    pub fn tasks_failed(&self) -> u64 {
        self.scheduler.stats.failed_count()
    }

    /// Subtrees pruned during the walk
    pub fn pruned(&self) -> u64 {
        self.scheduler.stats.pruned_count()
    }

    /// Jobs dropped by a forced shutdown
    pub fn discarded(&self) -> u64 {
        self.scheduler.stats.discarded_count()
    }

    /// Jobs queued or running
    pub fn outstanding(&self) -> usize {
        self.scheduler.outstanding()
    }

    fn join_workers(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread panicked outside of a task");
            }
        }
    }
}

impl<W, C> Drop for QueuePool<W, C> {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        // Forced shutdown: workers finish only the job in hand, and
        // anything those jobs try to enqueue is dropped.
        self.scheduler.abort();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.scheduler.discard_pending();
    }
}

fn worker_loop<W, C>(id: usize, scheduler: Arc<Scheduler<W, C>>, context: Arc<C>) {
    debug!("Worker {} started", id);

    let queue = &scheduler.queues[id];
    while let Some(job) = queue.pop_wait_or_abort(&scheduler.shutdown, &scheduler.abort) {
        scheduler.run_job(id, job, &context);
    }

    scheduler
        .stats
        .threads_completed
        .fetch_add(1, Ordering::Relaxed);
    debug!("Worker {} exiting", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct Counter {
        visited: AtomicU64,
        max_depth: u32,
        fanout: u32,
    }

    fn expand(scheduler: &Scheduler<u32, Counter>, id: usize, depth: u32, ctx: &Counter) -> TaskResult {
        ctx.visited.fetch_add(1, Ordering::Relaxed);
        if depth + 1 < ctx.max_depth {
            for _ in 0..ctx.fanout {
                scheduler.enqueue(id, expand, depth + 1);
            }
        }
        Ok(())
    }

    fn fail(_: &Scheduler<u32, Counter>, _: usize, n: u32, ctx: &Counter) -> TaskResult {
        ctx.visited.fetch_add(1, Ordering::Relaxed);
        if n % 2 == 0 {
            return Err(TaskError::Output(std::io::Error::from(
                std::io::ErrorKind::Other,
            )));
        }
        Ok(())
    }

    fn crawl(scheduler: &Scheduler<u32, Counter>, id: usize, depth: u32, ctx: &Counter) -> TaskResult {
        thread::sleep(std::time::Duration::from_millis(1));
        ctx.visited.fetch_add(1, Ordering::Relaxed);
        if depth + 1 < ctx.max_depth {
            for _ in 0..ctx.fanout {
                scheduler.enqueue(id, crawl, depth + 1);
            }
        }
        Ok(())
    }

    fn explode(_: &Scheduler<u32, Counter>, _: usize, _: u32, _: &Counter) -> TaskResult {
        panic!("boom");
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            QueuePool::<u32, Counter>::new(0),
            Err(PoolError::NoThreads)
        ));
    }

    #[test]
    fn test_recursive_enqueue_visits_every_node() {
        let ctx = Arc::new(Counter {
            max_depth: 4,
            fanout: 3,
            ..Default::default()
        });
        let mut pool = QueuePool::new(4).unwrap();
        pool.enqueue(0, expand, 0);

        assert_eq!(pool.start(Arc::clone(&ctx)), 4);
        pool.wait();

        // 1 + 3 + 9 + 27
        assert_eq!(ctx.visited.load(Ordering::Relaxed), 40);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.tasks_completed(), 40);
        assert_eq!(pool.threads_started(), 4);
        assert_eq!(pool.threads_completed(), 4);
    }

    #[test]
    fn test_wait_with_no_work() {
        let mut pool = QueuePool::<u32, Counter>::new(2).unwrap();
        pool.start(Arc::new(Counter::default()));
        pool.wait();
        assert_eq!(pool.threads_completed(), 2);
    }

    #[test]
    fn test_failures_do_not_stop_pool() {
        let ctx = Arc::new(Counter::default());
        let mut pool = QueuePool::new(3).unwrap();
        for i in 0..10 {
            pool.enqueue(i as usize, fail, i);
        }
        pool.enqueue(0, explode, 0);

        pool.start(Arc::clone(&ctx));
        pool.wait();

        assert_eq!(ctx.visited.load(Ordering::Relaxed), 10);
        assert_eq!(pool.tasks_completed(), 5);
        assert_eq!(pool.tasks_failed(), 6);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_pool_restart() {
        let ctx = Arc::new(Counter {
            max_depth: 3,
            fanout: 2,
            ..Default::default()
        });
        let mut pool = QueuePool::new(2).unwrap();

        for _ in 0..3 {
            pool.enqueue(1, expand, 0);
            pool.start(Arc::clone(&ctx));
            pool.wait();
        }

        assert_eq!(ctx.visited.load(Ordering::Relaxed), 3 * 7);
        assert_eq!(pool.threads_started(), 6);
        pool.destroy();
    }

    #[test]
    fn test_drop_without_wait() {
        let ctx = Arc::new(Counter {
            max_depth: 2,
            fanout: 2,
            ..Default::default()
        });
        let mut pool = QueuePool::new(2).unwrap();
        pool.enqueue(0, expand, 0);
        pool.start(ctx);
        drop(pool);
    }

    #[test]
    fn test_forced_shutdown_abandons_the_walk() {
        let ctx = Arc::new(Counter {
            max_depth: 6,
            fanout: 3,
            ..Default::default()
        });
        let mut pool = QueuePool::new(1).unwrap();
        pool.enqueue(0, crawl, 0);
        pool.start(Arc::clone(&ctx));
        let scheduler = Arc::clone(&pool.scheduler);
        drop(pool);

        // 1 + 3 + ... + 243 nodes if the walk had been allowed to finish
        let visited = ctx.visited.load(Ordering::Relaxed);
        assert!(visited < 364);
        assert_eq!(scheduler.stats.threads_completed.load(Ordering::Relaxed), 1);
        assert!(scheduler.stats.discarded_count() > 0);

        scheduler.enqueue(0, expand, 0);
        assert_eq!(scheduler.queues[0].len(), 0);
    }
}
