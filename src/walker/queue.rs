//! Work items and per-worker task queues
//!
//! Every worker owns one [`TaskQueue`]: a FIFO guarded by its own mutex and
//! signalled by its own condition variable. Nothing here knows about the
//! outstanding-work count; that lives in the pool.

use crate::entry::EntryMeta;
use crate::error::TaskError;
use crate::walker::completion::CompletionToken;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Longest path a work item may carry, in bytes
pub const MAX_PATH_LEN: usize = 4096;

/// One filesystem node to process
#[derive(Debug)]
pub struct WorkItem<A = ()> {
    /// Path of the node
    pub path: PathBuf,

    /// Depth from the root (0 = root)
    pub level: usize,

    /// Cached stat data, when the parent already has it
    pub meta: Option<EntryMeta>,

    /// Completion token for bottom-up walks
    pub completion: Option<Arc<CompletionToken<A>>>,
}

impl<A> WorkItem<A> {
    /// Create a new work item
    pub fn new(path: impl Into<PathBuf>, level: usize) -> Self {
        Self {
            path: path.into(),
            level,
            meta: None,
            completion: None,
        }
    }

    /// Create the root item
    pub fn root(path: impl Into<PathBuf>) -> Self {
        Self::new(path, 0)
    }

    /// Attach cached metadata
    pub fn with_meta(mut self, meta: EntryMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Attach a completion token
    pub fn with_completion(mut self, token: Arc<CompletionToken<A>>) -> Self {
        self.completion = Some(token);
        self
    }

    /// Item for a token's own completion step
    pub fn for_token(token: Arc<CompletionToken<A>>) -> Self {
        Self {
            path: token.path().to_path_buf(),
            level: token.level(),
            meta: None,
            completion: Some(token),
        }
    }

    /// Build the item for an immediate child at `level + 1`
    ///
    /// Fails if the joined path would exceed [`MAX_PATH_LEN`]; the caller
    /// prunes that subtree.
    pub fn child(&self, name: impl AsRef<Path>) -> Result<Self, TaskError> {
        let name = name.as_ref();
        let len = self.path.as_os_str().len() + 1 + name.as_os_str().len();
        if len > MAX_PATH_LEN {
            return Err(TaskError::PathTooLong {
                parent: self.path.clone(),
                name: name.to_string_lossy().into_owned(),
            });
        }

        Ok(Self::new(self.path.join(name), self.level + 1))
    }

    /// Check whether children of this item are still within `max_depth`
    pub fn can_descend(&self, max_depth: Option<usize>) -> bool {
        max_depth.map_or(true, |max| self.level < max)
    }
}

/// FIFO of pending jobs for a single worker
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> TaskQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Append an item and wake the owning worker
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.ready.notify_one();
    }

    /// Pop the next item, blocking while the queue is empty
    ///
    /// Returns `None` once `shutdown` is set and the queue is drained.
    pub fn pop_wait(&self, shutdown: &AtomicBool) -> Option<T> {
        self.pop_inner(shutdown, None)
    }

    /// Like [`pop_wait`](Self::pop_wait), but returns `None` as soon as
    /// `abort` is set, leaving anything still queued in place
    pub fn pop_wait_or_abort(&self, shutdown: &AtomicBool, abort: &AtomicBool) -> Option<T> {
        self.pop_inner(shutdown, Some(abort))
    }

    fn pop_inner(&self, shutdown: &AtomicBool, abort: Option<&AtomicBool>) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if abort.map_or(false, |a| a.load(Ordering::SeqCst)) {
                return None;
            }
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if shutdown.load(Ordering::SeqCst) {
                return None;
            }
            self.ready.wait(&mut items);
        }
    }

    /// Pop without blocking
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Wake every waiter
    ///
    /// Taken under the queue lock so a worker between its shutdown check and
    /// its wait cannot miss the signal.
    pub fn wake_all(&self) {
        let _items = self.items.lock();
        self.ready.notify_all();
    }

    /// Drop everything still queued, returning how many items were discarded
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let n = items.len();
        items.clear();
        n
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for the pool's queues
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total jobs enqueued
    pub enqueued: AtomicU64,

    /// Jobs whose task returned Ok
    pub completed: AtomicU64,

    /// Jobs whose task returned an error or panicked
    pub failed: AtomicU64,

    /// Subtrees skipped because a child item could not be built
    pub pruned: AtomicU64,

    /// Jobs thrown away by a forced shutdown, queued or enqueued after it
    pub discarded: AtomicU64,

    /// Worker threads started over the pool's lifetime
    pub threads_started: AtomicU64,

    /// Worker threads that ran to completion
    pub threads_completed: AtomicU64,
}

impl QueueStats {
    /// Jobs finished, successfully or not
    pub fn throughput(&self) -> u64 {
        self.completed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    /// Get failed job count
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Get pruned subtree count
    pub fn pruned_count(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }

    /// Get discarded job count
    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_basic() {
        let queue = TaskQueue::new();
        queue.push(WorkItem::<()>::root("/test"));
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);

        let shutdown = AtomicBool::new(false);
        let item = queue.pop_wait(&shutdown).unwrap();
        assert_eq!(item.path, PathBuf::from("/test"));
        assert_eq!(item.level, 0);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_queue_fifo() {
        let queue = TaskQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        let shutdown = AtomicBool::new(true);
        let drained: Vec<_> = std::iter::from_fn(|| queue.pop_wait(&shutdown)).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queue_wakes_on_shutdown() {
        let queue = Arc::new(TaskQueue::<u32>::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let waiter = {
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || queue.pop_wait(&shutdown))
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        shutdown.store(true, Ordering::SeqCst);
        queue.wake_all();

        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn test_abort_leaves_queue_untouched() {
        let queue = TaskQueue::new();
        queue.push(1u32);
        queue.push(2u32);

        let shutdown = AtomicBool::new(false);
        let abort = AtomicBool::new(false);
        assert_eq!(queue.pop_wait_or_abort(&shutdown, &abort), Some(1));

        abort.store(true, Ordering::SeqCst);
        assert_eq!(queue.pop_wait_or_abort(&shutdown, &abort), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_item_for_token() {
        let token = CompletionToken::new("/t/a", 2, 0, (), None);
        let item = WorkItem::for_token(Arc::clone(&token));
        assert_eq!(item.path, PathBuf::from("/t/a"));
        assert_eq!(item.level, 2);
        assert!(item.completion.is_some());
    }

    #[test]
    fn test_child_item() {
        let root = WorkItem::<()>::root("/data");
        let child = root.child("sub").unwrap();
        assert_eq!(child.path, PathBuf::from("/data/sub"));
        assert_eq!(child.level, 1);
        assert!(child.completion.is_none());

        assert!(root.can_descend(Some(1)));
        assert!(!child.can_descend(Some(1)));
        assert!(child.can_descend(None));
    }

    #[test]
    fn test_child_path_too_long() {
        let root = WorkItem::<()>::root("/data");
        let long = "x".repeat(MAX_PATH_LEN);
        let err = root.child(&long).unwrap_err();
        assert!(matches!(err, TaskError::PathTooLong { .. }));
    }
}
