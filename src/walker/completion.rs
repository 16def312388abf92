//! Bottom-up completion tokens
//!
//! A directory registers a token holding the number of immediate
//! subdirectories it is waiting on. Each child, once its own subtree is
//! done, merges its accumulated value into the parent and decrements the
//! parent's count. The child that brings the count to zero enqueues the
//! parent's completion task, so a parent's gated action (rmdir, printing a
//! subtree total) runs exactly once and only after all of its descendants.
//!
//! Children hold a strong reference to their parent's token; parents never
//! reference children, so there are no cycles and a token is freed when
//! the last child drops it.

use crate::walker::pool::{Scheduler, TaskFn};
use crate::walker::queue::WorkItem;
use crate::error::TaskResult;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Value accumulated from a subtree into its parent
pub trait Rollup: Default + Clone + Send + Sync {
    /// Fold a finished child's total into this one
    fn absorb(&mut self, child: &Self);
}

impl Rollup for () {
    fn absorb(&mut self, _child: &Self) {}
}

#[derive(Debug)]
struct TokenState<A> {
    pending: usize,
    fired: bool,
    acc: A,
}

/// Reference-counted per-directory completion state
#[derive(Debug)]
pub struct CompletionToken<A = ()> {
    path: PathBuf,
    level: usize,
    parent: Option<Arc<CompletionToken<A>>>,
    state: Mutex<TokenState<A>>,
}

impl<A> CompletionToken<A> {
    /// Path of the directory this token belongs to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Level of the directory this token belongs to
    pub fn level(&self) -> usize {
        self.level
    }

    /// Parent token, `None` at the root of the walk
    pub fn parent(&self) -> Option<&Arc<CompletionToken<A>>> {
        self.parent.as_ref()
    }
}

impl<A: Rollup> CompletionToken<A> {
    /// Register a directory waiting on `pending` children
    ///
    /// `local` is this directory's own contribution to the accumulator.
    pub fn new(
        path: impl Into<PathBuf>,
        level: usize,
        pending: usize,
        local: A,
        parent: Option<Arc<CompletionToken<A>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            level,
            parent,
            state: Mutex::new(TokenState {
                pending,
                fired: false,
                acc: local,
            }),
        })
    }

    /// Children still outstanding
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Check whether the gated action has run
    pub fn is_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Report one finished child
    ///
    /// Merge and decrement happen in one critical section; returns true for
    /// exactly one caller, the one whose decrement reached zero.
    pub fn child_done(&self, child: &A) -> bool {
        let mut state = self.state.lock();
        state.acc.absorb(child);
        debug_assert!(state.pending > 0, "child_done on {:?} with nothing pending", self.path);
        state.pending = state.pending.saturating_sub(1);
        state.pending == 0
    }

    /// Claim the gated action
    ///
    /// Returns the accumulated subtree value the first time it is called
    /// with nothing pending, and `None` otherwise.
    pub fn try_fire(&self) -> Option<A> {
        let mut state = self.state.lock();
        if state.pending != 0 || state.fired {
            return None;
        }
        state.fired = true;
        Some(state.acc.clone())
    }
}

/// Run a token's gated action and report it to the parent
///
/// `action` receives the token and its subtree total. The parent is
/// notified even if the action fails, so one failed directory does not
/// stall every ancestor. If the parent becomes complete, its completion
/// task `up` is enqueued on worker `id`'s queue.
pub fn finish_node<A, C, F>(
    scheduler: &Scheduler<WorkItem<A>, C>,
    id: usize,
    token: &Arc<CompletionToken<A>>,
    up: TaskFn<WorkItem<A>, C>,
    action: F,
) -> TaskResult
where
    A: Rollup,
    F: FnOnce(&CompletionToken<A>, &A) -> TaskResult,
{
    let Some(total) = token.try_fire() else {
        return Ok(());
    };

    let result = action(token, &total);
    release_parent(scheduler, id, token.parent(), &total, up);
    result
}

/// Tell `parent` that one of its children is finished with `total`
///
/// Used directly when a child never registers a token of its own (it was
/// pruned or its directory could not be read).
pub fn release_parent<A, C>(
    scheduler: &Scheduler<WorkItem<A>, C>,
    id: usize,
    parent: Option<&Arc<CompletionToken<A>>>,
    total: &A,
    up: TaskFn<WorkItem<A>, C>,
) where
    A: Rollup,
{
    if let Some(parent) = parent {
        if parent.child_done(total) {
            scheduler.enqueue(id, up, WorkItem::for_token(Arc::clone(parent)));
        }
    }
}
