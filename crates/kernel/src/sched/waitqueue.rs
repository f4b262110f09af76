//! Wait queues: the suspend/resume primitive every blocking call in the
//! kernel is built on (pipes, message queues, `wait4`, semaphore blocking).
//!
//! A [`WaitQueueHead`] is a lock plus an intrusive-in-spirit list of
//! [`WaitEntry`] records, modeled as an owned `Vec` rather than raw
//! next-pointers. Each entry carries a wake predicate; a waker walks the
//! list under the lock and removes any entry whose predicate returns true
//! in the same critical section.

use crate::process::task::Pid;
use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;

/// Exclusive entries join the tail (woken in FIFO arrival order and meant
/// to be woken one-at-a-time, e.g. thundering-herd avoidance); default
/// entries join the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Default,
    Exclusive,
}

/// The predicate a waker calls for each entry still on the queue. Returns
/// `true` if the entry should be woken and removed. `mode` mirrors the
/// Linux wake mode argument (state bits to match); `sync` marks a
/// same-CPU/no-preempt-boundary wake, unused on this single-CPU kernel but
/// plumbed through so callers can express intent.
pub type WakePredicate = Box<dyn Fn(&WaitEntry, u32, bool) -> bool + Send>;

pub struct WaitEntry {
    pub task: Pid,
    pub kind: EntryKind,
    pub private: u64,
    predicate: WakePredicate,
}

impl WaitEntry {
    fn default_predicate(task: Pid) -> WakePredicate {
        Box::new(move |_entry, _mode, _sync| {
            matches!(
                crate::sched::scheduler::task_state(task),
                Some(crate::process::task::TaskState::Interruptible)
                    | Some(crate::process::task::TaskState::Uninterruptible)
                    | Some(crate::process::task::TaskState::Stopped)
            )
        })
    }
}

struct Inner {
    entries: Vec<WaitEntry>,
}

/// A wait-queue head: one lock, one list.
pub struct WaitQueueHead {
    inner: Mutex<Inner>,
}

impl WaitQueueHead {
    pub const fn new() -> Self {
        Self { inner: Mutex::new(Inner { entries: Vec::new() }) }
    }

    /// Insert an entry. Exclusive entries go to the tail; non-exclusive
    /// entries go to the head.
    pub fn add_wait_queue(&self, task: Pid, kind: EntryKind) {
        let entry = WaitEntry {
            task,
            kind,
            private: 0,
            predicate: WaitEntry::default_predicate(task),
        };
        let mut inner = self.inner.lock();
        match kind {
            EntryKind::Exclusive => inner.entries.push(entry),
            EntryKind::Default => inner.entries.insert(0, entry),
        }
    }

    /// Remove a still-queued entry for `task` without waking it (used when
    /// a blocking call is aborted before its predicate ever fires, e.g. a
    /// signal).
    pub fn remove(&self, task: Pid) {
        let mut inner = self.inner.lock();
        inner.entries.retain(|e| e.task != task);
    }

    /// Bind a custom predicate and private word to the most recently added
    /// entry for `task` (the idiom `sleep_on` callers use: sleep first,
    /// then customize the entry the call returns).
    pub fn set_predicate(&self, task: Pid, private: u64, predicate: WakePredicate) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.iter_mut().rev().find(|e| e.task == task) {
            entry.private = private;
            entry.predicate = predicate;
        }
    }

    /// Walk the list under the lock; for each entry whose predicate
    /// returns true, remove it and mark the task runnable. Tolerates
    /// removal mid-iteration by collecting indices to drop rather than
    /// mutating while iterating.
    pub fn wake(&self, mode: u32, sync: bool, max: Option<usize>) -> usize {
        let mut inner = self.inner.lock();
        let mut woken = Vec::new();
        let mut count = 0usize;
        for (idx, entry) in inner.entries.iter().enumerate() {
            if let Some(limit) = max {
                if count >= limit {
                    break;
                }
            }
            if (entry.predicate)(entry, mode, sync) {
                woken.push(idx);
                count += 1;
            }
        }
        // Remove highest index first so earlier indices stay valid.
        let mut tasks = Vec::with_capacity(woken.len());
        for idx in woken.into_iter().rev() {
            let entry = inner.entries.remove(idx);
            tasks.push(entry.task);
        }
        drop(inner);
        for task in tasks {
            crate::sched::scheduler::wake_up(task);
        }
        count
    }

    /// Wake every entry unconditionally (ignoring predicates) — used when a
    /// resource is being torn down (e.g. last writer of a pipe closing, so
    /// all readers must observe EOF).
    pub fn wake_all_force(&self) {
        let mut inner = self.inner.lock();
        let tasks: Vec<Pid> = inner.entries.drain(..).map(|e| e.task).collect();
        drop(inner);
        for task in tasks {
            crate::sched::scheduler::wake_up(task);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Suspend the current task on `head`: transition it to `Uninterruptible`,
/// insert a default entry, and invoke the scheduler. Returns once woken.
/// Spurious wakeups are possible; callers must re-check their condition.
pub fn sleep_on(head: &WaitQueueHead) {
    let current = crate::sched::scheduler::current_pid();
    head.add_wait_queue(current, EntryKind::Default);
    crate::sched::scheduler::set_state(current, crate::process::task::TaskState::Uninterruptible);
    crate::sched::scheduler::schedule();
}

/// Like `sleep_on` but interruptible: a pending, unblocked signal can abort
/// the wait. The caller observes this as an ordinary spurious wakeup.
pub fn interruptible_sleep_on(head: &WaitQueueHead) {
    let current = crate::sched::scheduler::current_pid();
    head.add_wait_queue(current, EntryKind::Default);
    crate::sched::scheduler::set_state(current, crate::process::task::TaskState::Interruptible);
    crate::sched::scheduler::schedule();
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn predicate_false_leaves_entry_queued() {
        let head = WaitQueueHead::new();
        head.add_wait_queue(1, EntryKind::Default);
        head.set_predicate(1, 0, Box::new(|_, _, _| false));
        let woken = head.wake(0, false, None);
        assert_eq!(woken, 0);
        assert_eq!(head.len(), 1);
    }

    #[test]
    fn predicate_true_removes_entry_in_same_pass() {
        let head = WaitQueueHead::new();
        head.add_wait_queue(1, EntryKind::Default);
        head.add_wait_queue(2, EntryKind::Default);
        head.set_predicate(1, 0, Box::new(|_, _, _| true));
        head.set_predicate(2, 0, Box::new(|_, _, _| false));
        let woken = head.wake(0, false, None);
        assert_eq!(woken, 1);
        assert_eq!(head.len(), 1);
    }

    #[test]
    fn exclusive_entries_join_tail_default_joins_head() {
        let head = WaitQueueHead::new();
        head.add_wait_queue(1, EntryKind::Exclusive);
        head.add_wait_queue(2, EntryKind::Default);
        let order: Vec<Pid> = head.inner.lock().entries.iter().map(|e| e.task).collect();
        assert_eq!(order, alloc::vec![2, 1]);
    }

    #[test]
    fn wake_all_force_drains_regardless_of_predicate() {
        let head = WaitQueueHead::new();
        head.add_wait_queue(1, EntryKind::Default);
        head.set_predicate(1, 0, Box::new(|_, _, _| false));
        let fired = AtomicBool::new(false);
        let _ = &fired;
        head.wake_all_force();
        assert!(head.is_empty());
    }
}
