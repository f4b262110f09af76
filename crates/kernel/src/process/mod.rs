//! Process management: the task table and the identity half of the
//! scheduling subsystem (the runqueue/dispatch half lives in
//! [`crate::sched::scheduler`]).

pub mod signal;
pub mod task;
pub mod wait;

use self::task::{Pid, Task, TaskState};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

static NEXT_PID: AtomicU32 = AtomicU32::new(2);
static CURRENT: AtomicU32 = AtomicU32::new(1);

struct Table {
    tasks: BTreeMap<Pid, Task>,
}

static TABLE: Mutex<Option<Table>> = Mutex::new(None);

/// Bring up the task table with a single `init` task (pid 1), runnable and
/// current. Must run once before any other `process::*` call.
pub fn init() {
    let mut guard = TABLE.lock();
    let mut tasks = BTreeMap::new();
    tasks.insert(1, Task::new_init());
    *guard = Some(Table { tasks });
    CURRENT.store(1, Ordering::SeqCst);
}

fn with_table<R>(f: impl FnOnce(&mut BTreeMap<Pid, Task>) -> R) -> R {
    let mut guard = TABLE.lock();
    let table = guard.as_mut().expect("process table not initialized");
    f(&mut table.tasks)
}

/// Run `f` against a single task, if it still exists.
pub fn with_task<R>(pid: Pid, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
    with_table(|tasks| tasks.get_mut(&pid).map(f))
}

pub fn exists(pid: Pid) -> bool {
    with_table(|tasks| tasks.contains_key(&pid))
}

pub fn current_pid() -> Pid {
    CURRENT.load(Ordering::SeqCst)
}

pub fn set_current_pid(pid: Pid) {
    CURRENT.store(pid, Ordering::SeqCst);
}

/// Allocate the next pid. Pids are never reused while any record of the
/// task, zombie or otherwise, remains in the table.
pub fn alloc_pid() -> Pid {
    NEXT_PID.fetch_add(1, Ordering::SeqCst)
}

/// Create a new child of `parent_pid` by copying its task record (`fork`
/// semantics: file descriptors shared via refcount, memory and scheduling
/// entity otherwise independent). Returns the child's pid.
pub fn fork(parent_pid: Pid) -> Option<Pid> {
    let child_pid = alloc_pid();
    let now = crate::time::ticks();
    with_table(|tasks| {
        let parent = tasks.get(&parent_pid)?;
        let child = Task::fork_from(parent, child_pid, now);
        tasks.insert(child_pid, child);
        tasks.get_mut(&parent_pid)?.children.push(child_pid);
        Some(child_pid)
    })
}

/// All children of `pid`, whatever their state.
pub fn find_children(pid: Pid) -> Vec<Pid> {
    with_table(|tasks| tasks.get(&pid).map(|t| t.children.clone()).unwrap_or_default())
}

/// Re-parent every child of `pid` to pid 1: orphans are inherited by init
/// so they can still be reaped.
pub fn reparent_to_init(pid: Pid) {
    let children = find_children(pid);
    with_table(|tasks| {
        if let Some(init) = tasks.get_mut(&1) {
            init.children.extend(children.iter().copied());
        }
        for child in &children {
            if let Some(task) = tasks.get_mut(child) {
                task.ppid = 1;
            }
        }
        if let Some(parent) = tasks.get_mut(&pid) {
            parent.children.clear();
        }
    });
}

/// Remove a task's record entirely (only valid once its parent has reaped
/// it via `wait4`).
pub fn remove(pid: Pid) {
    with_table(|tasks| {
        tasks.remove(&pid);
    });
}

pub fn state_of(pid: Pid) -> Option<TaskState> {
    with_table(|tasks| tasks.get(&pid).map(|t| t.state))
}

pub fn set_state(pid: Pid, state: TaskState) {
    with_table(|tasks| {
        if let Some(t) = tasks.get_mut(&pid) {
            t.state = state;
        }
    });
}

/// All pids currently in the table, ascending.
pub fn all_pids() -> Vec<Pid> {
    with_table(|tasks| tasks.keys().copied().collect())
}
