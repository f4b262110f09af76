//! The dispatch half of the scheduling subsystem: a single runqueue of
//! runnable pids, the currently-running pid, and the tick handler that
//! charges execution time, fires interval timers, runs the timer softirq
//! and performs the context switch.
//!
//! Single-CPU, cooperative-yield, preemptive-on-tick — exactly one task is
//! ever "current"; `schedule()` only ever runs on that task's own stack,
//! calling into [`crate::arch::x86_64::switch_to`] to hand control to
//! whichever task `policy::pick_next` selects.

use super::policy;
use crate::process::task::{Pid, TaskState};
use crate::process::signal::Signal;
use alloc::vec::Vec;
use spin::Mutex;

struct Runqueue {
    runnable: Vec<Pid>,
}

static RUNQUEUE: Mutex<Runqueue> = Mutex::new(Runqueue { runnable: Vec::new() });

/// Bring the scheduler up: pid 1 (`init`) is runnable and current.
pub fn init() {
    let mut rq = RUNQUEUE.lock();
    rq.runnable.clear();
    rq.runnable.push(1);
}

pub fn current_pid() -> Pid {
    crate::process::current_pid()
}

pub fn task_state(pid: Pid) -> Option<TaskState> {
    crate::process::state_of(pid)
}

pub fn set_state(pid: Pid, state: TaskState) {
    crate::process::set_state(pid, state);
    match state {
        TaskState::Running => enqueue(pid),
        _ => dequeue(pid),
    }
}

/// Make `pid` runnable (a no-op if it is not actually blocked — spurious
/// wakeups are tolerated by design).
pub fn wake_up(pid: Pid) {
    if matches!(
        crate::process::state_of(pid),
        Some(TaskState::Interruptible) | Some(TaskState::Uninterruptible) | Some(TaskState::Stopped)
    ) {
        crate::process::set_state(pid, TaskState::Running);
    }
    enqueue(pid);
}

fn enqueue(pid: Pid) {
    let mut rq = RUNQUEUE.lock();
    if !rq.runnable.contains(&pid) {
        rq.runnable.push(pid);
    }
}

fn dequeue(pid: Pid) {
    let mut rq = RUNQUEUE.lock();
    rq.runnable.retain(|&p| p != pid);
}

/// Select and switch to the next runnable task, if different from the
/// current one. Returns to the caller once this task is rescheduled.
pub fn schedule() {
    let current = current_pid();
    let candidates: Vec<Pid> = {
        let rq = RUNQUEUE.lock();
        rq.runnable.iter().copied().filter(|&p| p != current).collect()
    };

    let Some(next) = policy::pick_next(&candidates) else {
        return;
    };
    if next == current {
        return;
    }

    switch_task(current, next);
}

/// Swap `fpu_dirty`/`fpu_state` and general registers between `from` and
/// `to`, then jump via `switch_to`. FPU state is only saved/restored for a
/// task that actually touched the FPU since its last save — FPU save is
/// lazy.
fn switch_task(from: Pid, to: Pid) {
    use crate::arch::x86_64::cpu::{fxrstor, fxsave};

    let now = crate::time::ticks();
    crate::process::with_task(from, |task| {
        task.sched.exec_start = now;
        if task.fpu_dirty {
            unsafe { fxsave(&mut task.fpu_state as *mut [u8; 512]) };
        }
    });

    crate::process::set_current_pid(to);

    let (prev_ctx, next_ctx) = {
        let prev_ptr = crate::process::with_task(from, |task| &mut task.regs as *mut _);
        let next_ptr = crate::process::with_task(to, |task| {
            if task.fpu_dirty {
                unsafe { fxrstor(&task.fpu_state as *const [u8; 512]) };
            }
            task.sched.exec_start = now;
            &task.regs as *const _
        });
        (prev_ptr, next_ptr)
    };

    if let (Some(prev), Some(next)) = (prev_ctx, next_ctx) {
        unsafe { crate::arch::x86_64::switch_to(prev, next) };
    }
}

/// Called once per timer IRQ: charge the outgoing task's execution time,
/// advance its periodic-task bookkeeping and interval timers, run the
/// timer softirq, then select and switch.
pub fn tick() {
    let current = current_pid();
    let now = crate::time::ticks();

    crate::process::with_task(current, |task| {
        policy::charge_vruntime(&mut task.sched, 1);
        policy::tick_periodic(&mut task.sched, now);

        task.timer_real.tick(1);
        if task.timer_virtual.tick(1) {
            task.signals.add_signal(Signal::SIGVTALRM);
        }
        if task.timer_prof.tick(1) {
            task.signals.add_signal(Signal::SIGPROF);
        }
    });

    crate::timer::softirq_tick();
    crate::process::signal::deliver_signals();
    schedule();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_and_dequeue_keep_runqueue_unique() {
        init();
        enqueue(2);
        enqueue(2);
        {
            let rq = RUNQUEUE.lock();
            assert_eq!(rq.runnable.iter().filter(|&&p| p == 2).count(), 1);
        }
        dequeue(2);
        let rq = RUNQUEUE.lock();
        assert!(!rq.runnable.contains(&2));
    }
}
