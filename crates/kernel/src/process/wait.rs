//! `wait4`/`exit` — reaping zombie children and tearing down a task.

use super::task::Pid;
use crate::lib::error::Errno;
use crate::sched::waitqueue::WaitQueueHead;
use alloc::vec;
use alloc::vec::Vec;

pub const WNOHANG: i32 = 1;
pub const WUNTRACED: i32 = 2;
pub const WCONTINUED: i32 = 8;

/// Every exit/zombie transition wakes this queue; waiters re-check their
/// own child list rather than carrying any private state.
static CHILD_EVENT: WaitQueueHead = WaitQueueHead::new();

pub fn w_exitcode(exit_code: i32, signal: i32) -> i32 {
    (exit_code << 8) | (signal & 0x7f)
}

fn candidate_children(current_pid: Pid, pid: i32) -> Result<Vec<Pid>, Errno> {
    if pid > 0 {
        if !crate::process::exists(pid as Pid) {
            return Err(Errno::ECHILD);
        }
        Ok(vec![pid as Pid])
    } else if pid == -1 {
        Ok(crate::process::find_children(current_pid))
    } else {
        // Process-group-relative waits are out of scope (no process groups
        // beyond the bare pgid field are modeled here).
        Err(Errno::EINVAL)
    }
}

/// `wait4`: reap a zombie child, writing its exit status through
/// `wstatus` (ignored if null). Blocks unless `WNOHANG` is set and no
/// zombie child is yet available.
pub fn do_wait4(current_pid: Pid, pid: i32, wstatus: *mut i32, options: i32) -> Result<Pid, Errno> {
    loop {
        let children = candidate_children(current_pid, pid)?;
        if children.is_empty() {
            return Err(Errno::ECHILD);
        }

        for child_pid in &children {
            let reaped = crate::process::with_task(*child_pid, |child| {
                if child.is_zombie() {
                    Some(child.exit_code)
                } else {
                    None
                }
            })
            .flatten();

            if let Some(exit_code) = reaped {
                if !wstatus.is_null() {
                    unsafe {
                        *wstatus = w_exitcode(exit_code, 0);
                    }
                }
                crate::process::remove(*child_pid);
                return Ok(*child_pid);
            }
        }

        if (options & WNOHANG) != 0 {
            return Ok(0);
        }

        crate::sched::waitqueue::interruptible_sleep_on(&CHILD_EVENT);
    }
}

/// Terminate the current task: mark it a zombie, reparent its children to
/// init, notify its parent, and hand control back to the scheduler. Never
/// returns.
pub fn do_exit(current_pid: Pid, exit_code: i32) -> ! {
    let ppid = crate::process::with_task(current_pid, |task| {
        task.exit(exit_code);
        task.ppid
    });

    crate::process::reparent_to_init(current_pid);

    if let Some(ppid) = ppid {
        crate::info!("pid {} exited with code {}", current_pid, exit_code);
        if ppid != 0 {
            let _ = crate::process::signal::send_signal(ppid, crate::process::signal::Signal::SIGCHLD);
        }
    }
    CHILD_EVENT.wake_all_force();

    crate::sched::scheduler::schedule();

    loop {
        unsafe {
            core::arch::asm!("hlt", options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exitcode_encoding_packs_status_and_signal() {
        assert_eq!(w_exitcode(0, 0), 0);
        assert_eq!(w_exitcode(1, 0), 1 << 8);
        assert_eq!(w_exitcode(0, 9), 9);
    }
}
