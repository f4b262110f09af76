//! POSIX signal masks, pending sets and dispositions.
//!
//! Delivery here stops at updating task state and notifying a waiting
//! parent; dispatching a user handler means building a signal frame on a
//! userspace stack and trampolining through `sigreturn`, which belongs to
//! the process/userspace-ABI layer this kernel core does not implement.
//! `SignalAction::Handler` is recorded faithfully but `deliver_signals`
//! only logs that dispatch was skipped.

use crate::lib::error::{Errno, Result};
use core::sync::atomic::{AtomicU64, Ordering};

pub type Pid = u32;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    SIGHUP = 1,
    SIGINT = 2,
    SIGQUIT = 3,
    SIGILL = 4,
    SIGTRAP = 5,
    SIGABRT = 6,
    SIGBUS = 7,
    SIGFPE = 8,
    SIGKILL = 9,
    SIGUSR1 = 10,
    SIGSEGV = 11,
    SIGUSR2 = 12,
    SIGPIPE = 13,
    SIGALRM = 14,
    SIGTERM = 15,
    SIGCHLD = 17,
    SIGCONT = 18,
    SIGSTOP = 19,
    SIGTSTP = 20,
    SIGTTIN = 21,
    SIGTTOU = 22,
    SIGVTALRM = 26,
    SIGPROF = 27,
}

impl Signal {
    pub fn from_u32(signo: u32) -> Option<Self> {
        match signo {
            1 => Some(Signal::SIGHUP),
            2 => Some(Signal::SIGINT),
            3 => Some(Signal::SIGQUIT),
            4 => Some(Signal::SIGILL),
            5 => Some(Signal::SIGTRAP),
            6 => Some(Signal::SIGABRT),
            7 => Some(Signal::SIGBUS),
            8 => Some(Signal::SIGFPE),
            9 => Some(Signal::SIGKILL),
            10 => Some(Signal::SIGUSR1),
            11 => Some(Signal::SIGSEGV),
            12 => Some(Signal::SIGUSR2),
            13 => Some(Signal::SIGPIPE),
            14 => Some(Signal::SIGALRM),
            15 => Some(Signal::SIGTERM),
            17 => Some(Signal::SIGCHLD),
            18 => Some(Signal::SIGCONT),
            19 => Some(Signal::SIGSTOP),
            20 => Some(Signal::SIGTSTP),
            21 => Some(Signal::SIGTTIN),
            22 => Some(Signal::SIGTTOU),
            26 => Some(Signal::SIGVTALRM),
            27 => Some(Signal::SIGPROF),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn is_catchable(self) -> bool {
        !matches!(self, Signal::SIGKILL | Signal::SIGSTOP)
    }

    pub fn default_action(self) -> SignalAction {
        match self {
            Signal::SIGCHLD => SignalAction::Ignore,
            Signal::SIGCONT => SignalAction::Continue,
            Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU => {
                SignalAction::Stop
            }
            _ => SignalAction::Terminate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Ignore,
    Terminate,
    Stop,
    Continue,
    /// Call a user handler at this address. Recorded but not dispatched
    /// (see module doc).
    Handler(u64),
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SigAction {
    pub sa_handler: u64,
    pub sa_mask: u64,
    pub sa_flags: i32,
    pub sa_restorer: u64,
}

impl Default for SigAction {
    fn default() -> Self {
        Self { sa_handler: 0, sa_mask: 0, sa_flags: 0, sa_restorer: 0 }
    }
}

pub struct SignalQueue {
    pending: AtomicU64,
    blocked: AtomicU64,
    handlers: [SignalAction; 32],
}

impl SignalQueue {
    pub fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            handlers: [SignalAction::Terminate; 32],
        }
    }

    pub fn add_signal(&self, sig: Signal) {
        let bit = 1u64 << (sig.to_u32() - 1);
        self.pending.fetch_or(bit, Ordering::SeqCst);
    }

    pub fn remove_signal(&self, sig: Signal) {
        let bit = 1u64 << (sig.to_u32() - 1);
        self.pending.fetch_and(!bit, Ordering::SeqCst);
    }

    pub fn is_pending(&self, sig: Signal) -> bool {
        let bit = 1u64 << (sig.to_u32() - 1);
        (self.pending.load(Ordering::SeqCst) & bit) != 0
    }

    /// Lowest-numbered pending signal not currently blocked, per POSIX
    /// delivery order.
    pub fn next_pending(&self) -> Option<Signal> {
        let pending = self.pending.load(Ordering::SeqCst);
        let blocked = self.blocked.load(Ordering::SeqCst);
        let deliverable = pending & !blocked;
        if deliverable == 0 {
            return None;
        }
        let signo = deliverable.trailing_zeros() + 1;
        Signal::from_u32(signo)
    }

    pub fn block(&self, sig: Signal) {
        let bit = 1u64 << (sig.to_u32() - 1);
        self.blocked.fetch_or(bit, Ordering::SeqCst);
    }

    pub fn unblock(&self, sig: Signal) {
        let bit = 1u64 << (sig.to_u32() - 1);
        self.blocked.fetch_and(!bit, Ordering::SeqCst);
    }

    pub fn set_handler(&mut self, sig: Signal, action: SignalAction) {
        let idx = (sig.to_u32() - 1) as usize;
        if idx < 32 {
            self.handlers[idx] = action;
        }
    }

    pub fn get_handler(&self, sig: Signal) -> SignalAction {
        let idx = (sig.to_u32() - 1) as usize;
        if idx < 32 {
            self.handlers[idx]
        } else {
            SignalAction::Terminate
        }
    }

    pub fn clear_all(&self) {
        self.pending.store(0, Ordering::SeqCst);
    }
}

impl Clone for SignalQueue {
    fn clone(&self) -> Self {
        Self {
            pending: AtomicU64::new(self.pending.load(Ordering::SeqCst)),
            blocked: AtomicU64::new(self.blocked.load(Ordering::SeqCst)),
            handlers: self.handlers,
        }
    }
}

/// Mark `sig` pending for `pid` and, if the task is blocked, wake it so it
/// observes the signal on its next scheduling opportunity.
pub fn send_signal(pid: Pid, sig: Signal) -> Result<()> {
    use crate::process::task::TaskState;

    let woke = crate::process::with_task(pid, |task| {
        task.signals.add_signal(sig);
        matches!(task.state, TaskState::Interruptible)
    })
    .ok_or(Errno::ESRCH)?;

    if woke {
        crate::sched::scheduler::wake_up(pid);
    }
    Ok(())
}

/// Apply the next deliverable signal's disposition to the current task.
/// Called by the scheduler tick before resuming a task.
pub fn deliver_signals() {
    use crate::process::task::TaskState;

    let pid = crate::process::current_pid();
    let outcome = crate::process::with_task(pid, |task| {
        let Some(sig) = task.signals.next_pending() else {
            return None;
        };
        task.signals.remove_signal(sig);
        let action = task.signals.get_handler(sig);
        match action {
            SignalAction::Ignore => {}
            SignalAction::Terminate => {
                task.exit_code = 128 + sig.to_u32() as i32;
                task.state = TaskState::Zombie;
            }
            SignalAction::Stop => task.state = TaskState::Stopped,
            SignalAction::Continue => {
                if task.state == TaskState::Stopped {
                    task.state = TaskState::Running;
                }
            }
            SignalAction::Handler(_) => {
                crate::debug!("signal {:?} for pid {}: handler dispatch out of scope", sig, pid);
            }
        }
        Some((sig, action, task.ppid))
    })
    .flatten();

    let Some((sig, action, ppid)) = outcome else {
        return;
    };

    if action == SignalAction::Terminate {
        crate::info!("pid {} terminated by signal {:?}", pid, sig);
        if ppid != 0 {
            let _ = send_signal(ppid, Signal::SIGCHLD);
        }
    }
}

pub const SIG_DFL: u64 = 0;
pub const SIG_IGN: u64 = 1;

pub const SA_RESTART: i32 = 0x10000000;
pub const SA_SIGINFO: i32 = 0x00000004;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_pending_respects_block_mask_and_ordering() {
        let q = SignalQueue::new();
        q.add_signal(Signal::SIGTERM);
        q.add_signal(Signal::SIGINT);
        q.block(Signal::SIGINT);
        assert_eq!(q.next_pending(), Some(Signal::SIGTERM));
        q.unblock(Signal::SIGINT);
        q.remove_signal(Signal::SIGTERM);
        assert_eq!(q.next_pending(), Some(Signal::SIGINT));
    }

    #[test]
    fn sigkill_and_sigstop_are_uncatchable() {
        assert!(!Signal::SIGKILL.is_catchable());
        assert!(!Signal::SIGSTOP.is_catchable());
        assert!(Signal::SIGTERM.is_catchable());
    }

    #[test]
    fn clone_preserves_mask_state_independently() {
        let q = SignalQueue::new();
        q.block(Signal::SIGUSR1);
        let cloned = q.clone();
        q.unblock(Signal::SIGUSR1);
        cloned.add_signal(Signal::SIGUSR1);
        assert_eq!(cloned.next_pending(), None);
    }
}
