//! Task: identity plus schedulable unit.
//!
//! Carries session/group ids, real+effective credentials, a scheduling
//! entity with both fair-share and periodic/EDF fields, three POSIX
//! interval timers, a signal mask/pending set/dispositions, and a single
//! owned `SIGALRM` timer — generalized from an earlier AArch64
//! `Task`/`Credentials`/`FileTable` shape this crate carried.

use crate::arch::x86_64::CpuContext;
use crate::lib::error::Errno;
use crate::lib::ringbuf::RingBuffer;
use crate::process::signal::SignalQueue;
use crate::timer::TimerHandle;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub type Pid = u32;

/// Bound on a task's file-descriptor table: indexed by small non-negative
/// integers, bounded by this constant.
pub const MAX_FD: usize = 256;

/// The task's volatile scheduling state. A task is on exactly one runqueue
/// *or* one wait queue *or* neither (runnable-pending) — never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Interruptible,
    Uninterruptible,
    Stopped,
    Traced,
    Zombie,
    Dead,
}

/// Real + effective credentials.
#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    pub uid: u32,
    pub euid: u32,
    pub gid: u32,
    pub egid: u32,
}

impl Default for Credentials {
    fn default() -> Self {
        Self { uid: 0, euid: 0, gid: 0, egid: 0 }
    }
}

impl Credentials {
    pub fn is_root(&self) -> bool {
        self.euid == 0 || self.egid == 0
    }
}

/// The scheduling entity embedded in every task. The scheduler owns write
/// access to `vruntime`, the `exec_*` fields, and state transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedEntity {
    /// Static/nice priority, used by the weighted-fair policy's weight
    /// table.
    pub priority: i32,
    /// Tick at which this task was first made runnable.
    pub start_runtime: u64,
    /// Tick at which the task most recently started running.
    pub exec_start: u64,
    /// Total ticks actually executed, lifetime.
    pub sum_exec_runtime: u64,
    /// Virtualized execution time (Σ Δexec × weight(priority)); the fair
    /// policy always runs the minimum-`vruntime` runnable task.
    pub vruntime: u64,

    /// Periodic-task fields, meaningful only when `is_periodic`.
    pub is_periodic: bool,
    pub period: u64,
    pub deadline: u64,
    pub arrival: u64,
    pub wcet: u64,
    pub utilization: u32, // parts per million of one CPU
    pub is_under_analysis: bool,
    /// Ticks executed within the current period; reset at `next_period`.
    pub executed: u64,
    pub next_period: u64,
    pub overrun: bool,
}

/// One of the three POSIX interval timers (`ITIMER_REAL/VIRTUAL/PROF`):
/// an increment plus the ticks remaining until the next expiry.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalTimer {
    pub increment_ticks: u64,
    pub current_value_ticks: u64,
}

impl IntervalTimer {
    /// Decrement by `elapsed` ticks (clamped at zero); returns true exactly
    /// when this tick caused the timer to reach zero (an expiry). On
    /// expiry, a periodic timer immediately reloads from `increment_ticks`.
    pub fn tick(&mut self, elapsed: u64) -> bool {
        if self.current_value_ticks == 0 {
            return false;
        }
        if elapsed >= self.current_value_ticks {
            self.current_value_ticks = self.increment_ticks;
            true
        } else {
            self.current_value_ticks -= elapsed;
            false
        }
    }
}

/// File-descriptor table: small non-negative integers indexing into
/// `Arc<vfs::File>` slots, bounded by `MAX_FD`.
pub struct FileTable {
    fds: Vec<Option<Arc<crate::vfs::file::File>>>,
}

impl FileTable {
    pub fn new() -> Self {
        let mut fds = Vec::with_capacity(MAX_FD);
        fds.resize_with(MAX_FD, || None);
        Self { fds }
    }

    pub fn alloc_fd(&mut self, file: Arc<crate::vfs::file::File>) -> Result<i32, Errno> {
        for (i, slot) in self.fds.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(i as i32);
            }
        }
        Err(Errno::EMFILE)
    }

    /// Install `file` at a caller-chosen slot (used by `sys_pipe`, which
    /// must hand back a specific fd pair atomically).
    pub fn install_at(&mut self, fd: i32, file: Arc<crate::vfs::file::File>) -> Result<(), Errno> {
        if fd < 0 || fd as usize >= self.fds.len() {
            return Err(Errno::EBADF);
        }
        self.fds[fd as usize] = Some(file);
        Ok(())
    }

    pub fn get(&self, fd: i32) -> Result<Arc<crate::vfs::file::File>, Errno> {
        if fd < 0 || fd as usize >= self.fds.len() {
            return Err(Errno::EBADF);
        }
        self.fds[fd as usize].clone().ok_or(Errno::EBADF)
    }

    pub fn close(&mut self, fd: i32) -> Result<Arc<crate::vfs::file::File>, Errno> {
        if fd < 0 || fd as usize >= self.fds.len() {
            return Err(Errno::EBADF);
        }
        self.fds[fd as usize].take().ok_or(Errno::EBADF)
    }

    pub fn first_unused(&self) -> Result<i32, Errno> {
        self.fds
            .iter()
            .position(|s| s.is_none())
            .map(|i| i as i32)
            .ok_or(Errno::EMFILE)
    }

    /// Find an already-open pipe file with the given name (used by the
    /// pipe `open` path, which re-uses an existing descriptor rather than
    /// allocating a fresh pipe for the same named FIFO).
    pub fn find_open_pipe(&self, name: &str) -> Option<Arc<crate::vfs::file::File>> {
        self.fds.iter().flatten().find(|f| f.name() == name && f.is_fifo()).cloned()
    }

    /// `dup(oldfd)`: install `oldfd`'s file at the lowest-numbered free
    /// slot, sharing the same `Arc<File>` (and so the same offset/flags
    /// state) rather than opening a fresh file.
    pub fn dup(&mut self, oldfd: i32) -> Result<i32, Errno> {
        let file = self.get(oldfd)?;
        self.alloc_fd(file)
    }

    /// `dup2(oldfd, newfd)`: point `newfd` at `oldfd`'s file, closing
    /// whatever `newfd` previously held. A no-op returning `newfd` when
    /// `oldfd == newfd` and already open (matches dup2(2)).
    pub fn dup2(&mut self, oldfd: i32, newfd: i32) -> Result<i32, Errno> {
        let file = self.get(oldfd)?;
        if oldfd == newfd {
            return Ok(newfd);
        }
        let _ = self.close(newfd);
        self.install_at(newfd, file)?;
        Ok(newfd)
    }
}

impl Clone for FileTable {
    /// Fork semantics: the table is cloned and every open file's refcount
    /// is incremented — `Arc::clone` does exactly that.
    fn clone(&self) -> Self {
        Self { fds: self.fds.clone() }
    }
}

/// Minimal terminal line-discipline options this kernel core needs to
/// carry. Full TTY handling is out of scope; nothing reads these bits
/// today, but they are part of the task record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOptions {
    pub canonical: bool,
    pub echo: bool,
}

/// The task: identity plus schedulable unit.
pub struct Task {
    pub pid: Pid,
    pub ppid: Pid,
    pub sid: Pid,
    pub pgid: Pid,

    pub state: TaskState,
    pub exit_code: i32,

    pub cred: Credentials,
    pub sched: SchedEntity,

    pub regs: CpuContext,
    pub fpu_dirty: bool,
    pub fpu_state: [u8; 512],

    pub files: FileTable,
    pub errno: Option<Errno>,
    pub cwd: String,
    pub name: String,

    pub children: Vec<Pid>,

    pub timer_real: IntervalTimer,
    pub timer_virtual: IntervalTimer,
    pub timer_prof: IntervalTimer,

    pub signals: SignalQueue,
    pub term: TermOptions,
    pub scancodes: RingBuffer<u8, 32>,
    pub alarm_timer: Option<TimerHandle>,
}

impl Task {
    pub fn new_init() -> Self {
        Self {
            pid: 1,
            ppid: 0,
            sid: 1,
            pgid: 1,
            state: TaskState::Running,
            exit_code: 0,
            cred: Credentials::default(),
            sched: SchedEntity::default(),
            regs: CpuContext::new(),
            fpu_dirty: false,
            fpu_state: [0u8; 512],
            files: FileTable::new(),
            errno: None,
            cwd: String::from("/"),
            name: String::from("init"),
            children: Vec::new(),
            timer_real: IntervalTimer::default(),
            timer_virtual: IntervalTimer::default(),
            timer_prof: IntervalTimer::default(),
            signals: SignalQueue::new(),
            term: TermOptions::default(),
            scancodes: RingBuffer::new(),
            alarm_timer: None,
        }
    }

    pub fn fork_from(parent: &Task, child_pid: Pid, now: u64) -> Self {
        Self {
            pid: child_pid,
            ppid: parent.pid,
            sid: parent.sid,
            pgid: parent.pgid,
            state: TaskState::Running,
            exit_code: 0,
            cred: parent.cred,
            sched: SchedEntity {
                start_runtime: now,
                exec_start: now,
                vruntime: parent.sched.vruntime,
                ..SchedEntity::default()
            },
            regs: parent.regs,
            fpu_dirty: false,
            fpu_state: parent.fpu_state,
            files: parent.files.clone(),
            errno: None,
            cwd: parent.cwd.clone(),
            name: parent.name.clone(),
            children: Vec::new(),
            timer_real: IntervalTimer::default(),
            timer_virtual: IntervalTimer::default(),
            timer_prof: IntervalTimer::default(),
            signals: parent.signals.clone(),
            term: parent.term,
            scancodes: RingBuffer::new(),
            alarm_timer: None,
        }
    }

    pub fn exit(&mut self, code: i32) {
        self.state = TaskState::Zombie;
        self.exit_code = code;
    }

    pub fn is_zombie(&self) -> bool {
        self.state == TaskState::Zombie
    }

    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Running
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("pid", &self.pid)
            .field("ppid", &self.ppid)
            .field("state", &self.state)
            .field("name", &self.name)
            .field("vruntime", &self.sched.vruntime)
            .finish()
    }
}
