//! Inter-process facilities that sit beside the scheduler: the Banker's
//! deadlock-prevention engine and System-V message queues. Pipes are
//! VFS-resident and live under `crate::vfs::pipe` instead, since they are
//! file-backed rather than key-addressed.

pub mod banker;
pub mod msgqueue;

use lazy_static::lazy_static;

lazy_static! {
    /// Process-wide message-queue registry, owned here rather than
    /// constructed ad hoc by each caller.
    pub static ref MESSAGE_QUEUES: msgqueue::MsgQueues = msgqueue::MsgQueues::new();
}

pub fn init() {
    crate::info!("ipc: message queue subsystem ready");
}
