//! Scheduling subsystem: runqueue/dispatch (`scheduler`), the two
//! selection policies (`policy`), and the suspend/resume primitive every
//! blocking call is built on (`waitqueue`).

pub mod policy;
pub mod scheduler;
pub mod waitqueue;

/// Bring the scheduler up. Must run after `process::init()`.
pub fn init() {
    scheduler::init();
    crate::info!("sched: runqueue initialized with pid 1");
}
