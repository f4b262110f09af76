//! Kernel tick clock.
//!
//! The core — timing wheel, scheduler, interval timers — is driven by a
//! single monotonically increasing tick counter advanced by the PIT IRQ0
//! handler. `TICKS_PER_SECOND` is the nominal hardware tick rate (100 Hz,
//! one tick every 10 ms), matching the reference kernel's HZ.

use crate::lib::config::Config;
use core::sync::atomic::{AtomicU64, Ordering};

/// Nominal tick rate. The PIT divisor in `arch::x86_64::pit` must be
/// programmed to match.
pub const TICKS_PER_SECOND: u64 = Config::DEFAULT.tick_hz;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Advance the tick counter by one. Called exactly once per timer IRQ.
pub fn tick() -> u64 {
    TICKS.fetch_add(1, Ordering::SeqCst) + 1
}

/// Current tick count since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

/// Convert a tick count to microseconds.
pub fn ticks_to_us(ticks: u64) -> u64 {
    ticks.saturating_mul(1_000_000 / TICKS_PER_SECOND)
}

/// Convert a duration in microseconds to a (rounded up) tick count.
pub fn us_to_ticks(us: u64) -> u64 {
    let us_per_tick = 1_000_000 / TICKS_PER_SECOND;
    (us + us_per_tick - 1) / us_per_tick
}

/// Time since boot in microseconds, derived from the tick counter. Hardware
/// without a higher-resolution clock degrades to tick granularity.
pub fn get_timestamp_us() -> u64 {
    ticks_to_us(ticks())
}

pub fn get_time_since_boot_ms() -> u64 {
    get_timestamp_us() / 1000
}

pub fn get_uptime_ms() -> u64 {
    get_time_since_boot_ms()
}

/// Busy-wait for approximately `us` microseconds by spinning on the tick
/// counter. Only used by drivers bringing up hardware before the timer
/// wheel is safe to arm, and by tests.
pub fn sleep_us(us: u64) {
    let target = ticks().saturating_add(us_to_ticks(us).max(1));
    while ticks() < target {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_to_us_at_100hz() {
        assert_eq!(ticks_to_us(1), 10_000);
        assert_eq!(ticks_to_us(100), 1_000_000);
    }

    #[test]
    fn us_to_ticks_rounds_up() {
        assert_eq!(us_to_ticks(1), 1);
        assert_eq!(us_to_ticks(10_000), 1);
        assert_eq!(us_to_ticks(10_001), 2);
    }
}
