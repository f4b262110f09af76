//! Scheduling policies: weighted-fair (`vruntime`-minimizing) and EDF for
//! periodic tasks.

use crate::process::task::{Pid, SchedEntity, Task};

/// Linux-style nice-to-weight table, indexed by `priority + 20` (priority
/// ranges -20..=19). Higher weight means a larger vruntime charge per tick
/// for the same execution time, i.e. the task falls behind faster and
/// yields the CPU sooner — nice -20 runs ~22x longer per vruntime unit
/// than nice 19.
const WEIGHTS: [u64; 40] = [
    88761, 71755, 56483, 46273, 36291, 29154, 23254, 18705, 14949, 11916, 9548, 7620, 6100, 4904,
    3906, 3121, 2501, 1991, 1586, 1277, 1024, 820, 655, 526, 423, 335, 272, 215, 172, 137, 110,
    87, 70, 56, 45, 36, 29, 23, 18, 15,
];

/// Weight for a priority value, clamped to the supported -20..=19 range.
pub fn weight(priority: i32) -> u64 {
    let idx = (priority.clamp(-20, 19) + 20) as usize;
    WEIGHTS[idx]
}

/// Charge `delta_ticks` of execution time against a scheduling entity's
/// `vruntime`, scaled by its weight relative to the default (nice 0)
/// weight so a heavier task accrues more virtual time per real tick.
pub fn charge_vruntime(entity: &mut SchedEntity, delta_ticks: u64) {
    let w = weight(entity.priority);
    let scaled = delta_ticks.saturating_mul(WEIGHTS[20]) / w.max(1);
    entity.sum_exec_runtime = entity.sum_exec_runtime.saturating_add(delta_ticks);
    entity.vruntime = entity.vruntime.saturating_add(scaled.max(1));
}

/// Advance a periodic task's bookkeeping: mark overrun if `executed`
/// exceeded `wcet` before the period rolled over, then reset for the next
/// period once `now` reaches `next_period`.
pub fn tick_periodic(entity: &mut SchedEntity, now: u64) {
    if !entity.is_periodic {
        return;
    }
    if entity.executed > entity.wcet {
        entity.overrun = true;
    }
    if now >= entity.next_period {
        entity.executed = 0;
        entity.overrun = false;
        entity.next_period = now.saturating_add(entity.period.max(1));
    }
}

/// Pick the runnable pid with the lowest `vruntime` among fair-policy
/// tasks, or, if any periodic task is runnable, the one with the nearest
/// `deadline` (EDF takes priority over the fair class).
pub fn pick_next(runnable: &[Pid]) -> Option<Pid> {
    let mut best_edf: Option<(u64, Pid)> = None;
    let mut best_fair: Option<(u64, Pid)> = None;

    for &pid in runnable {
        crate::process::with_task(pid, |task: &mut Task| {
            if task.sched.is_periodic {
                let key = task.sched.deadline;
                if best_edf.map_or(true, |(d, _)| key < d) {
                    best_edf = Some((key, pid));
                }
            } else {
                let key = task.sched.vruntime;
                if best_fair.map_or(true, |(v, _)| key < v) {
                    best_fair = Some((key, pid));
                }
            }
        });
    }

    best_edf.map(|(_, pid)| pid).or_else(|| best_fair.map(|(_, pid)| pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_priority_number_has_higher_weight() {
        assert!(weight(-20) > weight(0));
        assert!(weight(0) > weight(19));
    }

    #[test]
    fn charging_heavier_task_advances_vruntime_slower() {
        let mut light = SchedEntity { priority: 19, ..SchedEntity::default() };
        let mut heavy = SchedEntity { priority: -20, ..SchedEntity::default() };
        charge_vruntime(&mut light, 10);
        charge_vruntime(&mut heavy, 10);
        assert!(heavy.vruntime < light.vruntime);
    }

    #[test]
    fn periodic_resets_executed_on_period_rollover() {
        let mut e = SchedEntity {
            is_periodic: true,
            period: 100,
            wcet: 50,
            executed: 80,
            next_period: 100,
            ..SchedEntity::default()
        };
        tick_periodic(&mut e, 100);
        assert_eq!(e.executed, 0);
        assert!(!e.overrun);
        assert_eq!(e.next_period, 200);
    }
}
