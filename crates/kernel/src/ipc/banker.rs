//! Banker's-algorithm deadlock-prevention engine.
//!
//! Four arrays over `n` tasks x `m` resources: `available[m]`, `max[n][m]`,
//! `alloc[n][m]` and the derived `need[n][m] = max - alloc`. `request`
//! validates, tentatively commits, checks for a safe sequence and rolls the
//! commit back on failure; `free` only ever grows `available` and shrinks
//! `alloc` — `need` is never raised back up, since a task's declared maximum
//! claim is sticky for its lifetime.
//!
//! Purely algorithmic: this module never reaches into another subsystem's
//! locks, so every mutation happens under the one `Mutex` below. The shape
//! follows the same "small owned matrices behind a lock" idiom the rest of
//! this crate's resource-accounting modules use.

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

/// Outcome of a `request` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Granted: committed and a safe sequence exists.
    Safe,
    /// Not enough free instances right now; the request is unchanged.
    Wait,
    /// The tentative commit has no safe sequence; rolled back before
    /// returning.
    WaitUnsafe,
    /// The request itself is malformed (claims more than the task's
    /// declared `need`).
    Error,
}

struct State {
    available: Vec<u64>,
    max: Vec<Vec<u64>>,
    alloc: Vec<Vec<u64>>,
}

impl State {
    fn need(&self, task: usize) -> Vec<u64> {
        self.max[task]
            .iter()
            .zip(self.alloc[task].iter())
            .map(|(m, a)| m.saturating_sub(*a))
            .collect()
    }

    /// Standard Banker's reachability: repeatedly find any unfinished task
    /// whose `need` fits within `work`, release its allocation into `work`.
    /// Safe iff every task is eventually marked finished. Ties are broken
    /// by ascending task index, so the result is deterministic for a given
    /// state.
    fn has_safe_sequence(&self) -> bool {
        let n = self.alloc.len();
        let m = self.available.len();
        let mut work = self.available.clone();
        let mut finished = vec![false; n];

        loop {
            let mut progressed = false;
            for i in 0..n {
                if finished[i] {
                    continue;
                }
                let need = self.need(i);
                if (0..m).all(|j| need[j] <= work[j]) {
                    for j in 0..m {
                        work[j] += self.alloc[i][j];
                    }
                    finished[i] = true;
                    progressed = true;
                }
            }
            if finished.iter().all(|&f| f) {
                return true;
            }
            if !progressed {
                return false;
            }
        }
    }
}

/// Owned deadlock-prevention state for `n` tasks over `m` resource
/// classes, guarded by a single lock.
pub struct Banker {
    state: Mutex<State>,
}

impl Banker {
    /// `total[j]` is the number of instances of resource `j` that exist;
    /// all start unallocated (`available = total`).
    pub fn new(n: usize, total: Vec<u64>) -> Self {
        Self {
            state: Mutex::new(State {
                available: total,
                max: vec![vec![0; 0]; n],
                alloc: vec![vec![0; 0]; n],
            }),
        }
    }

    /// Declare task `i`'s maximum claim over all resources up front
    /// (classic Banker's setup; a task that never declares a max has an
    /// implicit all-zero `need` and so can never be granted anything).
    pub fn set_max(&self, task: usize, max: Vec<u64>) {
        let mut state = self.state.lock();
        let alloc_len = max.len();
        if state.alloc[task].is_empty() {
            state.alloc[task] = vec![0; alloc_len];
        }
        state.max[task] = max;
    }

    /// Request `v` additional instances for `task`. Returns `Error` if `v`
    /// exceeds `need`, `Wait` if `v` exceeds `available`, else tentatively
    /// commits and either keeps the commit (`Safe`) or rolls it back
    /// (`WaitUnsafe`).
    pub fn request(&self, task: usize, v: &[u64]) -> RequestOutcome {
        let mut state = self.state.lock();
        let need = state.need(task);
        if v.iter().zip(need.iter()).any(|(req, need)| req > need) {
            return RequestOutcome::Error;
        }
        if v.iter().zip(state.available.iter()).any(|(req, avail)| req > avail) {
            return RequestOutcome::Wait;
        }

        for (j, &req) in v.iter().enumerate() {
            state.available[j] -= req;
            state.alloc[task][j] += req;
        }

        if state.has_safe_sequence() {
            RequestOutcome::Safe
        } else {
            for (j, &req) in v.iter().enumerate() {
                state.available[j] += req;
                state.alloc[task][j] -= req;
            }
            RequestOutcome::WaitUnsafe
        }
    }

    /// Release `v` instances held by `task`; requires `v <= alloc[task]`,
    /// else `Error`. `need` is intentionally not raised back up — freeing
    /// resources does not loosen the task's declared maximum claim.
    pub fn free(&self, task: usize, v: &[u64]) -> RequestOutcome {
        let mut state = self.state.lock();
        if v.iter().zip(state.alloc[task].iter()).any(|(rel, held)| rel > held) {
            return RequestOutcome::Error;
        }
        for (j, &rel) in v.iter().enumerate() {
            state.alloc[task][j] -= rel;
            state.available[j] += rel;
        }
        RequestOutcome::Safe
    }

    pub fn available(&self) -> Vec<u64> {
        self.state.lock().available.clone()
    }

    pub fn alloc_of(&self, task: usize) -> Vec<u64> {
        self.state.lock().alloc[task].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// n=2, m=2, available=[1,1], max=[[1,1],[1,1]], alloc starts at zero —
    /// the textbook two-task/two-resource deadlock setup, traced step by
    /// step against what `request`/`free` actually compute.
    #[test]
    fn scenario_1_deterministic_trace() {
        let banker = Banker::new(2, vec![1, 1]);
        banker.set_max(0, vec![1, 1]);
        banker.set_max(1, vec![1, 1]);

        // Task 0 takes [1,0]: available -> [0,1], alloc0 -> [1,0]. A safe
        // sequence exists (task0 then task1 can both finish), so it commits.
        assert_eq!(banker.request(0, &[1, 0]), RequestOutcome::Safe);

        // Task 1 asks for [0,1]: the tentative commit leaves available
        // [0,0] with need0=[0,1] and need1=[1,0] — neither fits in an
        // empty `work`, so no safe sequence exists and the commit rolls
        // back. State is unchanged from the line above.
        assert_eq!(banker.request(1, &[0, 1]), RequestOutcome::WaitUnsafe);

        // Task 0 releases its [1,0]: available -> [1,1], alloc0 -> [0,0].
        assert_eq!(banker.free(0, &[1, 0]), RequestOutcome::Safe);

        // With the full pool free again, task 1 can safely take its whole
        // max claim [1,1]: available -> [0,0], alloc1 -> [1,1].
        assert_eq!(banker.request(1, &[1, 1]), RequestOutcome::Safe);

        // Task 0 asks for [1,0]: available is [0,0], so there isn't enough
        // free right now regardless of safety.
        assert_eq!(banker.request(0, &[1, 0]), RequestOutcome::Wait);

        // Task 0 asks for [0,2]: need0 is [1,1], so this exceeds its
        // declared maximum claim outright.
        assert_eq!(banker.request(0, &[0, 2]), RequestOutcome::Error);

        // Task 1 releases its [1,1]: available -> [1,1], alloc1 -> [0,0].
        assert_eq!(banker.free(1, &[1, 1]), RequestOutcome::Safe);

        // Task 1 tries to release [1,1] again, but it holds nothing.
        assert_eq!(banker.free(1, &[1, 1]), RequestOutcome::Error);
    }

    #[test]
    fn request_exceeding_need_is_error() {
        let banker = Banker::new(1, vec![5]);
        banker.set_max(0, vec![2]);
        assert_eq!(banker.request(0, &[3]), RequestOutcome::Error);
    }

    #[test]
    fn accounting_invariant_holds_across_request_free_pairs() {
        let banker = Banker::new(2, vec![3, 3]);
        banker.set_max(0, vec![2, 2]);
        banker.set_max(1, vec![2, 2]);
        let total: u64 = 3 + 3;

        assert_eq!(banker.request(0, &[2, 1]), RequestOutcome::Safe);
        let sum_alloc: u64 = banker.alloc_of(0).iter().sum::<u64>() + banker.alloc_of(1).iter().sum::<u64>();
        let sum_avail: u64 = banker.available().iter().sum();
        assert_eq!(sum_alloc + sum_avail, total);

        assert_eq!(banker.free(0, &[2, 1]), RequestOutcome::Safe);
        let sum_alloc: u64 = banker.alloc_of(0).iter().sum::<u64>() + banker.alloc_of(1).iter().sum::<u64>();
        let sum_avail: u64 = banker.available().iter().sum();
        assert_eq!(sum_alloc + sum_avail, total);
    }

    #[test]
    fn free_then_request_same_args_is_safe_again() {
        let banker = Banker::new(2, vec![2, 2]);
        banker.set_max(0, vec![2, 2]);
        banker.set_max(1, vec![2, 2]);
        assert_eq!(banker.request(0, &[1, 1]), RequestOutcome::Safe);
        assert_eq!(banker.free(0, &[1, 1]), RequestOutcome::Safe);
        assert_eq!(banker.request(0, &[1, 1]), RequestOutcome::Safe);
    }
}
