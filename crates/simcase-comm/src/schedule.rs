//! Per-rank communication schedules.
//!
//! A schedule assigns every rank one upstream rank (`above`) and zero
//! or more downstream ranks (`below`). The linear schedule has the
//! master send to everyone directly; the binomial tree bounds both the
//! per-rank fan-out and the number of rounds to O(log P).

use serde::{Deserialize, Serialize};

/// Rank count above which the tree schedule replaces the linear one.
pub const LINEAR_THRESHOLD: usize = 16;

/// Log-base-two of the next power of two: 8 -> 3, 9 -> 4.
fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1;
    }
    n
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleKind {
    Linear,
    Tree,
}

/// Materialized schedule for a fixed rank count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommSchedule {
    kind: ScheduleKind,
    above: Vec<Option<usize>>,
    below: Vec<Vec<usize>>,
}

impl CommSchedule {
    /// Master sends directly to every other rank.
    pub fn linear(n: usize) -> Self {
        assert!(n > 0, "empty communicator");
        let mut above = vec![Some(0); n];
        above[0] = None;
        let mut below = vec![Vec::new(); n];
        below[0] = (1..n).collect();
        Self { kind: ScheduleKind::Linear, above, below }
    }

    /// Binomial tree rooted at the master. Each rank's upstream is its
    /// rank with the lowest set bit cleared; downstream ranks are
    /// visited largest-stride first, matching the level order of a
    /// staged broadcast.
    pub fn tree(n: usize) -> Self {
        assert!(n > 0, "empty communicator");
        let levels = ceil_log2(n);
        let mut above = vec![None; n];
        let mut below = vec![Vec::new(); n];

        for rank in 1..n {
            above[rank] = Some(rank - (1 << rank.trailing_zeros()));
        }
        for (rank, children) in below.iter_mut().enumerate() {
            let limit = if rank == 0 { levels } else { rank.trailing_zeros() as usize };
            for level in (0..limit).rev() {
                let child = rank + (1 << level);
                if child < n {
                    children.push(child);
                }
            }
        }
        Self { kind: ScheduleKind::Tree, above, below }
    }

    /// Linear below `threshold` ranks, tree at or above it. The
    /// threshold usually comes from configuration.
    pub fn for_size_with_threshold(n: usize, threshold: usize) -> Self {
        if n < threshold {
            Self::linear(n)
        } else {
            Self::tree(n)
        }
    }

    /// [`CommSchedule::for_size_with_threshold`] at the default
    /// [`LINEAR_THRESHOLD`].
    pub fn for_size(n: usize) -> Self {
        Self::for_size_with_threshold(n, LINEAR_THRESHOLD)
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.above.len()
    }

    /// The rank this rank receives from; `None` for the master.
    pub fn above(&self, rank: usize) -> Option<usize> {
        self.above[rank]
    }

    /// The ranks this rank forwards to, in send order.
    pub fn below(&self, rank: usize) -> &[usize] {
        &self.below[rank]
    }
}
