//! Recursive hypercube folding.
//!
//! The crystal router pairs ranks by reflection inside the current sub-range
//! and halves the range every round. [`FoldPlan`] yields one [`FoldStep`]
//! per round for a given rank, with no communication involved, so the
//! pairing rules are testable in isolation.

/// One round of hypercube folding as seen by a single rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FoldStep {
    /// First rank of the upper half; ranks below it are "lo".
    pub r_half: usize,
    /// Whether this rank sits in the lower half this round.
    pub is_lo: bool,
    /// Reflected partner (redirected to `r_half` for the odd middle rank).
    pub partner: usize,
    /// Secondary peer (`r_half - 1`) when two messages arrive this round.
    pub second: usize,
    /// Message count: 0 (middle rank, send only), 1, or 2 (odd parity).
    pub nmsg: u8,
}

/// Iterator over the folding rounds of `rank` within `size` ranks.
///
/// When the sub-range has odd length the middle rank reflects onto itself;
/// it is redirected to `r_half` and sends without receiving, while `r_half`
/// receives from both its reflection and the middle rank.
#[derive(Copy, Clone, Debug)]
pub struct FoldPlan {
    rank: usize,
    np: usize,
    np_offset: usize,
}

impl FoldPlan {
    pub fn new(rank: usize, size: usize) -> Self {
        debug_assert!(rank < size.max(1));
        Self {
            rank,
            np: size,
            np_offset: 0,
        }
    }
}

impl Iterator for FoldPlan {
    type Item = FoldStep;

    fn next(&mut self) -> Option<FoldStep> {
        if self.np <= 1 {
            return None;
        }
        let np_half = (self.np + 1) / 2;
        let r_half = self.np_offset + np_half;
        let is_lo = self.rank < r_half;

        let mut partner = self.np - 1 - (self.rank - self.np_offset) + self.np_offset;
        let mut nmsg = 1u8;
        if partner == self.rank {
            partner = r_half;
            nmsg = 0;
        }
        if self.np % 2 == 1 && self.rank == r_half {
            nmsg = 2;
        }

        let step = FoldStep {
            r_half,
            is_lo,
            partner,
            second: r_half - 1,
            nmsg,
        };

        if is_lo {
            self.np = np_half;
        } else {
            self.np -= np_half;
            self.np_offset = r_half;
        }
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rounds(rank: usize, size: usize) -> Vec<FoldStep> {
        FoldPlan::new(rank, size).collect()
    }

    #[test]
    fn single_rank_has_no_rounds() {
        assert!(rounds(0, 1).is_empty());
    }

    #[test]
    fn power_of_two_reflection() {
        let r0 = rounds(0, 4);
        assert_eq!(r0.len(), 2);
        assert_eq!(r0[0].partner, 3);
        assert_eq!(r0[0].nmsg, 1);
        assert_eq!(r0[1].partner, 1);
        let r2 = rounds(2, 4);
        assert_eq!(r2[0].partner, 1);
        assert_eq!(r2[1].partner, 3);
    }

    #[test]
    fn odd_parity_middle_rank() {
        // Three ranks: 1 reflects onto itself, redirected to 2 with no recv;
        // rank 2 receives from both 0 and 1.
        let r1 = rounds(1, 3);
        assert_eq!(r1[0].partner, 2);
        assert_eq!(r1[0].nmsg, 0);
        assert!(r1[0].is_lo);
        let r2 = rounds(2, 3);
        assert_eq!(r2.len(), 1);
        assert_eq!(r2[0].partner, 0);
        assert_eq!(r2[0].second, 1);
        assert_eq!(r2[0].nmsg, 2);
    }

    #[test]
    fn partners_are_mutual() {
        // In every round, whoever a rank sends to names it as a source
        // (either as reflected partner or as the secondary peer).
        for size in 2..20usize {
            let all: Vec<Vec<FoldStep>> = (0..size).map(|r| rounds(r, size)).collect();
            for r in 0..size {
                for (lvl, step) in all[r].iter().enumerate() {
                    let p = step.partner;
                    let back = &all[p][lvl];
                    assert!(
                        back.partner == r || (back.nmsg == 2 && back.second == r),
                        "size {size} rank {r} level {lvl}: {p} does not expect {r}"
                    );
                }
            }
        }
    }

    #[test]
    fn round_counts_are_logarithmic() {
        for size in 1..=64usize {
            let bound = (size.max(1) as f64).log2().ceil() as usize;
            for r in 0..size {
                let n = rounds(r, size).len();
                assert!(
                    n <= bound + 1,
                    "size {size} rank {r}: {n} rounds > {bound}+1"
                );
                if size.is_power_of_two() {
                    assert_eq!(n, bound, "size {size} rank {r}");
                }
            }
        }
    }
}
