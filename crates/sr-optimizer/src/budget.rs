//! Sharing a fixed optimizer-iteration budget across candidates.

use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Iteration allotments for one batch of candidates.
///
/// The allotments always sum to the configured total: iterations are moved
/// between candidates, never created or lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLedger {
    total: usize,
    allotted: Vec<usize>,
}

/// Adds one iteration to `remainder` distinct, uniformly chosen entries.
fn spread_remainder<R: Rng>(slots: &mut [usize], remainder: usize, rng: &mut R) {
    for index in sample(rng, slots.len(), remainder).into_iter() {
        slots[index] += 1;
    }
}

fn initial_shares<R: Rng>(total: usize, counts: &[usize], rng: &mut R) -> Vec<usize> {
    if counts.is_empty() {
        return Vec::new();
    }
    let weights: Vec<u128> = if counts.iter().all(|&c| c == 0) {
        vec![1; counts.len()]
    } else {
        counts.iter().map(|&c| c as u128).collect()
    };
    let weight_sum: u128 = weights.iter().sum();

    let mut shares: Vec<usize> = weights
        .iter()
        .map(|w| (total as u128 * w / weight_sum) as usize)
        .collect();
    let remainder = total - shares.iter().sum::<usize>();
    spread_remainder(&mut shares, remainder, rng);
    shares
}

impl BudgetLedger {
    /// Splits `total` proportionally to each candidate's constant count.
    /// If no candidate has constants the split is even.
    pub fn proportional<R: Rng>(total: usize, counts: &[usize], rng: &mut R) -> Self {
        Self {
            total,
            allotted: initial_shares(total, counts, rng),
        }
    }

    pub fn allotment(&self, index: usize) -> usize {
        self.allotted.get(index).copied().unwrap_or(0)
    }

    pub fn allotted(&self) -> &[usize] {
        &self.allotted
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn total_allotted(&self) -> usize {
        self.allotted.iter().sum()
    }

    /// Records that candidate `index` finished after `used` iterations.
    ///
    /// The unused part of its allotment moves to the candidates after it,
    /// evenly, with the integer remainder going to a random subset of them.
    /// The last candidate keeps whatever it did not use.
    pub fn settle<R: Rng>(&mut self, index: usize, used: usize, rng: &mut R) {
        let Some(&allotment) = self.allotted.get(index) else {
            return;
        };
        let later = self.allotted.len() - index - 1;
        if later == 0 {
            return;
        }
        let used = used.min(allotment);
        let unused = allotment - used;
        self.allotted[index] = used;

        let share = unused / later;
        let tail = &mut self.allotted[index + 1..];
        tail.iter_mut().for_each(|a| *a += share);
        spread_remainder(tail, unused % later, rng);
    }
}

/// Fixed proportional split for concurrent refinement, where candidates
/// cannot hand unused iterations to each other.
pub fn partition<R: Rng>(total: usize, counts: &[usize], rng: &mut R) -> Vec<usize> {
    initial_shares(total, counts, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn proportional_to_constant_counts() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let ledger = BudgetLedger::proportional(100, &[1, 3, 0, 6], &mut rng);
        assert_eq!(ledger.allotted(), &[10, 30, 0, 60]);
        assert_eq!(ledger.total(), 100);
        assert_eq!(ledger.total_allotted(), ledger.total());
    }

    #[test]
    fn remainder_goes_to_distinct_candidates() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let ledger = BudgetLedger::proportional(10, &[1, 1, 1], &mut rng);
        let mut shares = ledger.allotted().to_vec();
        shares.sort_unstable();
        assert_eq!(shares, vec![3, 3, 4]);
    }

    #[test]
    fn all_zero_counts_split_evenly() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let ledger = BudgetLedger::proportional(9, &[0, 0, 0], &mut rng);
        assert_eq!(ledger.allotted(), &[3, 3, 3]);
    }

    #[test]
    fn early_finisher_hands_back_iterations() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut ledger = BudgetLedger::proportional(90, &[1, 1, 1], &mut rng);
        assert_eq!(ledger.allotted(), &[30, 30, 30]);

        ledger.settle(0, 10, &mut rng);
        assert_eq!(ledger.allotted(), &[10, 40, 40]);

        ledger.settle(1, 39, &mut rng);
        assert_eq!(ledger.allotted(), &[10, 39, 41]);

        // the last candidate has nobody to hand iterations to
        ledger.settle(2, 5, &mut rng);
        assert_eq!(ledger.allotted(), &[10, 39, 41]);
        assert_eq!(ledger.total_allotted(), 90);
    }

    #[test]
    fn overuse_is_clamped() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut ledger = BudgetLedger::proportional(20, &[1, 1], &mut rng);
        ledger.settle(0, 50, &mut rng);
        assert_eq!(ledger.allotted(), &[10, 10]);
    }

    #[test]
    fn total_is_conserved_for_any_batch() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        for trial in 0..500 {
            let n = rng.gen_range(1..12);
            let total = rng.gen_range(0..5_000);
            let counts: Vec<usize> = (0..n).map(|_| rng.gen_range(0..8)).collect();

            let mut ledger = BudgetLedger::proportional(total, &counts, &mut rng);
            assert_eq!(ledger.total(), total);
            assert_eq!(ledger.total_allotted(), total, "trial {trial}");
            assert_eq!(partition(total, &counts, &mut rng).iter().sum::<usize>(), total);

            for i in 0..n {
                let used = rng.gen_range(0..=ledger.allotment(i) + 3);
                ledger.settle(i, used, &mut rng);
                assert_eq!(ledger.total_allotted(), total, "trial {trial} step {i}");
            }
        }
    }

    #[test]
    fn partition_is_reproducible() {
        let a = partition(1_000, &[2, 5, 1, 0], &mut ChaCha8Rng::seed_from_u64(9));
        let b = partition(1_000, &[2, 5, 1, 0], &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
        assert_eq!(a.iter().sum::<usize>(), 1_000);
    }
}
