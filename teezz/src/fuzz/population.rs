//! Corpus of coverage-advancing candidates kept in memory and mutated
//! from (spec.md §4.6). Grounded on `original_source/fuzz/runner/
//! fuzzrunner.py`'s `self._population` list and `random.choice` over it.

use rand::Rng;

use crate::sequence::SeedSequence;

#[derive(Default)]
pub struct Population {
    members: Vec<SeedSequence>,
    rng: rand::rngs::ThreadRng,
}

impl Population {
    pub fn new() -> Self {
        Population {
            members: Vec::new(),
            rng: rand::thread_rng(),
        }
    }

    pub fn push(&mut self, member: SeedSequence) {
        self.members.push(member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Clones a uniformly random member, the base every mutated candidate
    /// starts from. `None` on an empty population (still seeding, or no
    /// seed has yet produced new coverage).
    pub fn random_member(&mut self) -> Option<SeedSequence> {
        if self.members.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.members.len());
        Some(self.members[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::triangle::TriangleCall;
    use crate::seed::Seed;

    fn one_seed_sequence(id: u64) -> SeedSequence {
        let seeds = vec![Seed::new(id, Box::new(TriangleCall::new(0)), Box::new(TriangleCall::new(0)))];
        SeedSequence::new(seeds, None).unwrap()
    }

    #[test]
    fn empty_population_yields_no_member() {
        let mut pop = Population::new();
        assert!(pop.random_member().is_none());
    }

    #[test]
    fn random_member_clones_rather_than_removes() {
        let mut pop = Population::new();
        pop.push(one_seed_sequence(7));
        let picked = pop.random_member().unwrap();
        assert_eq!(picked.seed(0).id, 7);
        assert_eq!(pop.len(), 1);
    }
}
