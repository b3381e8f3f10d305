//! `SeedSequenceMutator` (spec.md §4.4.2): with low probability, delete
//! one value dependency — the hypothesis that a mined dep is spurious.

use rand::Rng;

use crate::sequence::SeedSequence;

pub struct SeedSequenceMutator {
    rng: rand::rngs::ThreadRng,
}

impl Default for SeedSequenceMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedSequenceMutator {
    pub fn new() -> Self {
        SeedSequenceMutator {
            rng: rand::thread_rng(),
        }
    }

    /// With probability ~10%, picks a random call carrying at least one
    /// dependency and deletes one of them. Returns whether a deletion
    /// happened.
    pub fn mutate(&mut self, seq: &mut SeedSequence) -> bool {
        if self.rng.gen_bool(0.9) {
            return false;
        }
        self.delete_one_dependency(seq)
    }

    /// Unconditional variant used by the fuzz loop's "run N times" policy
    /// (spec.md §4.6 step 1).
    pub fn force_delete_one(&mut self, seq: &mut SeedSequence) -> bool {
        self.delete_one_dependency(seq)
    }

    fn delete_one_dependency(&mut self, seq: &mut SeedSequence) -> bool {
        let Some(deps) = &mut seq.deps else { return false };
        let candidates: Vec<(u64, usize)> = deps
            .iter()
            .enumerate()
            .flat_map(|(_, call)| {
                if call.value_dependencies.is_empty() {
                    None
                } else {
                    Some((call.dump_id, call.value_dependencies.len()))
                }
            })
            .collect();
        if candidates.is_empty() {
            return false;
        }
        let (dump_id, count) = candidates[self.rng.gen_range(0..candidates.len())];
        let idx = self.rng.gen_range(0..count);
        if let Some(call) = deps.get_elem_by_dump_id_mut(dump_id) {
            call.value_dependencies.remove_at(idx).is_some()
        } else {
            false
        }
    }
}
