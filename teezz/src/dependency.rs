//! `ValueDependency`, `IoctlCall`, `IoctlCallSequence` — the inter-call
//! value-dependency graph (spec.md §3). Grounded on
//! `original_source/fuzz/apidependency.py`: `ValueDependencies` there is a
//! `UserList` whose `append` does the overlap-dedup-by-destination-range
//! dance; `IoctlCallSequence` tracks `dump_ids` and rejects duplicate
//! appends.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TeezzError};
use crate::template::ranges_overlap;

/// Directed edge between two calls in a sequence, identified by the
/// numeric `dump_id` of each endpoint (spec.md §3). `src_param_identifier`
/// / `dst_param_identifier` address a specific parameter of a call that
/// may carry more than one MEMREF parameter (SPEC_FULL.md §3 supplement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDependency {
    pub src_dump_id: u64,
    pub src_param_identifier: String,
    pub src_off: usize,
    pub src_sz: usize,
    pub dst_param_identifier: String,
    pub dst_off: usize,
    pub dst_sz: usize,
}

impl ValueDependency {
    /// V1: `src_sz == dst_sz`. V2 (`src_call.dump_id < dst_call.dump_id`)
    /// is checked by the owning `IoctlCallSequence`, which knows both
    /// endpoints' dump ids.
    pub fn check_size_invariant(&self) -> Result<()> {
        if self.src_sz != self.dst_sz {
            return Err(TeezzError::ValueDependencyInconsistency(format!(
                "src_sz ({}) != dst_sz ({})",
                self.src_sz, self.dst_sz
            )));
        }
        Ok(())
    }

    fn dst_range(&self) -> (usize, usize) {
        (self.dst_off, self.dst_off + self.dst_sz)
    }
}

/// Destination-range-deduplicated list of dependencies targeting one
/// `IoctlCall`. Inserting a dep that overlaps an existing one on the
/// destination range replaces it iff the new one is strictly larger;
/// ties keep the first-inserted dep (see SPEC_FULL.md §9 Open Question).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueDependencies(Vec<ValueDependency>);

impl ValueDependencies {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueDependency> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[ValueDependency] {
        &self.0
    }

    pub fn append(&mut self, new_dep: ValueDependency) {
        let (n_start, n_end) = new_dep.dst_range();
        if let Some(pos) = self
            .0
            .iter()
            .position(|existing| {
                let (e_start, e_end) = existing.dst_range();
                ranges_overlap(n_start, n_end, e_start, e_end)
            })
        {
            if new_dep.dst_sz > self.0[pos].dst_sz {
                self.0[pos] = new_dep;
            }
            // else: strictly smaller or tied — discard, keep first-inserted.
        } else {
            self.0.push(new_dep);
        }
    }

    /// Removes the first dependency equal to `dep`, if any.
    pub fn remove(&mut self, dep: &ValueDependency) -> bool {
        if let Some(pos) = self.0.iter().position(|d| d == dep) {
            self.0.remove(pos);
            true
        } else {
            false
        }
    }

    /// Removes one dependency chosen at random; used by
    /// `SeedSequenceMutator`.
    pub fn remove_at(&mut self, idx: usize) -> Option<ValueDependency> {
        if idx < self.0.len() {
            Some(self.0.remove(idx))
        } else {
            None
        }
    }
}

/// Per-call bookkeeping within a sequence: its ordinal `dump_id`, whether
/// it was recorded on-device (`is_dump_backed == false` for synthesised
/// intermediate calls, spec.md §4.2 Stage 5), the on-disk path backing it
/// (`None` for synthesised calls), and its incoming value dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoctlCall {
    pub dump_id: u64,
    pub is_dump_backed: bool,
    pub relative_path: Option<PathBuf>,
    pub value_dependencies: ValueDependencies,
}

impl IoctlCall {
    pub fn recorded(dump_id: u64, relative_path: PathBuf) -> Self {
        IoctlCall {
            dump_id,
            is_dump_backed: true,
            relative_path: Some(relative_path),
            value_dependencies: ValueDependencies::new(),
        }
    }

    pub fn synthesized(dump_id: u64) -> Self {
        IoctlCall {
            dump_id,
            is_dump_backed: false,
            relative_path: None,
            value_dependencies: ValueDependencies::new(),
        }
    }
}

/// Ordered list of `IoctlCall`s with unique `dump_id`s preserved in
/// insertion order (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoctlCallSequence {
    calls: Vec<IoctlCall>,
}

impl IoctlCallSequence {
    pub fn new() -> Self {
        Self { calls: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IoctlCall> {
        self.calls.iter()
    }

    pub fn append(&mut self, call: IoctlCall) -> Result<()> {
        if self.calls.iter().any(|c| c.dump_id == call.dump_id) {
            return Err(TeezzError::ValueDependencyInconsistency(format!(
                "duplicate dump_id {}",
                call.dump_id
            )));
        }
        self.calls.push(call);
        Ok(())
    }

    pub fn get_elem_by_dump_id(&self, dump_id: u64) -> Option<&IoctlCall> {
        self.calls.iter().find(|c| c.dump_id == dump_id)
    }

    pub fn get_elem_by_dump_id_mut(&mut self, dump_id: u64) -> Option<&mut IoctlCall> {
        self.calls.iter_mut().find(|c| c.dump_id == dump_id)
    }

    /// Inserts `call` immediately after the call with dump_id `after`,
    /// used when Stage 5 synthesises an intermediate call between an
    /// observed source and destination.
    pub fn insert_after(&mut self, after: u64, call: IoctlCall) -> Result<()> {
        let pos = self
            .calls
            .iter()
            .position(|c| c.dump_id == after)
            .ok_or_else(|| TeezzError::ValueDependencyInconsistency(format!(
                "no call with dump_id {after} to insert after"
            )))?;
        self.calls.insert(pos + 1, call);
        Ok(())
    }

    /// Attaches `dep` to the destination call named by `dst_dump_id`,
    /// checking V1 and V2 before handing it to the destination's
    /// destination-range dedup logic.
    pub fn attach_dependency(&mut self, dst_dump_id: u64, src_dump_id: u64, dep: ValueDependency) -> Result<()> {
        dep.check_size_invariant()?;
        if src_dump_id >= dst_dump_id {
            return Err(TeezzError::ValueDependencyInconsistency(format!(
                "V2 violated: src dump_id {src_dump_id} >= dst dump_id {dst_dump_id}"
            )));
        }
        let dst = self
            .get_elem_by_dump_id_mut(dst_dump_id)
            .ok_or_else(|| TeezzError::ValueDependencyInconsistency(format!(
                "no call with dump_id {dst_dump_id}"
            )))?;
        dst.value_dependencies.append(dep);
        Ok(())
    }

    /// Removes the first match of `dep` wherever it is attached.
    pub fn remove_value_dependency(&mut self, dep: &ValueDependency) -> bool {
        for call in &mut self.calls {
            if call.value_dependencies.remove(dep) {
                return true;
            }
        }
        false
    }

    /// All dependencies across every call, in call order.
    pub fn all_dependencies(&self) -> Vec<&ValueDependency> {
        self.calls
            .iter()
            .flat_map(|c| c.value_dependencies.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(dst_off: usize, dst_sz: usize) -> ValueDependency {
        ValueDependency {
            src_dump_id: 0,
            src_param_identifier: "resp".into(),
            src_off: 0,
            src_sz: dst_sz,
            dst_param_identifier: "req".into(),
            dst_off,
            dst_sz,
        }
    }

    #[test]
    fn scenario_d_dedup_by_destination_range() {
        let mut deps = ValueDependencies::new();

        // A: dst=[0,8)
        deps.append(dep(0, 8));
        // B: dst=[4,12), overlaps A, same size -> tie, keep first (A)
        deps.append(dep(4, 8));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps.as_slice()[0].dst_off, 0);

        // C: dst=[0,16), overlaps A, larger -> replaces A
        deps.append(dep(0, 16));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps.as_slice()[0].dst_sz, 16);
    }

    #[test]
    fn f3_emitted_deps_satisfy_size_and_ordering_invariants() {
        let mut seq = IoctlCallSequence::new();
        seq.append(IoctlCall::recorded(0, "0".into())).unwrap();
        seq.append(IoctlCall::recorded(1, "1".into())).unwrap();

        seq.attach_dependency(1, 0, dep(0, 8)).unwrap();
        assert_eq!(seq.all_dependencies().len(), 1);

        let bad = ValueDependency {
            src_dump_id: 1,
            src_off: 0,
            src_sz: 4,
            dst_off: 0,
            dst_sz: 8,
            src_param_identifier: "resp".into(),
            dst_param_identifier: "req".into(),
        };
        assert!(seq.attach_dependency(1, 1, bad.clone()).is_err());
        let mismatched_size = ValueDependency { src_sz: 4, ..bad };
        assert!(seq.attach_dependency(1, 0, mismatched_size).is_err());
    }

    #[test]
    fn duplicate_dump_id_append_is_rejected() {
        let mut seq = IoctlCallSequence::new();
        seq.append(IoctlCall::recorded(0, "0".into())).unwrap();
        assert!(seq.append(IoctlCall::recorded(0, "0".into())).is_err());
    }

    #[test]
    fn synthesized_call_can_be_inserted_between_source_and_destination() {
        let mut seq = IoctlCallSequence::new();
        seq.append(IoctlCall::recorded(0, "0".into())).unwrap();
        seq.append(IoctlCall::recorded(1, "1".into())).unwrap();
        seq.insert_after(0, IoctlCall::synthesized(100)).unwrap();
        let ids: Vec<u64> = seq.iter().map(|c| c.dump_id).collect();
        assert_eq!(ids, vec![0, 100, 1]);
    }
}
