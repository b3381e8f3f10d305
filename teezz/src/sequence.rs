//! `SeedSequence`: an ordered list of `Seed`s plus an optional value
//! dependency graph, with invariant S1 (`len(seeds) == len(deps)` when
//! `deps` is present). Grounded on
//! `original_source/fuzz/seed/seedsequence.py`'s `__iter__`/`_satisfy`.

use std::path::{Path, PathBuf};

use log::warn;

use crate::call::Call;
use crate::dependency::IoctlCallSequence;
use crate::error::{Result, TeezzError};
use crate::seed::Seed;

/// Maps a `ValueDependency`'s parameter identifier string to a parameter
/// slot index. `"param_N"` addresses slot `N` directly (Triangle/Optee);
/// `"req"`/`"resp"`/`"sbuf"` are Qsee's fixed roles.
pub fn param_index_for_identifier(identifier: &str) -> Option<usize> {
    match identifier {
        "req" => Some(0),
        "resp" => Some(1),
        "sbuf" => Some(2),
        other => other.strip_prefix("param_").and_then(|n| n.parse().ok()),
    }
}

#[derive(Clone)]
pub struct SeedSequence {
    pub seeds: Vec<Seed>,
    pub deps: Option<IoctlCallSequence>,
    cursor: usize,
}

impl SeedSequence {
    pub fn new(seeds: Vec<Seed>, deps: Option<IoctlCallSequence>) -> Result<Self> {
        if let Some(d) = &deps {
            if d.len() != seeds.len() {
                return Err(TeezzError::ValueDependencyInconsistency(format!(
                    "S1 violated: {} seeds but {} dependency entries",
                    seeds.len(),
                    d.len()
                )));
            }
        }
        Ok(SeedSequence {
            seeds,
            deps,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Resolves pending value dependencies for `seeds[idx]` by copying
    /// bytes out of the already-produced outputs of earlier seeds, then
    /// returns `idx`. A source whose output was not a success is skipped
    /// silently (the call executes with whatever bytes are already
    /// there); a dangling source index is logged and skipped.
    fn resolve(&mut self, idx: usize) {
        let Some(deps) = &self.deps else { return };
        let dst_dump_id = self.seeds[idx].id;
        let Some(dst_call) = deps.get_elem_by_dump_id(dst_dump_id) else {
            return;
        };
        let pending: Vec<_> = dst_call.value_dependencies.iter().cloned().collect();

        for dep in pending {
            let src_idx = self.seeds.iter().position(|s| s.id == dep.src_dump_id);
            let Some(src_idx) = src_idx else {
                warn!(
                    "value dependency source dump_id {} not found among seen seeds; skipping",
                    dep.src_dump_id
                );
                continue;
            };
            if src_idx >= idx {
                warn!(
                    "value dependency source dump_id {} has not executed yet; skipping",
                    dep.src_dump_id
                );
                continue;
            }
            if !self.seeds[src_idx].output.is_success() {
                continue;
            }
            let Some(src_param) = param_index_for_identifier(&dep.src_param_identifier) else {
                continue;
            };
            let Some(dst_param) = param_index_for_identifier(&dep.dst_param_identifier) else {
                continue;
            };

            let (left, right) = self.seeds.split_at_mut(idx);
            let src_seed = &left[src_idx];
            let dst_seed = &mut right[0];
            if let Err(e) = src_seed.output.resolve_into(
                src_param,
                dep.src_off,
                dep.src_sz,
                dst_seed.input.as_mut(),
                dst_param,
                dep.dst_off,
            ) {
                warn!("dependency resolution failed: {e}");
            }
        }
    }

    /// Advances the iterator by one, resolving dependencies for the seed
    /// about to be returned, and yields its index.
    pub fn advance(&mut self) -> Option<usize> {
        if self.cursor >= self.seeds.len() {
            return None;
        }
        let idx = self.cursor;
        self.resolve(idx);
        self.cursor += 1;
        Some(idx)
    }

    pub fn seed(&self, idx: usize) -> &Seed {
        &self.seeds[idx]
    }

    pub fn seed_mut(&mut self, idx: usize) -> &mut Seed {
        &mut self.seeds[idx]
    }

    /// `load_sequence(dir)`: reads interactions `0..N-1`, sorted
    /// numerically, then optionally the dependency graph.
    pub fn load_sequence(
        dir: &Path,
        load_raw: impl Fn(&Path) -> Result<Box<dyn Call>>,
    ) -> Result<SeedSequence> {
        let mut ordinals: Vec<u64> = std::fs::read_dir(dir)
            .map_err(|e| TeezzError::io(dir, e))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
            .collect();
        ordinals.sort_unstable();

        let mut seeds = Vec::with_capacity(ordinals.len());
        for ordinal in ordinals {
            let seed_dir = dir.join(ordinal.to_string());
            seeds.push(Seed::load_seed(ordinal, &seed_dir, &load_raw)?);
        }

        let deps_path = dir.join("dependencies.json");
        let deps = if deps_path.exists() {
            let raw = std::fs::read_to_string(&deps_path).map_err(|e| TeezzError::io(&deps_path, e))?;
            Some(serde_json::from_str(&raw)?)
        } else {
            None
        };

        SeedSequence::new(seeds, deps)
    }

    pub fn store_sequence(
        &self,
        dir: &Path,
        store_raw: impl Fn(&dyn Call, &Path) -> Result<()>,
    ) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| TeezzError::io(dir, e))?;
        for (i, seed) in self.seeds.iter().enumerate() {
            let seed_dir: PathBuf = dir.join(i.to_string());
            seed.store_seed(&seed_dir, &store_raw)?;
        }
        if let Some(deps) = &self.deps {
            let deps_path = dir.join("dependencies.json");
            let serialized = serde_json::to_string_pretty(deps)?;
            std::fs::write(&deps_path, serialized).map_err(|e| TeezzError::io(&deps_path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::triangle::TriangleCall;
    use crate::dependency::{IoctlCall, ValueDependency};

    fn seed_with_status(id: u64, success: bool) -> Seed {
        let mut output = TriangleCall::new(0);
        if !success {
            output.return_code = 1;
        }
        let mut input = TriangleCall::new(0);
        input.params_mut()[0] = crate::call::Param::memref(crate::call::ParamType::MemrefTempIn, vec![0; 8]);
        Seed::new(id, Box::new(input), Box::new(output))
    }

    #[test]
    fn resolution_copies_bytes_from_a_successful_predecessor() {
        let mut seeds = vec![seed_with_status(0, true), seed_with_status(1, true)];
        seeds[0].output.params_mut()[0] =
            crate::call::Param::memref(crate::call::ParamType::MemrefTempOut, vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let mut deps = IoctlCallSequence::new();
        deps.append(IoctlCall::recorded(0, "0".into())).unwrap();
        deps.append(IoctlCall::recorded(1, "1".into())).unwrap();
        deps.attach_dependency(
            1,
            0,
            ValueDependency {
                src_dump_id: 0,
                src_param_identifier: "param_0".into(),
                src_off: 0,
                src_sz: 4,
                dst_param_identifier: "param_0".into(),
                dst_off: 0,
                dst_sz: 4,
            },
        )
        .unwrap();

        let mut seq = SeedSequence::new(seeds, Some(deps)).unwrap();
        seq.advance();
        seq.advance();
        assert_eq!(
            &seq.seed(1).input.params()[0].buffer[0..4],
            &[0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn dep_on_a_failed_predecessor_is_silently_skipped() {
        let mut seeds = vec![seed_with_status(0, false), seed_with_status(1, true)];
        seeds[0].output.params_mut()[0] =
            crate::call::Param::memref(crate::call::ParamType::MemrefTempOut, vec![0xFF; 4]);

        let mut deps = IoctlCallSequence::new();
        deps.append(IoctlCall::recorded(0, "0".into())).unwrap();
        deps.append(IoctlCall::recorded(1, "1".into())).unwrap();
        deps.attach_dependency(
            1,
            0,
            ValueDependency {
                src_dump_id: 0,
                src_param_identifier: "param_0".into(),
                src_off: 0,
                src_sz: 4,
                dst_param_identifier: "param_0".into(),
                dst_off: 0,
                dst_sz: 4,
            },
        )
        .unwrap();

        let original = seeds[1].input.params()[0].buffer.clone();
        let mut seq = SeedSequence::new(seeds, Some(deps)).unwrap();
        seq.advance();
        seq.advance();
        assert_eq!(seq.seed(1).input.params()[0].buffer, original);
    }

    #[test]
    fn s1_rejects_mismatched_seed_and_dependency_counts() {
        let seeds = vec![seed_with_status(0, true)];
        let mut deps = IoctlCallSequence::new();
        deps.append(IoctlCall::recorded(0, "0".into())).unwrap();
        deps.append(IoctlCall::recorded(1, "1".into())).unwrap();
        assert!(SeedSequence::new(seeds, Some(deps)).is_err());
    }
}
