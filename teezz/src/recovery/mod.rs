//! Format-recovery pipeline (spec.md §4.2). `recover_batch`/
//! `recover_batch_with_rules` are the pipeline entry points: they
//! normalize a batch of recorded interaction groups (dual-record merge,
//! then re-rooting), compact each group's ordinals (dropping
//! Triangle-only negative-return interactions first), then run the five
//! recovery stages over every surviving ordinal and persist the mined
//! `IoctlCallSequence` as `dependencies.json` in each group directory.
//! The `recover` CLI subcommand is the only caller outside this module's
//! own tests.

pub mod common_seq;
pub mod compact;
pub mod dualrecord;
pub mod match_stage;
pub mod sizeoff;
pub mod typify;
pub mod valuedeps;

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::call::{load_raw_fn, variant_name_is_known, Call};
use crate::dependency::{IoctlCall, IoctlCallSequence, ValueDependency};
use crate::error::{Result, TeezzError};

pub use compact::compact_seq_ids;
use valuedeps::{
    default_excluded_types, find_candidates, CandidateDep, InteractionMeta, ParamSnapshot,
    SyntheticCallRule, MATCHING_WINDOW,
};

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| TeezzError::io(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

fn numbered_subdirs(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut out: Vec<(u64, PathBuf)> = read_dir_sorted(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let n: u64 = p.file_name()?.to_str()?.parse().ok()?;
            Some((n, p))
        })
        .collect();
    out.sort_by_key(|&(n, _)| n);
    Ok(out)
}

/// Pairs every non-callback hal dir in `interaction_dir` with its
/// callback counterpart (named `<hal>_cb_<n>`) and merges them via
/// `dualrecord::merge_caller_and_callback`.
fn merge_interaction_callbacks(interaction_dir: &Path) -> Result<()> {
    let children = read_dir_sorted(interaction_dir)?;
    let callers: Vec<&PathBuf> = children
        .iter()
        .filter(|d| d.file_name().and_then(|n| n.to_str()).is_some_and(|n| !n.contains("_cb_")))
        .collect();
    for caller in callers {
        let caller_name = caller.file_name().unwrap().to_string_lossy().into_owned();
        if let Some(callback) = children.iter().find(|d| {
            d.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&format!("{caller_name}_cb_")))
        }) {
            dualrecord::merge_caller_and_callback(caller, callback)?;
        }
    }
    Ok(())
}

/// Renames `group_dir`'s ordinal subdirectories per `mapping`
/// (`old -> new`, from `compact_seq_ids`), routing through a `.tmp`
/// staging name so overlapping old/new ranges never collide mid-rename.
fn apply_ordinal_renames(group_dir: &Path, mapping: &[(u64, u64)]) -> Result<()> {
    for &(old, _) in mapping {
        let from = group_dir.join(old.to_string());
        let staging = group_dir.join(format!("{old}.tmp"));
        fs::rename(&from, &staging).map_err(|e| TeezzError::io(&from, e))?;
    }
    for &(old, new) in mapping {
        let staging = group_dir.join(format!("{old}.tmp"));
        let to = group_dir.join(new.to_string());
        fs::rename(&staging, &to).map_err(|e| TeezzError::io(&staging, e))?;
    }
    Ok(())
}

/// Every parameter buffer path under one ordinal's `onenter`/`onleave`
/// side, keyed by a stable identifier (`"param_0"`, ...). `header` is
/// excluded: Stages 1/3/4/5 operate on parameter content, not the
/// fixed-layout call header (that's `mutate_header`'s job).
fn param_files(ordinal_dir: &Path, side: &str) -> Result<Vec<(String, PathBuf)>> {
    let side_dir = ordinal_dir.join(side);
    if !side_dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in read_dir_sorted(&side_dir)? {
        if entry.is_file() {
            if let Some(name) = entry.file_name().and_then(|n| n.to_str()) {
                if name.starts_with("param_") {
                    out.push((name.to_string(), entry));
                }
            }
        }
    }
    Ok(out)
}

/// Leaves pulled from a folded-in higher-level reference recording: the
/// `onenter/hal_<name>` / `onleave/hal_<name>` directory
/// `dualrecord::rearrange_interaction` produces when a non-callback HAL
/// recording exists alongside the ioctl one. No HAL/HIDL struct decoder
/// exists in this pipeline, so each reference file's own name stands in
/// for the type label `match_stage::Leaf` expects.
fn collect_reference_leaves(ordinal_dir: &Path, side: &str) -> Result<Vec<match_stage::Leaf>> {
    let side_dir = ordinal_dir.join(side);
    let mut leaves = Vec::new();
    if !side_dir.exists() {
        return Ok(leaves);
    }
    for entry in read_dir_sorted(&side_dir)? {
        if entry.is_dir() && entry.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("hal_")) {
            for leaf_path in read_dir_sorted(&entry)? {
                if leaf_path.is_file() {
                    let name = leaf_path.file_name().unwrap().to_string_lossy().into_owned();
                    let data = fs::read(&leaf_path).map_err(|e| TeezzError::io(&leaf_path, e))?;
                    leaves.push((name, data));
                }
            }
        }
    }
    Ok(leaves)
}

/// Runs Stages 1-3 over one parameter file, folding in reference leaves
/// when present, and persists the resulting template.
fn recover_param_template(param_path: &Path, reference_leaves: &[match_stage::Leaf]) -> Result<()> {
    typify::typify(&[param_path.to_path_buf()])?;
    let data = fs::read(param_path).map_err(|e| TeezzError::io(param_path, e))?;
    let mut tmpl = typify::load_template(param_path)?;

    if !reference_leaves.is_empty() {
        let matches = match_stage::match_leaves(&data, reference_leaves);
        match_stage::apply_matches(&mut tmpl, matches);
    }

    for elem in sizeoff::infer(&tmpl, &data) {
        let _ = tmpl.add_elem(elem);
    }

    typify::store_template(param_path, &tmpl)
}

/// Normalizes one batch of recordings (spec.md §4.2 "Dual-record
/// rearrangement"): merges caller/callback HAL directories wherever a
/// `_cb_` split exists anywhere in the batch, then re-roots every
/// interaction's ioctl (plus any folded HAL) recording directly under
/// its interaction directory.
fn normalize_batch(batch_dir: &Path) -> Result<()> {
    let merge_needed = dualrecord::has_callbacks(batch_dir)?;
    for (_, seq_dir) in numbered_subdirs(batch_dir)? {
        for (_, interaction_dir) in numbered_subdirs(&seq_dir)? {
            if merge_needed {
                merge_interaction_callbacks(&interaction_dir)?;
            }
            dualrecord::rearrange_interaction(&interaction_dir)?;
        }
    }
    Ok(())
}

/// Drops Triangle-only negative-return interactions, then closes the
/// resulting ordinal gaps (spec.md §4.2, closing paragraphs). Returns
/// the surviving, now-contiguous ordinals. The return code is read back
/// as a signed 32-bit value: Triangle's wire `return_code` is an
/// unsigned word, but a driver reporting failure via a POSIX-style
/// negative errno needs the sign bit to read as negative here.
fn compact_group(group_dir: &Path, target_tee: &str) -> Result<Vec<u64>> {
    let surviving = numbered_subdirs(group_dir)?;

    let kept_ordinals: Vec<u64> = if target_tee == "triangle" {
        let load_raw = load_raw_fn(target_tee)?;
        let mut returns = Vec::with_capacity(surviving.len());
        for (ordinal, dir) in &surviving {
            let onleave = dir.join("onleave");
            let signed_return = match load_raw(&onleave) {
                Ok(call) => call.coverage().2 as u32 as i32 as i64,
                Err(e) => {
                    warn!("{:?}: failed to decode onleave for return-code prepass: {e}", onleave);
                    0
                }
            };
            returns.push((*ordinal, signed_return));
        }
        compact::triangle_drop_negative_returns(&returns)
    } else {
        surviving.iter().map(|&(n, _)| n).collect()
    };

    for (ordinal, dir) in &surviving {
        if !kept_ordinals.contains(ordinal) {
            fs::remove_dir_all(dir).map_err(|e| TeezzError::io(dir, e))?;
        }
    }

    let mapping = compact::compact_seq_ids(&kept_ordinals);
    apply_ordinal_renames(group_dir, &mapping)?;
    Ok(mapping.iter().map(|&(_, new)| new).collect())
}

struct ParamBuf {
    ordinal: u64,
    identifier: String,
    path: PathBuf,
    data: Vec<u8>,
}

fn load_param_bufs(group_dir: &Path, ordinals: &[u64], side: &str) -> Result<Vec<ParamBuf>> {
    let mut out = Vec::new();
    for &ordinal in ordinals {
        let ordinal_dir = group_dir.join(ordinal.to_string());
        for (identifier, path) in param_files(&ordinal_dir, side)? {
            let data = fs::read(&path).map_err(|e| TeezzError::io(&path, e))?;
            out.push(ParamBuf { ordinal, identifier, path, data });
        }
    }
    Ok(out)
}

/// Stage 4 (spec.md §4.2): mines every `(onleave, onenter)` param pair
/// within `MATCHING_WINDOW` ordinals of each other for shared byte
/// blocks on the bounded worker pool, folding any hits into both sides'
/// templates. Bounding the pairing to the same window Stage 5 uses keeps
/// the pair count tractable for groups with many parameters per call.
async fn mine_common_sequences(outputs: &[ParamBuf], inputs: &[ParamBuf], max_workers: usize) -> Result<()> {
    let mut pairs = Vec::new();
    let mut pair_idx = Vec::new();
    for (oi, out) in outputs.iter().enumerate() {
        for (ii, inp) in inputs.iter().enumerate() {
            if inp.ordinal > out.ordinal && inp.ordinal - out.ordinal <= MATCHING_WINDOW as u64 {
                pairs.push((out.data.clone(), inp.data.clone()));
                pair_idx.push((oi, ii));
            }
        }
    }
    if pairs.is_empty() {
        return Ok(());
    }

    let results = common_seq::mine_all_pairs(pairs, max_workers).await;
    for ((oi, ii), elems) in pair_idx.into_iter().zip(results) {
        if elems.is_empty() {
            continue;
        }
        let mut resp_tmpl = typify::load_template(&outputs[oi].path)?;
        let mut req_tmpl = typify::load_template(&inputs[ii].path)?;
        for (resp_elem, req_elem) in elems {
            let _ = resp_tmpl.add_elem(resp_elem);
            let _ = req_tmpl.add_elem(req_elem);
        }
        typify::store_template(&outputs[oi].path, &resp_tmpl)?;
        typify::store_template(&inputs[ii].path, &req_tmpl)?;
    }
    Ok(())
}

/// Stage 5 (spec.md §4.2): applies any synthetic-call rules first (so
/// their synthesized calls exist before generic candidates attach, per
/// `valuedeps::apply_synthetic_rules`'s ordering requirement), then
/// attaches every mined candidate in destination order.
fn mine_value_dependencies(
    ordinals: &[u64],
    outputs: &[ParamBuf],
    inputs: &[ParamBuf],
    rules: &[SyntheticCallRule],
) -> Result<IoctlCallSequence> {
    let excluded = default_excluded_types();

    let mut output_templates = Vec::with_capacity(outputs.len());
    for buf in outputs {
        output_templates.push(typify::load_template(&buf.path)?);
    }
    let mut input_templates = Vec::with_capacity(inputs.len());
    for buf in inputs {
        input_templates.push(typify::load_template(&buf.path)?);
    }

    let output_snaps: Vec<ParamSnapshot> = outputs
        .iter()
        .zip(&output_templates)
        .map(|(b, t)| ParamSnapshot {
            ordinal: b.ordinal,
            identifier: b.identifier.clone(),
            data: &b.data,
            template: t,
        })
        .collect();
    let input_snaps: Vec<ParamSnapshot> = inputs
        .iter()
        .zip(&input_templates)
        .map(|(b, t)| ParamSnapshot {
            ordinal: b.ordinal,
            identifier: b.identifier.clone(),
            data: &b.data,
            template: t,
        })
        .collect();

    let mut candidates: Vec<CandidateDep> = find_candidates(&output_snaps, &input_snaps, &excluded, MATCHING_WINDOW);

    let mut seq = IoctlCallSequence::new();
    for &ord in ordinals {
        seq.append(IoctlCall::recorded(ord, PathBuf::from(ord.to_string())))?;
    }

    if !rules.is_empty() {
        let metas: Vec<InteractionMeta> = ordinals
            .iter()
            .map(|&ordinal| InteractionMeta { ordinal, function_name: None })
            .collect();
        valuedeps::apply_synthetic_rules(&mut seq, &metas, rules)?;
    }

    candidates.sort_by_key(|c| (c.dst_ordinal, c.dst_off));
    for c in candidates {
        let dep = ValueDependency {
            src_dump_id: c.src_ordinal,
            src_param_identifier: c.src_param,
            src_off: c.src_off,
            src_sz: c.src_sz,
            dst_param_identifier: c.dst_param,
            dst_off: c.dst_off,
            dst_sz: c.dst_sz,
        };
        seq.attach_dependency(c.dst_ordinal, c.src_ordinal, dep)?;
    }

    Ok(seq)
}

/// Runs Stages 1-5 over one already-normalized, already-compacted seed
/// group, returning the path of the `dependencies.json` it wrote.
async fn recover_group(
    group_dir: &Path,
    ordinals: &[u64],
    max_workers: usize,
    rules: &[SyntheticCallRule],
) -> Result<PathBuf> {
    for &ordinal in ordinals {
        let ordinal_dir = group_dir.join(ordinal.to_string());
        for side in ["onenter", "onleave"] {
            let leaves = collect_reference_leaves(&ordinal_dir, side)?;
            for (_, path) in param_files(&ordinal_dir, side)? {
                recover_param_template(&path, &leaves)?;
            }
        }
    }

    let outputs = load_param_bufs(group_dir, ordinals, "onleave")?;
    let inputs = load_param_bufs(group_dir, ordinals, "onenter")?;
    mine_common_sequences(&outputs, &inputs, max_workers).await?;

    // Re-read: Stage 4 may have just added elements to these templates.
    let outputs = load_param_bufs(group_dir, ordinals, "onleave")?;
    let inputs = load_param_bufs(group_dir, ordinals, "onenter")?;
    let seq = mine_value_dependencies(ordinals, &outputs, &inputs, rules)?;

    let deps_path = group_dir.join("dependencies.json");
    let serialized = serde_json::to_string_pretty(&seq)?;
    fs::write(&deps_path, serialized).map_err(|e| TeezzError::io(&deps_path, e))?;
    Ok(deps_path)
}

/// Pipeline entry point (spec.md §4.2): normalizes `batch_dir` (every
/// numbered subdirectory is one recorded seed group), then recovers
/// every group's templates and value dependencies in place, writing
/// each group's mined `IoctlCallSequence` as `dependencies.json`.
pub async fn recover_batch(batch_dir: &Path, target_tee: &str, max_workers: usize) -> Result<Vec<PathBuf>> {
    recover_batch_with_rules(batch_dir, target_tee, max_workers, &[]).await
}

/// As `recover_batch`, additionally applying `rules` during Stage 5.
pub async fn recover_batch_with_rules(
    batch_dir: &Path,
    target_tee: &str,
    max_workers: usize,
    rules: &[SyntheticCallRule],
) -> Result<Vec<PathBuf>> {
    if !variant_name_is_known(target_tee) {
        return Err(TeezzError::Config(format!("unknown TEE target {target_tee:?}")));
    }

    normalize_batch(batch_dir)?;

    let mut written = Vec::new();
    for (_, group_dir) in numbered_subdirs(batch_dir)? {
        let new_ordinals = compact_group(&group_dir, target_tee)?;
        if new_ordinals.is_empty() {
            warn!("{:?}: no surviving interactions after compaction, skipping", group_dir);
            continue;
        }
        let deps_path = recover_group(&group_dir, &new_ordinals, max_workers, rules).await?;
        info!("{:?}: recovered {} interactions -> {:?}", group_dir, new_ordinals.len(), deps_path);
        written.push(deps_path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::triangle::TriangleCall;
    use crate::call::{Param, ParamType};

    fn write_call(dir: &Path, cmd_id: u32, return_code: u32, params: Vec<Param>) {
        let mut call = TriangleCall::new(cmd_id);
        for (i, p) in params.into_iter().enumerate() {
            call.params_mut()[i] = p;
        }
        call.return_code = return_code;
        call.serialize_to_path(dir).unwrap();
    }

    /// Pre-normalization layout: `group_dir/<ordinal>/ioctl_0/{onenter,onleave}`.
    fn ioctl_dir(group_dir: &Path, ordinal: u64) -> PathBuf {
        group_dir.join(ordinal.to_string()).join("ioctl_0")
    }

    #[tokio::test]
    async fn recovers_a_two_interaction_group_end_to_end() {
        let base = tempfile::tempdir().unwrap();
        let batch_dir = base.path().join("batch");
        let group_dir = batch_dir.join("0");

        let mut shared = vec![0u8; 4];
        shared.extend_from_slice(b"DEADBEEF");

        write_call(
            &ioctl_dir(&group_dir, 0).join("onenter"),
            1,
            0,
            vec![Param::memref(ParamType::MemrefTempIn, vec![0; 8])],
        );
        write_call(
            &ioctl_dir(&group_dir, 0).join("onleave"),
            1,
            0,
            vec![Param::memref(ParamType::MemrefTempOut, shared.clone())],
        );
        write_call(
            &ioctl_dir(&group_dir, 1).join("onenter"),
            2,
            0,
            vec![Param::memref(ParamType::MemrefTempIn, b"DEADBEEF".to_vec())],
        );
        write_call(
            &ioctl_dir(&group_dir, 1).join("onleave"),
            2,
            0,
            vec![Param::memref(ParamType::MemrefTempOut, vec![0; 4])],
        );

        let written = recover_batch(&batch_dir, "triangle", 2).await.unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("dependencies.json"));

        let raw = fs::read_to_string(&written[0]).unwrap();
        let seq: IoctlCallSequence = serde_json::from_str(&raw).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.all_dependencies().len(), 1);
        assert_eq!(seq.all_dependencies()[0].src_dump_id, 0);
    }

    #[tokio::test]
    async fn triangle_negative_return_interactions_are_dropped_before_compaction() {
        let base = tempfile::tempdir().unwrap();
        let batch_dir = base.path().join("batch");
        let group_dir = batch_dir.join("0");

        write_call(&ioctl_dir(&group_dir, 0).join("onenter"), 1, 0, vec![Param::none()]);
        write_call(&ioctl_dir(&group_dir, 0).join("onleave"), 1, 0xFFFF_FFFF, vec![Param::none()]);
        write_call(
            &ioctl_dir(&group_dir, 1).join("onenter"),
            2,
            0,
            vec![Param::memref(ParamType::MemrefTempIn, vec![1, 2, 3, 4])],
        );
        write_call(
            &ioctl_dir(&group_dir, 1).join("onleave"),
            2,
            0,
            vec![Param::memref(ParamType::MemrefTempOut, vec![1, 2, 3, 4])],
        );

        recover_batch(&batch_dir, "triangle", 1).await.unwrap();

        assert!(!group_dir.join("1").exists());
        assert!(group_dir.join("0").exists());
        let raw = fs::read_to_string(group_dir.join("dependencies.json")).unwrap();
        let seq: IoctlCallSequence = serde_json::from_str(&raw).unwrap();
        assert_eq!(seq.len(), 1);
    }

    #[tokio::test]
    async fn unknown_target_is_rejected_before_touching_the_filesystem() {
        let base = tempfile::tempdir().unwrap();
        let result = recover_batch(base.path(), "bogus", 1).await;
        assert!(result.is_err());
    }
}
