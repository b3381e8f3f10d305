//! Value-dependency probing (spec.md §6.4 `probevaldep`). Grounded on
//! `original_source/fuzz/runner/valdeprunner.py`'s `ValDepRunner.run`:
//! for each seed sequence, record the status-code trace with every
//! dependency intact, then try removing each dependency in turn and keep
//! the removal only if the trace is unchanged — the dependency was
//! redundant, i.e. already implied by how the target actually behaves.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{Result, TeezzError};
use crate::runner::SequenceRunner;
use crate::sequence::SeedSequence;

pub struct ProbeReport {
    pub seed_dir: PathBuf,
    pub original_dep_count: usize,
    pub removed_dep_count: usize,
}

/// Probes every top-level sequence directory under `in_dir`, writing the
/// reduced sequences under `out_dir/seeds/<name>`.
pub async fn probe_value_dependencies<S>(
    runner: &mut SequenceRunner<S>,
    target: &str,
    in_dir: &Path,
    out_dir: &Path,
) -> Result<Vec<ProbeReport>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let load_raw = crate::call::load_raw_fn(target)?;
    let mut entries: Vec<PathBuf> = fs::read_dir(in_dir)
        .map_err(|e| TeezzError::io(in_dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    let seeds_out = out_dir.join("seeds");
    let mut reports = Vec::new();

    for seed_dir in entries {
        info!("probing value dependencies of {}", seed_dir.display());
        let current_seq = SeedSequence::load_sequence(&seed_dir, load_raw)?;
        if current_seq.is_empty() {
            continue;
        }

        let mut probe_seq = current_seq.clone();
        let original_status_codes = probe(runner, &mut probe_seq).await?;

        let all_deps: Vec<_> = current_seq
            .deps
            .as_ref()
            .map(|d| d.all_dependencies().into_iter().cloned().collect())
            .unwrap_or_default();
        let original_dep_count = all_deps.len();

        let mut removed = 0usize;
        for dep in &all_deps {
            let mut candidate = probe_seq.clone();
            let Some(deps) = candidate.deps.as_mut() else { break };
            if !deps.remove_value_dependency(dep) {
                continue;
            }
            let status_codes = probe(runner, &mut candidate).await?;
            if status_codes == original_status_codes {
                probe_seq = candidate;
                removed += 1;
            }
            // else: this dependency changes behavior when removed, keep it.
        }

        info!("removed {removed}/{original_dep_count} value dependencies");
        let name = seed_dir
            .file_name()
            .ok_or_else(|| TeezzError::Config("seed directory has no name".into()))?;
        let dest = seeds_out.join(name);
        probe_seq.store_sequence(&dest, |call, p| call.serialize_to_path(p))?;

        reports.push(ProbeReport {
            seed_dir,
            original_dep_count,
            removed_dep_count: removed,
        });
    }

    Ok(reports)
}

async fn probe<S>(runner: &mut SequenceRunner<S>, seq: &mut SeedSequence) -> Result<Vec<bool>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    seq.reset_cursor();
    let result = runner.run(seq).await?;
    Ok(result.status_codes)
}
