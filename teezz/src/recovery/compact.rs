//! Ordinal compaction and the Triangle-only negative-return prepass
//! (spec.md §4.2, closing paragraphs). Grounded on
//! `original_source/fuzz/fmt_recovery/fix_tc_dumpids.py`: gaps in the
//! ordinal sequence (e.g. `0,1,3,4` after deleting an interaction) are
//! closed by renumbering, relative order preserved.

/// F4: renumbers `kept` ordinals to `0..kept.len()` preserving relative
/// order. Returns `(old_ordinal, new_ordinal)` pairs for the caller to
/// apply as filesystem renames. Idempotent: compacting an already-dense
/// `0..N` sequence returns the identity mapping.
pub fn compact_seq_ids(kept: &[u64]) -> Vec<(u64, u64)> {
    let mut sorted = kept.to_vec();
    sorted.sort_unstable();
    sorted
        .into_iter()
        .enumerate()
        .map(|(new, old)| (old, new as u64))
        .collect()
}

/// Triangle-only prepass: an interaction whose recorded return code is
/// negative reflects a high-level call that never reached the kernel and
/// should be dropped before compaction. The caller supplies the return
/// codes keyed by ordinal; this just decides which ordinals survive.
pub fn triangle_drop_negative_returns(ordinals_and_returns: &[(u64, i64)]) -> Vec<u64> {
    ordinals_and_returns
        .iter()
        .filter(|&&(_, ret)| ret >= 0)
        .map(|&(ord, _)| ord)
        .collect()
}
