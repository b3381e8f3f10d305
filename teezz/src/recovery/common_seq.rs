//! Stage 4 — Common-subsequence mining (spec.md §4.2 Stage 4). Grounded
//! on `original_source/fuzz/fmt_recovery/common_sequence.py`'s
//! `get_matches`/`find_padding`, which drive Python's `difflib`
//! `SequenceMatcher` over a `(resp, req)` pair. We reimplement the
//! matching-block decomposition directly: recursively take the longest
//! common substring of the remaining window, then recurse on both
//! sides, which is the same strategy `difflib.get_matching_blocks` uses
//! internally. `SequenceMatcher`'s junk-deprioritization for `0x00` bytes
//! is folded into the zero-padding trim below plus the junk-block filter,
//! rather than reproduced byte-for-byte.

use std::collections::HashSet;

use crate::template::SeedTemplateElement;

/// Longest common substring of `a` and `b`, as `(a_start, b_start, len)`.
/// `O(|a|*|b|)`; fine for the small per-parameter buffers this pipeline
/// deals with.
fn longest_common_substring(a: &[u8], b: &[u8]) -> Option<(usize, usize, usize)> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    let mut best = (0usize, 0usize, 0usize);
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                let len = dp[i - 1][j - 1] + 1;
                dp[i][j] = len;
                if len > best.2 {
                    best = (i - len, j - len, len);
                }
            }
        }
    }
    if best.2 == 0 {
        None
    } else {
        Some(best)
    }
}

/// Non-overlapping matching blocks between `resp` and `req`, ordered by
/// position in `resp`.
pub fn matching_blocks(resp: &[u8], req: &[u8]) -> Vec<(usize, usize, usize)> {
    let mut blocks = Vec::new();
    let mut stack = vec![(0usize, resp.len(), 0usize, req.len())];
    while let Some((a_lo, a_hi, b_lo, b_hi)) = stack.pop() {
        if a_lo >= a_hi || b_lo >= b_hi {
            continue;
        }
        if let Some((ra, rb, sz)) = longest_common_substring(&resp[a_lo..a_hi], &req[b_lo..b_hi]) {
            let a = a_lo + ra;
            let b = b_lo + rb;
            blocks.push((a, b, sz));
            stack.push((a_lo, a, b_lo, b));
            stack.push((a + sz, a_hi, b + sz, b_hi));
        }
    }
    blocks.sort_by_key(|&(a, _, _)| a);
    blocks
}

/// Junk per spec.md §4.2 Stage 4: too short, a single distinct byte
/// repeated, or (when not exactly 4 or 8 bytes) shorter than 8.
fn is_junk_block(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return true;
    }
    let unique: HashSet<u8> = bytes.iter().copied().collect();
    if unique.len() == 1 {
        return true;
    }
    bytes.len() != 4 && bytes.len() != 8 && bytes.len() < 8
}

/// Finds the first run of trailing `0x00` bytes and returns everything
/// before it, matching `common_sequence.py`'s `find_padding`.
fn trim_trailing_zero_padding(buf: &[u8]) -> &[u8] {
    let mut idx = 0;
    while let Some(pos) = buf[idx..].iter().position(|&b| b == 0) {
        let abs = idx + pos;
        if buf[abs..].iter().all(|&b| b == 0) {
            return &buf[..abs];
        }
        idx = abs + 1;
    }
    buf
}

/// Mines `(resp, req)` for value-flow-typed blocks, returning the
/// `(resp_elem, req_elem)` pairs to add (as `uint8_t*`) to each side's
/// template. Collisions are left to the caller's `add_elem` (T2).
pub fn mine_pair(resp: &[u8], req: &[u8]) -> Vec<(SeedTemplateElement, SeedTemplateElement)> {
    let trimmed = trim_trailing_zero_padding(resp);
    matching_blocks(trimmed, req)
        .into_iter()
        .filter(|&(a, _, sz)| !is_junk_block(&trimmed[a..a + sz]))
        .map(|(a, b, sz)| {
            (
                SeedTemplateElement::new(a, a + sz, "uint8_t*"),
                SeedTemplateElement::new(b, b + sz, "uint8_t*"),
            )
        })
        .collect()
}

/// Runs `mine_pair` over every supplied `(resp, req)` pair on a bounded
/// worker pool (spec.md §5: "the only in-process parallelism is the
/// optional worker pool used by Stage 4"). Workers are stateless; the
/// caller merges the per-pair results on the main thread.
pub async fn mine_all_pairs(
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
    max_workers: usize,
) -> Vec<Vec<(SeedTemplateElement, SeedTemplateElement)>> {
    use tokio::sync::Semaphore;
    let sem = std::sync::Arc::new(Semaphore::new(max_workers.max(1)));
    let mut handles = Vec::with_capacity(pairs.len());
    for (resp, req) in pairs {
        let sem = sem.clone();
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.expect("semaphore not closed");
            mine_pair(&resp, &req)
        }));
    }
    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        out.push(h.await.unwrap_or_default());
    }
    out
}
