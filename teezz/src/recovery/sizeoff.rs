//! Stage 3 — Size/offset inference (spec.md §4.2 Stage 3). Grounded on
//! `original_source/fuzz/fmt_recovery/sz_off.py`'s `process_param` and
//! `is_len_type_sequence`.

use std::collections::BTreeMap;

use crate::bytes_io::{is_printable, read_u32};
use crate::template::{SeedTemplate, SeedTemplateElement};

/// `(offset -> (size, type_name))` view of a template's already-typed
/// elements, the shape `sz_off.py` builds before scanning.
fn typed_offsets(tmpl: &SeedTemplate) -> BTreeMap<usize, (usize, String)> {
    tmpl.listify()
        .into_iter()
        .map(|e| (e.start, (e.size(), e.type_name)))
        .collect()
}

/// True when exactly `count` elements of the type sequence starting at or
/// after `off` share one type name that repeats `count` times, with
/// untyped gaps folded in as synthetic `undef_N` placeholders. Mirrors the
/// original's array-of-`count`-elements heuristic.
fn is_len_type_sequence(types: &BTreeMap<usize, (usize, String)>, count: usize, off: usize) -> bool {
    let mut type_seq: Vec<String> = Vec::new();
    let mut type_list: Vec<String> = Vec::new();
    let mut prev_sz: Option<usize> = None;
    let mut prev_k: usize = 0;

    for (&k, (sz, ty)) in types {
        if off > k {
            prev_k = k;
            continue;
        }
        if let Some(psz) = prev_sz {
            if k != prev_k + psz {
                let name = format!("undef_{}", k - (prev_k + psz));
                if !type_seq.contains(&name) {
                    type_seq.push(name.clone());
                }
                type_list.push(name);
            }
        }
        if !type_seq.contains(ty) {
            type_seq.push(ty.clone());
        }
        type_list.push(ty.clone());
        prev_sz = Some(*sz);
        prev_k = k;
    }

    type_seq
        .iter()
        .any(|t| type_list.iter().filter(|x| *x == t).count() == count)
}

/// Scans one parameter buffer for offset/size candidates per spec.md
/// §4.2 Stage 3, returning the newly-inferred elements. Callers add them
/// one at a time via `SeedTemplate::add_elem`, silently dropping any that
/// collide (T2).
pub fn infer(tmpl: &SeedTemplate, data: &[u8]) -> Vec<SeedTemplateElement> {
    let types = typed_offsets(tmpl);
    let mut off_matches = Vec::new();
    let mut len_matches = Vec::new();

    // Offset heuristic.
    let mut off = 0usize;
    while off + 4 <= data.len() {
        if !types.contains_key(&off) {
            if let Ok(candidate) = read_u32(data, off) {
                let candidate = candidate as usize;
                if candidate > 0 && data.len() >= candidate && candidate % 16 == 0 {
                    if let Some(&(length, _)) = types.get(&candidate) {
                        if candidate > off {
                            off_matches.push(SeedTemplateElement::new(off, off + 4, "off_t"));
                            if off >= 4 {
                                if let Ok(prev) = read_u32(data, off - 4) {
                                    if prev as usize == length {
                                        len_matches.push(SeedTemplateElement::new(off - 4, off, "size_t"));
                                    }
                                }
                            }
                            if off + 8 <= data.len() {
                                if let Ok(next) = read_u32(data, off + 4) {
                                    if next as usize == length {
                                        len_matches.push(SeedTemplateElement::new(off + 4, off + 8, "size_t"));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        off += 4;
    }

    // Length heuristic.
    off = 0;
    while off + 4 <= data.len() {
        if !types.contains_key(&off) {
            if let Ok(v) = read_u32(data, off) {
                let v = v as usize;
                let tail = &data[off + 4..];
                if tail.len() >= v && v >= 3 && tail[..v].iter().all(|&b| is_printable(b)) {
                    len_matches.push(SeedTemplateElement::new(off, off + 4, "size_t"));
                } else if tail.len() == v {
                    len_matches.push(SeedTemplateElement::new(off, off + 4, "size_t"));
                } else if data.len() == v {
                    len_matches.push(SeedTemplateElement::new(off, off + 4, "size_t"));
                } else if types.contains_key(&(off + 4)) && is_len_type_sequence(&types, v, off + 4) {
                    len_matches.push(SeedTemplateElement::new(off, off + 4, "size_t"));
                }
            }
        }
        off += 4;
    }

    let mut matches = len_matches;
    matches.extend(off_matches);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_b_size_heuristic() {
        // Given: `\x05\x00\x00\x00HELLO` + 23 zero bytes
        let mut data = vec![0x05, 0x00, 0x00, 0x00];
        data.extend_from_slice(b"HELLO");
        data.extend(std::iter::repeat(0u8).take(23));
        let tmpl = SeedTemplate::new(data.len());

        // Then: [0,4) is typed size_t
        let matches = infer(&tmpl, &data);
        assert!(matches
            .iter()
            .any(|e| e.start == 0 && e.end == 4 && e.type_name == "size_t"));
    }

    #[test]
    fn f1_whole_blob_length_field_is_typed_size_t() {
        let mut data = vec![0u8; 32];
        let total = data.len() as u32;
        data[0..4].copy_from_slice(&total.to_le_bytes());
        let tmpl = SeedTemplate::new(data.len());
        let matches = infer(&tmpl, &data);
        assert!(matches
            .iter()
            .any(|e| e.start == 0 && e.end == 4 && e.type_name == "size_t"));
    }

    #[test]
    fn offset_candidate_tags_both_the_pointer_and_its_paired_length() {
        let mut data = vec![0u8; 32];
        // [0,4) = 16 (an offset into `data`, multiple of 16, after `off`)
        data[0..4].copy_from_slice(&16u32.to_le_bytes());
        // [4,8) = 8 (length of the element starting at offset 16)
        data[4..8].copy_from_slice(&8u32.to_le_bytes());
        let mut tmpl = SeedTemplate::new(data.len());
        tmpl.add_elem(SeedTemplateElement::new(16, 24, "uint8_t*")).unwrap();

        let matches = infer(&tmpl, &data);
        assert!(matches.iter().any(|e| e.start == 0 && e.type_name == "off_t"));
        assert!(matches.iter().any(|e| e.start == 4 && e.type_name == "size_t"));
    }
}
