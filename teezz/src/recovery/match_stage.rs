//! Stage 2 — Match (spec.md §4.2 Stage 2). Grounded on
//! `original_source/fuzz/fmt_recovery/match.py`: when a higher-level
//! reference recording exists for the same interaction, walk its leaf
//! values and label any low-level buffer range that contains one exactly.

use crate::bytes_io::is_all_zero;
use crate::template::{SeedTemplate, SeedTemplateElement};

/// A typed leaf value pulled from a reference ("high-level") recording:
/// a type name paired with its raw bytes.
pub type Leaf = (String, Vec<u8>);

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Finds every leaf whose bytes occur exactly and entirely inside
/// `buffer`, sorted by size descending so the biggest label claims its
/// range first (collisions with smaller overlapping matches are then
/// rejected by `SeedTemplate::add_elem`'s T2 check).
pub fn match_leaves(buffer: &[u8], leaves: &[Leaf]) -> Vec<SeedTemplateElement> {
    let mut matches = Vec::new();
    for (type_name, data) in leaves {
        if data.len() <= 1 {
            continue;
        }
        if is_all_zero(data) {
            continue;
        }
        if let Some(off) = find_subslice(buffer, data) {
            matches.push(SeedTemplateElement::new(off, off + data.len(), type_name.clone()));
        }
    }
    matches.sort_by(|a, b| b.size().cmp(&a.size()));
    matches
}

/// Applies matches to `tmpl` in order, silently dropping collisions.
pub fn apply_matches(tmpl: &mut SeedTemplate, matches: Vec<SeedTemplateElement>) {
    for m in matches {
        let _ = tmpl.add_elem(m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn biggest_leaf_claims_its_range_before_smaller_overlapping_ones() {
        let buffer = b"\x01\x02\x03\x04AAAA\x05\x06";
        let leaves = vec![
            ("uint16_t".to_string(), vec![0x03, 0x04]),
            ("uint32_t".to_string(), vec![0x01, 0x02, 0x03, 0x04]),
        ];
        let matches = match_leaves(buffer, &leaves);
        let mut tmpl = SeedTemplate::new(buffer.len());
        apply_matches(&mut tmpl, matches);

        let elems = tmpl.listify();
        assert_eq!(elems.len(), 1);
        assert_eq!(elems[0].type_name, "uint32_t");
    }

    #[test]
    fn single_byte_and_all_zero_leaves_are_never_matched() {
        let buffer = [0u8; 16];
        let leaves = vec![
            ("uint8_t".to_string(), vec![0x00]),
            ("uint32_t".to_string(), vec![0, 0, 0, 0]),
        ];
        assert!(match_leaves(&buffer, &leaves).is_empty());
    }
}
