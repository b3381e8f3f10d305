//! Stage 5 — Value-dependency mining (spec.md §4.2 Stage 5). Grounded on
//! `original_source/fuzz/fmt_recovery/find_value_deps.py`: slide a
//! window of `MATCHING_WINDOW` interactions, pair every output param of
//! an earlier interaction against every input param of a later one, keep
//! equal-content equal-size ranges, merge into the global dependency set.

use std::collections::HashSet;

use crate::bytes_io::is_all_zero;
use crate::dependency::{IoctlCall, IoctlCallSequence, ValueDependency};
use crate::error::Result;
use crate::template::SeedTemplate;

pub const MATCHING_WINDOW: usize = 16;

/// Platform-specific opaque enums/unions and the pipeline's own
/// `off_t`/`size_t` labels never carry a meaningful value dependency.
/// `original_source/fuzz/fmt_recovery/find_value_deps.py`'s
/// `EXCLUDED_TYPES` is Keymaster-specific; SPEC_FULL.md §4.2 generalizes
/// it into a configurable table instead of a hardcoded Keymaster list.
pub fn default_excluded_types() -> HashSet<String> {
    ["off_t", "size_t"].iter().map(|s| s.to_string()).collect()
}

/// Base of the reserved dump_id range handed out to synthesized calls
/// (spec.md §4.2 Stage 5; `original_source/find_value_deps.py`'s
/// `SPECIAL_DEP_BASE`). Never collides with a recorded ordinal, which
/// starts at 0 and is compacted contiguously.
pub const SYNTHETIC_DEP_BASE: u64 = 0xDEAD_0000;

/// A known two-hop value flow that the observed wire traffic alone
/// cannot see (e.g. a platform-implicit authorization token), expressed
/// as a rule instead of hard-coded lookup. `original_source`'s
/// `find_value_deps.py::match_fp_calls` special-cases the Huawei TC
/// `pre_enroll`→`enroll` pair at a fixed distance of 3; here that becomes
/// one `SyntheticCallRule` value rather than a branch in the algorithm
/// (SPEC_FULL.md §4.2 REDESIGN supplement).
#[derive(Debug, Clone)]
pub struct SyntheticCallRule {
    pub response_fn: String,
    pub request_fn: String,
    /// `request_ordinal - response_ordinal` required for the rule to fire.
    pub distance: i64,
    pub response_param: String,
    pub response_range: (usize, usize),
    pub synthetic_in_param: String,
    pub synthetic_in_range: (usize, usize),
    pub synthetic_out_param: String,
    pub synthetic_out_range: (usize, usize),
    pub request_param: String,
    pub request_range: (usize, usize),
}

impl SyntheticCallRule {
    /// The one concrete instantiation carried over from the original:
    /// a fingerprint enrollment token flowing `pre_enroll` -> (implicit
    /// `get_auth_token`) -> `enroll`, three interactions apart.
    pub fn triangle_pre_enroll_to_enroll() -> Self {
        SyntheticCallRule {
            response_fn: "pre_enroll".to_string(),
            request_fn: "enroll".to_string(),
            distance: 3,
            response_param: "param_1_a".to_string(),
            response_range: (0, 8),
            synthetic_in_param: "param_1_a".to_string(),
            synthetic_in_range: (0, 8),
            synthetic_out_param: "param_3_a".to_string(),
            synthetic_out_range: (0, 0x45),
            request_param: "param_1_a".to_string(),
            request_range: (1, 1 + 0x45),
        }
    }
}

/// Minimal per-interaction metadata a rule needs: its ordinal and (when
/// known) the high-level API function name that produced it.
pub struct InteractionMeta {
    pub ordinal: u64,
    pub function_name: Option<String>,
}

/// Applies every rule against every interaction pair, inserting a
/// synthesized call and its two dependency edges wherever one fires.
/// Must run before the generic byte-level mining attaches anything to
/// the same destinations, since both share the same destination-range
/// dedup.
pub fn apply_synthetic_rules(
    seq: &mut IoctlCallSequence,
    metas: &[InteractionMeta],
    rules: &[SyntheticCallRule],
) -> Result<()> {
    let mut next_synth_id = SYNTHETIC_DEP_BASE + 1;
    for resp_meta in metas {
        let Some(resp_fn) = resp_meta.function_name.as_deref() else {
            continue;
        };
        for rule in rules {
            if resp_fn != rule.response_fn {
                continue;
            }
            let req_ordinal = match u64::try_from(resp_meta.ordinal as i64 + rule.distance) {
                Ok(o) => o,
                Err(_) => continue,
            };
            let Some(req_meta) = metas.iter().find(|m| m.ordinal == req_ordinal) else {
                continue;
            };
            if req_meta.function_name.as_deref() != Some(rule.request_fn.as_str()) {
                continue;
            }

            let synth_id = next_synth_id;
            next_synth_id += 1;
            seq.insert_after(resp_meta.ordinal, IoctlCall::synthesized(synth_id))?;

            seq.attach_dependency(
                synth_id,
                resp_meta.ordinal,
                ValueDependency {
                    src_dump_id: resp_meta.ordinal,
                    src_param_identifier: rule.response_param.clone(),
                    src_off: rule.response_range.0,
                    src_sz: rule.response_range.1 - rule.response_range.0,
                    dst_param_identifier: rule.synthetic_in_param.clone(),
                    dst_off: rule.synthetic_in_range.0,
                    dst_sz: rule.synthetic_in_range.1 - rule.synthetic_in_range.0,
                },
            )?;

            seq.attach_dependency(
                req_meta.ordinal,
                synth_id,
                ValueDependency {
                    src_dump_id: synth_id,
                    src_param_identifier: rule.synthetic_out_param.clone(),
                    src_off: rule.synthetic_out_range.0,
                    src_sz: rule.synthetic_out_range.1 - rule.synthetic_out_range.0,
                    dst_param_identifier: rule.request_param.clone(),
                    dst_off: rule.request_range.0,
                    dst_sz: rule.request_range.1 - rule.request_range.0,
                },
            )?;
        }
    }
    Ok(())
}

/// One parameter buffer available for mining: the interaction ordinal it
/// belongs to, a stable identifier for the parameter within its call
/// (`"resp"`, `"param_0"`, ...), its raw bytes, and its recovered
/// template.
pub struct ParamSnapshot<'a> {
    pub ordinal: u64,
    pub identifier: String,
    pub data: &'a [u8],
    pub template: &'a SeedTemplate,
}

#[derive(Debug, Clone)]
pub struct CandidateDep {
    pub src_ordinal: u64,
    pub src_param: String,
    pub src_off: usize,
    pub src_sz: usize,
    pub dst_ordinal: u64,
    pub dst_param: String,
    pub dst_off: usize,
    pub dst_sz: usize,
}

/// Cross-product match of every output-param template element against
/// every input-param template element within the sliding window,
/// filtered per spec.md §4.2 Stage 5 step 2.
pub fn find_candidates(
    outputs: &[ParamSnapshot],
    inputs: &[ParamSnapshot],
    excluded_types: &HashSet<String>,
    window: usize,
) -> Vec<CandidateDep> {
    let mut candidates = Vec::new();
    for src in outputs {
        for dst in inputs {
            if !(src.ordinal < dst.ordinal && dst.ordinal - src.ordinal <= window as u64) {
                continue;
            }
            for src_elem in src.template.elements() {
                if excluded_types.contains(&src_elem.type_name) {
                    continue;
                }
                for dst_elem in dst.template.elements() {
                    if excluded_types.contains(&dst_elem.type_name) {
                        continue;
                    }
                    if src_elem.size() != dst_elem.size() {
                        continue;
                    }
                    let Some(src_range) = src.data.get(src_elem.start..src_elem.end) else {
                        continue;
                    };
                    let Some(dst_range) = dst.data.get(dst_elem.start..dst_elem.end) else {
                        continue;
                    };
                    if is_all_zero(src_range) {
                        continue;
                    }
                    if src_range.len() <= 2 && src_range.contains(&0) {
                        continue;
                    }
                    if src_range == dst_range {
                        candidates.push(CandidateDep {
                            src_ordinal: src.ordinal,
                            src_param: src.identifier.clone(),
                            src_off: src_elem.start,
                            src_sz: src_elem.size(),
                            dst_ordinal: dst.ordinal,
                            dst_param: dst.identifier.clone(),
                            dst_off: dst_elem.start,
                            dst_sz: dst_elem.size(),
                        });
                    }
                }
            }
        }
    }
    candidates
}

/// Builds the `IoctlCallSequence`: one `IoctlCall` per ordinal, then
/// attaches every mined candidate in destination order so
/// `ValueDependencies::append` performs both the intra-pair and the
/// global destination-range dedup (spec.md §4.2 Stage 5 steps 3-4
/// collapse into one pass since both use the same keep-larger/keep-first
/// rule). Call `apply_synthetic_rules` on the same sequence first if any
/// `SyntheticCallRule` applies, so synthesized calls already exist by the
/// time generic candidates are attached.
pub fn build_sequence(
    ordinals: &[u64],
    paths: impl Fn(u64) -> std::path::PathBuf,
    mut candidates: Vec<CandidateDep>,
) -> Result<IoctlCallSequence> {
    let mut seq = IoctlCallSequence::new();
    for &ord in ordinals {
        seq.append(IoctlCall::recorded(ord, paths(ord)))?;
    }

    candidates.sort_by_key(|c| (c.dst_ordinal, c.dst_off));

    for c in candidates {
        debug_assert_eq!(c.src_sz, c.dst_sz, "V1: src_sz must equal dst_sz");
        debug_assert!(c.src_ordinal < c.dst_ordinal, "V2: src must precede dst");

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::SeedTemplateElement;

    #[test]
    fn scenario_c_value_dep_mining() {
        let mut resp_data = vec![0u8; 4];
        resp_data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE]);
        let mut resp_tmpl = SeedTemplate::new(resp_data.len());
        resp_tmpl.add_elem(SeedTemplateElement::new(4, 12, "uint8_t*")).unwrap();

        let req_data = vec![0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE];
        let mut req_tmpl = SeedTemplate::new(req_data.len());
        req_tmpl.add_elem(SeedTemplateElement::new(0, 8, "uint8_t*")).unwrap();

        let outputs = vec![ParamSnapshot {
            ordinal: 0,
            identifier: "resp".to_string(),
            data: &resp_data,
            template: &resp_tmpl,
        }];
        let inputs = vec![ParamSnapshot {
            ordinal: 1,
            identifier: "req".to_string(),
            data: &req_data,
            template: &req_tmpl,
        }];

        let candidates = find_candidates(&outputs, &inputs, &default_excluded_types(), MATCHING_WINDOW);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].src_off, 4);
        assert_eq!(candidates[0].dst_off, 0);

        let seq = build_sequence(&[0, 1], |ord| format!("{ord}").into(), candidates).unwrap();
        let deps = seq.all_dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].src_dump_id, 0);
        assert_eq!(deps[0].src_sz, 8);
    }

    #[test]
    fn zero_and_tiny_ranges_are_never_proposed_as_dependencies() {
        let zero_data = vec![0u8; 8];
        let mut zero_tmpl = SeedTemplate::new(8);
        zero_tmpl.add_elem(SeedTemplateElement::new(0, 4, "uint32_t")).unwrap();

        let req_data = vec![0u8; 8];
        let mut req_tmpl = SeedTemplate::new(8);
        req_tmpl.add_elem(SeedTemplateElement::new(0, 4, "uint32_t")).unwrap();

        let outputs = vec![ParamSnapshot {
            ordinal: 0,
            identifier: "resp".to_string(),
            data: &zero_data,
            template: &zero_tmpl,
        }];
        let inputs = vec![ParamSnapshot {
            ordinal: 1,
            identifier: "req".to_string(),
            data: &req_data,
            template: &req_tmpl,
        }];
        let candidates = find_candidates(&outputs, &inputs, &default_excluded_types(), MATCHING_WINDOW);
        assert!(candidates.is_empty());
    }

    #[test]
    fn synthetic_rule_inserts_an_intermediate_call_between_its_endpoints() {
        let mut seq = IoctlCallSequence::new();
        for ord in 0..=3u64 {
            seq.append(IoctlCall::recorded(ord, format!("{ord}").into())).unwrap();
        }
        let metas = vec![
            InteractionMeta { ordinal: 0, function_name: Some("pre_enroll".to_string()) },
            InteractionMeta { ordinal: 1, function_name: None },
            InteractionMeta { ordinal: 2, function_name: None },
            InteractionMeta { ordinal: 3, function_name: Some("enroll".to_string()) },
        ];
        let rules = vec![SyntheticCallRule::triangle_pre_enroll_to_enroll()];

        apply_synthetic_rules(&mut seq, &metas, &rules).unwrap();

        let ids: Vec<u64> = seq.iter().map(|c| c.dump_id).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[1] & 0xFFFF_0000, SYNTHETIC_DEP_BASE);
        assert_eq!(seq.all_dependencies().len(), 2);
    }

    #[test]
    fn rule_does_not_fire_when_distance_or_function_names_mismatch() {
        let mut seq = IoctlCallSequence::new();
        for ord in 0..=3u64 {
            seq.append(IoctlCall::recorded(ord, format!("{ord}").into())).unwrap();
        }
        let metas = vec![
            InteractionMeta { ordinal: 0, function_name: Some("pre_enroll".to_string()) },
            InteractionMeta { ordinal: 1, function_name: Some("unrelated".to_string()) },
            InteractionMeta { ordinal: 2, function_name: None },
            InteractionMeta { ordinal: 3, function_name: Some("enroll".to_string()) },
        ];
        apply_synthetic_rules(&mut seq, &metas, &[SyntheticCallRule::triangle_pre_enroll_to_enroll()]).unwrap();
        assert_eq!(seq.len(), 4);
        assert!(seq.all_dependencies().is_empty());
    }
}
