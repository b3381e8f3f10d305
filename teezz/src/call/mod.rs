//! The abstract `Call` capability (spec.md §3, §9): the fuzz loop, runner,
//! and mutators are written against this trait and never branch on which
//! concrete TEE variant they are driving. `triangle`, `optee`, and `qsee`
//! each provide one concrete shape satisfying it; a small factory in
//! `variant()` picks the right one from a configured target name.

pub mod optee;
pub mod qsee;
pub mod triangle;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mutate::template_mutator::TemplateMutator;
use crate::template::SeedTemplate;

/// The 4-bit parameter-type slot values shared by Triangle and Optee
/// (spec.md §6.2). Qsee does not use this enumeration — its two logical
/// parameters (request / response buffers) are fixed-role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    None = 0x0,
    ValueIn = 0x1,
    ValueOut = 0x2,
    ValueInout = 0x3,
    MemrefTempIn = 0x5,
    MemrefTempOut = 0x6,
    MemrefTempInout = 0x7,
    IonInput = 0x8,
    MemrefWhole = 0xc,
    MemrefPartialIn = 0xd,
    MemrefPartialOut = 0xe,
    MemrefPartialInout = 0xf,
}

impl ParamType {
    pub fn from_nibble(n: u8) -> ParamType {
        match n & 0xf {
            0x1 => ParamType::ValueIn,
            0x2 => ParamType::ValueOut,
            0x3 => ParamType::ValueInout,
            0x5 => ParamType::MemrefTempIn,
            0x6 => ParamType::MemrefTempOut,
            0x7 => ParamType::MemrefTempInout,
            0x8 => ParamType::IonInput,
            0xc => ParamType::MemrefWhole,
            0xd => ParamType::MemrefPartialIn,
            0xe => ParamType::MemrefPartialOut,
            0xf => ParamType::MemrefPartialInout,
            _ => ParamType::None,
        }
    }

    pub fn to_nibble(self) -> u8 {
        self as u8
    }

    pub fn is_value(self) -> bool {
        matches!(self, ParamType::ValueIn | ParamType::ValueOut | ParamType::ValueInout)
    }

    pub fn is_memref(self) -> bool {
        matches!(
            self,
            ParamType::MemrefTempIn
                | ParamType::MemrefTempOut
                | ParamType::MemrefTempInout
                | ParamType::MemrefWhole
                | ParamType::MemrefPartialIn
                | ParamType::MemrefPartialOut
                | ParamType::MemrefPartialInout
        )
    }

    pub fn is_input(self) -> bool {
        matches!(
            self,
            ParamType::ValueIn
                | ParamType::ValueInout
                | ParamType::MemrefTempIn
                | ParamType::MemrefTempInout
                | ParamType::MemrefWhole
                | ParamType::MemrefPartialIn
                | ParamType::MemrefPartialInout
                | ParamType::IonInput
        )
    }

    pub fn is_output(self) -> bool {
        matches!(
            self,
            ParamType::ValueOut
                | ParamType::ValueInout
                | ParamType::MemrefTempOut
                | ParamType::MemrefTempInout
                | ParamType::MemrefWhole
                | ParamType::MemrefPartialOut
                | ParamType::MemrefPartialInout
        )
    }
}

/// One of up to four parameter slots of a `Call`. `buffer` holds the two
/// value words (16 bytes, little-endian) for VALUE params or the raw
/// memory-reference content for MEMREF params. `template` is populated by
/// the format-recovery pipeline and consulted by the mutator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub kind: ParamType,
    pub buffer: Vec<u8>,
    pub template: Option<SeedTemplate>,
}

impl Param {
    pub fn none() -> Self {
        Param {
            kind: ParamType::None,
            buffer: Vec::new(),
            template: None,
        }
    }

    pub fn value(kind: ParamType, a: u64, b: u64) -> Self {
        let mut buffer = Vec::with_capacity(16);
        buffer.extend_from_slice(&a.to_le_bytes());
        buffer.extend_from_slice(&b.to_le_bytes());
        Param {
            kind,
            buffer,
            template: None,
        }
    }

    pub fn memref(kind: ParamType, content: Vec<u8>) -> Self {
        Param {
            kind,
            buffer: content,
            template: None,
        }
    }
}

/// A coverage fingerprint: `(command id, parameter-type mask, return
/// status, return origin)`, per the GLOSSARY. Kept as a plain tuple of
/// i64 so it hashes and compares uniformly across variants that don't all
/// have a meaningful "origin" (Qsee folds origin into 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoverageTuple(pub i64, pub i64, pub i64, pub i64);

/// The common capability set every concrete variant must provide
/// (spec.md §3, §9). Implementations are `Send` so a `Box<dyn Call>` can
/// cross the await points in `SequenceRunner::run`.
pub trait Call: std::fmt::Debug + Send {
    /// Recognized name of the concrete variant, e.g. `"optee"`.
    fn variant_name(&self) -> &'static str;

    fn is_success(&self) -> bool;
    fn is_crash(&self) -> bool;
    fn coverage(&self) -> CoverageTuple;

    fn params(&self) -> &[Param];
    fn params_mut(&mut self) -> &mut [Param];

    /// Deep-clones this call into a fresh trait object, so the fuzz loop
    /// can duplicate a population member without knowing its concrete
    /// variant (spec.md §4.6, `_create_candidate`).
    fn clone_box(&self) -> Box<dyn Call>;

    /// Wire codec (§6.1/§6.2): header bytes followed by one length-prefixed
    /// chunk per parameter, request-side framing (what the runner sends).
    fn serialize(&self) -> Vec<u8>;

    /// Parses a wire-format response (header + per-parameter chunks,
    /// output parameters only) into a fresh instance cloned from the
    /// request shape of `self` so parameter kinds/templates survive.
    fn deserialize_response(&self, bytes: &[u8]) -> Result<Box<dyn Call>>;

    /// On-disk codec: writes the header and parameter component files
    /// into `dir` (an `onenter/` or `onleave/` directory).
    fn serialize_to_path(&self, dir: &Path) -> Result<()>;

    /// Reads the raw on-disk recording for this variant's shape from
    /// `dir`, without assuming any `.types` files exist yet.
    fn deserialize_raw_from_path(dir: &Path) -> Result<Box<dyn Call>>
    where
        Self: Sized;

    /// Mutates non-parameter header fields in place via the supplied
    /// template mutator, using this variant's fixed header template.
    fn mutate_header(&mut self, mutator: &mut TemplateMutator);

    /// Copies `src_sz` bytes from `self`'s parameter `src_param` at
    /// `src_off` into `dst_call`'s parameter `dst_param` at `dst_off`.
    fn resolve_into(
        &self,
        src_param: usize,
        src_off: usize,
        src_sz: usize,
        dst_call: &mut dyn Call,
        dst_param: usize,
        dst_off: usize,
    ) -> Result<()> {
        let src = self
            .params()
            .get(src_param)
            .ok_or_else(|| crate::error::TeezzError::ValueDependencyInconsistency(
                "source parameter index out of range".into(),
            ))?;
        let src_bytes = src
            .buffer
            .get(src_off..src_off + src_sz)
            .ok_or_else(|| crate::error::TeezzError::ValueDependencyInconsistency(
                "source range out of buffer bounds".into(),
            ))?
            .to_vec();
        let dst = dst_call
            .params_mut()
            .get_mut(dst_param)
            .ok_or_else(|| crate::error::TeezzError::ValueDependencyInconsistency(
                "destination parameter index out of range".into(),
            ))?;
        let dst_slice = dst
            .buffer
            .get_mut(dst_off..dst_off + src_sz)
            .ok_or_else(|| crate::error::TeezzError::ValueDependencyInconsistency(
                "destination range out of buffer bounds".into(),
            ))?;
        dst_slice.copy_from_slice(&src_bytes);
        Ok(())
    }
}

/// Picks the variant-appropriate empty `Call` factory by configured
/// target name. The runner and fuzz loop call this exactly once at
/// start-up and never branch on variant identity again (spec.md §9).
pub fn variant_name_is_known(name: &str) -> bool {
    matches!(name, "triangle" | "optee" | "qsee")
}

/// Resolves the raw on-disk deserializer for a configured target name,
/// mirroring `_get_seed_class` in the original runner: the fuzz loop and
/// `probevaldep`/`triage` CLIs need to load a queue/crash entry without
/// constructing a concrete variant value first.
pub fn load_raw_fn(target: &str) -> Result<fn(&Path) -> Result<Box<dyn Call>>> {
    match target {
        "triangle" => Ok(triangle::TriangleCall::deserialize_raw_from_path),
        "optee" => Ok(optee::OpteeCall::deserialize_raw_from_path),
        "qsee" => Ok(qsee::QseeCall::deserialize_raw_from_path),
        other => Err(crate::error::TeezzError::Config(format!("unknown TEE target {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_type_nibble_round_trips() {
        for &n in &[0x0u8, 0x1, 0x2, 0x3, 0x5, 0x6, 0x7, 0x8, 0xc, 0xd, 0xe, 0xf] {
            let pt = ParamType::from_nibble(n);
            assert_eq!(pt.to_nibble(), n);
        }
    }

    #[test]
    fn memref_whole_is_both_input_and_output() {
        assert!(ParamType::MemrefWhole.is_input());
        assert!(ParamType::MemrefWhole.is_output());
    }

    #[test]
    fn value_in_is_input_only() {
        assert!(ParamType::ValueIn.is_input());
        assert!(!ParamType::ValueIn.is_output());
    }
}
