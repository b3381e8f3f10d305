//! OP-TEE variant (`InvokeArg`), spec.md §6.2.
//!
//! Header: `func u32; session u32; cancel_id u32; ret u32; ret_origin u32;
//! num_params u32`, followed by four parameter chunks. Each parameter's
//! type comes from its own `attr` nibble (OP-TEE has no single packed
//! `paramTypes` mask the way Triangle does — we keep one attr word per
//! parameter in the header, matching `opteedata.py`'s `cTeeIoctlParam`).

use std::fs;
use std::path::Path;

use crate::bytes_io::{put_lv, put_u32, read_lv, read_u32};
use crate::call::{Call, CoverageTuple, Param, ParamType};
use crate::error::{Result, TeezzError};
use crate::mutate::template_mutator::TemplateMutator;
use crate::template::{SeedTemplate, SeedTemplateElement};

pub const TEEC_ERROR_TARGET_DEAD: u32 = 0xFFFF_3024;
const TEEC_SUCCESS: u32 = 0;

#[derive(Debug, Clone)]
pub struct OpteeCall {
    pub func: u32,
    pub session: u32,
    pub cancel_id: u32,
    pub ret: u32,
    pub ret_origin: u32,
    params: [Param; 4],
}

impl OpteeCall {
    pub fn new(func: u32) -> Self {
        OpteeCall {
            func,
            session: 0,
            cancel_id: 0,
            ret: 0,
            ret_origin: 0,
            params: [Param::none(), Param::none(), Param::none(), Param::none()],
        }
    }

    fn num_params(&self) -> u32 {
        self.params.iter().filter(|p| p.kind != ParamType::None).count() as u32
    }

    fn header_template() -> SeedTemplate {
        let mut t = SeedTemplate::new(24);
        let _ = t.add_elem(SeedTemplateElement::new(0, 4, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(4, 8, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(8, 12, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(12, 16, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(16, 20, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(20, 24, "uint32_t"));
        t
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24);
        put_u32(&mut buf, self.func);
        put_u32(&mut buf, self.session);
        put_u32(&mut buf, self.cancel_id);
        put_u32(&mut buf, self.ret);
        put_u32(&mut buf, self.ret_origin);
        put_u32(&mut buf, self.num_params());
        buf
    }

    fn apply_header_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() < 24 {
            return Err(TeezzError::MalformedResponse {
                declared: 24,
                received: bytes.len(),
            });
        }
        self.func = read_u32(bytes, 0)?;
        self.session = read_u32(bytes, 4)?;
        self.cancel_id = read_u32(bytes, 8)?;
        self.ret = read_u32(bytes, 12)?;
        self.ret_origin = read_u32(bytes, 16)?;
        Ok(())
    }

    fn param_types_mask(&self) -> i64 {
        let mut mask: i64 = 0;
        for (i, p) in self.params.iter().enumerate() {
            mask |= (p.kind.to_nibble() as i64) << (4 * i);
        }
        mask
    }
}

impl Call for OpteeCall {
    fn variant_name(&self) -> &'static str {
        "optee"
    }

    fn is_success(&self) -> bool {
        self.ret == TEEC_SUCCESS
    }

    fn is_crash(&self) -> bool {
        self.ret == TEEC_ERROR_TARGET_DEAD
    }

    fn coverage(&self) -> CoverageTuple {
        CoverageTuple(self.func as i64, self.param_types_mask(), self.ret as i64, self.ret_origin as i64)
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Param] {
        &mut self.params
    }

    fn clone_box(&self) -> Box<dyn Call> {
        Box::new(self.clone())
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header_bytes();
        for p in &self.params {
            put_u32(&mut buf, p.kind.to_nibble() as u32);
            put_lv(&mut buf, &p.buffer);
        }
        buf
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Box<dyn Call>> {
        let mut out = self.clone();
        out.apply_header_bytes(bytes)?;
        let mut off = 24;
        for p in out.params.iter_mut() {
            let attr = read_u32(bytes, off)?;
            off += 4;
            let kind = ParamType::from_nibble(attr as u8);
            let (chunk, next) = read_lv(bytes, off)?;
            off = next;
            if kind.is_output() {
                p.buffer = chunk.to_vec();
                p.kind = kind;
            }
        }
        Ok(Box::new(out))
    }

    fn serialize_to_path(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| TeezzError::io(dir, e))?;
        fs::write(dir.join("header"), self.header_bytes()).map_err(|e| TeezzError::io(dir, e))?;
        for (i, p) in self.params.iter().enumerate() {
            fs::write(dir.join(format!("param_{i}")), &p.buffer)
                .map_err(|e| TeezzError::io(dir, e))?;
        }
        Ok(())
    }

    fn deserialize_raw_from_path(dir: &Path) -> Result<Box<dyn Call>> {
        let header = fs::read(dir.join("header")).map_err(|e| TeezzError::io(dir, e))?;
        let mut call = OpteeCall::new(0);
        call.apply_header_bytes(&header)?;
        for i in 0..4 {
            let p = dir.join(format!("param_{i}"));
            if p.exists() {
                call.params[i] = Param::memref(
                    ParamType::MemrefTempIn,
                    fs::read(&p).map_err(|e| TeezzError::io(&p, e))?,
                );
            }
        }
        Ok(Box::new(call))
    }

    fn mutate_header(&mut self, mutator: &mut TemplateMutator) {
        let template = Self::header_template();
        let mutated = mutator.mutate(&self.header_bytes(), Some(&template));
        let _ = self.apply_header_bytes(&mutated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_dead_is_a_crash_on_optee_too() {
        let mut call = OpteeCall::new(1);
        call.ret = TEEC_ERROR_TARGET_DEAD;
        assert!(call.is_crash());
    }

    #[test]
    fn coverage_tuple_reflects_func_and_ret_origin() {
        let mut call = OpteeCall::new(0x10);
        call.ret_origin = 3;
        let cov = call.coverage();
        assert_eq!(cov.0, 0x10);
        assert_eq!(cov.3, 3);
    }
}
