//! Triangle TEE variant (`ClientContext`), spec.md §6.2.
//!
//! Header: `uuid[16]; session_id u32; cmd_id u32; returns{code u32;
//! origin u32}; login{method u32; mdata u32}; paramTypes u32; started u8`,
//! followed by four parameter chunks (memref or value, picked by the
//! corresponding 4-bit slot of `param_types`).

use std::fs;
use std::path::Path;

use crate::bytes_io::{put_lv, put_u32, put_u8, read_lv, read_u32, read_u8};
use crate::call::{Call, CoverageTuple, Param, ParamType};
use crate::error::{Result, TeezzError};
use crate::mutate::template_mutator::TemplateMutator;
use crate::template::{SeedTemplate, SeedTemplateElement};

/// `TEEC_ERROR_TARGET_DEAD`, shared crash signal across variants.
pub const TARGET_DEAD: u32 = 0xFFFF_3024;
const SUCCESS: u32 = 0;

#[derive(Debug, Clone)]
pub struct TriangleCall {
    pub uuid: [u8; 16],
    pub session_id: u32,
    pub cmd_id: u32,
    pub return_code: u32,
    pub return_origin: u32,
    pub login_method: u32,
    pub login_mdata: u32,
    pub started: u8,
    params: [Param; 4],
}

impl TriangleCall {
    pub fn new(cmd_id: u32) -> Self {
        TriangleCall {
            uuid: [0; 16],
            session_id: 0,
            cmd_id,
            return_code: 0,
            return_origin: 0,
            login_method: 0,
            login_mdata: 0,
            started: 0,
            params: [Param::none(), Param::none(), Param::none(), Param::none()],
        }
    }

    fn param_types_mask(&self) -> u32 {
        let mut mask = 0u32;
        for (i, p) in self.params.iter().enumerate() {
            mask |= (p.kind.to_nibble() as u32) << (4 * i);
        }
        mask
    }

    fn header_template() -> SeedTemplate {
        let mut t = SeedTemplate::new(41);
        let _ = t.add_elem(SeedTemplateElement::new(0, 16, "uint8_t*"));
        let _ = t.add_elem(SeedTemplateElement::new(16, 20, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(20, 24, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(24, 28, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(28, 32, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(32, 36, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(36, 40, "uint32_t"));
        let _ = t.add_elem(SeedTemplateElement::new(40, 41, "bool"));
        t
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(41);
        buf.extend_from_slice(&self.uuid);
        put_u32(&mut buf, self.session_id);
        put_u32(&mut buf, self.cmd_id);
        put_u32(&mut buf, self.return_code);
        put_u32(&mut buf, self.return_origin);
        put_u32(&mut buf, self.login_method);
        put_u32(&mut buf, self.login_mdata);
        put_u8(&mut buf, self.started);
        buf
    }

    fn apply_header_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() < 41 {
            return Err(TeezzError::MalformedResponse {
                declared: 41,
                received: bytes.len(),
            });
        }
        self.uuid.copy_from_slice(&bytes[0..16]);
        self.session_id = read_u32(bytes, 16)?;
        self.cmd_id = read_u32(bytes, 20)?;
        self.return_code = read_u32(bytes, 24)?;
        self.return_origin = read_u32(bytes, 28)?;
        self.login_method = read_u32(bytes, 32)?;
        self.login_mdata = read_u32(bytes, 36)?;
        self.started = read_u8(bytes, 40)?;
        Ok(())
    }
}

impl Call for TriangleCall {
    fn variant_name(&self) -> &'static str {
        "triangle"
    }

    fn is_success(&self) -> bool {
        self.return_code == SUCCESS
    }

    fn is_crash(&self) -> bool {
        self.return_code == TARGET_DEAD
    }

    fn coverage(&self) -> CoverageTuple {
        CoverageTuple(
            self.cmd_id as i64,
            self.param_types_mask() as i64,
            self.return_code as i64,
            self.return_origin as i64,
        )
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
        put_u32(&mut buf, self.param_types_mask());
        for p in &self.params {
            put_lv(&mut buf, &p.buffer);
        }
        buf
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Box<dyn Call>> {
        let mut out = self.clone();
        out.apply_header_bytes(bytes)?;
        let mut off = 41;
        let mask = read_u32(bytes, off)?;
        off += 4;
        for (i, p) in out.params.iter_mut().enumerate() {
            let kind = ParamType::from_nibble((mask >> (4 * i)) as u8);
            if kind.is_output() {
                let (chunk, next) = read_lv(bytes, off)?;
                p.buffer = chunk.to_vec();
                p.kind = kind;
                off = next;
            } else {
                let (_chunk, next) = read_lv(bytes, off)?;
                off = next;
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
        let mut call = TriangleCall::new(0);
        call.apply_header_bytes(&header)?;
        for i in 0..4 {
            let p = dir.join(format!("param_{i}"));
            if p.exists() {
                call.params[i] = Param::memref(ParamType::MemrefTempIn, fs::read(&p).map_err(|e| TeezzError::io(&p, e))?);
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
    fn r1_round_trips_through_response_codec() {
        let mut call = TriangleCall::new(0x1234);
        call.session_id = 7;
        call.params[0] = Param::memref(ParamType::MemrefTempOut, vec![1, 2, 3, 4]);
        let wire = call.serialize();

        // Build a well-formed response with the same shape as `wire`.
        let response = wire.clone();
        let decoded = call.deserialize_response(&response).unwrap();
        assert_eq!(decoded.params()[0].buffer, vec![1, 2, 3, 4]);
    }

    #[test]
    fn crash_detection_uses_target_dead() {
        let mut call = TriangleCall::new(1);
        call.return_code = TARGET_DEAD;
        assert!(call.is_crash());
        assert!(!call.is_success());
    }

    #[test]
    fn on_disk_round_trip_preserves_header_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut call = TriangleCall::new(42);
        call.session_id = 99;
        call.serialize_to_path(dir.path()).unwrap();
        let loaded = TriangleCall::deserialize_raw_from_path(dir.path()).unwrap();
        assert_eq!(loaded.coverage().0, 42);
    }
}
