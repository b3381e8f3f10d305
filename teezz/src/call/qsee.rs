//! Qualcomm QSEE variant (`SendCmdReq` / `ModfdCmdReq`), spec.md §6.2.
//!
//! Unlike Triangle/Optee there is no fixed four-slot parameter array: the
//! shape is a request buffer and a response buffer (`req_len`/`req_bytes`,
//! `resp_len`/`resp_bytes`), with an optional third shared-buffer region
//! for the `ModfdCmdReq` variant. We model these as `Param` slots 0
//! (request, memref-in), 1 (response, memref-out), and an optional slot 2
//! (shared buffer, memref-inout) so the rest of the crate can treat a
//! `QseeCall` exactly like the other two variants.
//!
//! QSEE responses embed their own command status as the first four bytes
//! of the response buffer; we surface it as `self.ret` rather than
//! inventing a header field the original wire format does not have.

use std::fs;
use std::path::Path;

use crate::bytes_io::{put_lv, read_lv, read_u32};
use crate::call::{Call, CoverageTuple, Param, ParamType};
use crate::error::{Result, TeezzError};
use crate::mutate::template_mutator::TemplateMutator;
use crate::template::SeedTemplate;

pub const QSEE_TARGET_DEAD: u32 = 0xFFFF_3024;
const QSEE_SUCCESS: u32 = 0;

#[derive(Debug, Clone)]
pub struct QseeCall {
    pub ret: u32,
    has_shared_buffer: bool,
    params: Vec<Param>,
}

impl QseeCall {
    pub fn new() -> Self {
        QseeCall {
            ret: 0,
            has_shared_buffer: false,
            params: vec![
                Param::memref(ParamType::MemrefTempIn, Vec::new()),
                Param::memref(ParamType::MemrefTempOut, Vec::new()),
            ],
        }
    }

    pub fn with_shared_buffer() -> Self {
        let mut c = Self::new();
        c.has_shared_buffer = true;
        c.params.push(Param::memref(ParamType::MemrefTempInout, Vec::new()));
        c
    }
}

impl Default for QseeCall {
    fn default() -> Self {
        Self::new()
    }
}

impl Call for QseeCall {
    fn variant_name(&self) -> &'static str {
        "qsee"
    }

    fn is_success(&self) -> bool {
        self.ret == QSEE_SUCCESS
    }

    fn is_crash(&self) -> bool {
        self.ret == QSEE_TARGET_DEAD
    }

    fn coverage(&self) -> CoverageTuple {
        // Qsee has no command-id/origin header fields on the wire; fold
        // the request length in as a rough command-shape discriminator.
        CoverageTuple(self.params[0].buffer.len() as i64, 0, self.ret as i64, 0)
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
        let mut buf = Vec::new();
        put_lv(&mut buf, &self.params[0].buffer);
        put_lv(&mut buf, &self.params[1].buffer);
        if self.has_shared_buffer {
            put_lv(&mut buf, &self.params[2].buffer);
        }
        buf
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Box<dyn Call>> {
        let mut out = self.clone();
        let (_req_echo, mut off) = read_lv(bytes, 0)?;
        let (resp, next) = read_lv(bytes, off)?;
        off = next;
        out.ret = if resp.len() >= 4 { read_u32(resp, 0)? } else { 0 };
        out.params[1].buffer = resp.to_vec();
        if out.has_shared_buffer {
            let (sbuf, _next) = read_lv(bytes, off)?;
            out.params[2].buffer = sbuf.to_vec();
        }
        Ok(Box::new(out))
    }

    fn serialize_to_path(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| TeezzError::io(dir, e))?;
        fs::write(dir.join("req"), &self.params[0].buffer).map_err(|e| TeezzError::io(dir, e))?;
        fs::write(dir.join("resp"), &self.params[1].buffer).map_err(|e| TeezzError::io(dir, e))?;
        if self.has_shared_buffer {
            fs::write(dir.join("sbuf"), &self.params[2].buffer).map_err(|e| TeezzError::io(dir, e))?;
        }
        Ok(())
    }

    fn deserialize_raw_from_path(dir: &Path) -> Result<Box<dyn Call>> {
        let mut call = QseeCall::new();
        let req_path = dir.join("req");
        let resp_path = dir.join("resp");
        call.params[0].buffer = fs::read(&req_path).map_err(|e| TeezzError::io(&req_path, e))?;
        call.params[1].buffer = fs::read(&resp_path).map_err(|e| TeezzError::io(&resp_path, e))?;
        if call.params[1].buffer.len() >= 4 {
            call.ret = read_u32(&call.params[1].buffer, 0)?;
        }
        let sbuf_path = dir.join("sbuf");
        if sbuf_path.exists() {
            call.has_shared_buffer = true;
            call.params.push(Param::memref(
                ParamType::MemrefTempInout,
                fs::read(&sbuf_path).map_err(|e| TeezzError::io(&sbuf_path, e))?,
            ));
        }
        Ok(Box::new(call))
    }

    fn mutate_header(&mut self, _mutator: &mut TemplateMutator) {
        // Qsee carries no fixed, non-parameter header fields to mutate;
        // intentionally a no-op, unlike Triangle/Optee.
        let _unused: Option<&SeedTemplate> = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_request_and_response_buffers() {
        let mut call = QseeCall::new();
        call.params[0].buffer = vec![1, 2, 3, 4];
        let wire = call.serialize();

        let mut resp_with_status = vec![0u8, 0, 0, 0];
        resp_with_status.extend_from_slice(b"payload");
        let mut response = Vec::new();
        put_lv(&mut response, &call.params[0].buffer);
        put_lv(&mut response, &resp_with_status);

        let decoded = call.deserialize_response(&response).unwrap();
        assert!(decoded.is_success());
        assert_eq!(decoded.params()[1].buffer, resp_with_status);
        assert!(!wire.is_empty());
    }

    #[test]
    fn target_dead_status_in_response_is_a_crash() {
        let call = QseeCall::new();
        let mut resp = QSEE_TARGET_DEAD.to_le_bytes().to_vec();
        resp.extend_from_slice(b"x");
        let mut response = Vec::new();
        put_lv(&mut response, &[]);
        put_lv(&mut response, &resp);
        let decoded = call.deserialize_response(&response).unwrap();
        assert!(decoded.is_crash());
    }
}
