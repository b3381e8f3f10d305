//! Executor wire protocol constants and session metadata (spec.md §6.1).
//! Grounded on `original_source/fuzz/const.py` (`TEEZZ_CMD`, `TEEID`) and
//! `fuzz/runner/sessionmeta.py` (`SessionMetaData.serialize`).

use crate::bytes_io::{put_lv, put_u32, put_u8};

pub const CMD_START: u8 = 0x01;
pub const CMD_SEND: u8 = 0x02;
pub const CMD_END: u8 = 0x03;
pub const CMD_TERMINATE: u8 = 0x04;

/// Synthesized/observed status words on the `SEND` response (spec.md
/// §4.5). `TIMEOUT` is never sent by the executor — the host synthesizes
/// it locally on a socket read deadline or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    Success,
    Error,
    Timeout,
}

pub const STATUS_SUCCESS: u32 = 42;
pub const STATUS_ERROR: u32 = 1;

impl RunnerStatus {
    pub fn from_wire(word: u32) -> RunnerStatus {
        match word {
            STATUS_SUCCESS => RunnerStatus::Success,
            _ => RunnerStatus::Error,
        }
    }
}

/// One `(key, value)` record of the session metadata blob: `(u8 key_len,
/// key_bytes, u32 val_len, val_bytes)`.
pub struct SessionMetaData {
    fields: Vec<(String, Vec<u8>)>,
}

impl SessionMetaData {
    pub fn new() -> Self {
        SessionMetaData { fields: Vec::new() }
    }

    pub fn set(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    pub fn set_u32(self, key: impl Into<String>, value: u32) -> Self {
        self.set(key, value.to_le_bytes().to_vec())
    }

    /// Builds the metadata for the recognized keys of a given variant
    /// (spec.md §6.1 table). `uuid` is expected to be exactly 16 bytes.
    pub fn for_variant(variant: &str, uuid: Option<[u8; 16]>, extra: &[(&str, Vec<u8>)]) -> SessionMetaData {
        let mut meta = SessionMetaData::new();
        match variant {
            "optee" => {
                if let Some(uuid) = uuid {
                    meta = meta.set("uuid", uuid.to_vec());
                }
            }
            "triangle" => {
                if let Some(uuid) = uuid {
                    meta = meta.set("uuid", uuid.to_vec());
                }
                for (k, v) in extra {
                    meta = meta.set(*k, v.clone());
                }
            }
            "qsee" => {
                for (k, v) in extra {
                    meta = meta.set(*k, v.clone());
                }
            }
            _ => {}
        }
        meta
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (key, value) in &self.fields {
            let key_bytes = key.as_bytes();
            put_u8(&mut buf, key_bytes.len() as u8);
            buf.extend_from_slice(key_bytes);
            put_lv(&mut buf, value);
        }
        buf
    }
}

impl Default for SessionMetaData {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a command byte and its length-prefixed payload into a single
/// frame ready to write to the executor socket.
pub fn frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + payload.len());
    put_u8(&mut buf, cmd);
    put_u32(&mut buf, payload.len() as u32);
    buf.extend_from_slice(payload);
    buf
}
