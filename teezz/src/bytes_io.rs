//! Little-endian pack/unpack helpers and length-prefixed framing shared by
//! the wire protocol, the on-disk codecs, and the session metadata blob.
//!
//! Mirrors the role of the original `fuzz/const.py` pack helpers (`p8`,
//! `p32`, ...) but expressed as plain functions over `&mut Vec<u8>` /
//! `&[u8]`, matching the teacher's `bytes::BytesMut` based framing instead
//! of returning freshly allocated byte strings per call.

use crate::error::{Result, TeezzError};

pub fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Appends a `u32` length prefix followed by `data`.
pub fn put_lv(buf: &mut Vec<u8>, data: &[u8]) {
    put_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

pub fn read_u8(data: &[u8], off: usize) -> Result<u8> {
    data.get(off).copied().ok_or_else(|| TeezzError::MalformedResponse {
        declared: off + 1,
        received: data.len(),
    })
}

pub fn read_u32(data: &[u8], off: usize) -> Result<u32> {
    let s = data.get(off..off + 4).ok_or_else(|| TeezzError::MalformedResponse {
        declared: off + 4,
        received: data.len(),
    })?;
    Ok(u32::from_le_bytes(s.try_into().unwrap()))
}

pub fn read_u64(data: &[u8], off: usize) -> Result<u64> {
    let s = data.get(off..off + 8).ok_or_else(|| TeezzError::MalformedResponse {
        declared: off + 8,
        received: data.len(),
    })?;
    Ok(u64::from_le_bytes(s.try_into().unwrap()))
}

/// Reads a `(u32 len, len bytes)` record starting at `off`, returning the
/// payload slice and the offset just past it.
pub fn read_lv(data: &[u8], off: usize) -> Result<(&[u8], usize)> {
    let len = read_u32(data, off)? as usize;
    let start = off + 4;
    let end = start + len;
    let payload = data.get(start..end).ok_or_else(|| TeezzError::MalformedResponse {
        declared: len,
        received: data.len().saturating_sub(start),
    })?;
    Ok((payload, end))
}

/// Returns true if `v` is printable ASCII (used by the size/offset and
/// common-subsequence heuristics in the format-recovery pipeline).
pub fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

pub fn is_printable_run(data: &[u8]) -> bool {
    !data.is_empty() && data.iter().all(|&b| is_printable(b))
}

pub fn is_all_zero(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lv_round_trips() {
        let mut buf = Vec::new();
        put_lv(&mut buf, b"hello");
        let (payload, next) = read_lv(&buf, 0).unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(next, buf.len());
    }

    #[test]
    fn read_lv_rejects_truncated_payload() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 10);
        buf.extend_from_slice(b"short");
        assert!(read_lv(&buf, 0).is_err());
    }

    #[test]
    fn printable_run_rejects_binary() {
        assert!(is_printable_run(b"HELLO"));
        assert!(!is_printable_run(&[0x00, 0x01, 0x02]));
        assert!(!is_printable_run(&[]));
    }
}
