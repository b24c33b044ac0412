// netbuf.rs — bounded byte buffer with typed write/read cursors
//
// Wire messages are built into a fixed-capacity buffer so an oversized
// payload is caught at encode time instead of fragmenting on the wire.
// Reads are bounds-checked and return WireError on truncation.

use crate::math::Vec3;
use thiserror::Error;

/// Maximum datagram payload we will ever build or accept.
pub const MAX_PACKET_LEN: usize = 1400;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("read past end of message ({wanted} bytes at offset {offset}, {len} total)")]
    Truncated {
        wanted: usize,
        offset: usize,
        len: usize,
    },
    #[error("string payload is not valid utf-8")]
    BadString,
    #[error("unknown packet kind {0}")]
    BadKind(u8),
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("message overflowed its buffer")]
    Overflow,
}

/// Growable up to `max` then overflowed. Write side of the codec.
#[derive(Debug, Clone)]
pub struct NetBuf {
    data: Vec<u8>,
    max: usize,
    pub overflowed: bool,
}

impl NetBuf {
    pub fn new(max: usize) -> Self {
        Self {
            data: Vec::with_capacity(max.min(MAX_PACKET_LEN)),
            max,
            overflowed: false,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.overflowed = false;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn write_bytes(&mut self, src: &[u8]) {
        if self.data.len() + src.len() > self.max {
            self.overflowed = true;
            return;
        }
        self.data.extend_from_slice(src);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_vec3(&mut self, v: &Vec3) {
        self.write_f32(v[0]);
        self.write_f32(v[1]);
        self.write_f32(v[2]);
    }

    /// Length-prefixed string, 16-bit length.
    pub fn write_str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let len = bytes.len().min(u16::MAX as usize);
        self.write_u16(len as u16);
        self.write_bytes(&bytes[..len]);
    }
}

/// Read side of the codec.
pub struct NetReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> NetReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.data.len() {
            return Err(WireError::Truncated {
                wanted: n,
                offset: self.pos,
                len: self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, WireError> {
        Ok([self.read_f32()?, self.read_f32()?, self.read_f32()?])
    }

    pub fn read_str(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadString)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let mut buf = NetBuf::new(64);
        buf.write_u8(200);
        buf.write_u16(40000);
        buf.write_u32(0x12345678);
        buf.write_i64(-1_234_567_890_123);
        buf.write_f32(3.25);
        assert!(!buf.overflowed);

        let mut r = NetReader::new(buf.as_slice());
        assert_eq!(r.read_u8().unwrap(), 200);
        assert_eq!(r.read_u16().unwrap(), 40000);
        assert_eq!(r.read_u32().unwrap(), 0x12345678);
        assert_eq!(r.read_i64().unwrap(), -1_234_567_890_123);
        assert_eq!(r.read_f32().unwrap(), 3.25);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_vec3_round_trip_exact() {
        let v = [10.0, -0.5, 1234.125];
        let mut buf = NetBuf::new(64);
        buf.write_vec3(&v);
        let mut r = NetReader::new(buf.as_slice());
        assert_eq!(r.read_vec3().unwrap(), v);
    }

    #[test]
    fn test_str_round_trip() {
        let mut buf = NetBuf::new(256);
        buf.write_str("");
        buf.write_str("lap=2;boost=0.75");
        let mut r = NetReader::new(buf.as_slice());
        assert_eq!(r.read_str().unwrap(), "");
        assert_eq!(r.read_str().unwrap(), "lap=2;boost=0.75");
    }

    #[test]
    fn test_truncated_read() {
        let mut buf = NetBuf::new(8);
        buf.write_u16(7);
        let mut r = NetReader::new(buf.as_slice());
        assert_eq!(r.read_u16().unwrap(), 7);
        assert!(matches!(r.read_u32(), Err(WireError::Truncated { .. })));
    }

    #[test]
    fn test_overflow_sets_flag_and_drops_write() {
        let mut buf = NetBuf::new(4);
        buf.write_u32(1);
        assert!(!buf.overflowed);
        buf.write_u8(2);
        assert!(buf.overflowed);
        assert_eq!(buf.len(), 4);
    }
}
