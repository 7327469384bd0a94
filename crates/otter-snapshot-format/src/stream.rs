//! Byte sink and source for snapshot streams
//!
//! Integers that are not embedded in a bytecode are written as unsigned
//! LEB128. Raw words are little-endian `u64`.

use crate::bytecode::Bytecode;
use crate::error::{FormatError, Result};

/// Maximum LEB128 length of a `u32`
const MAX_INT_BYTES: usize = 5;

/// Append-only output buffer
#[derive(Debug, Default, Clone)]
pub struct SnapshotSink {
    data: Vec<u8>,
}

impl SnapshotSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink with reserved capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Write a single byte
    #[inline]
    pub fn put(&mut self, byte: u8) {
        self.data.push(byte);
    }

    /// Write a bytecode
    #[inline]
    pub fn put_bytecode(&mut self, bytecode: Bytecode) -> Result<()> {
        self.data.push(bytecode.encode()?);
        Ok(())
    }

    /// Write an unsigned LEB128 integer
    pub fn put_int(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.data.push(byte);
                return;
            }
            self.data.push(byte | 0x80);
        }
    }

    /// Write a little-endian `u32` without compression
    pub fn put_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Write raw words
    pub fn put_words(&mut self, words: &[u64]) {
        self.data.reserve(words.len() * 8);
        for word in words {
            self.data.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// Write raw bytes
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Current write position
    #[inline]
    pub fn position(&self) -> usize {
        self.data.len()
    }

    /// Borrow the written bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the sink
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Cursor over a snapshot byte stream
#[derive(Debug, Clone)]
pub struct SnapshotSource<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SnapshotSource<'a> {
    /// Create a source positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current read position
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether unread bytes remain
    #[inline]
    pub fn has_more(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of unread bytes
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Read one byte
    #[inline]
    pub fn get(&mut self) -> Result<u8> {
        let byte = self.peek()?;
        self.position += 1;
        Ok(byte)
    }

    /// Look at the next byte without consuming it
    #[inline]
    pub fn peek(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(FormatError::TruncatedStream {
                offset: self.position,
                needed: 1,
            })
    }

    /// Read and decode one bytecode
    pub fn get_bytecode(&mut self) -> Result<Bytecode> {
        let offset = self.position;
        let byte = self.get()?;
        Bytecode::from_byte(byte).ok_or(FormatError::UnknownOpcode {
            opcode: byte,
            offset,
        })
    }

    /// Read an unsigned LEB128 integer
    pub fn get_int(&mut self) -> Result<u32> {
        let start = self.position;
        let mut result: u32 = 0;
        for i in 0..MAX_INT_BYTES {
            let byte = self.get()?;
            let bits = (byte & 0x7f) as u32;
            let shift = 7 * i as u32;
            if shift == 28 && bits > 0x0f {
                return Err(FormatError::IntegerOverflow(start));
            }
            result |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(FormatError::IntegerOverflow(start))
    }

    /// Read a little-endian `u32`
    pub fn get_u32(&mut self) -> Result<u32> {
        let bytes = self.get_raw(4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }

    /// Read `count` raw words
    pub fn get_words(&mut self, count: usize) -> Result<Vec<u64>> {
        let len = count
            .checked_mul(8)
            .ok_or(FormatError::IntegerOverflow(self.position))?;
        let bytes = self.get_raw(len)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                u64::from_le_bytes(buf)
            })
            .collect())
    }

    /// Read `len` raw bytes
    pub fn get_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(FormatError::TruncatedStream {
                offset: self.position,
                needed: len,
            });
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_encoding_lengths() {
        let mut sink = SnapshotSink::new();
        sink.put_int(0);
        sink.put_int(127);
        sink.put_int(128);
        sink.put_int(u32::MAX);
        assert_eq!(sink.data(), &[0x00, 0x7f, 0x80, 0x01, 0xff, 0xff, 0xff, 0xff, 0x0f]);

        let mut source = SnapshotSource::new(sink.data());
        assert_eq!(source.get_int(), Ok(0));
        assert_eq!(source.get_int(), Ok(127));
        assert_eq!(source.get_int(), Ok(128));
        assert_eq!(source.get_int(), Ok(u32::MAX));
        assert!(!source.has_more());
    }

    #[test]
    fn test_int_overflow() {
        let mut source = SnapshotSource::new(&[0xff, 0xff, 0xff, 0xff, 0x10]);
        assert_eq!(source.get_int(), Err(FormatError::IntegerOverflow(0)));

        let mut source = SnapshotSource::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert_eq!(source.get_int(), Err(FormatError::IntegerOverflow(0)));
    }

    #[test]
    fn test_truncated_reads() {
        let mut source = SnapshotSource::new(&[0x80]);
        assert_eq!(
            source.get_int(),
            Err(FormatError::TruncatedStream { offset: 1, needed: 1 })
        );

        let mut source = SnapshotSource::new(&[1, 2, 3]);
        assert_eq!(
            source.get_words(1),
            Err(FormatError::TruncatedStream { offset: 0, needed: 8 })
        );
    }

    #[test]
    fn test_words_little_endian() {
        let mut sink = SnapshotSink::new();
        sink.put_words(&[0x0102_0304_0506_0708]);
        assert_eq!(sink.data(), &[8, 7, 6, 5, 4, 3, 2, 1]);
        let mut source = SnapshotSource::new(sink.data());
        assert_eq!(source.get_words(1), Ok(vec![0x0102_0304_0506_0708]));
    }

    #[test]
    fn test_word_count_overflow() {
        let mut source = SnapshotSource::new(&[0; 8]);
        source.get().unwrap();
        assert_eq!(
            source.get_words(usize::MAX),
            Err(FormatError::IntegerOverflow(1))
        );
        assert_eq!(source.position(), 1);
    }

    #[test]
    fn test_unknown_opcode_reports_offset() {
        let mut source = SnapshotSource::new(&[0x14, 0xff]);
        assert_eq!(source.get_bytecode(), Ok(Bytecode::Nop));
        assert_eq!(
            source.get_bytecode(),
            Err(FormatError::UnknownOpcode { opcode: 0xff, offset: 1 })
        );
    }
}
