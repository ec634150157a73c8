//! Little-endian binary wire codec
//!
//! [`Writer`] accumulates primitive values into a growable buffer and
//! [`Reader`] consumes them back from a fixed slice with position tracking.
//! Strings and blobs are length-prefixed with a signed 32-bit byte count.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Initial writer capacity in bytes
pub const INITIAL_CAPACITY: usize = 256;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Read out of range: needed {needed} bytes, {available} available")]
    OutOfRange { needed: usize, available: usize },
}

/// Growable little-endian writer
#[derive(Debug, Clone)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    /// Create a writer with the default 256-byte capacity
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create a writer with an explicit initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Writer {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Grow to `max(2 * capacity, required)` when `additional` bytes don't fit
    fn ensure_capacity(&mut self, additional: usize) {
        let required = self.buf.len() + additional;
        let capacity = self.buf.capacity();
        if required <= capacity {
            return;
        }
        let target = (capacity * 2).max(required);
        self.buf.reserve(target - self.buf.len());
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current buffer capacity
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Discard written data, keeping the allocation
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Borrow the written bytes
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Exact-length snapshot of the written bytes
    pub fn copy_data(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    /// Consume the writer, returning its bytes without copying
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.ensure_capacity(1);
        self.buf.put_u8(value);
    }

    pub fn put_i8(&mut self, value: i8) {
        self.ensure_capacity(1);
        self.buf.put_i8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    pub fn put_u16(&mut self, value: u16) {
        self.ensure_capacity(2);
        self.buf.put_u16_le(value);
    }

    pub fn put_i16(&mut self, value: i16) {
        self.ensure_capacity(2);
        self.buf.put_i16_le(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.ensure_capacity(4);
        self.buf.put_u32_le(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.ensure_capacity(4);
        self.buf.put_i32_le(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.ensure_capacity(8);
        self.buf.put_u64_le(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.ensure_capacity(8);
        self.buf.put_i64_le(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.ensure_capacity(4);
        self.buf.put_f32_le(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        self.ensure_capacity(8);
        self.buf.put_f64_le(value);
    }

    /// Write a string as `i32` byte length followed by UTF-8 bytes.
    ///
    /// An empty string is written as a bare `0` length.
    pub fn put_str(&mut self, value: &str) {
        if value.is_empty() {
            self.put_i32(0);
            return;
        }
        self.put_i32(value.len() as i32);
        self.put_bytes(value.as_bytes());
    }

    /// Write raw bytes without a length prefix
    pub fn put_bytes(&mut self, value: &[u8]) {
        if value.is_empty() {
            return;
        }
        self.ensure_capacity(value.len());
        self.buf.put_slice(value);
    }

    /// Write bytes prefixed with their `i32` length
    pub fn put_bytes_with_length(&mut self, value: &[u8]) {
        self.put_i32(value.len() as i32);
        self.put_bytes(value);
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential little-endian reader over a borrowed slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, position: 0 }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    pub fn available(&self) -> usize {
        self.data.len() - self.position
    }

    /// True when every byte has been consumed
    pub fn is_end(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Move the read position, clamped to the slice bounds
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.data.len());
    }

    /// Skip `count` bytes, stopping at the end of data
    pub fn skip_bytes(&mut self, count: usize) {
        self.position = self.position.saturating_add(count).min(self.data.len());
    }

    /// Borrow the unread bytes without consuming them
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let bytes = self.get_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn peek_array<const N: usize>(&self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.position..self.position + N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn get_i8(&mut self) -> Result<i8, WireError> {
        Ok(self.get_u8()? as i8)
    }

    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn get_i16(&mut self) -> Result<i16, WireError> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub fn get_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Read a length-prefixed string.
    ///
    /// A length of zero or less yields an empty string. Invalid UTF-8 is
    /// replaced rather than rejected. On a short payload the position is
    /// left where it was.
    pub fn get_str(&mut self) -> Result<String, WireError> {
        let start = self.position;
        let length = self.get_i32()?;
        if length <= 0 {
            return Ok(String::new());
        }
        match self.get_bytes(length as usize) {
            Ok(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            Err(e) => {
                self.position = start;
                Err(e)
            }
        }
    }

    /// Read exactly `length` bytes
    pub fn get_bytes(&mut self, length: usize) -> Result<&'a [u8], WireError> {
        let available = self.available();
        if length > available {
            return Err(WireError::OutOfRange {
                needed: length,
                available,
            });
        }
        let bytes = &self.data[self.position..self.position + length];
        self.position += length;
        Ok(bytes)
    }

    /// Read an `i32`-length-prefixed blob; a non-positive length is empty
    pub fn get_bytes_with_length(&mut self) -> Result<&'a [u8], WireError> {
        let start = self.position;
        let length = self.get_i32()?;
        if length <= 0 {
            return Ok(&[]);
        }
        self.get_bytes(length as usize).map_err(|e| {
            self.position = start;
            e
        })
    }

    /// Drain every unread byte
    pub fn get_remaining_bytes(&mut self) -> &'a [u8] {
        let bytes = self.remaining();
        self.position = self.data.len();
        bytes
    }

    pub fn try_get_u8(&mut self) -> Option<u8> {
        self.get_u8().ok()
    }

    pub fn try_get_bool(&mut self) -> Option<bool> {
        self.get_bool().ok()
    }

    pub fn try_get_i32(&mut self) -> Option<i32> {
        self.get_i32().ok()
    }

    pub fn try_get_str(&mut self) -> Option<String> {
        self.get_str().ok()
    }

    /// Look at the next byte without advancing
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    /// Look at the next `i32` without advancing
    pub fn peek_i32(&self) -> Option<i32> {
        self.peek_array().map(i32::from_le_bytes)
    }
}
