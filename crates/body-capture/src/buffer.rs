//! Fixed-capacity accumulators for captured bodies.
//!
//! Overflow is a truncation policy, not an error: once a buffer is full,
//! further input is dropped silently and callers keep streaming.

use std::{fmt, io};

use crate::charset::Charset;

/// Byte accumulator that never holds more than `capacity` bytes.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    capacity: usize,
    charset: Charset,
}

impl BoundedBuffer {
    pub fn new(capacity: usize, charset: Charset) -> Self {
        Self::with_initial(capacity, 0, charset)
    }

    /// Pre-allocates `initial` bytes, clamped to `capacity`.
    pub fn with_initial(capacity: usize, initial: usize, charset: Charset) -> Self {
        Self {
            data: Vec::with_capacity(initial.min(capacity)),
            capacity,
            charset,
        }
    }

    /// Append as much of `bytes` as fits. Returns the number accepted.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.remaining());
        if accepted == 0 {
            return 0;
        }
        let needed = self.data.len() + accepted;
        if needed > self.data.capacity() {
            self.data.reserve_exact(needed - self.data.len());
        }
        self.data.extend_from_slice(&bytes[..accepted]);
        accepted
    }

    pub fn write_byte(&mut self, byte: u8) -> bool {
        self.write(&[byte]) == 1
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Render with the buffer's own charset.
    pub fn render(&self) -> String {
        self.charset.decode(&self.data)
    }

    pub fn render_as(&self, charset: Charset) -> String {
        charset.decode(&self.data)
    }

    /// Empty the buffer, keeping its allocation.
    pub fn reset(&mut self) {
        self.data.clear();
    }
}

/// Accepts everything; overflow is dropped, never reported.
impl io::Write for BoundedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BoundedBuffer::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Character accumulator bounded by a count of `char`s.
#[derive(Debug, Clone)]
pub struct BoundedCharBuffer {
    data: String,
    chars: usize,
    capacity: usize,
}

impl BoundedCharBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::with_initial(capacity, 0)
    }

    pub fn with_initial(capacity: usize, initial: usize) -> Self {
        Self {
            data: String::with_capacity(initial.min(capacity)),
            chars: 0,
            capacity,
        }
    }

    /// Append as many leading chars of `s` as fit. Returns the count accepted.
    pub fn write_str(&mut self, s: &str) -> usize {
        let remaining = self.remaining();
        if remaining == 0 || s.is_empty() {
            return 0;
        }
        let (taken, accepted) = match s.char_indices().nth(remaining) {
            Some((end, _)) => (&s[..end], remaining),
            None => (s, s.chars().count()),
        };
        self.data.push_str(taken);
        self.chars += accepted;
        accepted
    }

    pub fn write_char(&mut self, c: char) -> bool {
        if self.remaining() == 0 {
            return false;
        }
        self.data.push(c);
        self.chars += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.chars == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.chars
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn render(&self) -> String {
        self.data.clone()
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.chars = 0;
    }
}

impl fmt::Write for BoundedCharBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        BoundedCharBuffer::write_str(self, s);
        Ok(())
    }
}

/// Either kind of buffer, as held by a capture context.
#[derive(Debug, Clone)]
pub enum BodyBuffer {
    Bytes(BoundedBuffer),
    Chars(BoundedCharBuffer),
}

impl BodyBuffer {
    /// Bytes written to a character buffer are decoded with `charset` first.
    pub fn write_bytes(&mut self, bytes: &[u8], charset: Charset) {
        match self {
            BodyBuffer::Bytes(buffer) => {
                buffer.write(bytes);
            }
            BodyBuffer::Chars(buffer) => {
                buffer.write_str(&charset.decode(bytes));
            }
        }
    }

    /// Text written to a byte buffer is stored as UTF-8.
    pub fn write_str(&mut self, s: &str) {
        match self {
            BodyBuffer::Bytes(buffer) => {
                buffer.write(s.as_bytes());
            }
            BodyBuffer::Chars(buffer) => {
                buffer.write_str(s);
            }
        }
    }

    pub fn render(&self, charset: Charset) -> String {
        match self {
            BodyBuffer::Bytes(buffer) => buffer.render_as(charset),
            BodyBuffer::Chars(buffer) => buffer.render(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BodyBuffer::Bytes(buffer) => buffer.len(),
            BodyBuffer::Chars(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&mut self) {
        match self {
            BodyBuffer::Bytes(buffer) => buffer.reset(),
            BodyBuffer::Chars(buffer) => buffer.reset(),
        }
    }
}
