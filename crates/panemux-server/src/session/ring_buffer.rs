//! Circular scrollback buffer for replay on viewer attach.
//!
//! Keeps the last N bytes of pane output so a refreshed browser gets its
//! screen back without the server keeping unbounded history. Output is not
//! kept across server restarts; the multiplexer owns that.

/// Default scrollback capacity (64 KiB).
pub const DEFAULT_SCROLLBACK_SIZE: usize = 64 * 1024;

/// A fixed-capacity circular byte buffer.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    /// Next write position.
    pos: usize,
    /// Set the first time `pos` returns to zero.
    wrapped: bool,
}

impl RingBuffer {
    /// Create a new ring buffer with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            pos: 0,
            wrapped: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Append data, overwriting the oldest bytes once full.
    pub fn append(&mut self, data: &[u8]) {
        let capacity = self.buf.len();
        if capacity == 0 {
            return;
        }
        // Only the trailing `capacity` bytes can survive.
        let data = &data[data.len().saturating_sub(capacity)..];
        let mut rest = data;
        while !rest.is_empty() {
            let n = rest.len().min(capacity - self.pos);
            self.buf[self.pos..self.pos + n].copy_from_slice(&rest[..n]);
            self.pos = (self.pos + n) % capacity;
            if self.pos == 0 {
                self.wrapped = true;
            }
            rest = &rest[n..];
        }
    }

    /// Copy of the logical content, oldest byte first.
    pub fn snapshot(&self) -> Vec<u8> {
        if !self.wrapped {
            return self.buf[..self.pos].to_vec();
        }
        let mut out = Vec::with_capacity(self.buf.len());
        out.extend_from_slice(&self.buf[self.pos..]);
        out.extend_from_slice(&self.buf[..self.pos]);
        out
    }

    /// Number of valid bytes currently stored.
    pub fn len(&self) -> usize {
        if self.wrapped {
            self.buf.len()
        } else {
            self.pos
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_write_read() {
        let mut rb = RingBuffer::new(10);
        rb.append(b"hello");
        assert_eq!(rb.snapshot(), b"hello");
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn exact_fill_is_returned_whole() {
        let mut rb = RingBuffer::new(5);
        rb.append(b"abc");
        rb.append(b"de");
        assert_eq!(rb.snapshot(), b"abcde");
        rb.append(b"");
        assert_eq!(rb.snapshot(), b"abcde");
    }

    #[test]
    fn wrap_around() {
        let mut rb = RingBuffer::new(5);
        rb.append(b"abcde");
        rb.append(b"fg");
        assert_eq!(rb.snapshot(), b"cdefg");
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn oversized_write_keeps_tail() {
        let mut rb = RingBuffer::new(4);
        rb.append(b"xy");
        rb.append(b"0123456789");
        assert_eq!(rb.snapshot(), b"6789");
    }

    #[test]
    fn keeps_suffix_across_many_small_writes() {
        let mut rb = RingBuffer::new(7);
        let mut all = Vec::new();
        for i in 0..50u8 {
            let chunk: Vec<u8> = (0..(i % 4)).map(|j| i.wrapping_mul(3).wrapping_add(j)).collect();
            rb.append(&chunk);
            all.extend_from_slice(&chunk);
            let expected = &all[all.len().saturating_sub(7)..];
            assert_eq!(rb.snapshot(), expected);
        }
    }

    #[test]
    fn empty_buffer() {
        let rb = RingBuffer::new(10);
        assert!(rb.is_empty());
        assert_eq!(rb.snapshot(), Vec::<u8>::new());
    }

    #[test]
    fn zero_capacity() {
        let mut rb = RingBuffer::new(0);
        rb.append(b"test");
        assert!(rb.is_empty());
        assert!(rb.snapshot().is_empty());
    }
}
