//! Fixed-capacity circular byte buffer used to reassemble the inbound stream.
//!
//! One slot is always left empty so that `head == tail` means empty and the
//! buffer never needs a separate length counter: a buffer of capacity `C`
//! holds at most `C - 1` bytes.

/// Circular byte buffer with non-destructive peek.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    /// Next byte to read
    head: usize,
    /// Next byte to write
    tail: usize,
}

impl RingBuffer {
    /// Create a buffer of `capacity` bytes (holding at most `capacity - 1`).
    ///
    /// A capacity below 2 is raised to 2 so the buffer can hold one byte.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(2)].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// Total capacity including the reserved empty slot.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently buffered.
    pub fn data_size(&self) -> usize {
        if self.tail >= self.head {
            self.tail - self.head
        } else {
            self.buf.len() - self.head + self.tail
        }
    }

    /// Bytes that can still be written.
    pub fn free_size(&self) -> usize {
        self.buf.len() - 1 - self.data_size()
    }

    /// Whether no more bytes can be written.
    pub fn is_full(&self) -> bool {
        self.free_size() == 0
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Append `data`. Returns `false` without writing anything if it does not fit.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.len() > self.free_size() {
            return false;
        }

        let first = data.len().min(self.buf.len() - self.tail);
        self.buf[self.tail..self.tail + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        self.buf[..rest].copy_from_slice(&data[first..]);

        self.tail = (self.tail + data.len()) % self.buf.len();
        true
    }

    /// Copy the first `out.len()` buffered bytes into `out` without consuming
    /// them. Returns `false` if fewer bytes are buffered.
    pub fn peek(&self, out: &mut [u8]) -> bool {
        if out.len() > self.data_size() {
            return false;
        }

        let first = out.len().min(self.buf.len() - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.buf[..rest]);
        true
    }

    /// Drop up to `len` bytes from the front.
    pub fn consume(&mut self, len: usize) {
        let len = len.min(self.data_size());
        self.head = (self.head + len) % self.buf.len();
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn test_empty_buffer() {
        let ring = RingBuffer::new(8);
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.data_size(), 0);
        assert_eq!(ring.free_size(), 7);
        assert!(ring.is_empty());
        assert!(!ring.is_full());

        let mut out = [0u8; 1];
        assert!(!ring.peek(&mut out));
    }

    #[test]
    fn test_one_slot_stays_empty() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.write(b"1234567"));
        assert!(ring.is_full());
        assert!(!ring.write(b"8"));
        assert_eq!(ring.data_size(), 7);
    }

    #[test]
    fn test_rejected_write_leaves_buffer_untouched() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.write(b"abc"));
        assert!(!ring.write(b"defgh"));
        assert_eq!(ring.data_size(), 3);

        let mut out = [0u8; 3];
        assert!(ring.peek(&mut out));
        assert_eq!(&out, b"abc");
    }

    #[test]
    fn test_wrapping_write_and_peek() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.write(b"abcdef"));
        ring.consume(5);
        // tail is at 6; this write wraps
        assert!(ring.write(b"ghijk"));
        assert_eq!(ring.data_size(), 6);

        let mut out = [0u8; 6];
        assert!(ring.peek(&mut out));
        assert_eq!(&out, b"fghijk");

        // peek does not advance
        assert!(ring.peek(&mut out));
        assert_eq!(&out, b"fghijk");
    }

    #[test]
    fn test_consume_is_clamped() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.write(b"xyz"));
        ring.consume(100);
        assert!(ring.is_empty());
        assert_eq!(ring.free_size(), 7);
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::new(16);
        assert!(ring.write(b"leftover"));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.free_size(), 15);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(Vec<u8>),
        Consume(usize),
        Peek(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::collection::vec(any::<u8>(), 0..24).prop_map(Op::Write),
            (0usize..24).prop_map(Op::Consume),
            (0usize..24).prop_map(Op::Peek),
        ]
    }

    proptest! {
        #[test]
        fn behaves_like_a_bounded_deque(
            capacity in 2usize..32,
            ops in proptest::collection::vec(op(), 0..64),
        ) {
            let mut ring = RingBuffer::new(capacity);
            let mut model: VecDeque<u8> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Write(data) => {
                        let fits = model.len() + data.len() < capacity;
                        prop_assert_eq!(ring.write(&data), fits);
                        if fits {
                            model.extend(data);
                        }
                    }
                    Op::Consume(n) => {
                        ring.consume(n);
                        model.drain(..n.min(model.len()));
                    }
                    Op::Peek(n) => {
                        let mut out = vec![0u8; n];
                        let available = n <= model.len();
                        prop_assert_eq!(ring.peek(&mut out), available);
                        if available {
                            let expected: Vec<u8> = model.iter().take(n).copied().collect();
                            prop_assert_eq!(out, expected);
                        }
                    }
                }
                prop_assert_eq!(ring.data_size(), model.len());
                prop_assert_eq!(ring.free_size(), capacity - 1 - model.len());
            }
        }
    }
}
