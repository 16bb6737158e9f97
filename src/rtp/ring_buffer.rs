use std::collections::VecDeque;

/// Bounded FIFO of raw bytes. Producers never wait: `push` evicts the
/// oldest bytes instead of blocking once the buffer is at capacity.
#[derive(Debug)]
pub struct RingBuffer {
    buf: VecDeque<u8>,
    cap: usize,
}

impl RingBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Appends `data`, evicting the oldest bytes first if that would put
    /// the buffer over capacity.
    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.cap {
            self.buf.clear();
            let start = data.len() - self.cap;
            self.buf.extend(&data[start..]);
            return;
        }
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.cap);
        for _ in 0..overflow {
            self.buf.pop_front();
        }
        self.buf.extend(data);
    }

    /// Reads up to `n` bytes without blocking; returns fewer (even zero)
    /// when the buffer doesn't have enough data.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let take = n.min(self.buf.len());
        self.buf.drain(..take).collect()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_first_over_capacity() {
        let mut rb = RingBuffer::new(4);
        rb.push(&[1, 2, 3]);
        rb.push(&[4, 5]);
        assert_eq!(rb.len(), 4);
        assert_eq!(rb.read(4), vec![2, 3, 4, 5]);
    }

    #[test]
    fn push_larger_than_capacity_keeps_tail() {
        let mut rb = RingBuffer::new(3);
        rb.push(&[1, 2, 3, 4, 5]);
        assert_eq!(rb.read(3), vec![3, 4, 5]);
    }

    #[test]
    fn read_past_available_returns_only_what_exists() {
        let mut rb = RingBuffer::new(16);
        rb.push(&[1, 2]);
        assert_eq!(rb.read(10), vec![1, 2]);
        assert_eq!(rb.read(10), Vec::<u8>::new());
    }

    #[test]
    fn size_never_exceeds_cap_after_any_sequence() {
        let mut rb = RingBuffer::new(8);
        for i in 0..100u8 {
            rb.push(&[i, i.wrapping_add(1), i.wrapping_add(2)]);
            assert!(rb.len() <= 8);
            if i % 3 == 0 {
                rb.read(2);
            }
        }
    }
}
