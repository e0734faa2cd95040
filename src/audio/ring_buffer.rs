use std::fmt;

/// Fixed-capacity FIFO that evicts its oldest entry when full.
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity > 0,
            "RingBuffer capacity must be greater than zero"
        );

        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    #[inline]
    fn slot_index(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    /// Appends `value`, returning the entry it displaced when the buffer was full.
    pub fn push_evicting(&mut self, value: T) -> Option<T> {
        if self.is_full() {
            let idx = self.head;
            self.head = self.slot_index(1);
            return self.slots[idx].replace(value);
        }

        let idx = self.slot_index(self.len);
        debug_assert!(self.slots[idx].is_none(), "tail slot must be vacant");
        self.slots[idx] = Some(value);
        self.len += 1;
        None
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let value = self.slots[self.head].take();
        self.head = self.slot_index(1);
        self.len -= 1;
        value
    }

    /// Removes every entry in FIFO order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.len);
        while let Some(value) = self.pop_front() {
            drained.push(value);
        }
        self.head = 0;
        drained
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "RingBuffer capacity must be greater than zero")]
    fn zero_capacity_panics() {
        let _buffer: RingBuffer<u8> = RingBuffer::with_capacity(0);
    }

    #[test]
    fn pops_in_arrival_order() {
        let mut buffer = RingBuffer::with_capacity(3);
        for value in 1..=3 {
            assert!(buffer.push_evicting(value).is_none());
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.pop_front(), Some(1));
        assert_eq!(buffer.pop_front(), Some(2));
        assert_eq!(buffer.pop_front(), Some(3));
        assert_eq!(buffer.pop_front(), None);
    }

    #[test]
    fn full_buffer_evicts_oldest() {
        let mut buffer = RingBuffer::with_capacity(2);
        buffer.push_evicting("a");
        buffer.push_evicting("b");
        assert_eq!(buffer.push_evicting("c"), Some("a"));
        assert_eq!(buffer.push_evicting("d"), Some("b"));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.drain(), vec!["c", "d"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn wraps_after_partial_drain() {
        let mut buffer = RingBuffer::with_capacity(3);
        buffer.push_evicting(1);
        buffer.push_evicting(2);
        buffer.pop_front();
        buffer.push_evicting(3);
        buffer.push_evicting(4);
        assert_eq!(buffer.push_evicting(5), Some(2));
        assert_eq!(buffer.drain(), vec![3, 4, 5]);
        assert!(buffer.is_empty());
        buffer.push_evicting(6);
        assert_eq!(buffer.drain(), vec![6]);
    }
}
