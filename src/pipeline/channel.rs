//! Bounded single-reader queue with drop-oldest overflow.

use super::cancel::CancelToken;
use crate::audio::ring_buffer::RingBuffer;
use crate::error::{AnalyzerError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Wake-up interval of an idle reader so it can observe cancellation.
const POLL_BACKOFF: Duration = Duration::from_millis(50);

/// Result of a [`DropOldestChannel::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queued after evicting the oldest pending item.
    EvictedOldest,
    Closed,
}

struct ChannelState<T> {
    queue: RingBuffer<T>,
    closed: bool,
}

/// Producers never wait on consumers: a full queue drops its stalest entry so
/// the newest data always gets in.
pub struct DropOldestChannel<T> {
    state: Mutex<ChannelState<T>>,
    available: Condvar,
    dropped: AtomicU64,
}

impl<T> DropOldestChannel<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AnalyzerError::InvalidCapacity);
        }

        Ok(Self {
            state: Mutex::new(ChannelState {
                queue: RingBuffer::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueues `item`, evicting the oldest entry when full. The reader only
    /// holds the lock for a pop, so this never waits on consumer work.
    pub fn send(&self, item: T) -> SendOutcome {
        let mut state = self.state.lock();
        if state.closed {
            return SendOutcome::Closed;
        }

        let evicted = state.queue.push_evicting(item);
        drop(state);
        self.available.notify_one();

        match evicted {
            Some(stale) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                drop(stale);
                SendOutcome::EvictedOldest
            }
            None => SendOutcome::Queued,
        }
    }

    /// Waits for the next item in FIFO order.
    ///
    /// Returns `None` once `token` is cancelled, or once the channel is
    /// closed and empty.
    pub fn recv(&self, token: &CancelToken) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if token.is_cancelled() {
                return None;
            }
            if let Some(item) = state.queue.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait_for(&mut state, POLL_BACKOFF);
        }
    }

    /// Rejects further sends and wakes the reader. Queued items stay readable.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Removes everything still queued.
    pub fn drain(&self) -> Vec<T> {
        self.state.lock().queue.drain()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().queue.capacity()
    }

    /// Items evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for DropOldestChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropOldestChannel")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            DropOldestChannel::<u32>::new(0).unwrap_err(),
            AnalyzerError::InvalidCapacity
        );
    }

    #[test]
    fn overflow_keeps_the_newest_items() {
        let capacity = 10;
        let extra = 7;
        let channel = DropOldestChannel::new(capacity).unwrap();
        for tag in 0..capacity + extra {
            let expected = if tag < capacity {
                SendOutcome::Queued
            } else {
                SendOutcome::EvictedOldest
            };
            assert_eq!(channel.send(tag), expected);
        }
        assert_eq!(channel.dropped(), extra as u64);

        let token = CancelToken::new();
        channel.close();
        let mut observed = Vec::new();
        while let Some(tag) = channel.recv(&token) {
            observed.push(tag);
        }
        assert_eq!(observed, (extra..capacity + extra).collect::<Vec<_>>());
    }

    #[test]
    fn closed_channel_rejects_sends_but_drains() {
        let channel = DropOldestChannel::new(2).unwrap();
        channel.send(1);
        channel.close();
        assert_eq!(channel.send(2), SendOutcome::Closed);
        assert_eq!(channel.recv(&CancelToken::new()), Some(1));
        assert_eq!(channel.recv(&CancelToken::new()), None);
    }

    #[test]
    fn cancellation_unblocks_a_waiting_reader() {
        let channel = Arc::new(DropOldestChannel::<u32>::new(4).unwrap());
        let token = CancelToken::new();
        let reader = {
            let channel = Arc::clone(&channel);
            let token = token.clone();
            thread::spawn(move || channel.recv(&token))
        };
        thread::sleep(Duration::from_millis(20));
        let cancelled_at = Instant::now();
        token.cancel();
        assert_eq!(reader.join().unwrap(), None);
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn reader_receives_items_sent_from_another_thread() {
        let channel = Arc::new(DropOldestChannel::new(4).unwrap());
        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for tag in 0..3u32 {
                    channel.send(tag);
                }
                channel.close();
            })
        };
        let token = CancelToken::new();
        let mut observed = Vec::new();
        while let Some(tag) = channel.recv(&token) {
            observed.push(tag);
        }
        producer.join().unwrap();
        assert_eq!(observed, vec![0, 1, 2]);
    }

    #[test]
    fn sends_under_a_busy_reader_keep_the_newest_item() {
        let channel = Arc::new(DropOldestChannel::new(2).unwrap());
        let reader = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let token = CancelToken::new();
                std::iter::from_fn(|| channel.recv(&token)).collect::<Vec<u32>>()
            })
        };

        for tag in 0..500u32 {
            assert_ne!(channel.send(tag), SendOutcome::Closed);
        }
        channel.close();

        let observed = reader.join().unwrap();
        assert_eq!(observed.last(), Some(&499));
        assert!(observed.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(observed.len() as u64 + channel.dropped(), 500);
    }
}
