//! Bounded replay ring for sequenced JSON frames.
//!
//! Stores `(seq, payload)` pairs so a reconnecting client can receive the
//! frames it missed without the relay keeping unbounded history. Total
//! retained bytes are capped; pushing evicts from the head until the new
//! entry fits. A single frame larger than the capacity is admitted and
//! evicted by the next push.

use std::collections::VecDeque;
use std::sync::Mutex;

struct Entry {
    seq: u64,
    data: Vec<u8>,
}

struct Inner {
    frames: VecDeque<Entry>,
    total: usize,
}

/// A byte-capped FIFO of replayable frames, ordered by ascending seq.
pub struct Ring {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Ring {
    /// Create a ring retaining at most `capacity` payload bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                frames: VecDeque::new(),
                total: 0,
            }),
        }
    }

    /// Record a frame. The payload is copied; the caller's buffer may be reused.
    pub fn push(&self, seq: u64, data: &[u8]) {
        let mut inner = self.inner.lock().expect("ring lock poisoned");
        while !inner.frames.is_empty() && inner.total + data.len() > self.capacity {
            if let Some(old) = inner.frames.pop_front() {
                inner.total -= old.data.len();
            }
        }
        inner.frames.push_back(Entry {
            seq,
            data: data.to_vec(),
        });
        inner.total += data.len();
    }

    /// Return copies of every retained frame with seq > `after_seq`, in order.
    pub fn replay_from(&self, after_seq: u64) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().expect("ring lock poisoned");
        inner
            .frames
            .iter()
            .filter(|f| f.seq > after_seq)
            .map(|f| f.data.clone())
            .collect()
    }

    /// Seq of the oldest retained frame, if any.
    pub fn oldest_seq(&self) -> Option<u64> {
        let inner = self.inner.lock().expect("ring lock poisoned");
        inner.frames.front().map(|f| f.seq)
    }

    /// Total payload bytes currently retained.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().expect("ring lock poisoned").total
    }

    /// Number of retained frames.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("ring lock poisoned").frames.len()
    }

    /// Whether the ring holds no frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
