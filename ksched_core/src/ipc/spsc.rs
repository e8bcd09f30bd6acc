//! Lock-free SPSC ring buffer over shared memory.
//!
//! Exactly one process produces and exactly one process consumes; the roles
//! are assigned structurally (worker produces requests, server produces
//! responses) and never enforced at runtime. `head` and `tail` sit on
//! separate cache lines from each other and from the slot array, so the two
//! sides never invalidate each other's lines outside of real handoffs.
//!
//! Blocking variants are pure pause-spin loops — no futex, no condvar, no OS
//! sleep. Sub-microsecond wakeup is the point; callers must budget one fully
//! spinning core per blocked thread.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::shm::ShmSegment;
use super::CachePadded;
use crate::config::{MSG_CAPACITY, QUEUE_SLOTS};
use crate::error::{KschedError, KschedResult};

/// One fixed-capacity record: payload bytes followed by a NUL terminator.
type Slot = [u8; MSG_CAPACITY];

/// Bounded SPSC byte-record queue living inside a mapped segment.
///
/// Indices are stored modulo `QUEUE_SLOTS`. `head == tail` means empty;
/// `(tail + 1) % QUEUE_SLOTS == head` means full — one slot is sacrificed
/// to disambiguate the two.
#[repr(C)]
pub struct SpscRing {
    /// Consumer's next-read index. Only the consumer stores to this.
    head: CachePadded<AtomicU64>,
    /// Producer's next-write index. Only the producer stores to this.
    tail: CachePadded<AtomicU64>,
    slots: [UnsafeCell<Slot>; QUEUE_SLOTS],
}

// SAFETY: the SPSC contract makes concurrent access sound — the producer is
// the only writer of `tail` and of the slot at `tail`, the consumer is the
// only writer of `head`, and slot contents are published/consumed under the
// Release store / Acquire load pairing on the counters.
unsafe impl Sync for SpscRing {}

impl SpscRing {
    /// Reset the ring in place. Creator-side only, before the peer attaches.
    pub fn init(&self) {
        self.head.0.store(0, Ordering::Relaxed);
        self.tail.0.store(0, Ordering::Relaxed);
        for slot in &self.slots {
            // SAFETY: init runs before any peer maps the segment, so no
            // concurrent access exists yet
            unsafe {
                (*slot.get()).fill(0);
            }
        }
    }

    /// Producer: try to enqueue one record.
    ///
    /// Payloads longer than `MSG_CAPACITY - 1` bytes are silently truncated;
    /// the receiver always sees a well-formed NUL-terminated record.
    pub fn try_push(&self, payload: &[u8]) -> KschedResult<()> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let next = (tail + 1) % QUEUE_SLOTS as u64;
        if next == self.head.0.load(Ordering::Acquire) {
            return Err(KschedError::RingFull);
        }

        let len = payload.len().min(MSG_CAPACITY - 1);
        // SAFETY: single-producer contract — the slot at `tail` is outside
        // the consumer's readable window until the Release store below
        unsafe {
            let slot = &mut *self.slots[tail as usize].get();
            slot[..len].copy_from_slice(&payload[..len]);
            slot[len] = 0;
        }

        self.tail.0.store(next, Ordering::Release);
        Ok(())
    }

    /// Consumer: try to dequeue one record into `buf`.
    ///
    /// Returns the number of payload bytes copied (the NUL terminator is not
    /// copied), or `None` when the ring is empty. Records longer than `buf`
    /// are truncated to fit.
    pub fn try_pop(&self, buf: &mut [u8]) -> Option<usize> {
        let head = self.head.0.load(Ordering::Relaxed);
        if head == self.tail.0.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: single-consumer contract — the slot at `head` was fully
        // written before the producer's Release store made it visible
        let len = unsafe {
            let slot = &*self.slots[head as usize].get();
            let stored = slot.iter().position(|&b| b == 0).unwrap_or(MSG_CAPACITY - 1);
            let copy = stored.min(buf.len());
            buf[..copy].copy_from_slice(&slot[..copy]);
            copy
        };

        self.head
            .0
            .store((head + 1) % QUEUE_SLOTS as u64, Ordering::Release);
        Some(len)
    }

    /// Producer: enqueue, pause-spinning until space is available.
    ///
    /// `timeout_ms < 0` waits forever. Returns `Timeout` if the bound
    /// expires; the record is not written in that case.
    pub fn push_blocking(&self, payload: &[u8], timeout_ms: i64) -> KschedResult<()> {
        if timeout_ms < 0 {
            loop {
                if self.try_push(payload).is_ok() {
                    return Ok(());
                }
                std::hint::spin_loop();
            }
        }
        let start = Instant::now();
        loop {
            if self.try_push(payload).is_ok() {
                return Ok(());
            }
            if start.elapsed().as_millis() as i64 >= timeout_ms {
                return Err(KschedError::timeout(format!(
                    "push did not complete within {timeout_ms} ms"
                )));
            }
            std::hint::spin_loop();
        }
    }

    /// Consumer: dequeue into `buf`, pause-spinning until a record arrives.
    ///
    /// `timeout_ms < 0` waits forever. Returns the payload length copied.
    pub fn pop_blocking(&self, buf: &mut [u8], timeout_ms: i64) -> KschedResult<usize> {
        if timeout_ms < 0 {
            loop {
                if let Some(len) = self.try_pop(buf) {
                    return Ok(len);
                }
                std::hint::spin_loop();
            }
        }
        let start = Instant::now();
        loop {
            if let Some(len) = self.try_pop(buf) {
                return Ok(len);
            }
            if start.elapsed().as_millis() as i64 >= timeout_ms {
                return Err(KschedError::timeout(format!(
                    "pop did not complete within {timeout_ms} ms"
                )));
            }
            std::hint::spin_loop();
        }
    }

    /// Whether the ring currently holds no records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.0.load(Ordering::Acquire) == self.tail.0.load(Ordering::Acquire)
    }

    /// Number of records currently queued. Exact only at quiescent points.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        ((tail + QUEUE_SLOTS as u64 - head) % QUEUE_SLOTS as u64) as usize
    }
}

impl ShmSegment for SpscRing {
    fn init(&self) {
        SpscRing::init(self);
    }
}
