//! Bidirectional worker/server channel.
//!
//! One channel per worker, one POSIX segment per channel. The layout is POD
//! with fixed offsets and no indirection — both sides map the same bytes and
//! must agree on every field position.

use std::sync::atomic::{AtomicBool, Ordering};

use super::shm::ShmSegment;
use super::spsc::SpscRing;
use super::CachePadded;

/// The complete bidirectional pathway between one worker and the server:
/// a request ring (worker produces, server consumes), a response ring
/// (server produces, worker consumes), and two liveness flags.
#[repr(C)]
pub struct Channel {
    request: SpscRing,
    response: SpscRing,
    /// Set true by the worker on attach, false on clean detach.
    client_connected: CachePadded<AtomicBool>,
    /// Set true by the server once it has adopted the channel.
    server_ready: CachePadded<AtomicBool>,
}

// SAFETY: both rings carry their own SPSC soundness argument and the flags
// are atomics; the struct holds no process-local pointers.
unsafe impl Sync for Channel {}

impl Channel {
    /// Reset the whole channel in place. Creator-side (the worker) only.
    pub fn init(&self) {
        self.request.init();
        self.response.init();
        self.client_connected.0.store(false, Ordering::Relaxed);
        self.server_ready.0.store(false, Ordering::Relaxed);
    }

    /// Ring carrying worker → server request records.
    #[inline]
    pub fn request_ring(&self) -> &SpscRing {
        &self.request
    }

    /// Ring carrying server → worker response records.
    #[inline]
    pub fn response_ring(&self) -> &SpscRing {
        &self.response
    }

    #[inline]
    pub fn is_client_connected(&self) -> bool {
        self.client_connected.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_client_connected(&self, connected: bool) {
        self.client_connected.0.store(connected, Ordering::Release);
    }

    #[inline]
    pub fn is_server_ready(&self) -> bool {
        self.server_ready.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_server_ready(&self, ready: bool) {
        self.server_ready.0.store(ready, Ordering::Release);
    }
}

impl ShmSegment for Channel {
    fn init(&self) {
        Channel::init(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CACHE_LINE, MSG_CAPACITY};
    use crate::ipc::shm::ShmRegion;

    fn unique_name(tag: &str) -> String {
        format!("/ksched_test_chan_{}_{}", tag, std::process::id())
    }

    #[test]
    fn layout_is_stable() {
        assert_eq!(
            std::mem::size_of::<Channel>(),
            2 * std::mem::size_of::<SpscRing>() + 2 * CACHE_LINE
        );
    }

    #[test]
    fn init_clears_flags_and_rings() {
        let name = unique_name("init");
        let region = ShmRegion::<Channel>::create(&name).unwrap();
        let chan = region.get();
        assert!(!chan.is_client_connected());
        assert!(!chan.is_server_ready());
        assert!(chan.request_ring().is_empty());
        assert!(chan.response_ring().is_empty());
        drop(region);
        let _ = ShmRegion::<Channel>::unlink(&name);
    }

    #[test]
    fn flags_round_trip() {
        let name = unique_name("flags");
        let region = ShmRegion::<Channel>::create(&name).unwrap();
        let chan = region.get();
        chan.set_client_connected(true);
        chan.set_server_ready(true);
        assert!(chan.is_client_connected());
        assert!(chan.is_server_ready());
        chan.set_client_connected(false);
        assert!(!chan.is_client_connected());
        drop(region);
        let _ = ShmRegion::<Channel>::unlink(&name);
    }

    #[test]
    fn rings_are_independent() {
        let name = unique_name("rings");
        let region = ShmRegion::<Channel>::create(&name).unwrap();
        let chan = region.get();
        chan.request_ring().try_push(b"req").unwrap();
        assert!(chan.response_ring().is_empty());

        let mut buf = [0u8; MSG_CAPACITY];
        let len = chan.request_ring().try_pop(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"req");
        drop(region);
        let _ = ShmRegion::<Channel>::unlink(&name);
    }
}
