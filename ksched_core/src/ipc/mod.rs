//! Shared-memory IPC primitives.
//!
//! Everything in this module is built around POD structs that live inside
//! mapped POSIX shared-memory segments and are operated on concurrently by
//! two unrelated processes. Coordination is entirely lock-free: atomic
//! counters and flags with explicit acquire/release ordering, plus a single
//! compare-and-swap for registry slot claims. No cross-process mutex exists
//! anywhere in the system.

pub mod channel;
pub mod registry;
pub mod shm;
pub mod spsc;

pub use channel::Channel;
pub use registry::{ClientInfo, Registry, RegistryEntry};
pub use shm::{ShmRegion, ShmSegment};
pub use spsc::SpscRing;

use crate::config::CACHE_LINE;

/// Cache-line aligned wrapper to prevent false sharing between the
/// producer- and consumer-owned halves of a shared structure.
#[repr(C, align(64))]
pub(crate) struct CachePadded<T>(pub T);

// Keep the declared alignment honest if CACHE_LINE is ever retuned.
const _: () = assert!(std::mem::align_of::<CachePadded<u64>>() == CACHE_LINE);

/// Milliseconds on the monotonic clock, for heartbeat stamps that must be
/// comparable across processes on one host.
pub(crate) fn monotonic_ms() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer; CLOCK_MONOTONIC is always available
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1000 + (ts.tv_nsec as u64) / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ms_advances() {
        let a = monotonic_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = monotonic_ms();
        assert!(b >= a + 4);
    }
}
