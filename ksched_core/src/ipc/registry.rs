//! Shared-memory client registry.
//!
//! The registry is the rendezvous point between an unbounded, dynamically
//! arriving population of workers and the single server: workers claim a
//! slot with a compare-and-swap on the entry's `active` flag — the only
//! mutual-exclusion primitive in the whole system — and the server discovers
//! them by scanning. A monotone `version` counter lets the scan short-circuit
//! when nothing changed.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use super::shm::ShmSegment;
use super::{monotonic_ms, CachePadded};
use crate::config::MAX_CLIENTS;
use crate::error::{KschedError, KschedResult};
use crate::types::FixedStr;

/// One registered client's descriptor.
///
/// The string fields are written exactly once per slot lifetime, by the
/// claimant, between the successful CAS on `active` and the version bump
/// that publishes the claim. They stay readable after unregister for
/// post-mortem inspection until the slot is reused.
#[repr(C)]
pub struct RegistryEntry {
    active: CachePadded<AtomicBool>,
    channel_name: UnsafeCell<FixedStr<64>>,
    client_type: UnsafeCell<FixedStr<16>>,
    unique_id: UnsafeCell<FixedStr<64>>,
    pid: CachePadded<AtomicI64>,
    last_heartbeat: CachePadded<AtomicU64>,
}

impl RegistryEntry {
    fn init(&self) {
        self.active.0.store(false, Ordering::Relaxed);
        // SAFETY: init runs on the creator before any peer maps the segment
        unsafe {
            *self.channel_name.get() = FixedStr::new();
            *self.client_type.get() = FixedStr::new();
            *self.unique_id.get() = FixedStr::new();
        }
        self.pid.0.store(0, Ordering::Relaxed);
        self.last_heartbeat.0.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.0.load(Ordering::Acquire)
    }
}

/// Owned snapshot of one registry entry, safe to hold outside the mapping.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub slot: usize,
    pub channel_name: String,
    pub client_type: String,
    pub unique_id: String,
    pub pid: i64,
    pub last_heartbeat_ms: u64,
}

/// Fixed table of client descriptors plus the server-ready flag and the
/// scan-gating version counter. Exactly one of these lives in the
/// per-user registry segment; it outlives individual workers.
#[repr(C)]
pub struct Registry {
    server_ready: CachePadded<AtomicBool>,
    version: CachePadded<AtomicU32>,
    entries: [RegistryEntry; MAX_CLIENTS],
}

// SAFETY: all mutable state is atomic except the descriptor strings, whose
// single-writer-per-claim protocol is documented on RegistryEntry.
unsafe impl Sync for Registry {}

impl Registry {
    /// Reset the table in place. Server-side, before `server_ready` is set.
    pub fn init(&self) {
        self.server_ready.0.store(false, Ordering::Relaxed);
        self.version.0.store(0, Ordering::Relaxed);
        for entry in &self.entries {
            entry.init();
        }
    }

    #[inline]
    pub fn is_server_ready(&self) -> bool {
        self.server_ready.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_server_ready(&self, ready: bool) {
        self.server_ready.0.store(ready, Ordering::Release);
    }

    /// Current value of the scan-gating version counter.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version.0.load(Ordering::Acquire)
    }

    /// Claim the lowest-index free slot for a new client.
    ///
    /// The CAS on `active` linearizes concurrent registrations; descriptor
    /// fields are written only by the winner, then published by the version
    /// bump. Returns `RegistryFull` after one full pass without a claim.
    pub fn register(
        &self,
        channel_name: &str,
        client_type: &str,
        unique_id: &str,
        pid: i64,
    ) -> KschedResult<usize> {
        for (slot, entry) in self.entries.iter().enumerate() {
            if entry
                .active
                .0
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: the successful CAS makes this thread the slot's
                // sole descriptor writer until unregister
                unsafe {
                    *entry.channel_name.get() = FixedStr::from_str(channel_name);
                    *entry.client_type.get() = FixedStr::from_str(client_type);
                    *entry.unique_id.get() = FixedStr::from_str(unique_id);
                }
                entry.pid.0.store(pid, Ordering::Release);
                entry.last_heartbeat.0.store(monotonic_ms(), Ordering::Release);
                self.version.0.fetch_add(1, Ordering::Release);
                return Ok(slot);
            }
        }
        Err(KschedError::RegistryFull)
    }

    /// Release a slot. Descriptor fields are deliberately left in place.
    pub fn unregister(&self, slot: usize) {
        if let Some(entry) = self.entries.get(slot) {
            entry.active.0.store(false, Ordering::Release);
            self.version.0.fetch_add(1, Ordering::Release);
        }
    }

    /// Stamp the slot's heartbeat with the current monotonic millisecond.
    pub fn update_heartbeat(&self, slot: usize) {
        if let Some(entry) = self.entries.get(slot) {
            entry.last_heartbeat.0.store(monotonic_ms(), Ordering::Release);
        }
    }

    /// Whether a slot currently holds an active registration.
    pub fn is_active(&self, slot: usize) -> bool {
        self.entries.get(slot).is_some_and(RegistryEntry::is_active)
    }

    /// Snapshot an active slot's descriptor, or `None` if inactive.
    pub fn snapshot(&self, slot: usize) -> Option<ClientInfo> {
        let entry = self.entries.get(slot)?;
        if !entry.is_active() {
            return None;
        }
        Some(self.read_descriptor(slot, entry))
    }

    /// Snapshot every active slot.
    pub fn active_clients(&self) -> Vec<ClientInfo> {
        (0..MAX_CLIENTS).filter_map(|s| self.snapshot(s)).collect()
    }

    /// Channel name recorded in a slot, active or not.
    ///
    /// Used by the server's shutdown sweep, which must unlink channel
    /// segments even for clients that already unregistered.
    pub fn recorded_channel_name(&self, slot: usize) -> Option<String> {
        let entry = self.entries.get(slot)?;
        // SAFETY: descriptor fields are only ever written by a slot claimant
        // between its CAS and version bump; this copy may observe a stale or
        // mid-reuse descriptor, which callers treat as advisory only
        let name = unsafe { *entry.channel_name.get() };
        if name.is_empty() {
            None
        } else {
            Some(name.as_str().to_string())
        }
    }

    fn read_descriptor(&self, slot: usize, entry: &RegistryEntry) -> ClientInfo {
        // SAFETY: same advisory-copy argument as recorded_channel_name; for
        // slots observed active after a version bump the fields are stable
        let (channel_name, client_type, unique_id) = unsafe {
            (
                (*entry.channel_name.get()).as_str().to_string(),
                (*entry.client_type.get()).as_str().to_string(),
                (*entry.unique_id.get()).as_str().to_string(),
            )
        };
        ClientInfo {
            slot,
            channel_name,
            client_type,
            unique_id,
            pid: entry.pid.0.load(Ordering::Acquire),
            last_heartbeat_ms: entry.last_heartbeat.0.load(Ordering::Acquire),
        }
    }
}

impl ShmSegment for Registry {
    fn init(&self) {
        Registry::init(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::shm::ShmRegion;

    fn with_registry(tag: &str, f: impl FnOnce(&Registry)) {
        let name = format!("/ksched_test_reg_{}_{}", tag, std::process::id());
        let region = ShmRegion::<Registry>::create(&name).expect("create registry segment");
        f(region.get());
        drop(region);
        let _ = ShmRegion::<Registry>::unlink(&name);
    }

    #[test]
    fn register_claims_lowest_free_slot() {
        with_registry("lowest", |reg| {
            assert_eq!(reg.register("/ks_a", "pytorch", "u1", 100).unwrap(), 0);
            assert_eq!(reg.register("/ks_b", "sglang", "u2", 101).unwrap(), 1);
            reg.unregister(0);
            assert_eq!(reg.register("/ks_c", "pytorch", "u3", 102).unwrap(), 0);
        });
    }

    #[test]
    fn version_bumps_on_every_transition() {
        with_registry("version", |reg| {
            let v0 = reg.version();
            let slot = reg.register("/ks_v", "pytorch", "u", 1).unwrap();
            let v1 = reg.version();
            assert!(v1 > v0);
            reg.unregister(slot);
            assert!(reg.version() > v1);
        });
    }

    #[test]
    fn snapshot_sees_consistent_descriptor() {
        with_registry("snapshot", |reg| {
            let slot = reg
                .register("/ks_snap", "pytorch", "worker-7", 4321)
                .unwrap();
            let info = reg.snapshot(slot).expect("slot is active");
            assert_eq!(info.channel_name, "/ks_snap");
            assert_eq!(info.client_type, "pytorch");
            assert_eq!(info.unique_id, "worker-7");
            assert_eq!(info.pid, 4321);
            assert!(info.last_heartbeat_ms > 0);
        });
    }

    #[test]
    fn snapshot_of_inactive_slot_is_none() {
        with_registry("inactive", |reg| {
            let slot = reg.register("/ks_gone", "pytorch", "u", 1).unwrap();
            reg.unregister(slot);
            assert!(reg.snapshot(slot).is_none());
            // Descriptor survives for post-mortem inspection
            assert_eq!(reg.recorded_channel_name(slot).as_deref(), Some("/ks_gone"));
        });
    }

    #[test]
    fn full_table_rejects_without_corruption() {
        with_registry("full", |reg| {
            for i in 0..MAX_CLIENTS {
                reg.register(&format!("/ks_f{i}"), "pytorch", "u", i as i64)
                    .unwrap();
            }
            assert!(matches!(
                reg.register("/ks_overflow", "pytorch", "u", 999),
                Err(KschedError::RegistryFull)
            ));
            // No existing entry was disturbed
            for i in 0..MAX_CLIENTS {
                let info = reg.snapshot(i).expect("still active");
                assert_eq!(info.channel_name, format!("/ks_f{i}"));
            }
        });
    }

    #[test]
    fn concurrent_registration_assigns_distinct_slots() {
        with_registry("race", |reg| {
            let slots: Vec<usize> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..8)
                    .map(|i| {
                        s.spawn(move || {
                            reg.register(&format!("/ks_race_{i}"), "pytorch", "u", i).unwrap()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            let mut sorted = slots.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), slots.len(), "CAS claim handed out a slot twice");
        });
    }

    #[test]
    fn heartbeat_moves_forward() {
        with_registry("heartbeat", |reg| {
            let slot = reg.register("/ks_hb", "pytorch", "u", 1).unwrap();
            let first = reg.snapshot(slot).unwrap().last_heartbeat_ms;
            std::thread::sleep(std::time::Duration::from_millis(5));
            reg.update_heartbeat(slot);
            let second = reg.snapshot(slot).unwrap().last_heartbeat_ms;
            assert!(second > first);
        });
    }

    #[test]
    fn active_clients_lists_only_active() {
        with_registry("listing", |reg| {
            let a = reg.register("/ks_l_a", "pytorch", "u1", 1).unwrap();
            let _b = reg.register("/ks_l_b", "sglang", "u2", 2).unwrap();
            reg.unregister(a);
            let clients = reg.active_clients();
            assert_eq!(clients.len(), 1);
            assert_eq!(clients[0].channel_name, "/ks_l_b");
        });
    }
}
