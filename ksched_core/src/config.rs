//! Protocol constants and segment naming.
//!
//! These values define the shared-memory layout and must match on both sides
//! of every channel. Changing any of them is a wire-format break.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of slots in each SPSC ring. One slot is sacrificed to
/// disambiguate full from empty, so usable capacity is `QUEUE_SLOTS - 1`.
pub const QUEUE_SLOTS: usize = 1024;

/// Bytes per ring slot. Payloads are NUL-terminated, so the largest
/// message is `MSG_CAPACITY - 1` bytes; longer messages are truncated.
pub const MSG_CAPACITY: usize = 256;

/// Cache line size used to isolate producer- and consumer-owned counters.
pub const CACHE_LINE: usize = 64;

/// Maximum number of concurrently registered clients.
pub const MAX_CLIENTS: usize = 64;

/// Period of the server's registry scan loop.
pub const SCAN_INTERVAL_MS: u64 = 100;

/// Period at which clients poll readiness flags while connecting.
pub const CLIENT_POLL_INTERVAL_MS: u64 = 100;

/// Bound on a service task's response push before it logs and moves on.
pub const RESPONSE_PUSH_TIMEOUT_MS: i64 = 5000;

/// A busy-pop re-reads the channel's `client_connected` flag every this
/// many pause iterations.
pub const CONNECTED_RECHECK_ITERS: u64 = 10_000;

/// Registry segment name prefix; the current user name is appended so
/// concurrent deployments by different users on one host do not collide.
pub const REGISTRY_NAME_PREFIX: &str = "/kernel_scheduler_registry_";

/// Legacy fixed channel names used by the retired single-client mode.
/// Reserved: they must never be created or adopted by this implementation.
pub const LEGACY_CHANNEL_NAMES: [&str; 2] =
    ["/kernel_scheduler_pytorch", "/kernel_scheduler_sglang"];

/// Derive the registry segment name for the current user.
///
/// Falls back to a `nouser` suffix when `USER` is unset or empty.
pub fn registry_name() -> String {
    match std::env::var("USER") {
        Ok(user) if !user.is_empty() => format!("{}{}", REGISTRY_NAME_PREFIX, user),
        _ => format!("{}nouser", REGISTRY_NAME_PREFIX),
    }
}

/// Suggest a unique channel segment name for a connecting client.
///
/// Uniqueness is the client's responsibility; this scheme combines the
/// client type, the process id, and a per-process counter.
pub fn suggest_channel_name(client_type: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/ks_{}_{}_{}", client_type, std::process::id(), n)
}

/// Read the client's opaque unique-id tag from the environment.
///
/// The server never interprets this value; it only threads it through
/// logs and registry descriptors.
pub fn unique_id_from_env() -> Option<String> {
    std::env::var("UNIQUE_ID").ok().filter(|s| !s.is_empty())
}
