//! Registry scan, client adoption, and reaping.
//!
//! The reactor owns the registry segment and one scan thread. Each adopted
//! client gets a dedicated service thread; the scan thread doubles as the
//! reaper, probing the composite liveness predicate every pass. All
//! server-internal bookkeeping (the active-client table, thread handles)
//! lives behind one conventional mutex — cross-process state never does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::service::{self, ServiceContext};
use crate::config::{self, MAX_CLIENTS, SCAN_INTERVAL_MS};
use crate::error::KschedResult;
use crate::ipc::{Channel, Registry, ShmRegion};
use crate::logging::SessionLogger;
use crate::policy::DecisionPolicy;

/// Everything the server tracks about one adopted client.
///
/// Service tasks hold a non-owning view through `Arc`; records never point
/// back into the reactor's table.
pub struct ClientRecord {
    pub slot: usize,
    pub channel_name: String,
    pub client_type: String,
    pub unique_id: String,
    pub pid: i64,
    channel: ShmRegion<Channel>,
    running: AtomicBool,
    last_activity_ms: AtomicU64,
}

impl ClientRecord {
    #[inline]
    pub fn channel(&self) -> &Channel {
        self.channel.get()
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stamp the record with the current monotonic millisecond.
    #[inline]
    pub(crate) fn touch(&self) {
        self.last_activity_ms
            .store(crate::ipc::monotonic_ms(), Ordering::Release);
    }

    /// Last request-processing timestamp, monotonic milliseconds.
    #[inline]
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Acquire)
    }
}

struct Shared {
    registry: ShmRegion<Registry>,
    registry_name: String,
    policy: Arc<dyn DecisionPolicy>,
    logger: Arc<SessionLogger>,
    running: Arc<AtomicBool>,
    state: Mutex<ReactorState>,
}

#[derive(Default)]
struct ReactorState {
    clients: HashMap<usize, Arc<ClientRecord>>,
    threads: Vec<JoinHandle<()>>,
}

/// The server's central object: creates the registry, discovers workers,
/// supervises their service threads, and reaps the dead.
pub struct Reactor {
    shared: Arc<Shared>,
    scan_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Create the per-user registry segment and mark the server ready.
    ///
    /// Failure here is the one fatal startup error the daemon has.
    pub fn new(policy: Arc<dyn DecisionPolicy>, logger: Arc<SessionLogger>) -> KschedResult<Self> {
        Self::with_registry_name(policy, logger, &config::registry_name())
    }

    /// Like [`Reactor::new`] with an explicit registry segment name.
    /// Tests use this to isolate concurrent reactors from each other.
    pub fn with_registry_name(
        policy: Arc<dyn DecisionPolicy>,
        logger: Arc<SessionLogger>,
        registry_name: &str,
    ) -> KschedResult<Self> {
        let registry = ShmRegion::<Registry>::create(registry_name)?;
        registry.get().set_server_ready(true);
        log::info!("registry initialized: {registry_name}");
        logger.write(&format!("[ksched] registry initialized: {registry_name}"));

        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                registry_name: registry_name.to_string(),
                policy,
                logger,
                running: Arc::new(AtomicBool::new(true)),
                state: Mutex::new(ReactorState::default()),
            }),
            scan_thread: Mutex::new(None),
        })
    }

    /// The global shutdown flag, for wiring into a signal handler.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.shared.running.clone()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of clients currently being serviced.
    pub fn active_client_count(&self) -> usize {
        self.shared.state.lock().clients.len()
    }

    /// Spawn the scan thread.
    pub fn start(&self) -> KschedResult<()> {
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("ksched-scan".to_string())
            .spawn(move || scan_loop(&shared))?;
        *self.scan_thread.lock() = Some(handle);
        Ok(())
    }

    /// Stop everything: scan thread, service threads, then destroy every
    /// channel segment still recorded and finally the registry itself.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.scan_thread.lock().take() {
            let _ = handle.join();
        }

        let (records, threads) = {
            let mut state = self.shared.state.lock();
            let records: Vec<_> = state.clients.drain().map(|(_, r)| r).collect();
            let threads = std::mem::take(&mut state.threads);
            (records, threads)
        };
        for record in &records {
            record.stop();
        }
        for thread in threads {
            let _ = thread.join();
        }

        let registry = self.shared.registry.get();
        registry.set_server_ready(false);
        for record in &records {
            record.channel().set_server_ready(false);
        }
        for slot in 0..MAX_CLIENTS {
            if let Some(name) = registry.recorded_channel_name(slot) {
                let _ = ShmRegion::<Channel>::unlink(&name);
            }
        }
        if let Err(e) = ShmRegion::<Registry>::unlink(&self.shared.registry_name) {
            log::debug!("registry unlink: {e}");
        }
        self.shared.logger.shutdown();
        log::info!("reactor shut down");
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

fn scan_loop(shared: &Arc<Shared>) {
    let mut last_version = 0u32;
    while shared.running.load(Ordering::Acquire) {
        let registry = shared.registry.get();
        let current = registry.version();
        if current != last_version {
            let mut all_adopted = true;
            for slot in 0..MAX_CLIENTS {
                if registry.is_active(slot) && !adopt(shared, slot) {
                    all_adopted = false;
                }
            }
            // A slot whose channel is not mapped yet holds the version back
            // so the next pass retries it
            if all_adopted {
                last_version = current;
            }
        }
        reap(shared);
        std::thread::sleep(Duration::from_millis(SCAN_INTERVAL_MS));
    }
}

/// Begin servicing a registered slot. Idempotent: already-serviced slots
/// and duplicate channel names return without effect. Returns `false` only
/// for the transient case — the worker registered but has not mapped its
/// channel yet — which the next scan retries.
fn adopt(shared: &Arc<Shared>, slot: usize) -> bool {
    let Some(info) = shared.registry.get().snapshot(slot) else {
        return true;
    };

    let mut state = shared.state.lock();
    if state.clients.contains_key(&slot) {
        return true;
    }
    if state
        .clients
        .values()
        .any(|c| c.channel_name == info.channel_name)
    {
        log::warn!(
            "slot {slot} reuses channel name {} already being served; ignoring",
            info.channel_name
        );
        return true;
    }

    let channel = match ShmRegion::<Channel>::open(&info.channel_name) {
        Ok(c) => c,
        Err(_) => return false,
    };

    let record = Arc::new(ClientRecord {
        slot,
        channel_name: info.channel_name,
        client_type: info.client_type,
        unique_id: info.unique_id,
        pid: info.pid,
        channel,
        running: AtomicBool::new(true),
        last_activity_ms: AtomicU64::new(crate::ipc::monotonic_ms()),
    });
    state.clients.insert(slot, record.clone());

    let ctx = ServiceContext {
        record: record.clone(),
        policy: shared.policy.clone(),
        logger: shared.logger.clone(),
        running: shared.running.clone(),
    };
    match std::thread::Builder::new()
        .name(format!("ksched-svc-{slot}"))
        .spawn(move || service::run(ctx))
    {
        Ok(handle) => state.threads.push(handle),
        Err(e) => {
            log::error!("failed to spawn service thread for slot {slot}: {e}");
            state.clients.remove(&slot);
        }
    }
    true
}

/// Terminate service for every client whose liveness predicate fails, and
/// destroy its channel segment (the worker cannot).
fn reap(shared: &Arc<Shared>) {
    let dead: Vec<Arc<ClientRecord>> = {
        let state = shared.state.lock();
        state
            .clients
            .values()
            .filter(|c| !is_live(shared.registry.get(), c))
            .cloned()
            .collect()
    };

    for record in dead {
        record.stop();
        shared.state.lock().clients.remove(&record.slot);

        // The worker may have crashed before unregistering
        let registry = shared.registry.get();
        if registry.is_active(record.slot) {
            registry.unregister(record.slot);
        }

        record.channel().set_server_ready(false);
        if let Err(e) = ShmRegion::<Channel>::unlink(&record.channel_name) {
            log::debug!("channel unlink {}: {e}", record.channel_name);
        }

        shared.logger.write(&format!(
            "[ksched] reaped client {} (slot {}, pid {})",
            record.channel_name, record.slot, record.pid
        ));
        log::info!(
            "reaped client {} (slot {}, pid {})",
            record.channel_name,
            record.slot,
            record.pid
        );
    }
}

/// Composite liveness predicate: registry slot still claimed, worker still
/// attached, and its process still exists.
fn is_live(registry: &Registry, record: &ClientRecord) -> bool {
    registry.is_active(record.slot)
        && record.channel().is_client_connected()
        && process_alive(record.pid)
}

/// Probe a process with the null signal. `EPERM` counts as alive (the
/// process exists but belongs to someone else); only `ESRCH` means dead.
pub(crate) fn process_alive(pid: i64) -> bool {
    if pid <= 0 {
        return true;
    }
    // SAFETY: signal 0 delivers nothing; it only checks for existence
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id() as i64));
    }

    #[test]
    fn bogus_pid_is_dead() {
        assert!(!process_alive(999_999_999));
    }

    #[test]
    fn unknown_pid_is_not_probed() {
        assert!(process_alive(0));
        assert!(process_alive(-4));
    }
}
