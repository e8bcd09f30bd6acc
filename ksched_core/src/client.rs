//! Worker-side connector.
//!
//! Workers link this into their inference process. The connect handshake is
//! two-phase: wait for the scheduler's registry-wide ready flag, then —
//! after creating the channel and claiming a registry slot — wait for the
//! per-channel ready flag the server sets only once it has adopted the
//! channel.
//!
//! On clean shutdown the worker unregisters and detaches but never unlinks
//! its channel segment: destruction is the server's job, so a departing
//! worker cannot race the reactor's still-live mapping.

use std::time::Duration;

use crate::config::{self, CLIENT_POLL_INTERVAL_MS, MSG_CAPACITY};
use crate::error::{KschedError, KschedResult};
use crate::ipc::{Channel, Registry, ShmRegion};
use crate::wire::{Request, Response};

/// A worker's connection to the scheduler.
pub struct ClientConnection {
    channel_name: String,
    client_type: String,
    unique_id: String,
    registry_name: String,
    registry: Option<ShmRegion<Registry>>,
    channel: Option<ShmRegion<Channel>>,
    slot: Option<usize>,
    connected: bool,
}

impl ClientConnection {
    /// Prepare a connection over the given channel segment name.
    ///
    /// The unique id defaults to `UNIQUE_ID` from the environment, falling
    /// back to the process id. Channel-name uniqueness is the caller's
    /// responsibility; [`config::suggest_channel_name`] provides the
    /// conventional scheme.
    pub fn new(channel_name: &str, client_type: &str) -> Self {
        let unique_id = config::unique_id_from_env()
            .unwrap_or_else(|| std::process::id().to_string());
        Self {
            channel_name: channel_name.to_string(),
            client_type: client_type.to_string(),
            unique_id,
            registry_name: config::registry_name(),
            registry: None,
            channel: None,
            slot: None,
            connected: false,
        }
    }

    /// Override the unique-id tag.
    pub fn with_unique_id(mut self, unique_id: &str) -> Self {
        self.unique_id = unique_id.to_string();
        self
    }

    /// Override the registry segment name (test isolation).
    pub fn with_registry_name(mut self, name: &str) -> Self {
        self.registry_name = name.to_string();
        self
    }

    /// Attach to the scheduler. `timeout_ms < 0` waits indefinitely for the
    /// registry-ready phase; the adoption phase is given twice the budget.
    pub fn connect(&mut self, timeout_ms: i64) -> KschedResult<()> {
        if self.connected {
            return Ok(());
        }

        let registry = ShmRegion::<Registry>::open(&self.registry_name)?;

        let mut waited: i64 = 0;
        while !registry.get().is_server_ready() {
            if timeout_ms >= 0 && waited >= timeout_ms {
                return Err(KschedError::timeout("scheduler is not ready"));
            }
            std::thread::sleep(Duration::from_millis(CLIENT_POLL_INTERVAL_MS));
            waited += CLIENT_POLL_INTERVAL_MS as i64;
        }

        let channel = ShmRegion::<Channel>::create(&self.channel_name)?;

        let pid = std::process::id() as i64;
        let slot = match registry.get().register(
            &self.channel_name,
            &self.client_type,
            &self.unique_id,
            pid,
        ) {
            Ok(slot) => slot,
            Err(e) => {
                // Never adopted, so the creator must remove its own segment
                drop(channel);
                let _ = ShmRegion::<Channel>::unlink(&self.channel_name);
                return Err(e);
            }
        };

        channel.get().set_client_connected(true);

        // Second handshake: the server flips this only after adoption
        let mut waited: i64 = 0;
        while !channel.get().is_server_ready() {
            if timeout_ms >= 0 && waited >= timeout_ms.saturating_mul(2) {
                registry.get().unregister(slot);
                channel.get().set_client_connected(false);
                drop(channel);
                let _ = ShmRegion::<Channel>::unlink(&self.channel_name);
                return Err(KschedError::timeout("scheduler did not adopt the channel"));
            }
            std::thread::sleep(Duration::from_millis(CLIENT_POLL_INTERVAL_MS));
            waited += CLIENT_POLL_INTERVAL_MS as i64;
        }

        self.registry = Some(registry);
        self.channel = Some(channel);
        self.slot = Some(slot);
        self.connected = true;
        log::debug!(
            "connected: channel {} slot {} uid {}",
            self.channel_name,
            slot,
            self.unique_id
        );
        Ok(())
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Registry slot claimed by this connection, once connected.
    #[inline]
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    #[inline]
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    #[inline]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Push one raw request line without waiting for a response.
    pub fn send_line(&self, line: &str, timeout_ms: i64) -> KschedResult<()> {
        let channel = self.channel.as_ref().ok_or(KschedError::NotConnected)?;
        channel
            .get()
            .request_ring()
            .push_blocking(line.as_bytes(), timeout_ms)
    }

    /// Pop one raw response line.
    pub fn recv_line(&self, timeout_ms: i64) -> KschedResult<String> {
        let channel = self.channel.as_ref().ok_or(KschedError::NotConnected)?;
        let mut buf = [0u8; MSG_CAPACITY];
        let len = channel.get().response_ring().pop_blocking(&mut buf, timeout_ms)?;
        Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    /// Round trip: push one request line, pop one response line.
    pub fn send_request(&self, line: &str, timeout_ms: i64) -> KschedResult<String> {
        self.send_line(line, timeout_ms)?;
        self.recv_line(timeout_ms)
    }

    /// Round trip at the protocol level: build the request line, send it,
    /// and parse the verdict.
    pub fn submit(
        &self,
        kernel_type: &str,
        request_id: &str,
        timeout_ms: i64,
    ) -> KschedResult<Response> {
        let request = Request {
            kernel_type: kernel_type.to_string(),
            request_id: request_id.to_string(),
            source_tag: self.client_type.clone(),
            unique_id: Some(self.unique_id.clone()),
        };
        let line = self.send_request(&request.format(), timeout_ms)?;
        Response::parse(&line)
    }

    /// Refresh this client's registry heartbeat stamp.
    pub fn update_heartbeat(&self) {
        if let (Some(registry), Some(slot)) = (&self.registry, self.slot) {
            registry.get().update_heartbeat(slot);
        }
    }

    /// Detach cleanly: clear the connected flag, release the registry slot,
    /// unmap. The channel segment itself is left for the server to destroy.
    pub fn disconnect(&mut self) {
        if let Some(channel) = &self.channel {
            channel.get().set_client_connected(false);
        }
        if let (Some(registry), Some(slot)) = (&self.registry, self.slot) {
            registry.get().unregister(slot);
        }
        self.channel = None;
        self.registry = None;
        self.slot = None;
        if self.connected {
            log::debug!("disconnected: channel {}", self.channel_name);
        }
        self.connected = false;
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_require_connection() {
        let conn = ClientConnection::new("/ks_test_unconnected", "pytorch");
        assert!(!conn.is_connected());
        assert!(matches!(
            conn.send_line("GemmA|r1|pytorch\n", 10),
            Err(KschedError::NotConnected)
        ));
        assert!(matches!(conn.recv_line(10), Err(KschedError::NotConnected)));
    }

    #[test]
    fn connect_fails_fast_without_server() {
        let mut conn = ClientConnection::new("/ks_test_noserver", "pytorch")
            .with_registry_name("/ksched_test_registry_absent");
        assert!(matches!(
            conn.connect(100),
            Err(KschedError::SegmentOpen { .. })
        ));
    }

    #[test]
    fn unique_id_override_wins() {
        let conn = ClientConnection::new("/ks_test_uid", "pytorch").with_unique_id("worker-42");
        assert_eq!(conn.unique_id(), "worker-42");
    }
}
