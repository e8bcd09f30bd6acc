//! Unified error handling for ksched.
//!
//! A single crate-wide error type keeps the transport, registry, and server
//! layers consistent. Client-scoped failures (ring backpressure, malformed
//! requests, dead peers) are never fatal to the server — they are surfaced
//! here, logged by the caller, and contained.

use thiserror::Error;

/// Main error type for ksched operations.
#[derive(Debug, Error)]
pub enum KschedError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Producer-side ring backpressure: the queue is full
    #[error("ring full")]
    RingFull,

    /// Consumer-side: the queue is empty
    #[error("ring empty")]
    RingEmpty,

    /// A bounded wait expired
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// No free slot remained in the client registry
    #[error("registry full")]
    RegistryFull,

    /// A request line did not match the wire format
    #[error("malformed request: {0:?}")]
    MalformedRequest(String),

    /// A shared-memory segment could not be opened or created
    #[error("failed to open shared memory segment '{name}': {source}")]
    SegmentOpen {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping or layout errors
    #[error("memory error: {0}")]
    Memory(String),

    /// Operation requires an established connection
    #[error("not connected")]
    NotConnected,
}

/// Convenience alias for Results using KschedError.
pub type KschedResult<T> = std::result::Result<T, KschedError>;

impl KschedError {
    /// Create a memory error with a custom message.
    pub fn memory<S: Into<String>>(msg: S) -> Self {
        KschedError::Memory(msg.into())
    }

    /// Create a timeout error with a custom message.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        KschedError::Timeout(msg.into())
    }

    /// Create a segment-open error capturing the current OS error.
    pub fn segment_open<S: Into<String>>(name: S) -> Self {
        KschedError::SegmentOpen {
            name: name.into(),
            source: std::io::Error::last_os_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_segment_name() {
        let err = KschedError::SegmentOpen {
            name: "/ks_test".to_string(),
            source: std::io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert!(err.to_string().contains("/ks_test"));
    }

    #[test]
    fn malformed_request_quotes_payload() {
        let err = KschedError::MalformedRequest("oops".to_string());
        assert!(err.to_string().contains("\"oops\""));
    }
}
