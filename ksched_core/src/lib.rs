//! # ksched core
//!
//! Shared-memory transport and lifecycle substrate for the ksched
//! kernel-admission scheduler. ML inference workers ask the scheduler for an
//! admit/deny verdict before launching each compute kernel; the hot path is
//! a pair of lock-free SPSC rings in POSIX shared memory, giving
//! sub-microsecond request/response latency with no kernel-mediated I/O.
//!
//! The crate provides:
//!
//! - **ipc**: SPSC rings, the per-worker [`Channel`], the client
//!   [`Registry`], and the typed shared-memory mapper
//! - **server**: the [`Reactor`] that discovers, services, and reaps workers
//! - **client**: the [`ClientConnection`] workers link against
//! - **wire** / **policy**: the ASCII request protocol and the pluggable
//!   admission decision seam
//! - **logging**: rotating session logs with per-session statistics
//!
//! ## Quick start (server)
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ksched_core::{AllowAll, Reactor, SessionLogger};
//!
//! let logger = Arc::new(SessionLogger::new("logs"));
//! let reactor = Reactor::new(Arc::new(AllowAll), logger).unwrap();
//! reactor.start().unwrap();
//! ```
//!
//! ## Quick start (worker)
//!
//! ```rust,no_run
//! use ksched_core::{config, ClientConnection};
//!
//! let name = config::suggest_channel_name("pytorch");
//! let mut conn = ClientConnection::new(&name, "pytorch");
//! conn.connect(5000).unwrap();
//! let verdict = conn.submit("GemmInternalCublas", "req_1", 1000).unwrap();
//! assert!(verdict.allowed);
//! ```

#[cfg(not(unix))]
compile_error!("ksched requires a POSIX shared-memory host");

pub mod client;
pub mod config;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod policy;
pub mod server;
pub mod types;
pub mod wire;

pub use client::ClientConnection;
pub use error::{KschedError, KschedResult};
pub use ipc::{Channel, ClientInfo, Registry, ShmRegion, SpscRing};
pub use logging::SessionLogger;
pub use policy::{AllowAll, Decision, DecisionPolicy};
pub use server::{ClientRecord, Reactor};
pub use types::FixedStr;
pub use wire::{Request, Response};
