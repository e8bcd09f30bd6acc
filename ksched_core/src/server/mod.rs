//! Server-side reactor and per-client service tasks.

pub mod reactor;
pub(crate) mod service;

pub use reactor::{ClientRecord, Reactor};
