//! Host-side helpers that persist stores between playback sessions.
//!
//! The classifier itself is pure; this module wires it to a [`StoreBackend`]
//! and serializes updates per device key.
pub mod backend;
pub mod client;

pub use backend::{BackendError, FileBackend, MemoryBackend, StoreBackend, StoreEncoding};
pub use client::{DeviceTierTracker, TrackerError};
