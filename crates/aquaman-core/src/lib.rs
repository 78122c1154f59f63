//! Foundational primitives shared across aquaman crates.
//!
//! Provides the cryptographic building blocks the wire format depends on
//! (`crypto`), the error taxonomy the proxy pipeline maps to HTTP statuses
//! (`error`), and the atomic file-write / time helpers used by the audit log
//! and credential stores.

pub mod atomic_io;
pub mod crypto;
pub mod error;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use error::AquamanError;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, rfc3339_millis};
