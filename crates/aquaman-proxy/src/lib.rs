//! The request pipeline: listener, router, header rewriting, forwarding.
//!
//! [`Proxy`] owns one listener (Unix socket or loopback TCP, optionally
//! TLS-wrapped) and forwards `/<service>/<rest>` requests to the matching
//! upstream after stripping every registered auth header and injecting the
//! resolved credential. See [`config::ProxyConfig`] for the knobs and
//! [`headers`] for the header-rewriting invariants.

pub mod config;
pub mod handlers;
pub mod headers;
pub mod server;
pub mod state;

pub use config::{ListenMode, ProxyConfig, TlsConfig};
pub use server::{build_router, Proxy};
pub use state::ProxyState;
