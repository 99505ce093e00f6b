#![deny(unsafe_code)]

//! Shared test utilities for the minipc workspace.
//!
//! Provides socket directories, a background server fixture, config
//! builders, and tracing helpers so that individual crate tests stay concise
//! and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! minipc-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod server;
pub mod socket;
pub mod tracing_setup;
