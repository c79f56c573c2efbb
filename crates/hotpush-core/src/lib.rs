//! hotpush-core: Shared library for artifact push and hot-reload dispatch.
//!
//! This crate provides:
//! - Error and result types
//! - Protocol and credential constants
//! - Certificate authority and trust material persistence
//! - `key=value` config store editing
//! - Artifact manifest inspection
//! - Loopback control-channel (RCON) client
//! - Logging setup

pub mod constants;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod pki;
pub mod properties;
pub mod rcon;

pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
