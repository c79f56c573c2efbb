//! Host control-channel hardening.
//!
//! Runs once at startup, before the transfer listener binds. Rewrites
//! the host's `key=value` config store so the reload channel is enabled
//! on the loopback address with the shared secret, then asks the
//! platform packet filter to pin the port to loopback.
//!
//! A config-store failure is fatal: without a hardened control channel
//! the reload dispatch would be misconfigured or exposed. Packet-filter
//! failures are reported but do not abort startup, some hosts simply
//! run without a usable filter.

use std::path::Path;

use tracing::{info, warn};

use hotpush_core::constants::{RCON_HOST, RCON_PORT, SHARED_SECRET};
use hotpush_core::properties::PropertiesFile;
use hotpush_core::Result;

use crate::firewall::FirewallBackend;

/// Required control-channel settings in the host config store.
const REQUIRED_SETTINGS: [(&str, &str); 3] = [
    ("enable-rcon", "true"),
    ("rcon.address", RCON_HOST),
    ("rcon.password", SHARED_SECRET),
];

/// Harden the host at `properties` for loopback-only reload dispatch.
pub fn harden(properties: &Path, backend: &dyn FirewallBackend) -> Result<()> {
    let mut props = PropertiesFile::load(properties)?;

    let mut changed = false;
    for (key, value) in REQUIRED_SETTINGS {
        changed |= props.set(key, value);
    }
    changed |= props.set("rcon.port", &RCON_PORT.to_string());

    if changed {
        props.save()?;
        info!(store = %properties.display(), "Control channel settings written");
    } else {
        info!(store = %properties.display(), "Control channel settings already in place");
    }

    if let Err(e) = backend.ensure_rules(RCON_PORT) {
        warn!(error = %e, "Packet filter hardening failed, continuing without it");
    }

    Ok(())
}
