//! Protocol and configuration constants for hotpush.

use std::time::Duration;

// =============================================================================
// Transfer Protocol Constants
// =============================================================================

/// Control channel port for the FTPS listener.
pub const FTP_PORT: u16 = 2121;

/// Passive data port range (inclusive).
pub const PASSIVE_PORT_RANGE: (u16, u16) = (60000, 60099);

/// Maximum length of a single control-channel command line.
pub const MAX_COMMAND_LINE: usize = 1024;

/// How long to wait for the peer to open a passive data connection.
pub const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Extension identifying an uploaded artifact worth inspecting.
pub const ARTIFACT_EXTENSION: &str = "jar";

// =============================================================================
// Transfer Credential
// =============================================================================

/// The single accepted transfer username.
pub const TRANSFER_USERNAME: &str = "pluginuploader";

/// Shared secret used for both the transfer credential and the hardened
/// control channel. Rotated into the config store at startup.
pub const SHARED_SECRET: &str =
    "V3ryL0ngFixedOperatorSecretThatIsRotatedIntoTheConfigStore#At#Startup";

// =============================================================================
// Control Channel (RCON)
// =============================================================================

/// Loopback host the control channel is pinned to after hardening.
pub const RCON_HOST: &str = "127.0.0.1";

/// Control channel port written into the config store.
pub const RCON_PORT: u16 = 25575;

/// Reload directive sent per accepted artifact; the artifact identifier
/// is appended.
pub const RELOAD_COMMAND: &str = "plugman reload";

/// Upper bound on a single dispatch attempt (connect + auth + response).
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Artifact Manifest
// =============================================================================

/// Fixed archive entry holding the artifact manifest.
pub const MANIFEST_ENTRY: &str = "plugin.yml";

// =============================================================================
// Certificate Material
// =============================================================================

/// Validity backdate applied to every issued certificate.
pub const CERT_BACKDATE_DAYS: i64 = 1;

/// Forward validity window for every issued certificate (ten years).
pub const CERT_VALIDITY_DAYS: i64 = 3650;

/// Subject alternative name baked into the server leaf.
pub const SERVER_LEAF_DNS_NAME: &str = "localhost";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passive_range_is_valid() {
        let (start, end) = PASSIVE_PORT_RANGE;
        assert!(start < end);
        assert!(start > 1024); // Above privileged ports
        assert_eq!(end - start + 1, 100); // 100 data ports
    }

    #[test]
    fn control_and_data_ports_disjoint() {
        let (start, end) = PASSIVE_PORT_RANGE;
        assert!(FTP_PORT < start || FTP_PORT > end);
        assert!(RCON_PORT < start || RCON_PORT > end);
    }

    #[test]
    fn validity_window() {
        assert_eq!(CERT_BACKDATE_DAYS, 1);
        assert_eq!(CERT_VALIDITY_DAYS, 3650);
    }

    #[test]
    fn dispatch_timeout_is_bounded() {
        assert!(DISPATCH_TIMEOUT <= DATA_ACCEPT_TIMEOUT);
    }
}
