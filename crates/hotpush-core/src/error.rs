//! Error types for hotpush-core.

use thiserror::Error;

/// Main error type for hotpush operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key or certificate generation/load failure.
    #[error("certificate error: {message}")]
    Certificate { message: String },

    /// Authentication failed on a transfer session.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Protocol violation or malformed command on the control channel.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Artifact archive unreadable or manifest missing/malformed.
    #[error("manifest error: {message}")]
    Manifest { message: String },

    /// Control-channel connect, auth, or response failure.
    #[error("dispatch error: {message}")]
    Dispatch { message: String },

    /// Host packet-filter command failure.
    #[error("firewall error: {message}")]
    Firewall { message: String },

    /// Config store read/write failure.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transfer attempted to leave the configured root directory.
    #[error("path escapes transfer root: {path}")]
    PathEscape { path: String },

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Returns true if this error must abort startup.
    ///
    /// Only missing TLS material is unrecoverable: there is no safe
    /// degraded mode for the transfer listener without it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Certificate { .. })
    }

    /// Returns true if this error is confined to a single session and
    /// must not take down the listener.
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed
                | Error::Protocol { .. }
                | Error::PathEscape { .. }
                | Error::ConnectionClosed
                | Error::Timeout
        )
    }
}

/// Convenience result type for hotpush operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_certificate() {
        let err = Error::Certificate {
            message: "key generation failed".into(),
        };
        assert_eq!(err.to_string(), "certificate error: key generation failed");
    }

    #[test]
    fn error_display_path_escape() {
        let err = Error::PathEscape {
            path: "../../etc/passwd".into(),
        };
        assert_eq!(
            err.to_string(),
            "path escapes transfer root: ../../etc/passwd"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn fatal_errors() {
        assert!(Error::Certificate {
            message: "bad".into()
        }
        .is_fatal());

        // Everything else keeps the process alive
        assert!(!Error::AuthenticationFailed.is_fatal());
        assert!(!Error::Dispatch {
            message: "refused".into()
        }
        .is_fatal());
        assert!(!Error::Firewall {
            message: "iptables missing".into()
        }
        .is_fatal());
        assert!(!Error::Manifest {
            message: "not a zip".into()
        }
        .is_fatal());
    }

    #[test]
    fn session_scoped_errors() {
        assert!(Error::AuthenticationFailed.is_session_scoped());
        assert!(Error::ConnectionClosed.is_session_scoped());
        assert!(Error::PathEscape { path: "x".into() }.is_session_scoped());

        assert!(!Error::Certificate {
            message: "bad".into()
        }
        .is_session_scoped());
        assert!(!Error::Config {
            message: "bad".into()
        }
        .is_session_scoped());
    }
}
