//! Passive data-channel handling.
//!
//! Every transfer opens a fresh listener from the configured passive
//! range, waits for exactly one peer connection, and wraps it in TLS
//! with the same acceptor the control channel uses. Plaintext data
//! connections are never accepted.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use hotpush_core::constants::DATA_ACCEPT_TIMEOUT;
use hotpush_core::{Error, Result};

/// A bound, not-yet-accepted passive data listener.
#[derive(Debug)]
pub struct PassiveListener {
    listener: TcpListener,
    port: u16,
}

impl PassiveListener {
    /// Bind a listener on the first free port in `range` (inclusive).
    ///
    /// A `(0, 0)` range asks the OS for an ephemeral port.
    pub async fn bind(bind_addr: IpAddr, range: (u16, u16)) -> Result<Self> {
        if range == (0, 0) {
            let listener = TcpListener::bind(SocketAddr::new(bind_addr, 0)).await?;
            let port = listener.local_addr()?.port();
            return Ok(Self { listener, port });
        }

        let (start, end) = range;
        for port in start..=end {
            match TcpListener::bind(SocketAddr::new(bind_addr, port)).await {
                Ok(listener) => {
                    debug!(port, "Bound passive data port");
                    return Ok(Self { listener, port });
                }
                Err(_) => continue,
            }
        }
        Err(Error::Protocol {
            message: format!("no free passive port in {}-{}", start, end),
        })
    }

    /// Port the peer must connect to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept one connection and complete the TLS handshake on it.
    ///
    /// Bounded by [`DATA_ACCEPT_TIMEOUT`]; a peer that advertises a
    /// transfer and never connects cannot pin the session forever.
    pub async fn accept_tls(self, acceptor: &TlsAcceptor) -> Result<TlsStream<TcpStream>> {
        let (stream, peer) = timeout(DATA_ACCEPT_TIMEOUT, self.listener.accept())
            .await
            .map_err(|_| Error::Timeout)??;
        debug!(peer = %peer, port = self.port, "Data connection accepted");

        let tls = timeout(DATA_ACCEPT_TIMEOUT, acceptor.accept(stream))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Protocol {
                message: format!("data channel TLS handshake failed: {}", e),
            })?;
        Ok(tls)
    }
}

/// `227` reply advertising `addr:port` in the comma-separated form.
pub fn pasv_reply(addr: Ipv4Addr, port: u16) -> String {
    let [a, b, c, d] = addr.octets();
    format!(
        "227 Entering Passive Mode ({},{},{},{},{},{}).",
        a,
        b,
        c,
        d,
        port >> 8,
        port & 0xff
    )
}

/// `229` reply for extended passive mode (address-agnostic).
pub fn epsv_reply(port: u16) -> String {
    format!("229 Entering Extended Passive Mode (|||{}|).", port)
}
