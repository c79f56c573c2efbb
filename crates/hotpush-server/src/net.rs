//! Address discovery for passive-mode replies.
//!
//! Passive replies must advertise an address the peer can actually
//! reach. On a LAN that is the interface address picked by the routing
//! table; on an internet-exposed host it is whatever the outside world
//! sees, which only an external echo service can tell us.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use tracing::{debug, warn};

use hotpush_core::{Error, Result};

/// Echo service returning the caller's public address as plain text.
const PUBLIC_IP_ENDPOINT: &str = "https://api.ipify.org";

const PUBLIC_IP_TIMEOUT: Duration = Duration::from_secs(10);

/// Routable local interface address.
///
/// Connecting a UDP socket selects the outbound interface without
/// sending a single packet; the socket's local address is the answer.
pub fn local_ip() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(addr) => Err(Error::Config {
            message: format!("expected an IPv4 interface address, got {}", addr),
        }),
    }
}

/// Public address as seen from outside, via the echo service.
pub async fn public_ip() -> Result<Ipv4Addr> {
    let client = reqwest::Client::builder()
        .timeout(PUBLIC_IP_TIMEOUT)
        .build()
        .map_err(|e| Error::Config {
            message: format!("failed to build HTTP client: {}", e),
        })?;

    let text = client
        .get(PUBLIC_IP_ENDPOINT)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Config {
            message: format!("public address lookup failed: {}", e),
        })?
        .text()
        .await
        .map_err(|e| Error::Config {
            message: format!("public address lookup failed: {}", e),
        })?;

    text.trim().parse().map_err(|_| Error::Config {
        message: format!("echo service returned a non-address: {:?}", text),
    })
}

/// Pick the address to advertise in passive replies.
///
/// Falls back to loopback when discovery fails; uploads from the host
/// itself keep working either way.
pub async fn masquerade_addr(exposed: bool) -> Ipv4Addr {
    let discovered = if exposed {
        public_ip().await
    } else {
        local_ip()
    };

    match discovered {
        Ok(addr) => {
            debug!(addr = %addr, exposed, "Masquerade address selected");
            addr
        }
        Err(e) => {
            warn!(error = %e, exposed, "Address discovery failed, advertising loopback");
            Ipv4Addr::LOCALHOST
        }
    }
}
