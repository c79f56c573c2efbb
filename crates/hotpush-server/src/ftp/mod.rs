//! FTPS transfer listener.
//!
//! This module provides the TCP accept loop plus the pieces a session
//! is built from:
//! - Command parsing ([`commands`])
//! - The jailed per-session filesystem view ([`vfs`])
//! - Passive data-channel handling ([`data`])
//! - The control-channel state machine ([`session`])

pub mod commands;
pub mod data;
pub mod session;
pub mod vfs;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use hotpush_core::Result;

pub use session::SessionConfig;

/// The transfer listener: accepts connections and spawns one session
/// task per peer.
pub struct FtpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: SessionConfig,
}

impl FtpServer {
    /// Bind the control socket.
    pub async fn bind(addr: SocketAddr, config: SessionConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    /// Address the control socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop until the shutdown signal fires.
    ///
    /// Session failures are logged and never propagate; only the
    /// shutdown signal ends the loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(addr = %self.local_addr, "Transfer listener starting");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown too
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping accept loop");
                        return Ok(());
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let config = self.config.clone();
                            tokio::spawn(async move {
                                if let Err(e) = session::handle_session(stream, peer, config).await {
                                    warn!(peer = %peer, error = %e, "Session ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            // Transient accept failures must not kill the listener
                            debug!(error = %e, "Accept error");
                        }
                    }
                }
            }
        }
    }
}
