//! hotpush-server: FTPS artifact endpoint with hot-reload dispatch.
//!
//! Startup order matters and is fixed:
//! 1. Harden the host control channel (config store + packet filter)
//! 2. Ensure certificate material and build the TLS acceptor
//! 3. Discover the masquerade address for passive replies
//! 4. Bind the transfer listener and accept sessions until interrupted

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use hotpush_core::constants::{RCON_HOST, RCON_PORT, SHARED_SECRET};
use hotpush_core::{pki, Error, Result};

pub mod cli;
pub mod firewall;
pub mod ftp;
pub mod hardener;
pub mod net;
pub mod pipeline;
pub mod tls;

use cli::Cli;
use ftp::{FtpServer, SessionConfig};
use pipeline::UploadPipeline;

/// Run the server to completion (interrupt signal or fatal error).
pub async fn run(cli: Cli) -> Result<()> {
    // Harden first so every dispatch targets a loopback-only channel
    let backend = firewall::platform_backend();
    hardener::harden(&cli.properties, backend.as_ref())?;

    let material = pki::ensure_material(&cli.certs_dir)?;
    let acceptor = tls::acceptor_from_bundle(&material.server_bundle)?;
    let masquerade = net::masquerade_addr(cli.exposed).await;

    let config = SessionConfig {
        acceptor,
        masquerade,
        passive_ports: cli.passive_ports,
        data_bind_addr: cli.bind_addr,
        root: cli.root.clone(),
        pipeline: Arc::new(UploadPipeline::new(RCON_HOST, RCON_PORT, SHARED_SECRET)),
    };

    let server = FtpServer::bind(cli.socket_addr(), config).await?;
    info!(
        addr = %server.local_addr(),
        root = %cli.root.display(),
        masquerade = %masquerade,
        "hotpush ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept_task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    let _ = shutdown_tx.send(true);

    accept_task
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
}
