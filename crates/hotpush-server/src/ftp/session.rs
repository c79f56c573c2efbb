//! Control-channel session handling.
//!
//! A session runs in two phases. The plain phase accepts only the
//! handful of commands needed to negotiate TLS; credentials sent in the
//! clear are refused outright. After `AUTH TLS` upgrades the stream,
//! the secured phase exposes the full command surface, gated on the
//! fixed transfer credential and on `PROT P` for every data connection.
//!
//! Both phases read one byte at a time so no buffered plaintext can
//! straddle the TLS upgrade.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use hotpush_core::constants::{MAX_COMMAND_LINE, SHARED_SECRET, TRANSFER_USERNAME};
use hotpush_core::{Error, Result};

use crate::pipeline::UploadPipeline;

use super::commands::{self, Command};
use super::data::{self, PassiveListener};
use super::vfs::SessionFs;

/// Immutable per-session configuration, cloned from the listener.
#[derive(Clone)]
pub struct SessionConfig {
    /// Acceptor shared by the control upgrade and every data channel.
    pub acceptor: TlsAcceptor,
    /// Address advertised in `227` passive replies.
    pub masquerade: Ipv4Addr,
    /// Passive data port range (inclusive); `(0, 0)` means ephemeral.
    pub passive_ports: (u16, u16),
    /// Address passive listeners bind on.
    pub data_bind_addr: IpAddr,
    /// Transfer root uploads land in.
    pub root: PathBuf,
    /// Post-upload inspection and dispatch.
    pub pipeline: Arc<UploadPipeline>,
}

/// Drive one peer connection from greeting to close.
pub async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    config: SessionConfig,
) -> Result<()> {
    let mut stream = stream;
    info!(peer = %peer, "Session opened");

    if !plain_phase(&mut stream).await? {
        debug!(peer = %peer, "Session closed before TLS upgrade");
        return Ok(());
    }

    let tls = config
        .acceptor
        .accept(stream)
        .await
        .map_err(|e| Error::Protocol {
            message: format!("control TLS handshake failed: {}", e),
        })?;
    info!(peer = %peer, "Control channel secured");

    secured_phase(tls, peer, config).await
}

// =============================================================================
// Plain Phase
// =============================================================================

/// Run the pre-TLS loop. Returns true when the peer negotiated `AUTH
/// TLS` and the stream should be upgraded, false on clean close.
async fn plain_phase<S>(stream: &mut S) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    reply(stream, "220 hotpush FTPS ready.").await?;

    loop {
        let line = match read_line(stream).await? {
            Some(line) => line,
            None => return Ok(false),
        };

        match commands::parse(&line) {
            Command::Auth(mechanism)
                if mechanism.eq_ignore_ascii_case("TLS")
                    || mechanism.eq_ignore_ascii_case("SSL") =>
            {
                reply(stream, "234 AUTH TLS successful.").await?;
                return Ok(true);
            }
            Command::Auth(mechanism) => {
                reply(stream, &format!("504 Unsupported mechanism: {}.", mechanism)).await?;
            }
            Command::Feat => reply_features(stream).await?,
            Command::Syst => reply(stream, "215 UNIX Type: L8").await?,
            Command::Noop => reply(stream, "200 I successfully done nothin'.").await?,
            Command::Quit => {
                reply(stream, "221 Goodbye.").await?;
                return Ok(false);
            }
            // Never let credentials travel in the clear
            Command::User(_) | Command::Pass(_) => {
                reply(stream, "503 Use AUTH TLS first.").await?;
            }
            _ => {
                reply(stream, "550 SSL/TLS required on the control channel.").await?;
            }
        }
    }
}

// =============================================================================
// Secured Phase
// =============================================================================

struct SessionState {
    user: Option<String>,
    authed: bool,
    pbsz_done: bool,
    prot_data: bool,
    rename_from: Option<PathBuf>,
    passive: Option<PassiveListener>,
}

async fn secured_phase<S>(stream: S, peer: SocketAddr, config: SessionConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = stream;
    let mut fs = SessionFs::new(&config.root)?;
    let mut state = SessionState {
        user: None,
        authed: false,
        pbsz_done: false,
        prot_data: false,
        rename_from: None,
        passive: None,
    };

    loop {
        let line = match read_line(&mut stream).await? {
            Some(line) => line,
            None => return Ok(()),
        };
        let command = commands::parse(&line);

        // Commands valid before login
        match command {
            Command::User(name) => {
                state.user = Some(name);
                reply(&mut stream, "331 Username ok, send password.").await?;
                continue;
            }
            Command::Pass(password) => {
                let user_ok = state.user.as_deref() == Some(TRANSFER_USERNAME);
                if user_ok && password == SHARED_SECRET {
                    state.authed = true;
                    info!(peer = %peer, user = TRANSFER_USERNAME, "Login successful");
                    reply(&mut stream, "230 Login successful.").await?;
                } else {
                    warn!(peer = %peer, user = ?state.user, "Login rejected");
                    reply(&mut stream, "530 Authentication failed.").await?;
                    return Err(Error::AuthenticationFailed);
                }
                continue;
            }
            Command::Auth(_) => {
                reply(&mut stream, "503 Already using TLS.").await?;
                continue;
            }
            Command::Pbsz(_) => {
                state.pbsz_done = true;
                reply(&mut stream, "200 PBSZ=0 successful.").await?;
                continue;
            }
            Command::Prot(ref level) => {
                if !state.pbsz_done {
                    reply(&mut stream, "503 PBSZ=0 required first.").await?;
                } else if level.eq_ignore_ascii_case("P") {
                    state.prot_data = true;
                    reply(&mut stream, "200 Protection set to Private.").await?;
                } else {
                    reply(&mut stream, "550 Only PROT P is accepted.").await?;
                }
                continue;
            }
            Command::Syst => {
                reply(&mut stream, "215 UNIX Type: L8").await?;
                continue;
            }
            Command::Feat => {
                reply_features(&mut stream).await?;
                continue;
            }
            Command::Type(ref t) => {
                reply(&mut stream, &format!("200 Type set to: {}.", t)).await?;
                continue;
            }
            Command::Noop => {
                reply(&mut stream, "200 I successfully done nothin'.").await?;
                continue;
            }
            Command::Quit => {
                reply(&mut stream, "221 Goodbye.").await?;
                return Ok(());
            }
            _ => {}
        }

        if !state.authed {
            reply(&mut stream, "530 Log in with USER and PASS first.").await?;
            continue;
        }

        match command {
            Command::Pwd => {
                let msg = format!("257 \"{}\" is the current directory.", fs.cwd());
                reply(&mut stream, &msg).await?;
            }
            Command::Cwd(arg) => match fs.change_dir(&arg) {
                Ok(()) => {
                    let msg = format!("250 \"{}\" is the current directory.", fs.cwd());
                    reply(&mut stream, &msg).await?;
                }
                Err(e) => reply_failure(&mut stream, &e).await?,
            },
            Command::Cdup => match fs.change_dir_up() {
                Ok(()) => {
                    let msg = format!("250 \"{}\" is the current directory.", fs.cwd());
                    reply(&mut stream, &msg).await?;
                }
                Err(e) => reply_failure(&mut stream, &e).await?,
            },
            Command::Mkd(arg) => match fs.make_dir(&arg) {
                Ok(_) => reply(&mut stream, &format!("257 \"{}\" directory created.", arg)).await?,
                Err(e) => reply_failure(&mut stream, &e).await?,
            },
            Command::Dele(arg) => match fs.remove_file(&arg) {
                Ok(()) => reply(&mut stream, "250 File removed.").await?,
                Err(e) => reply_failure(&mut stream, &e).await?,
            },
            Command::Rnfr(arg) => match fs.resolve(&arg) {
                Ok(path) if path.exists() => {
                    state.rename_from = Some(path);
                    reply(&mut stream, "350 Ready for destination name.").await?;
                }
                Ok(_) => reply(&mut stream, "550 No such file or directory.").await?,
                Err(e) => reply_failure(&mut stream, &e).await?,
            },
            Command::Rnto(arg) => match state.rename_from.take() {
                None => reply(&mut stream, "503 Bad sequence of commands.").await?,
                Some(from) => match fs.resolve(&arg).and_then(|to| {
                    std::fs::rename(&from, &to)?;
                    Ok(())
                }) {
                    Ok(()) => reply(&mut stream, "250 Renaming ok.").await?,
                    Err(e) => reply_failure(&mut stream, &e).await?,
                },
            },
            Command::Size(arg) => match fs.size(&arg) {
                Ok(size) => reply(&mut stream, &format!("213 {}", size)).await?,
                Err(e) => reply_failure(&mut stream, &e).await?,
            },
            Command::Pasv => {
                let listener =
                    PassiveListener::bind(config.data_bind_addr, config.passive_ports).await?;
                let msg = data::pasv_reply(config.masquerade, listener.port());
                state.passive = Some(listener);
                reply(&mut stream, &msg).await?;
            }
            Command::Epsv => {
                let listener =
                    PassiveListener::bind(config.data_bind_addr, config.passive_ports).await?;
                let msg = data::epsv_reply(listener.port());
                state.passive = Some(listener);
                reply(&mut stream, &msg).await?;
            }
            Command::List(arg) => {
                let lines = fs.list(arg.as_deref());
                transfer_listing(&mut stream, &mut state, &config, lines).await?;
            }
            Command::Nlst(arg) => {
                let lines = fs.name_list(arg.as_deref());
                transfer_listing(&mut stream, &mut state, &config, lines).await?;
            }
            Command::Stor(arg) => {
                store_file(&mut stream, &mut state, &config, &fs, peer, &arg).await?;
            }
            Command::Retr(arg) => {
                retrieve_file(&mut stream, &mut state, &config, &fs, &arg).await?;
            }
            Command::Unknown(verb) => {
                reply(&mut stream, &format!("500 Command \"{}\" not understood.", verb)).await?;
            }
            // Pre-login commands were handled above
            _ => {}
        }
    }
}

// =============================================================================
// Data Transfers
// =============================================================================

/// Take the pending passive listener, or tell the peer to set one up.
async fn take_passive<S>(
    stream: &mut S,
    state: &mut SessionState,
) -> Result<Option<PassiveListener>>
where
    S: AsyncWrite + Unpin,
{
    if !state.prot_data {
        reply(stream, "550 PROT P required for data transfers.").await?;
        return Ok(None);
    }
    match state.passive.take() {
        Some(listener) => Ok(Some(listener)),
        None => {
            reply(stream, "503 Use PASV or EPSV first.").await?;
            Ok(None)
        }
    }
}

async fn transfer_listing<S>(
    stream: &mut S,
    state: &mut SessionState,
    config: &SessionConfig,
    lines: Result<Vec<String>>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let lines = match lines {
        Ok(lines) => lines,
        Err(e) => return reply_failure(stream, &e).await,
    };
    let Some(listener) = take_passive(stream, state).await? else {
        return Ok(());
    };

    reply(stream, "150 Directory listing follows.").await?;
    match listener.accept_tls(&config.acceptor).await {
        Ok(mut conn) => {
            let mut body = lines.join("\r\n");
            if !body.is_empty() {
                body.push_str("\r\n");
            }
            conn.write_all(body.as_bytes()).await?;
            conn.shutdown().await?;
            reply(stream, "226 Transfer complete.").await
        }
        Err(e) => {
            debug!(error = %e, "Listing data connection failed");
            reply(stream, "425 Can't open data connection.").await
        }
    }
}

async fn store_file<S>(
    stream: &mut S,
    state: &mut SessionState,
    config: &SessionConfig,
    fs: &SessionFs,
    peer: SocketAddr,
    arg: &str,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let dest = match fs.resolve(arg) {
        Ok(dest) => dest,
        Err(e) => return reply_failure(stream, &e).await,
    };
    let Some(listener) = take_passive(stream, state).await? else {
        return Ok(());
    };

    reply(stream, "150 Ready to receive data.").await?;
    let mut conn = match listener.accept_tls(&config.acceptor).await {
        Ok(conn) => conn,
        Err(e) => {
            debug!(error = %e, "Upload data connection failed");
            return reply(stream, "425 Can't open data connection.").await;
        }
    };

    let mut file = match tokio::fs::File::create(&dest).await {
        Ok(file) => file,
        Err(e) => {
            warn!(dest = %dest.display(), error = %e, "Failed to create upload target");
            return reply(stream, "451 Local error writing file.").await;
        }
    };

    match tokio::io::copy(&mut conn, &mut file).await {
        Ok(bytes) => {
            file.flush().await?;
            drop(file);
            info!(
                peer = %peer,
                artifact = %dest.display(),
                bytes,
                "Upload received"
            );
            // Inspect and dispatch before acknowledging: by the time the
            // peer sees 226 the reload attempt has already happened
            config.pipeline.handle_upload(&dest).await;
            reply(stream, "226 Transfer complete.").await
        }
        Err(e) => {
            warn!(dest = %dest.display(), error = %e, "Upload aborted");
            reply(stream, "451 Transfer aborted.").await
        }
    }
}

async fn retrieve_file<S>(
    stream: &mut S,
    state: &mut SessionState,
    config: &SessionConfig,
    fs: &SessionFs,
    arg: &str,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let source = match fs.resolve(arg) {
        Ok(source) => source,
        Err(e) => return reply_failure(stream, &e).await,
    };
    let mut file = match tokio::fs::File::open(&source).await {
        Ok(file) => file,
        Err(_) => return reply(stream, "550 No such file or directory.").await,
    };
    let Some(listener) = take_passive(stream, state).await? else {
        return Ok(());
    };

    reply(stream, "150 Sending file.").await?;
    match listener.accept_tls(&config.acceptor).await {
        Ok(mut conn) => {
            tokio::io::copy(&mut file, &mut conn).await?;
            conn.shutdown().await?;
            reply(stream, "226 Transfer complete.").await
        }
        Err(e) => {
            debug!(error = %e, "Download data connection failed");
            reply(stream, "425 Can't open data connection.").await
        }
    }
}

// =============================================================================
// Line I/O
// =============================================================================

/// Read one CRLF-terminated line, a byte at a time.
///
/// Returns `None` on a clean close. Lines beyond [`MAX_COMMAND_LINE`]
/// are a protocol violation and end the session.
async fn read_line<S>(stream: &mut S) -> Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Ok(None);
        }
        match byte[0] {
            b'\n' => break,
            b'\r' => {}
            b => buf.push(b),
        }
        if buf.len() > MAX_COMMAND_LINE {
            return Err(Error::Protocol {
                message: "command line too long".to_string(),
            });
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

async fn reply<S>(stream: &mut S, line: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn reply_failure<S>(stream: &mut S, error: &Error) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    match error {
        Error::PathEscape { .. } => reply(stream, "550 Path not allowed.").await,
        _ => reply(stream, "550 Requested action not taken.").await,
    }
}

async fn reply_features<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let features = "211-Features supported:\r\n AUTH TLS\r\n PBSZ\r\n PROT\r\n EPSV\r\n SIZE\r\n211 End FEAT.";
    reply(stream, features).await
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hotpush_core::pki::ensure_material;
    use tempfile::tempdir;
    use tokio::io::duplex;

    async fn send(client: &mut (impl AsyncWrite + Unpin), line: &str) {
        client.write_all(line.as_bytes()).await.unwrap();
        client.write_all(b"\r\n").await.unwrap();
    }

    async fn recv(client: &mut (impl AsyncRead + Unpin)) -> String {
        read_line(client).await.unwrap().unwrap()
    }

    fn test_config(root: &std::path::Path, certs: &std::path::Path) -> SessionConfig {
        let material = ensure_material(certs).unwrap();
        let acceptor = crate::tls::acceptor_from_bundle(&material.server_bundle).unwrap();
        SessionConfig {
            acceptor,
            masquerade: Ipv4Addr::LOCALHOST,
            passive_ports: (0, 0),
            data_bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            root: root.to_path_buf(),
            pipeline: Arc::new(UploadPipeline::disabled()),
        }
    }

    #[tokio::test]
    async fn plaintext_credentials_are_refused() {
        let (mut client, mut server) = duplex(4096);
        let task = tokio::spawn(async move { plain_phase(&mut server).await });

        assert!(recv(&mut client).await.starts_with("220 "));
        send(&mut client, "USER pluginuploader").await;
        assert!(recv(&mut client).await.starts_with("503 "));
        send(&mut client, "PASS whatever").await;
        assert!(recv(&mut client).await.starts_with("503 "));
        send(&mut client, "QUIT").await;
        assert!(recv(&mut client).await.starts_with("221 "));

        assert!(!task.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn auth_tls_ends_the_plain_phase() {
        let (mut client, mut server) = duplex(4096);
        let task = tokio::spawn(async move { plain_phase(&mut server).await });

        assert!(recv(&mut client).await.starts_with("220 "));
        send(&mut client, "FEAT").await;
        let feat = recv(&mut client).await;
        assert!(feat.starts_with("211-"));
        // Drain the rest of the multiline reply
        loop {
            if recv(&mut client).await.starts_with("211 ") {
                break;
            }
        }
        send(&mut client, "AUTH TLS").await;
        assert!(recv(&mut client).await.starts_with("234 "));

        assert!(task.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn stor_requires_tls_negotiation_first() {
        let (mut client, mut server) = duplex(4096);
        let task = tokio::spawn(async move { plain_phase(&mut server).await });

        assert!(recv(&mut client).await.starts_with("220 "));
        send(&mut client, "STOR plugin.jar").await;
        assert!(recv(&mut client).await.starts_with("550 "));
        drop(client);

        assert!(!task.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn login_accepts_only_the_fixed_credential() {
        let root = tempdir().unwrap();
        let certs = tempdir().unwrap();
        let config = test_config(root.path(), certs.path());

        let (mut client, server) = duplex(4096);
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let task = tokio::spawn(async move { secured_phase(server, peer, config).await });

        send(&mut client, "USER pluginuploader").await;
        assert!(recv(&mut client).await.starts_with("331 "));
        send(&mut client, "PASS not-the-secret").await;
        assert!(recv(&mut client).await.starts_with("530 "));

        assert!(matches!(
            task.await.unwrap(),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn commands_are_gated_on_login() {
        let root = tempdir().unwrap();
        let certs = tempdir().unwrap();
        let config = test_config(root.path(), certs.path());

        let (mut client, server) = duplex(4096);
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let task = tokio::spawn(async move { secured_phase(server, peer, config).await });

        send(&mut client, "PWD").await;
        assert!(recv(&mut client).await.starts_with("530 "));

        send(&mut client, "USER pluginuploader").await;
        assert!(recv(&mut client).await.starts_with("331 "));
        send(&mut client, "PASS ").await;
        // PASS with empty argument parses as Unknown, still gated
        assert!(recv(&mut client).await.starts_with("530 "));

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn full_login_and_navigation() {
        let root = tempdir().unwrap();
        let certs = tempdir().unwrap();
        let config = test_config(root.path(), certs.path());

        let (mut client, server) = duplex(4096);
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let task = tokio::spawn(async move { secured_phase(server, peer, config).await });

        send(&mut client, "USER pluginuploader").await;
        assert!(recv(&mut client).await.starts_with("331 "));
        send(&mut client, &format!("PASS {}", SHARED_SECRET)).await;
        assert!(recv(&mut client).await.starts_with("230 "));

        send(&mut client, "PWD").await;
        assert!(recv(&mut client).await.contains("\"/\""));

        send(&mut client, "MKD sub").await;
        assert!(recv(&mut client).await.starts_with("257 "));
        send(&mut client, "CWD sub").await;
        assert!(recv(&mut client).await.contains("\"/sub\""));
        send(&mut client, "CDUP").await;
        assert!(recv(&mut client).await.contains("\"/\""));

        send(&mut client, "QUIT").await;
        assert!(recv(&mut client).await.starts_with("221 "));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn prot_requires_pbsz_and_data_requires_prot() {
        let root = tempdir().unwrap();
        let certs = tempdir().unwrap();
        let config = test_config(root.path(), certs.path());

        let (mut client, server) = duplex(4096);
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let task = tokio::spawn(async move { secured_phase(server, peer, config).await });

        send(&mut client, "USER pluginuploader").await;
        recv(&mut client).await;
        send(&mut client, &format!("PASS {}", SHARED_SECRET)).await;
        recv(&mut client).await;

        send(&mut client, "PROT P").await;
        assert!(recv(&mut client).await.starts_with("503 "));

        send(&mut client, "PBSZ 0").await;
        assert!(recv(&mut client).await.starts_with("200 "));
        send(&mut client, "PROT C").await;
        assert!(recv(&mut client).await.starts_with("550 "));

        // Without PROT P no data transfer may start
        send(&mut client, "STOR plugin.jar").await;
        assert!(recv(&mut client).await.starts_with("550 "));

        send(&mut client, "PROT P").await;
        assert!(recv(&mut client).await.starts_with("200 "));

        // With PROT P but no PASV the sequencing error is reported
        send(&mut client, "STOR plugin.jar").await;
        assert!(recv(&mut client).await.starts_with("503 "));

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oversized_command_line_ends_the_session() {
        let (mut client, mut server) = duplex(8192);
        let task = tokio::spawn(async move { plain_phase(&mut server).await });

        recv(&mut client).await;
        let huge = "X".repeat(MAX_COMMAND_LINE + 10);
        send(&mut client, &huge).await;

        assert!(matches!(task.await.unwrap(), Err(Error::Protocol { .. })));
    }
}
