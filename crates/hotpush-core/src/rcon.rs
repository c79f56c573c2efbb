//! Loopback control-channel client (RCON).
//!
//! Speaks the Source RCON framing: every packet is a little-endian
//! length prefix followed by a request id, a packet type, a NUL-padded
//! body and a trailing NUL. One connection per dispatch; there is no
//! pooling and no retry, a failed dispatch is reported and dropped.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::constants::DISPATCH_TIMEOUT;
use crate::error::{Error, Result};

// =============================================================================
// Packet Types
// =============================================================================

const TYPE_AUTH: i32 = 3;
const TYPE_AUTH_RESPONSE: i32 = 2;
const TYPE_EXEC_COMMAND: i32 = 2;
const TYPE_RESPONSE_VALUE: i32 = 0;

/// Length prefix sanity bound; the control channel never ships payloads
/// anywhere near this size.
const MAX_PACKET_LEN: usize = 4096;

/// Request id the peer echoes back on auth failure.
const AUTH_FAILED_ID: i32 = -1;

#[derive(Debug)]
struct Packet {
    id: i32,
    ptype: i32,
    body: String,
}

// =============================================================================
// Client
// =============================================================================

/// Authenticated connection to the control channel.
pub struct RconClient {
    stream: TcpStream,
    next_id: i32,
}

impl RconClient {
    /// Connect to `host:port` and authenticate with `password`.
    pub async fn connect(host: &str, port: u16, password: &str) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Dispatch {
                message: format!("connect to {}:{} failed: {}", host, port, e),
            })?;
        debug!(host, port, "Connected to control channel");

        let mut client = Self { stream, next_id: 1 };
        client.authenticate(password).await?;
        Ok(client)
    }

    /// Execute `command` and return the response body.
    pub async fn send_command(&mut self, command: &str) -> Result<String> {
        let id = self.write_packet(TYPE_EXEC_COMMAND, command).await?;
        let packet = self.read_packet().await?;

        if packet.ptype != TYPE_RESPONSE_VALUE || packet.id != id {
            return Err(Error::Dispatch {
                message: format!(
                    "unexpected response (type {}, id {}) to command",
                    packet.ptype, packet.id
                ),
            });
        }
        trace!(command, response = %packet.body, "Control command executed");
        Ok(packet.body)
    }

    async fn authenticate(&mut self, password: &str) -> Result<()> {
        let id = self.write_packet(TYPE_AUTH, password).await?;

        // Some peers send an empty response value ahead of the auth
        // response; skip past it
        loop {
            let packet = self.read_packet().await?;
            if packet.ptype != TYPE_AUTH_RESPONSE {
                continue;
            }
            if packet.id == AUTH_FAILED_ID {
                return Err(Error::Dispatch {
                    message: "control channel rejected credentials".to_string(),
                });
            }
            if packet.id != id {
                return Err(Error::Dispatch {
                    message: format!("auth response for unknown request id {}", packet.id),
                });
            }
            debug!("Control channel authenticated");
            return Ok(());
        }
    }

    async fn write_packet(&mut self, ptype: i32, body: &str) -> Result<i32> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        // id + type + body + two NUL terminators
        let len = 4 + 4 + body.len() + 2;
        let mut buf = BytesMut::with_capacity(4 + len);
        buf.put_i32_le(len as i32);
        buf.put_i32_le(id);
        buf.put_i32_le(ptype);
        buf.put_slice(body.as_bytes());
        buf.put_u8(0);
        buf.put_u8(0);

        self.stream.write_all(&buf).await?;
        Ok(id)
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        let len = i32::from_le_bytes(len_buf);

        if len < 10 || len as usize > MAX_PACKET_LEN {
            return Err(Error::Protocol {
                message: format!("invalid control packet length {}", len),
            });
        }

        let mut payload = BytesMut::zeroed(len as usize);
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        let id = payload.get_i32_le();
        let ptype = payload.get_i32_le();

        // Strip the body's NUL terminator and the packet terminator
        let body_end = payload.len().saturating_sub(2);
        let body = String::from_utf8_lossy(&payload[..body_end]).into_owned();

        Ok(Packet { id, ptype, body })
    }
}

/// One-shot dispatch: connect, authenticate, execute, disconnect.
///
/// The whole attempt is bounded by [`DISPATCH_TIMEOUT`].
pub async fn dispatch(host: &str, port: u16, password: &str, command: &str) -> Result<String> {
    timeout(DISPATCH_TIMEOUT, async {
        let mut client = RconClient::connect(host, port, password).await?;
        client.send_command(command).await
    })
    .await
    .map_err(|_| Error::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal control-channel peer: authenticates against `password`
    /// and records every executed command.
    async fn spawn_peer(
        password: &'static str,
    ) -> (u16, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            loop {
                let mut len_buf = [0u8; 4];
                if stream.read_exact(&mut len_buf).await.is_err() {
                    return;
                }
                let len = i32::from_le_bytes(len_buf) as usize;
                let mut payload = vec![0u8; len];
                stream.read_exact(&mut payload).await.unwrap();

                let mut buf = &payload[..];
                let id = buf.get_i32_le();
                let ptype = buf.get_i32_le();
                let body = String::from_utf8_lossy(&buf[..buf.len() - 2]).into_owned();

                let (reply_id, reply_type, reply_body) = match ptype {
                    TYPE_AUTH if body == password => (id, TYPE_AUTH_RESPONSE, String::new()),
                    TYPE_AUTH => (AUTH_FAILED_ID, TYPE_AUTH_RESPONSE, String::new()),
                    _ => {
                        tx.send(body).unwrap();
                        (id, TYPE_RESPONSE_VALUE, "ok".to_string())
                    }
                };

                let reply_len = 4 + 4 + reply_body.len() + 2;
                let mut out = BytesMut::new();
                out.put_i32_le(reply_len as i32);
                out.put_i32_le(reply_id);
                out.put_i32_le(reply_type);
                out.put_slice(reply_body.as_bytes());
                out.put_u8(0);
                out.put_u8(0);
                stream.write_all(&out).await.unwrap();
            }
        });

        (port, rx)
    }

    #[tokio::test]
    async fn authenticates_and_executes() {
        let (port, mut commands) = spawn_peer("secret").await;

        let mut client = RconClient::connect("127.0.0.1", port, "secret").await.unwrap();
        let response = client.send_command("plugman reload WorldEdit").await.unwrap();

        assert_eq!(response, "ok");
        assert_eq!(commands.recv().await.unwrap(), "plugman reload WorldEdit");
    }

    #[tokio::test]
    async fn rejected_credentials_fail_dispatch() {
        let (port, _commands) = spawn_peer("secret").await;

        let result = RconClient::connect("127.0.0.1", port, "wrong").await;
        assert!(matches!(result, Err(Error::Dispatch { .. })));
    }

    #[tokio::test]
    async fn refused_connection_is_dispatch_error() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = dispatch("127.0.0.1", port, "secret", "anything").await;
        assert!(matches!(
            result,
            Err(Error::Dispatch { .. }) | Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn one_shot_dispatch_round_trip() {
        let (port, mut commands) = spawn_peer("secret").await;

        let response = dispatch("127.0.0.1", port, "secret", "plugman reload Foo")
            .await
            .unwrap();
        assert_eq!(response, "ok");
        assert_eq!(commands.recv().await.unwrap(), "plugman reload Foo");
    }
}
