//! Server CLI implementation.
//!
//! Provides command-line argument parsing for the hotpush server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use hotpush_core::constants::{FTP_PORT, PASSIVE_PORT_RANGE};

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for hotpush_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => hotpush_core::LogFormat::Text,
            CliLogFormat::Json => hotpush_core::LogFormat::Json,
        }
    }
}

/// hotpush server - FTPS endpoint for artifact uploads with hot-reload dispatch.
#[derive(Debug, Parser)]
#[command(
    name = "hotpush-server",
    version,
    about = "hotpush server - FTPS artifact endpoint with hot-reload dispatch"
)]
pub struct Cli {
    /// Address to listen on
    #[arg(short = 'b', long = "bind", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,

    /// Control channel port to listen on
    #[arg(short = 'p', long = "port", default_value_t = FTP_PORT)]
    pub port: u16,

    /// Passive data port range (START-END, inclusive)
    #[arg(
        long = "passive-ports",
        value_parser = parse_port_range,
        default_value = "60000-60099",
        value_name = "START-END"
    )]
    pub passive_ports: (u16, u16),

    /// Directory uploads land in (the transfer root)
    #[arg(short = 'r', long = "root", default_value = "plugins", value_name = "DIR")]
    pub root: PathBuf,

    /// Host config store to harden for loopback reload dispatch
    #[arg(long = "properties", default_value = "server.properties", value_name = "FILE")]
    pub properties: PathBuf,

    /// Directory certificate material is persisted in
    #[arg(long = "certs-dir", default_value = "certs", value_name = "DIR")]
    pub certs_dir: PathBuf,

    /// Advertise the public address in passive replies (host is internet-exposed)
    #[arg(long = "exposed")]
    pub exposed: bool,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Get the socket address to bind to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse_port_range(s: &str) -> Result<(u16, u16), String> {
    let (start_str, end_str) = s
        .split_once('-')
        .ok_or_else(|| "port range must be in START-END form".to_string())?;

    let start: u16 = start_str
        .parse()
        .map_err(|e| format!("invalid start port: {}", e))?;
    let end: u16 = end_str
        .parse()
        .map_err(|e| format!("invalid end port: {}", e))?;

    if start == 0 || end == 0 {
        return Err("ports must be greater than 0".to_string());
    }
    if start > end {
        return Err("start port must be <= end port".to_string());
    }
    Ok((start, end))
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: FTP_PORT,
            passive_ports: PASSIVE_PORT_RANGE,
            root: PathBuf::from("plugins"),
            properties: PathBuf::from("server.properties"),
            certs_dir: PathBuf::from("certs"),
            exposed: false,
            verbose: 0,
            log_file: None,
            log_format: CliLogFormat::Text,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
