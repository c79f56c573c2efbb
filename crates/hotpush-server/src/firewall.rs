//! Host packet-filter hardening for the control channel.
//!
//! The reload channel must only ever be reachable from loopback. Each
//! platform backend installs two rules: allow loopback, drop everything
//! else. Rule installation is presence-checked so repeated startups
//! never stack duplicates, and every failure is reported to the caller
//! instead of aborting startup.

use std::process::Command;

use tracing::{debug, info};

use hotpush_core::{Error, Result};

// =============================================================================
// Command Runner
// =============================================================================

/// Outcome of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
}

/// Seam between rule logic and the host. Tests substitute a recording
/// implementation; production uses [`SystemRunner`].
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands on the real host.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!(program, ?args, "Running packet-filter command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Firewall {
                message: format!("failed to run {}: {}", program, e),
            })?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

// =============================================================================
// Backends
// =============================================================================

/// Platform-specific packet-filter rule installer.
pub trait FirewallBackend {
    /// Ensure the loopback-only rules for `port` exist, installing any
    /// that are missing.
    fn ensure_rules(&self, port: u16) -> Result<()>;
}

/// iptables backend (Linux).
pub struct Iptables<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> Iptables<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// `-C` probes for rule presence; only a missing rule is appended.
    fn ensure_rule(&self, rule: &[&str]) -> Result<()> {
        let mut check = vec!["-C"];
        check.extend_from_slice(rule);
        if self.runner.run("iptables", &check)?.success {
            debug!(?rule, "Rule already present");
            return Ok(());
        }

        let mut append = vec!["-A"];
        append.extend_from_slice(rule);
        let output = self.runner.run("iptables", &append)?;
        if !output.success {
            return Err(Error::Firewall {
                message: format!("iptables rejected rule {:?}", rule),
            });
        }
        Ok(())
    }
}

impl<R: CommandRunner> FirewallBackend for Iptables<R> {
    fn ensure_rules(&self, port: u16) -> Result<()> {
        let port = port.to_string();
        self.ensure_rule(&[
            "INPUT", "-p", "tcp", "-s", "127.0.0.1", "--dport", &port, "-j", "ACCEPT",
        ])?;
        self.ensure_rule(&["INPUT", "-p", "tcp", "--dport", &port, "-j", "DROP"])?;
        info!(port = %port, "Packet filter pinned control channel to loopback");
        Ok(())
    }
}

/// Windows firewall backend (PowerShell NetSecurity cmdlets).
pub struct WindowsFirewall<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> WindowsFirewall<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn rule_exists(&self, name: &str) -> Result<bool> {
        let script = format!(
            "Get-NetFirewallRule -DisplayName '{}' -ErrorAction SilentlyContinue",
            name
        );
        let output = self.runner.run("powershell", &["-Command", &script])?;
        Ok(output.success && !output.stdout.trim().is_empty())
    }

    fn add_rule(&self, script: &str) -> Result<()> {
        let output = self.runner.run("powershell", &["-Command", script])?;
        if !output.success {
            return Err(Error::Firewall {
                message: format!("PowerShell rejected: {}", script),
            });
        }
        Ok(())
    }
}

impl<R: CommandRunner> FirewallBackend for WindowsFirewall<R> {
    fn ensure_rules(&self, port: u16) -> Result<()> {
        let allow_name = format!("Allow RCON Localhost {}", port);
        if !self.rule_exists(&allow_name)? {
            self.add_rule(&format!(
                "New-NetFirewallRule -DisplayName '{}' -Direction Inbound -Protocol TCP \
                 -LocalPort {} -RemoteAddress 127.0.0.1 -Action Allow",
                allow_name, port
            ))?;
        }

        let block_name = format!("Block RCON External {}", port);
        if !self.rule_exists(&block_name)? {
            self.add_rule(&format!(
                "New-NetFirewallRule -DisplayName '{}' -Direction Inbound -Protocol TCP \
                 -LocalPort {} -RemoteAddress Any -Action Block",
                block_name, port
            ))?;
        }

        info!(port, "Packet filter pinned control channel to loopback");
        Ok(())
    }
}

/// Backend for platforms without a supported packet filter.
pub struct NoopBackend;

impl FirewallBackend for NoopBackend {
    fn ensure_rules(&self, port: u16) -> Result<()> {
        Err(Error::Firewall {
            message: format!(
                "no supported packet filter on this platform; port {} is not pinned to loopback",
                port
            ),
        })
    }
}

/// Select the backend for the build target.
pub fn platform_backend() -> Box<dyn FirewallBackend> {
    #[cfg(target_os = "linux")]
    {
        Box::new(Iptables::new(SystemRunner))
    }
    #[cfg(target_os = "windows")]
    {
        Box::new(WindowsFirewall::new(SystemRunner))
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Box::new(NoopBackend)
    }
}

// =============================================================================
// Tests
// =============================================================================
