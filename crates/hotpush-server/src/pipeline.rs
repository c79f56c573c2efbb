//! Upload-completion pipeline.
//!
//! Runs after every completed upload, before the transfer is
//! acknowledged: filter on the artifact extension, pull the identifier
//! out of the manifest, and dispatch a reload over the loopback control
//! channel. Nothing in this pipeline can fail a transfer; every problem
//! is logged and the upload stays on disk.

use std::path::Path;

use tracing::{debug, info, warn};

use hotpush_core::constants::{ARTIFACT_EXTENSION, RELOAD_COMMAND};
use hotpush_core::{manifest, rcon};

/// Post-upload inspection and reload dispatch.
pub struct UploadPipeline {
    /// Control channel endpoint; `None` disables dispatch entirely.
    target: Option<(String, u16)>,
    secret: String,
}

impl UploadPipeline {
    /// Pipeline dispatching to the control channel at `host:port`.
    pub fn new(host: impl Into<String>, port: u16, secret: impl Into<String>) -> Self {
        Self {
            target: Some((host.into(), port)),
            secret: secret.into(),
        }
    }

    /// Pipeline that inspects but never dispatches. Used in tests and
    /// when the host has no control channel to talk to.
    pub fn disabled() -> Self {
        Self {
            target: None,
            secret: String::new(),
        }
    }

    /// Handle one completed upload at `path`.
    pub async fn handle_upload(&self, path: &Path) {
        let is_artifact = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
            .unwrap_or(false);
        if !is_artifact {
            debug!(upload = %path.display(), "Not an artifact, skipping inspection");
            return;
        }

        let Some(name) = manifest::plugin_name(path) else {
            info!(upload = %path.display(), "No artifact identifier, skipping reload");
            return;
        };

        let Some((host, port)) = &self.target else {
            info!(name = %name, "Dispatch disabled, skipping reload");
            return;
        };

        let command = format!("{} {}", RELOAD_COMMAND, name);
        match rcon::dispatch(host, *port, &self.secret, &command).await {
            Ok(response) => {
                info!(name = %name, response = %response, "Reload dispatched");
            }
            Err(e) => {
                // The upload already succeeded; a failed reload is the
                // operator's problem to retry, not the peer's
                warn!(name = %name, error = %e, "Reload dispatch failed");
            }
        }
    }
}
