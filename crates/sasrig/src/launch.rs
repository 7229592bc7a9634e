//! Harness process launching.
//!
//! The default launcher runs the configured shell command with the store
//! path and CRL URL exported in its environment, then leaves the process
//! running. Without a command the handoff is only logged, which keeps
//! bootstrap-only invocations useful.

use std::process::Command;

use sasrig_trust::lifecycle::{Handoff, HarnessLauncher};
use sasrig_trust::TrustError;

/// Environment variable carrying the store path for the harness.
pub const ENV_CERT_DIR: &str = "SASRIG_CERT_DIR";
/// Environment variable carrying the CRL fetch URL for the harness.
pub const ENV_CRL_URL: &str = "SASRIG_CRL_URL";

/// Spawns the harness as a detached shell command.
pub struct ProcessLauncher {
    command: Option<String>,
}

impl ProcessLauncher {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

impl HarnessLauncher for ProcessLauncher {
    fn launch(&self, handoff: &Handoff) -> Result<(), TrustError> {
        let Some(command) = self.command.as_deref() else {
            tracing::info!(
                store = %handoff.store.display(),
                crl_url = %handoff.crl_url,
                "No harness command configured; skipping launch"
            );
            return Ok(());
        };

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.env(ENV_CERT_DIR, &handoff.store)
            .env(ENV_CRL_URL, &handoff.crl_url);

        let child = cmd
            .spawn()
            .map_err(|e| TrustError::LaunchFailure(format!("{command:?}: {e}")))?;

        tracing::info!(pid = child.id(), command = %command, "Harness launched");
        Ok(())
    }
}
