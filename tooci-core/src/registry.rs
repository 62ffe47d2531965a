//! Remote OCI reference inspection via `skopeo`, run from its container image.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{MirrorError, Result};
use crate::gateway::ToolGateway;

const SKOPEO_IMAGE: &str = "quay.io/skopeo/stable:latest";
const MANIFEST_UNKNOWN: &str = "manifest unknown";

/// Covers pulling the skopeo image on a cold runner.
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of looking up a remote reference.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteManifest {
    /// The registry knows the reference; carries `skopeo inspect` output.
    Present(serde_json::Value),
    /// The registry answered, but has no manifest for the reference.
    Absent,
}

pub struct RegistryInspector {
    gateway: Arc<dyn ToolGateway>,
}

impl RegistryInspector {
    pub fn new(gateway: Arc<dyn ToolGateway>) -> Self {
        Self { gateway }
    }

    pub async fn inspect(&self, reference: &str) -> Result<RemoteManifest> {
        let cmd = vec![
            "docker".to_string(),
            "run".to_string(),
            SKOPEO_IMAGE.to_string(),
            "inspect".to_string(),
            format!("docker://{reference}"),
        ];
        debug!(reference, "Inspecting remote reference");
        let output = self.gateway.run_capture_all(&cmd, Some(INSPECT_TIMEOUT)).await;

        if !output.success() {
            if output.stderr.contains(MANIFEST_UNKNOWN)
                || output.stdout.contains(MANIFEST_UNKNOWN)
            {
                debug!(reference, "Remote reference has no manifest");
                return Ok(RemoteManifest::Absent);
            }
            error!(
                reference,
                exit_code = ?output.exit_code,
                stderr = %output.stderr,
                "Remote inspection failed"
            );
            return Err(MirrorError::Tool {
                argv: cmd,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let manifest = serde_json::from_str(output.stdout.trim())?;
        Ok(RemoteManifest::Present(manifest))
    }
}
