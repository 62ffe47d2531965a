//! Chart tool adapter: the exact `helm` command lines the pipeline relies on.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{MirrorError, Result};
use crate::gateway::{argv, ToolGateway};

/// Upper bound for a single fetch or push.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for registering, updating or searching a repository index.
pub const INDEX_TIMEOUT: Duration = Duration::from_secs(300);

/// One row of `helm search repo -o json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChartRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
}

/// Thin wrapper that turns chart operations into argv for a [`ToolGateway`].
#[derive(Clone)]
pub struct HelmTool {
    gateway: Arc<dyn ToolGateway>,
    program: String,
}

impl HelmTool {
    pub fn new(gateway: Arc<dyn ToolGateway>) -> Self {
        Self::with_program(gateway, "helm")
    }

    pub fn with_program(gateway: Arc<dyn ToolGateway>, program: impl Into<String>) -> Self {
        Self {
            gateway,
            program: program.into(),
        }
    }

    fn command<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut cmd = vec![self.program.clone()];
        cmd.extend(argv(args));
        cmd
    }

    /// `helm repo add <alias> <url>`
    pub async fn repo_add(&self, alias: &str, url: &str) -> Result<()> {
        self.gateway
            .run(&self.command(["repo", "add", alias, url]), Some(INDEX_TIMEOUT))
            .await?;
        Ok(())
    }

    /// `helm repo update <alias>`
    pub async fn repo_update(&self, alias: &str) -> Result<()> {
        self.gateway
            .run(&self.command(["repo", "update", alias]), Some(INDEX_TIMEOUT))
            .await?;
        Ok(())
    }

    /// Every chart+version under `prefix`, pre-releases included, in the order helm lists them.
    pub async fn search(&self, prefix: &str) -> Result<Vec<ChartRecord>> {
        let cmd = self.command(["search", "repo", prefix, "--versions", "--devel", "-o", "json"]);
        let stdout = self.gateway.run(&cmd, Some(INDEX_TIMEOUT)).await?;
        let records: Vec<ChartRecord> = serde_json::from_str(stdout.trim()).map_err(|e| {
            MirrorError::Invariant(format!("unparseable search output for '{prefix}': {e}"))
        })?;
        debug!(prefix, count = records.len(), "Parsed chart search results");
        Ok(records)
    }

    /// Fetch exactly one package of `chart` at `version` into `destination`.
    pub async fn fetch(&self, chart: &str, version: &str, destination: &Path) -> Result<()> {
        let destination = destination.to_string_lossy();
        info!(chart, version, destination = %destination, "Fetching chart package");
        let cmd = self.command([
            "fetch",
            chart,
            "--version",
            version,
            "--destination",
            destination.as_ref(),
        ]);
        self.gateway.run(&cmd, Some(TRANSFER_TIMEOUT)).await?;
        Ok(())
    }

    /// Push a local package to `oci://<namespace>`; helm appends the chart name and tag itself.
    pub async fn push(&self, package: &Path, namespace: &str) -> Result<()> {
        let package = package.to_string_lossy();
        let target = format!("oci://{namespace}");
        info!(package = %package, target = %target, "Pushing chart package");
        let cmd = self.command(["push", package.as_ref(), target.as_str()]);
        self.gateway.run(&cmd, Some(TRANSFER_TIMEOUT)).await?;
        Ok(())
    }
}
