//! A single chart release and the state machine that mirrors it.
//!
//! ```text
//! Unprocessed ──record exists──────────────────────────────────▶ Cached
//!      │
//!      └─▶ Fetching ─▶ [Transforming] ─▶ Pushing ─▶ Recorded
//!              └──────────────┴──────────────┴──────▶ Failed
//! ```
//!
//! A failure anywhere after `Unprocessed` leaves no record behind, so the next run starts over
//! from the fetch. The temporary working directory is removed on every exit path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::{MirrorError, Result};
use crate::helm::HelmTool;
use crate::record::{MirrorRecord, RecordKey, RecordStore};
use crate::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Unprocessed,
    Cached,
    Fetching,
    Transforming,
    Pushing,
    Recorded,
    Failed,
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionState::Unprocessed => "unprocessed",
            VersionState::Cached => "cached",
            VersionState::Fetching => "fetching",
            VersionState::Transforming => "transforming",
            VersionState::Pushing => "pushing",
            VersionState::Recorded => "recorded",
            VersionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful `process` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Fetched, pushed and recorded.
    Processed,
    /// A record already existed; nothing was invoked.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ChartVersion {
    pub repo_id: String,
    /// Repository source URL, kept for the record.
    pub source: String,
    /// Chart name as the chart tool knows it (`<alias>/<chart>`).
    pub chart_in_source: String,
    pub chart: String,
    /// `<repo-id>/<chart>`
    pub chart_target: String,
    pub version: String,
    pub app_version: String,
    pub description: String,
    /// Push namespace, `<base>/<repo-id>`.
    pub oci_target: String,
    /// `<base>/<repo-id>/<chart>:<version>`
    pub oci_target_version: String,
    pub record_key: RecordKey,
    pub transforms: Arc<[Transform]>,
    records: RecordStore,
}

/// Everything a version inherits from its repository and chart.
pub(crate) struct VersionOrigin<'a> {
    pub repo_id: &'a str,
    pub source: &'a str,
    pub oci_base: &'a str,
    pub records: &'a RecordStore,
    pub transforms: &'a Arc<[Transform]>,
}

impl ChartVersion {
    pub(crate) fn new(
        origin: &VersionOrigin<'_>,
        chart_in_source: &str,
        chart: &str,
        version: String,
        app_version: String,
        description: String,
    ) -> Self {
        let oci_target = format!("{}/{}", origin.oci_base, origin.repo_id);
        let oci_target_version = format!("{oci_target}/{chart}:{version}");
        Self {
            repo_id: origin.repo_id.to_string(),
            source: origin.source.to_string(),
            chart_in_source: chart_in_source.to_string(),
            chart: chart.to_string(),
            chart_target: format!("{}/{chart}", origin.repo_id),
            record_key: RecordKey::new(origin.repo_id, chart, version.as_str()),
            version,
            app_version,
            description,
            oci_target,
            oci_target_version,
            transforms: Arc::clone(origin.transforms),
            records: origin.records.clone(),
        }
    }

    pub fn record_path(&self) -> PathBuf {
        self.records.path_for(&self.record_key)
    }

    pub fn is_recorded(&self) -> bool {
        self.records.exists(&self.record_key)
    }

    pub fn record(&self) -> MirrorRecord {
        MirrorRecord {
            chart_target: self.chart_target.clone(),
            source: self.source.clone(),
            version: self.version.clone(),
            app_version: self.app_version.clone(),
            description: self.description.clone(),
            oci_target: self.oci_target.clone(),
            oci_target_version: self.oci_target_version.clone(),
        }
    }

    /// Mirror this version unless it already has a record.
    pub async fn process(&self, helm: &HelmTool) -> Result<Outcome> {
        debug!(
            reference = %self.oci_target_version,
            state = %VersionState::Unprocessed,
            "Checking for mirror record"
        );
        if self.is_recorded() {
            info!(
                record = %self.record_path().display(),
                state = %VersionState::Cached,
                "Skipping, record found"
            );
            return Ok(Outcome::Skipped);
        }

        match self.mirror(helm).await {
            Ok(()) => Ok(Outcome::Processed),
            Err(e) => {
                error!(
                    reference = %self.oci_target_version,
                    state = %VersionState::Failed,
                    error = %e,
                    "Version processing failed"
                );
                Err(e)
            }
        }
    }

    async fn mirror(&self, helm: &HelmTool) -> Result<()> {
        let work_dir = tempfile::tempdir()?;
        debug!(dir = %work_dir.path().display(), "Created working directory");

        debug!(
            reference = %self.oci_target_version,
            state = %VersionState::Fetching,
            "State transition"
        );
        helm.fetch(&self.chart_in_source, &self.version, work_dir.path()).await?;
        let staged = work_dir.path().to_path_buf();
        let artifact = blocking(move || single_package(&staged)).await?;

        if !self.transforms.is_empty() {
            debug!(
                reference = %self.oci_target_version,
                state = %VersionState::Transforming,
                "State transition"
            );
        }
        for transform in self.transforms.iter().copied() {
            let package = artifact.clone();
            let dir = work_dir.path().to_path_buf();
            tokio::task::spawn_blocking(move || transform.apply(&package, &dir))
                .await
                .map_err(|e| MirrorError::Transform {
                    name: transform.name().to_string(),
                    message: format!("worker thread failed: {e}"),
                })??;
        }

        debug!(
            reference = %self.oci_target_version,
            state = %VersionState::Pushing,
            "State transition"
        );
        helm.push(&artifact, &self.oci_target).await?;

        let records = self.records.clone();
        let key = self.record_key.clone();
        let record = self.record();
        let path = blocking(move || records.write(&key, &record)).await?;
        info!(
            reference = %self.oci_target_version,
            record = %path.display(),
            state = %VersionState::Recorded,
            "Version mirrored"
        );
        Ok(())
    }
}

/// Run filesystem work off the async workers.
async fn blocking<F, T>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MirrorError::Invariant(format!("blocking task failed: {e}")))?
}

/// The fetch step must have staged exactly one package.
fn single_package(dir: &Path) -> Result<PathBuf> {
    let mut packages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tgz") {
            packages.push(path);
        }
    }
    match packages.len() {
        1 => Ok(packages.remove(0)),
        n => Err(MirrorError::Invariant(format!(
            "expected 1 chart package in {}, found {n}: {packages:?}",
            dir.display()
        ))),
    }
}
