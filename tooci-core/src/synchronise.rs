//! High-level pipeline: sync → refresh → mirror every selected version of a repository.
//!
//! This module holds the concurrent processing driver. Versions are independent: each owns its
//! record key and working directory, so they are processed as separate futures with at most
//! `workers` in flight and no shared mutable state between them.
//!
//! # Error Handling
//! - Errors before processing starts (remote sync, search) abort the repository and are returned.
//! - A failing version is logged and collected into [`ProcessReport::failures`]; the versions
//!   around it keep going. Nothing is retried within a run; the missing record makes the next
//!   run retry it.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise_repository`]
//! - Lower level: [`process_versions`], [`worker_count`]

use std::num::NonZeroUsize;

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use crate::error::MirrorError;
use crate::helm::HelmTool;
use crate::repository::Repository;
use crate::version::{ChartVersion, Outcome};

/// Hard cap on concurrently processed versions.
pub const MAX_WORKERS: usize = 16;

/// Twice the available parallelism, capped at [`MAX_WORKERS`], never less than one.
pub fn worker_count(available_parallelism: usize) -> usize {
    available_parallelism
        .saturating_mul(2)
        .clamp(1, MAX_WORKERS)
}

pub fn default_worker_count() -> usize {
    let available = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    worker_count(available)
}

#[derive(Debug)]
pub struct VersionFailure {
    /// Tagged destination reference of the version that failed.
    pub reference: String,
    pub error: MirrorError,
}

#[derive(Debug, Default)]
pub struct ProcessReport {
    pub processed: usize,
    pub skipped: usize,
    pub failures: Vec<VersionFailure>,
}

impl ProcessReport {
    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run `process` for every version, at most `workers` at a time.
pub async fn process_versions<'a, I>(versions: I, helm: &HelmTool, workers: usize) -> ProcessReport
where
    I: IntoIterator<Item = &'a ChartVersion>,
{
    let workers = workers.max(1);
    info!(workers, "[PROCESS] Using workers for parallel processing");

    let results: Vec<(&ChartVersion, Result<Outcome, MirrorError>)> = stream::iter(versions)
        .map(|version| async move {
            info!(reference = %version.oci_target_version, "[PROCESS] Processing target");
            (version, version.process(helm).await)
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut report = ProcessReport::default();
    for (version, result) in results {
        match result {
            Ok(Outcome::Processed) => {
                info!(reference = %version.oci_target_version, "[PROCESS] Processed target OK");
                report.processed += 1;
            }
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(e) => report.failures.push(VersionFailure {
                reference: version.oci_target_version.clone(),
                error: e,
            }),
        }
    }

    info!(
        total = report.total(),
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failures.len(),
        "[PROCESS] Finished processing chart versions"
    );
    report
}

/// Sync the repository with the chart tool, rebuild its catalog, and mirror what its policy
/// selects.
pub async fn synchronise_repository(
    repo: &mut Repository,
    helm: &HelmTool,
    update_index: bool,
    workers: usize,
) -> Result<ProcessReport, MirrorError> {
    info!(repository = %repo.id(), source = %repo.source(), "[SYNC] Processing repository");

    if let Err(e) = repo.sync_remote(helm, update_index).await {
        error!(repository = %repo.id(), error = %e, "[SYNC][ERROR] Failed to register repository");
        return Err(e);
    }
    if let Err(e) = repo.refresh(helm).await {
        error!(repository = %repo.id(), error = %e, "[SYNC][ERROR] Failed to list charts");
        return Err(e);
    }

    let versions = repo.versions_to_process();
    info!(repository = %repo.id(), count = versions.len(), "[SYNC] Processing chart versions");
    Ok(process_versions(versions, helm, workers).await)
}
