//! # tooci CLI interface
//!
//! Argument parsing and orchestration only; every pipeline step lives in [`tooci_core`].
//!
//! Each subcommand maps to one CI job step:
//! - `process`: mirror one repository (one matrix cell).
//! - `gha-matrix`: emit the matrix of repository ids.
//! - `inspect`: look up a reference in the destination registry.
//!
//! Settings that CI passes through the environment (`HELM_REPO_ID`, `BASE_OCI_REF`,
//! `UPDATE_HELM`, `GITHUB_OUTPUT`) double as flags.
//!
//! For programmatic and integration use, build a [`Cli`] and call [`run`].
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use tooci_core::ci::{matrix_json, write_output, MATRIX_OUTPUT};
use tooci_core::gateway::ProcessGateway;
use tooci_core::helm::HelmTool;
use tooci_core::inventory::Inventory;
use tooci_core::registry::{RegistryInspector, RemoteManifest};
use tooci_core::synchronise::{default_worker_count, synchronise_repository, MAX_WORKERS};

/// CLI for tooci: mirror Helm chart repositories into an OCI registry.
#[derive(Parser, Debug)]
#[clap(
    name = "tooci",
    version,
    about = "Mirror Helm chart repositories, version by version, into an OCI registry"
)]
pub struct Cli {
    /// Path to the repositories YAML file
    #[clap(long, env = "TOOCI_CONFIG", default_value = "repos.yaml", global = true)]
    pub config: PathBuf,

    /// Directory mirror records are kept under [default: current directory]
    #[clap(long, env = "TOOCI_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror every selected chart version of one repository
    Process {
        /// Repository id, as declared in the repositories file
        #[clap(long, env = "HELM_REPO_ID")]
        repo_id: String,

        /// Destination namespace, without the oci:// scheme
        #[clap(long, env = "BASE_OCI_REF")]
        base_oci_ref: String,

        /// Refresh helm's cached repository index before listing charts (UPDATE_HELM=yes)
        #[clap(
            long,
            env = "UPDATE_HELM",
            action = ArgAction::SetTrue,
            value_parser = BoolishValueParser::new()
        )]
        update_helm: bool,

        /// Chart tool executable
        #[clap(long, env = "HELM_BIN", default_value = "helm")]
        helm_bin: String,

        /// Versions processed concurrently [default: twice the CPU count, at most 16]
        #[clap(long)]
        workers: Option<usize>,
    },
    /// Write the repository matrix for a GitHub Actions workflow
    GhaMatrix {
        /// Step output file to append the matrix to
        #[clap(long, env = "GITHUB_OUTPUT")]
        github_output: Option<PathBuf>,
    },
    /// Look up a reference (`registry/path/chart:tag`) in the destination registry
    Inspect { reference: String },
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let state_dir = match cli.state_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    match cli.command {
        Commands::Process {
            repo_id,
            base_oci_ref,
            update_helm,
            helm_bin,
            workers,
        } => {
            let mut inventory = Inventory::load(&cli.config, Some(&base_oci_ref), &state_dir)?;
            let repo = inventory.repository_mut(&repo_id).ok_or_else(|| {
                anyhow!(
                    "repository '{repo_id}' is not declared in {}",
                    cli.config.display()
                )
            })?;
            let workers = workers
                .map(|w| w.clamp(1, MAX_WORKERS))
                .unwrap_or_else(default_worker_count);
            let helm = HelmTool::with_program(Arc::new(ProcessGateway::new()), helm_bin);

            tracing::info!(command = "process", repository = %repo_id, workers, "Starting mirror");
            let report = synchronise_repository(repo, &helm, update_helm, workers).await?;
            println!(
                "Mirrored {repo_id}: {} processed, {} skipped, {} failed",
                report.processed,
                report.skipped,
                report.failures.len()
            );
            if !report.is_success() {
                for failure in &report.failures {
                    tracing::error!(
                        reference = %failure.reference,
                        error = %failure.error,
                        "Version not mirrored"
                    );
                }
                bail!(
                    "{} of {} chart versions of '{repo_id}' failed",
                    report.failures.len(),
                    report.total()
                );
            }
            Ok(())
        }
        Commands::GhaMatrix { github_output } => {
            let inventory = Inventory::load(&cli.config, None, &state_dir)?;
            let matrix = matrix_json(&inventory)?;
            write_output(github_output.as_deref(), MATRIX_OUTPUT, &matrix)?;
            println!("{matrix}");
            Ok(())
        }
        Commands::Inspect { reference } => {
            let inspector = RegistryInspector::new(Arc::new(ProcessGateway::new()));
            match inspector.inspect(&reference).await? {
                RemoteManifest::Present(manifest) => {
                    println!("{}", serde_json::to_string_pretty(&manifest)?);
                }
                RemoteManifest::Absent => {
                    println!("{reference}: manifest unknown");
                }
            }
            Ok(())
        }
    }
}
