//! GitHub Actions integration: a job matrix projected from the inventory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::inventory::Inventory;

/// Output name the workflow reads the matrix from.
pub const MATRIX_OUTPUT: &str = "jsonmatrix";

#[derive(Debug, Serialize)]
struct MatrixEntry<'a> {
    id: &'a str,
}

/// `[{"id": "<repo-id>"}, ...]`, in configuration order.
pub fn matrix_json(inventory: &Inventory) -> Result<String> {
    let entries: Vec<MatrixEntry<'_>> = inventory
        .repository_ids()
        .into_iter()
        .map(|id| MatrixEntry { id })
        .collect();
    Ok(serde_json::to_string(&entries)?)
}

/// Append `name=value` to the step output file. Without a file this is a no-op.
pub fn write_output(github_output: Option<&Path>, name: &str, value: &str) -> Result<()> {
    let Some(path) = github_output else {
        debug!(name, value, "GITHUB_OUTPUT not set, not writing output");
        return Ok(());
    };
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{name}={value}")?;
    info!(name, bytes = value.len(), value, "Set GHA output");
    Ok(())
}
