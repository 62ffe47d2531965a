//! Post-fetch transformations applied to a chart package before it is pushed.
//!
//! The set is closed: repositories name transformations in their configuration, and names are
//! resolved to [`Transform`] when the inventory is loaded, so an unknown name never reaches
//! version processing. Each transformation works on `(artifact, working_dir)` and may rewrite
//! the artifact in place.

use std::fmt;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::{MirrorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Unpack the package and require every `Chart.yaml` in it to declare a name and version.
    CheckChartDescriptors,
    /// Drop helm test hooks (`templates/tests/`) from the package.
    StripChartTests,
}

impl Transform {
    pub const ALL: [Transform; 2] = [Transform::CheckChartDescriptors, Transform::StripChartTests];

    pub fn name(&self) -> &'static str {
        match self {
            Transform::CheckChartDescriptors => "check_chart_descriptors",
            Transform::StripChartTests => "strip_chart_tests",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(Transform::name).collect();
                MirrorError::Config(format!(
                    "unknown processor '{name}'; known processors: {}",
                    known.join(", ")
                ))
            })
    }

    pub fn apply(&self, artifact: &Path, work_dir: &Path) -> Result<()> {
        info!(transform = self.name(), artifact = %artifact.display(), "Running transformation");
        let result = match self {
            Transform::CheckChartDescriptors => check_chart_descriptors(artifact, work_dir),
            Transform::StripChartTests => strip_chart_tests(artifact, work_dir),
        };
        result.map_err(|message| {
            error!(
                transform = self.name(),
                artifact = %artifact.display(),
                %message,
                "Transformation failed"
            );
            MirrorError::Transform {
                name: self.name().to_string(),
                message,
            }
        })
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Deserialize)]
struct ChartDescriptor {
    name: String,
    version: String,
}

fn check_chart_descriptors(artifact: &Path, work_dir: &Path) -> Result<(), String> {
    let unpacked =
        tempfile::tempdir_in(work_dir).map_err(|e| format!("cannot create unpack dir: {e}"))?;
    let file = File::open(artifact).map_err(|e| format!("cannot open package: {e}"))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(unpacked.path())
        .map_err(|e| format!("cannot unpack package: {e}"))?;

    let mut descriptors = Vec::new();
    find_descriptors(unpacked.path(), &mut descriptors)
        .map_err(|e| format!("cannot walk unpacked package: {e}"))?;
    if descriptors.is_empty() {
        return Err("no Chart.yaml found in package".into());
    }

    for path in &descriptors {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let descriptor: ChartDescriptor = serde_yaml::from_str(&content)
            .map_err(|e| format!("invalid {}: {e}", path.display()))?;
        debug!(
            path = %path.display(),
            name = %descriptor.name,
            version = %descriptor.version,
            "Chart descriptor ok"
        );
    }
    info!(count = descriptors.len(), "Checked chart descriptors");
    Ok(())
}

fn find_descriptors(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            find_descriptors(&path, found)?;
        } else if path.file_name().is_some_and(|n| n == "Chart.yaml") {
            found.push(path);
        }
    }
    Ok(())
}

fn is_test_template(path: &Path) -> bool {
    let parts: Vec<&std::ffi::OsStr> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    parts
        .windows(2)
        .any(|pair| pair[0] == "templates" && pair[1] == "tests")
}

fn strip_chart_tests(artifact: &Path, work_dir: &Path) -> Result<(), String> {
    let source = File::open(artifact).map_err(|e| format!("cannot open package: {e}"))?;
    let mut archive = tar::Archive::new(GzDecoder::new(source));

    let staged = tempfile::NamedTempFile::new_in(work_dir)
        .map_err(|e| format!("cannot stage rewritten package: {e}"))?;
    let staged_file = staged
        .reopen()
        .map_err(|e| format!("cannot open staged package: {e}"))?;
    let mut builder = tar::Builder::new(GzEncoder::new(staged_file, Compression::default()));

    let mut stripped = 0usize;
    let entries = archive.entries().map_err(|e| format!("cannot read package: {e}"))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("cannot read package entry: {e}"))?;
        if entry.header().entry_type().is_pax_global_extensions() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| format!("invalid entry path: {e}"))?
            .into_owned();
        if is_test_template(&path) {
            debug!(path = %path.display(), "Stripping test template");
            stripped += 1;
            continue;
        }
        let mut header = entry.header().clone();
        builder
            .append_data(&mut header, &path, &mut entry)
            .map_err(|e| format!("cannot copy {}: {e}", path.display()))?;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| format!("cannot finish rewritten package: {e}"))?;
    staged
        .persist(artifact)
        .map_err(|e| format!("cannot replace package: {}", e.error))?;

    info!(stripped, artifact = %artifact.display(), "Stripped chart test templates");
    Ok(())
}
