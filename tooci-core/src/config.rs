//! The repositories document (`repos.yaml`): the only untrusted input the pipeline parses.
//!
//! ```yaml
//! repositories:
//!   bitnami:
//!     source: https://charts.bitnami.com/bitnami
//!     latest-only: true
//!     only-charts: [nginx, redis]
//!     skip-chart-versions:
//!       redis: ["17.0.0"]
//!       nginx: [all]
//!     processors: [strip_chart_tests]
//! ```
//!
//! Repository ids must be unique; a repeated id is rejected rather than silently overwritten.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::{debug, error, info};

use crate::error::{MirrorError, Result};

#[derive(Debug, Deserialize)]
pub struct InventoryFile {
    #[serde(deserialize_with = "unique_repositories")]
    pub repositories: Vec<(String, RepositoryConfig)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RepositoryConfig {
    pub source: String,
    #[serde(default)]
    pub latest_only: bool,
    #[serde(default)]
    pub only_charts: Option<Vec<String>>,
    #[serde(default)]
    pub skip_chart_versions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub processors: Vec<String>,
}

struct UniqueRepositories;

impl<'de> Visitor<'de> for UniqueRepositories {
    type Value = Vec<(String, RepositoryConfig)>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a mapping of repository id to repository settings")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        while let Some((id, repo)) = map.next_entry::<String, RepositoryConfig>()? {
            if !seen.insert(id.clone()) {
                return Err(de::Error::custom(format!("duplicate repository id '{id}'")));
            }
            entries.push((id, repo));
        }
        Ok(entries)
    }
}

fn unique_repositories<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<(String, RepositoryConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_map(UniqueRepositories)
}

pub fn parse_config(content: &str) -> Result<InventoryFile> {
    serde_yaml::from_str(content).map_err(|e| {
        error!(error = %e, "Failed to parse repositories YAML");
        MirrorError::Config(format!("failed to parse repositories YAML: {e}"))
    })
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<InventoryFile> {
    let path = path.as_ref();
    info!(config_path = %path.display(), "Loading repositories from file");

    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = %path.display(), "Failed to read repositories file");
        MirrorError::Config(format!("failed to read {}: {e}", path.display()))
    })?;

    let parsed = parse_config(&content)?;
    debug!(repositories = parsed.repositories.len(), "Parsed repositories YAML");
    Ok(parsed)
}
