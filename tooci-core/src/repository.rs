//! A configured source repository: its mirroring policy and the catalog discovered under it.
//!
//! # Policy
//! A search row survives [`Repository::ingest`] only if
//! 1. its name sits under this repository's alias (`<alias>/...`),
//! 2. it is in `only-charts`, when that list is configured,
//! 3. its version is not excluded by `skip-chart-versions` (`all` excludes every version).
//!
//! Survivors are grouped per chart, keeping the order in which charts were first seen.
//!
//! # Remote state
//! [`Repository::sync_remote`] registers the alias with the chart tool and, only when asked,
//! refreshes the tool's cached index. Skipping the refresh keeps repeated CI runs fast.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::chart::Chart;
use crate::config::RepositoryConfig;
use crate::error::{MirrorError, Result};
use crate::helm::{ChartRecord, HelmTool};
use crate::record::RecordStore;
use crate::transform::Transform;
use crate::version::{ChartVersion, VersionOrigin};

/// Appended to the repository id to form the chart tool alias.
pub const ALIAS_SUFFIX: &str = "tooci";

/// Exclusion entry that drops every version of a chart.
pub const SKIP_ALL: &str = "all";

#[derive(Debug, Clone)]
pub struct Repository {
    id: String,
    source: String,
    source_url: Url,
    alias: String,
    latest_only: bool,
    only_charts: Option<BTreeSet<String>>,
    skip_chart_versions: BTreeMap<String, BTreeSet<String>>,
    transforms: Arc<[Transform]>,
    oci_base: Option<String>,
    records: RecordStore,
    charts: Vec<Chart>,
}

impl Repository {
    pub fn new(
        id: &str,
        config: &RepositoryConfig,
        oci_base: Option<&str>,
        records: RecordStore,
    ) -> Result<Self> {
        let source_url = Url::parse(&config.source).map_err(|e| {
            MirrorError::Config(format!(
                "invalid URL '{}' for repository '{id}': {e}",
                config.source
            ))
        })?;
        if source_url.scheme().is_empty() {
            return Err(MirrorError::Config(format!(
                "URL '{}' for repository '{id}' has no scheme",
                config.source
            )));
        }

        let alias = format!("{id}-{ALIAS_SUFFIX}");
        let only_charts = config
            .only_charts
            .as_ref()
            .map(|names| names.iter().map(|n| format!("{alias}/{n}")).collect());
        let skip_chart_versions = config
            .skip_chart_versions
            .iter()
            .map(|(chart, versions)| (chart.clone(), versions.iter().cloned().collect()))
            .collect();
        let transforms = config
            .processors
            .iter()
            .map(|name| Transform::from_name(name))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| match e {
                MirrorError::Config(msg) => {
                    MirrorError::Config(format!("repository '{id}': {msg}"))
                }
                other => other,
            })?;

        let repo = Self {
            id: id.to_string(),
            source: config.source.clone(),
            source_url,
            alias,
            latest_only: config.latest_only,
            only_charts,
            skip_chart_versions,
            transforms: transforms.into(),
            oci_base: oci_base.map(str::to_string),
            records,
            charts: Vec::new(),
        };
        debug!(repository = ?repo, "Constructed repository");
        Ok(repo)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn latest_only(&self) -> bool {
        self.latest_only
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn charts(&self) -> &[Chart] {
        &self.charts
    }

    pub fn chart(&self, name_in_source: &str) -> Option<&Chart> {
        self.charts
            .iter()
            .find(|c| c.name_in_source() == name_in_source)
    }

    /// Register the alias with the chart tool; refresh its cached index only if `update_index`.
    pub async fn sync_remote(&self, helm: &HelmTool, update_index: bool) -> Result<()> {
        helm.repo_add(&self.alias, &self.source).await?;
        if update_index {
            info!(repository = %self.id, source = %self.source, "Updating chart repository index");
            helm.repo_update(&self.alias).await?;
        } else {
            warn!(
                repository = %self.id,
                source = %self.source,
                "Skipping chart repository index update"
            );
        }
        Ok(())
    }

    /// Query the chart tool for everything under the alias and rebuild the catalog.
    pub async fn refresh(&mut self, helm: &HelmTool) -> Result<()> {
        info!(repository = %self.id, "[REFRESH] Getting chart info");
        let records = helm.search(&format!("{}/", self.alias)).await?;
        info!(
            repository = %self.id,
            count = records.len(),
            source = %self.source,
            "[REFRESH] Parsing charts+versions"
        );
        self.ingest(records)
    }

    /// Apply the policy to raw search rows and replace the catalog with the result.
    pub fn ingest(&mut self, records: Vec<ChartRecord>) -> Result<()> {
        let oci_base = self.oci_base.as_deref().ok_or_else(|| {
            MirrorError::Config(format!(
                "repository '{}' needs a base OCI reference to build its catalog",
                self.id
            ))
        })?;
        let prefix = format!("{}/", self.alias);

        let mut groups: Vec<(String, Vec<ChartRecord>)> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();
        for record in records {
            let Some(short) = record.name.strip_prefix(&prefix) else {
                debug!(
                    chart = %record.name,
                    repository = %self.id,
                    "Skipping chart outside repository"
                );
                continue;
            };

            if let Some(only) = &self.only_charts {
                if !only.contains(&record.name) {
                    debug!(
                        chart = %record.name,
                        repository = %self.id,
                        "Skipping chart not in only-charts"
                    );
                    continue;
                }
            }

            if let Some(skipped) = self.skip_chart_versions.get(short) {
                if skipped.contains(SKIP_ALL) || skipped.contains(&record.version) {
                    warn!(
                        chart = %record.name,
                        version = %record.version,
                        repository = %self.id,
                        "Skipping version as per skip-chart-versions"
                    );
                    continue;
                }
            }

            match group_index.get(&record.name) {
                Some(&i) => groups[i].1.push(record),
                None => {
                    group_index.insert(record.name.clone(), groups.len());
                    groups.push((record.name.clone(), vec![record]));
                }
            }
        }

        let origin = VersionOrigin {
            repo_id: &self.id,
            source: &self.source,
            oci_base,
            records: &self.records,
            transforms: &self.transforms,
        };
        let mut charts = Vec::with_capacity(groups.len());
        for (name, rows) in groups {
            info!(chart = %name, versions = rows.len(), "Chart discovered");
            charts.push(Chart::new(&origin, &self.alias, name, rows)?);
        }
        self.charts = charts;
        Ok(())
    }

    pub fn all_versions(&self) -> Vec<&ChartVersion> {
        self.charts.iter().flat_map(|c| c.versions()).collect()
    }

    pub fn latest_versions(&self) -> Vec<&ChartVersion> {
        self.charts.iter().filter_map(Chart::latest_version).collect()
    }

    pub fn versions_to_process(&self) -> Vec<&ChartVersion> {
        if self.latest_only {
            warn!(repository = %self.id, "Processing latest versions only");
            self.latest_versions()
        } else {
            warn!(repository = %self.id, "Processing all versions");
            self.all_versions()
        }
    }
}
