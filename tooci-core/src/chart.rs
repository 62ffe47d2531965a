//! A chart within a repository and its ordered versions.

use crate::error::{MirrorError, Result};
use crate::helm::ChartRecord;
use crate::version::{ChartVersion, VersionOrigin};

#[derive(Debug, Clone)]
pub struct Chart {
    name_in_source: String,
    name: String,
    target_name: String,
    versions: Vec<ChartVersion>,
}

impl Chart {
    /// Build a chart from the search rows that share `name_in_source`.
    ///
    /// Versions end up in the reverse of the order the rows were listed in, and the last one is
    /// taken as the latest. No semantic-version sorting happens here.
    pub(crate) fn new(
        origin: &VersionOrigin<'_>,
        alias: &str,
        name_in_source: String,
        records: Vec<ChartRecord>,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(MirrorError::Invariant(format!(
                "chart '{name_in_source}' has no versions"
            )));
        }
        let name = name_in_source
            .strip_prefix(alias)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                MirrorError::Invariant(format!(
                    "chart '{name_in_source}' is not under alias '{alias}'"
                ))
            })?
            .to_string();

        let mut versions: Vec<ChartVersion> = records
            .into_iter()
            .map(|r| {
                ChartVersion::new(
                    origin,
                    &name_in_source,
                    &name,
                    r.version,
                    r.app_version,
                    r.description,
                )
            })
            .collect();
        versions.reverse();

        Ok(Self {
            target_name: format!("{}/{name}", origin.repo_id),
            name_in_source,
            name,
            versions,
        })
    }

    /// `<alias>/<chart>`
    pub fn name_in_source(&self) -> &str {
        &self.name_in_source
    }

    pub fn short_name(&self) -> &str {
        &self.name
    }

    /// `<repo-id>/<chart>`
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn versions(&self) -> &[ChartVersion] {
        &self.versions
    }

    pub fn latest_version(&self) -> Option<&ChartVersion> {
        self.versions.last()
    }
}
