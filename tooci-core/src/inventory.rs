//! The set of configured repositories for one run.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::config::{load_config, InventoryFile};
use crate::error::{MirrorError, Result};
use crate::record::RecordStore;
use crate::repository::Repository;

#[derive(Debug)]
pub struct Inventory {
    repositories: Vec<Repository>,
    by_id: HashMap<String, usize>,
    by_url: HashMap<String, usize>,
    base_oci_ref: Option<String>,
    records: RecordStore,
}

impl Inventory {
    /// Read `config_path` and build every repository it declares.
    ///
    /// `base_oci_ref` is the registry namespace pushes go under, without the `oci://` scheme.
    /// Commands that never push may pass `None`. Mirror records live under `base_dir`.
    pub fn load(config_path: &Path, base_oci_ref: Option<&str>, base_dir: &Path) -> Result<Self> {
        let file = load_config(config_path)?;
        Self::from_config(file, base_oci_ref, base_dir)
    }

    pub fn from_config(
        file: InventoryFile,
        base_oci_ref: Option<&str>,
        base_dir: &Path,
    ) -> Result<Self> {
        let base_oci_ref = base_oci_ref.map(normalize_base_ref).transpose()?;
        let records = RecordStore::new(base_dir);

        let mut repositories = Vec::with_capacity(file.repositories.len());
        let mut by_id = HashMap::new();
        let mut by_url = HashMap::new();
        for (id, config) in &file.repositories {
            let repo = Repository::new(id, config, base_oci_ref.as_deref(), records.clone())?;
            by_id.insert(id.clone(), repositories.len());
            by_url.insert(repo.source().to_string(), repositories.len());
            repositories.push(repo);
        }

        info!(
            repositories = repositories.len(),
            base_oci_ref = base_oci_ref.as_deref().unwrap_or("<none>"),
            records = %base_dir.display(),
            "Inventory loaded"
        );
        Ok(Self {
            repositories,
            by_id,
            by_url,
            base_oci_ref,
            records,
        })
    }

    pub fn repository_ids(&self) -> Vec<&str> {
        self.repositories.iter().map(Repository::id).collect()
    }

    pub fn repository(&self, id: &str) -> Option<&Repository> {
        self.by_id.get(id).map(|&i| &self.repositories[i])
    }

    pub fn repository_mut(&mut self, id: &str) -> Option<&mut Repository> {
        self.by_id.get(id).map(|&i| &mut self.repositories[i])
    }

    pub fn repository_by_url(&self, url: &str) -> Option<&Repository> {
        self.by_url.get(url).map(|&i| &self.repositories[i])
    }

    pub fn base_oci_ref(&self) -> Option<&str> {
        self.base_oci_ref.as_deref()
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }
}

fn normalize_base_ref(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(MirrorError::Config("base OCI reference is empty".into()));
    }
    if trimmed.contains("://") {
        return Err(MirrorError::Config(format!(
            "base OCI reference '{raw}' must not include a scheme such as oci://"
        )));
    }
    debug!(base_oci_ref = trimmed, "Normalized base OCI reference");
    Ok(trimmed.to_string())
}
