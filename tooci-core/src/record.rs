//! Mirror records: on-disk proof that a chart version reached the destination registry.
//!
//! Layout: `<base>/info/<repo-id>/<chart>--<version>.json`. Records are only ever added or
//! replaced as whole files, never edited or deleted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

/// Staged temp files are owner-only; persisted records are not.
#[cfg(unix)]
const RECORD_MODE: u32 = 0o644;

/// Identity of a mirrored version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub repo_id: String,
    pub chart: String,
    pub version: String,
}

impl RecordKey {
    pub fn new(
        repo_id: impl Into<String>,
        chart: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            repo_id: repo_id.into(),
            chart: chart.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub chart_target: String,
    pub source: String,
    pub version: String,
    pub app_version: String,
    pub description: String,
    pub oci_target: String,
    pub oci_target_version: String,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    base: PathBuf,
}

impl RecordStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.base
            .join("info")
            .join(&key.repo_id)
            .join(format!("{}--{}.json", key.chart, key.version))
    }

    pub fn exists(&self, key: &RecordKey) -> bool {
        self.path_for(key).is_file()
    }

    pub fn read(&self, key: &RecordKey) -> Result<MirrorRecord> {
        let content = fs::read_to_string(self.path_for(key))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist `record` under `key`, replacing any previous file in one rename.
    pub fn write(&self, key: &RecordKey, record: &MirrorRecord) -> Result<PathBuf> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base.clone());
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Ensured record directory");

        let mut staged = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut staged, record)?;
        staged.write_all(b"\n")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staged
                .as_file()
                .set_permissions(fs::Permissions::from_mode(RECORD_MODE))?;
        }
        staged.persist(&path).map_err(|e| e.error)?;

        info!(path = %path.display(), "Wrote mirror record");
        Ok(path)
    }
}
