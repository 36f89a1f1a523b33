// Raw report archive (audit/debug copies, never read back)

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;

/// Post-fetch hook receiving every successfully fetched document
pub trait ReportArchive: Send + Sync {
    /// Store the raw document for `report_name`, returning where it went
    fn store(&self, report_name: &str, document: &Value) -> Result<PathBuf>;
}

/// Writes `raw_<name>.json` files into a directory, overwriting prior copies
pub struct DirArchive {
    dir: PathBuf,
}

impl DirArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File path used for `report_name`
    /// Anything outside `[a-z0-9_-]` becomes `_`, so the name never leaves `dir`
    pub fn path_for(&self, report_name: &str) -> PathBuf {
        let stem: String = report_name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("raw_{}.json", stem))
    }
}

impl ReportArchive for DirArchive {
    fn store(&self, report_name: &str, document: &Value) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(report_name);
        let json = serde_json::to_string_pretty(document).context("Failed to serialize report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }
}
