//! Static hosting manifest (`wrangler.toml`).

use launchpad_config::defaults::PagesDefaults;
use launchpad_core::{Error, ProjectId, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "wrangler.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagesManifest {
    /// Hosting project name.
    pub name: String,
    pub pages_build_output_dir: String,
    pub compatibility_date: String,
    pub compatibility_flags: Vec<String>,
}

impl PagesManifest {
    pub fn new(project: &ProjectId, output_dir: &Path, pages: &PagesDefaults) -> Self {
        Self {
            name: project.to_string(),
            pages_build_output_dir: output_dir.display().to_string(),
            compatibility_date: pages.compatibility_date.clone(),
            compatibility_flags: pages.compatibility_flags.clone(),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| Error::Internal(format!("failed to serialize {}: {}", MANIFEST_FILE, e)))
    }

    /// Write the manifest into `dir`, replacing any previous one.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        std::fs::write(&path, self.to_toml()?)?;
        Ok(path)
    }
}
