//! Install/compile command selection.

use launchpad_core::{BuildCategory, Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Installed-dependency directory.
pub const DEPENDENCY_DIR: &str = "node_modules";

/// Where the static build tool leaves the site, relative to the source root.
pub const STATIC_OUTPUT_SUBDIR: &str = ".vercel/output/static";

/// Package manager driving install and build commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
}

impl PackageManager {
    /// A yarn lockfile selects yarn; everything else uses npm.
    pub fn detect(dir: &Path) -> Self {
        if dir.join(PackageManager::Yarn.lockfile()).is_file() {
            PackageManager::Yarn
        } else {
            PackageManager::Npm
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
        }
    }

    pub fn lockfile(&self) -> &'static str {
        match self {
            PackageManager::Npm => "package-lock.json",
            PackageManager::Yarn => "yarn.lock",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            PackageManager::Npm => PackageManager::Yarn,
            PackageManager::Yarn => PackageManager::Npm,
        }
    }

    pub fn install(&self) -> String {
        match self {
            PackageManager::Npm => "npm install".to_string(),
            PackageManager::Yarn => "yarn install".to_string(),
        }
    }

    pub fn global_install(&self, package: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm install -g {}", package),
            PackageManager::Yarn => format!("yarn global add {}", package),
        }
    }

    pub fn dev_install(&self, package: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm install --save-dev {}", package),
            PackageManager::Yarn => format!("yarn add --dev {}", package),
        }
    }

    pub fn add(&self, package: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm install {}", package),
            PackageManager::Yarn => format!("yarn add {}", package),
        }
    }

    /// Run a binary from the installed dependencies.
    pub fn exec(&self, bin: &str) -> String {
        match self {
            PackageManager::Npm => format!("npx {}", bin),
            PackageManager::Yarn => format!("yarn {}", bin),
        }
    }

    pub fn run_script(&self, script: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm run {}", script),
            PackageManager::Yarn => format!("yarn run {}", script),
        }
    }

    /// Drop dev dependencies from the installed tree.
    pub fn prune_dev(&self) -> String {
        match self {
            PackageManager::Npm => "npm prune --omit=dev".to_string(),
            PackageManager::Yarn => "yarn install --production --ignore-scripts".to_string(),
        }
    }
}

/// The fields of `package.json` the pipeline looks at.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageManifest {
    /// Explicit module-type flag (`"module"` or `"commonjs"`).
    #[serde(rename = "type")]
    pub module_type: Option<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

impl PackageManifest {
    pub const FILE: &'static str = "package.json";

    /// Read the manifest in `dir`. A missing file is an empty manifest.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| Error::BuildFailure {
            exit_code: None,
            message: format!("invalid {}: {}", path.display(), e),
        })
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}

/// The command sequence for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub manager: PackageManager,
    pub steps: Vec<String>,
}

impl BuildPlan {
    pub fn for_category(category: BuildCategory, dir: &Path) -> Result<Self> {
        let manager = PackageManager::detect(dir);
        let steps = match category {
            BuildCategory::Static => vec![
                manager.install(),
                manager.global_install("wrangler"),
                manager.dev_install("@cloudflare/next-on-pages"),
                manager.exec("next-on-pages"),
            ],
            BuildCategory::Dynamic => {
                let mut steps = vec![manager.install()];
                if PackageManifest::read(dir)?.has_script("build") {
                    steps.push(manager.run_script("build"));
                }
                steps
            }
        };
        Ok(Self { manager, steps })
    }

    /// Steps as a single fail-fast shell line.
    pub fn script(&self) -> String {
        self.steps.join(" && ")
    }
}

/// Clear leftovers of a previous attempt so the install starts clean.
///
/// Removes the other manager's lockfile, the dependency directory, and the
/// npm lockfile. A yarn lockfile is kept because it is what selects yarn on
/// the next attempt. Returns the removed paths.
pub fn prepare_workspace(dir: &Path, manager: PackageManager) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    let mut stale_files = vec![dir.join(manager.other().lockfile())];
    if manager == PackageManager::Npm {
        stale_files.push(dir.join(manager.lockfile()));
    }
    for path in stale_files {
        if path.is_file() {
            std::fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed stale lockfile");
            removed.push(path);
        }
    }

    let deps = dir.join(DEPENDENCY_DIR);
    if deps.exists() {
        std::fs::remove_dir_all(&deps)?;
        debug!(path = %deps.display(), "removed dependency directory");
        removed.push(deps);
    }

    Ok(removed)
}
