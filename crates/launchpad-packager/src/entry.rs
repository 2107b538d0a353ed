//! Entry-point discovery and module-convention detection.

use derive_more::Display;
use launchpad_core::{Error, Result};
use launchpad_executor::PackageManifest;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Source language of the entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Language {
    #[display("javascript")]
    JavaScript,
    /// Compiled with `tsc` before packaging.
    #[display("typescript")]
    TypeScript,
}

impl Language {
    pub fn is_compiled(&self) -> bool {
        matches!(self, Language::TypeScript)
    }
}

/// Declarative (`import`/`export`) or classic (`require`/`module.exports`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ModuleSystem {
    #[display("esm")]
    Esm,
    #[display("commonjs")]
    CommonJs,
}

/// One row of the discovery table.
#[derive(Debug, Clone, Copy)]
pub struct EntryCandidate {
    /// Path relative to the project root.
    pub path: &'static str,
    pub language: Language,
    /// Where the entry lives relative to the packaging root after the build.
    /// Compiled entries land in the compiler output with `src/` flattened.
    pub packaged: &'static str,
}

/// Compiler output directory for compiled entries.
pub const COMPILED_DIR: &str = "dist";

/// Probed in order; the first existing path wins.
pub const ENTRY_CANDIDATES: &[EntryCandidate] = &[
    EntryCandidate { path: "index.ts", language: Language::TypeScript, packaged: "index.js" },
    EntryCandidate { path: "src/index.ts", language: Language::TypeScript, packaged: "index.js" },
    EntryCandidate { path: "app.ts", language: Language::TypeScript, packaged: "app.js" },
    EntryCandidate { path: "src/app.ts", language: Language::TypeScript, packaged: "app.js" },
    EntryCandidate { path: "server.ts", language: Language::TypeScript, packaged: "server.js" },
    EntryCandidate { path: "src/server.ts", language: Language::TypeScript, packaged: "server.js" },
    EntryCandidate { path: "index.js", language: Language::JavaScript, packaged: "index.js" },
    EntryCandidate { path: "src/index.js", language: Language::JavaScript, packaged: "src/index.js" },
    EntryCandidate { path: "app.js", language: Language::JavaScript, packaged: "app.js" },
    EntryCandidate { path: "src/app.js", language: Language::JavaScript, packaged: "src/app.js" },
    EntryCandidate { path: "server.js", language: Language::JavaScript, packaged: "server.js" },
    EntryCandidate { path: "src/server.js", language: Language::JavaScript, packaged: "src/server.js" },
];

/// The discovered entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Absolute path of the source file.
    pub source: PathBuf,
    pub language: Language,
    /// Path of the runnable entry relative to the packaging root.
    pub packaged: String,
}

impl EntryPoint {
    /// Directory archives are built from: the compiler output for compiled
    /// entries, the project itself otherwise.
    pub fn packaging_root(&self, project_dir: &Path) -> PathBuf {
        if self.language.is_compiled() {
            project_dir.join(COMPILED_DIR)
        } else {
            project_dir.to_path_buf()
        }
    }
}

pub fn discover_entry(project_dir: &Path) -> Result<EntryPoint> {
    ENTRY_CANDIDATES
        .iter()
        .find(|c| project_dir.join(c.path).is_file())
        .map(|c| EntryPoint {
            source: project_dir.join(c.path),
            language: c.language,
            packaged: c.packaged.to_string(),
        })
        .ok_or_else(|| {
            Error::MissingArtifact(format!(
                "no entry point found in {} (tried {})",
                project_dir.display(),
                ENTRY_CANDIDATES
                    .iter()
                    .map(|c| c.path)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

static DECLARATIVE_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:import\s+(?:[\w${}*,\s]+\s+from\s+)?["']|import\s*\{|export\s+(?:default\b|const\b|let\b|var\b|function\b|class\b|async\b|\{|\*))"#)
        .unwrap()
});

/// The manifest's `type` flag decides; without one, the entry source is
/// scanned for `import`/`export` statements.
pub fn detect_module_system(manifest: &PackageManifest, source: &str) -> ModuleSystem {
    match manifest.module_type.as_deref() {
        Some("module") => ModuleSystem::Esm,
        Some("commonjs") => ModuleSystem::CommonJs,
        _ if DECLARATIVE_SYNTAX.is_match(source) => ModuleSystem::Esm,
        _ => ModuleSystem::CommonJs,
    }
}
