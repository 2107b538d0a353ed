//! Generated function handler wrapping the application object.

use crate::entry::{Language, ModuleSystem};
use std::path::{Path, PathBuf};

/// Package providing the request translation layer.
pub const ADAPTER_PACKAGE: &str = "serverless-http";

/// Exported handler name inside the adapter module.
pub const HANDLER_EXPORT: &str = "handler";

/// The four adapter shapes, one per (module convention, language) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterTemplate {
    EsmJavaScript,
    EsmTypeScript,
    CommonJsJavaScript,
    CommonJsTypeScript,
}

impl AdapterTemplate {
    pub fn select(module: ModuleSystem, language: Language) -> Self {
        match (module, language) {
            (ModuleSystem::Esm, Language::JavaScript) => AdapterTemplate::EsmJavaScript,
            (ModuleSystem::Esm, Language::TypeScript) => AdapterTemplate::EsmTypeScript,
            (ModuleSystem::CommonJs, Language::JavaScript) => AdapterTemplate::CommonJsJavaScript,
            (ModuleSystem::CommonJs, Language::TypeScript) => AdapterTemplate::CommonJsTypeScript,
        }
    }

    pub fn is_esm(&self) -> bool {
        matches!(
            self,
            AdapterTemplate::EsmJavaScript | AdapterTemplate::EsmTypeScript
        )
    }

    /// `.mjs` keeps the adapter a module whatever the manifest says.
    pub fn file_name(&self) -> &'static str {
        if self.is_esm() { "lambda.mjs" } else { "lambda.js" }
    }

    /// Handler string the function platform is configured with.
    pub fn handler(&self) -> String {
        format!("lambda.{}", HANDLER_EXPORT)
    }

    /// Adapter source importing the entry at `entry` (relative to the
    /// packaging root, forward slashes).
    pub fn render(&self, entry: &str) -> String {
        let specifier = format!("./{}", entry.trim_start_matches("./"));
        match self {
            AdapterTemplate::EsmJavaScript => format!(
                "import serverless from \"{pkg}\";\n\
                 import app from \"{specifier}\";\n\
                 \n\
                 export const {export} = serverless(app);\n",
                pkg = ADAPTER_PACKAGE,
                export = HANDLER_EXPORT,
            ),
            AdapterTemplate::EsmTypeScript => format!(
                "import serverless from \"{pkg}\";\n\
                 import * as entry from \"{specifier}\";\n\
                 \n\
                 const app = entry.default ?? entry;\n\
                 export const {export} = serverless(app);\n",
                pkg = ADAPTER_PACKAGE,
                export = HANDLER_EXPORT,
            ),
            AdapterTemplate::CommonJsJavaScript => format!(
                "const serverless = require(\"{pkg}\");\n\
                 const app = require(\"{specifier}\");\n\
                 \n\
                 module.exports.{export} = serverless(app);\n",
                pkg = ADAPTER_PACKAGE,
                export = HANDLER_EXPORT,
            ),
            AdapterTemplate::CommonJsTypeScript => format!(
                "const serverless = require(\"{pkg}\");\n\
                 const entry = require(\"{specifier}\");\n\
                 \n\
                 const app = entry.default || entry;\n\
                 module.exports.{export} = serverless(app);\n",
                pkg = ADAPTER_PACKAGE,
                export = HANDLER_EXPORT,
            ),
        }
    }

    /// Write the adapter into `root`, returning its path.
    pub fn write(&self, root: &Path, entry: &str) -> std::io::Result<PathBuf> {
        let path = root.join(self.file_name());
        std::fs::write(&path, self.render(entry))?;
        Ok(path)
    }
}
