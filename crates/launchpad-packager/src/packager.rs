//! Packaging for both build categories.

use crate::adapter::{ADAPTER_PACKAGE, AdapterTemplate};
use crate::archive::{Archive, code_archive, layer_archive};
use crate::entry::{COMPILED_DIR, EntryPoint, detect_module_system, discover_entry};
use crate::envfile::{ENV_FILE, write_env_file};
use crate::manifest::PagesManifest;
use crate::rewrite::{detect_app_ident, ensure_exports, strip_listener};
use launchpad_config::defaults::PagesDefaults;
use launchpad_core::artifact::{Artifact, ArtifactKind, ArtifactStore, artifact_key};
use launchpad_core::deployer::ObjectLocation;
use launchpad_core::executor::{Script, ScriptRunner};
use launchpad_core::{BuildLog, Deployment, Error, ProjectId, Result};
use launchpad_executor::{PackageManager, PackageManifest, STATIC_OUTPUT_SUBDIR, prepare_workspace};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A static site ready for the hosting platform's own upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticBundle {
    /// Directory the hosting CLI runs in; holds the manifest.
    pub project_dir: PathBuf,
    /// Built site.
    pub output_dir: PathBuf,
    pub manifest: PathBuf,
}

/// Uploaded function archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBundle {
    pub bucket: String,
    pub layer: Artifact,
    pub code: Artifact,
    /// `<module>.<export>` of the generated adapter.
    pub handler: String,
}

impl FunctionBundle {
    pub fn layer_location(&self) -> ObjectLocation {
        ObjectLocation {
            bucket: self.bucket.clone(),
            key: self.layer.key.clone(),
        }
    }

    pub fn code_location(&self) -> ObjectLocation {
        ObjectLocation {
            bucket: self.bucket.clone(),
            key: self.code.key.clone(),
        }
    }
}

/// Prepare a static build for deployment: check the output exists, list it,
/// and write the hosting manifest next to it.
pub fn package_static(
    deployment: &Deployment,
    pages: &PagesDefaults,
    log: &BuildLog,
) -> Result<StaticBundle> {
    log.system("Preparing Cloudflare Pages Deployment");

    let project_dir = std::path::absolute(&deployment.source_dir)?;
    let output_dir = project_dir.join(STATIC_OUTPUT_SUBDIR);
    if !output_dir.is_dir() {
        return Err(Error::MissingArtifact(format!(
            "static output directory {} not found",
            output_dir.display()
        )));
    }

    match list_files(&output_dir) {
        Ok(files) => log.system(format!(
            "Files in output directory: {}",
            serde_json::to_string_pretty(&files)?
        )),
        Err(e) => log.system(format!("Warning: Could not read output directory: {}", e)),
    }

    let manifest = PagesManifest::new(&deployment.project, &output_dir, pages).write(&project_dir)?;
    log.system("Cloudflare Pages Deployment Config Generated");

    Ok(StaticBundle {
        project_dir,
        output_dir,
        manifest,
    })
}

/// Packages a dynamic build into a dependency layer and a code archive.
pub struct FunctionPackager {
    runner: Arc<dyn ScriptRunner>,
    store: Arc<dyn ArtifactStore>,
}

impl FunctionPackager {
    pub fn new(runner: Arc<dyn ScriptRunner>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { runner, store }
    }

    pub async fn package(&self, deployment: &Deployment, log: &BuildLog) -> Result<FunctionBundle> {
        let dir = deployment.source_dir.as_path();
        log.system("Preparing function package");

        let entry = discover_entry(dir)?;
        log.system(format!(
            "Entry point: {} ({})",
            relative(dir, &entry.source),
            entry.language
        ));

        let template = self.rewrite_entry(dir, &entry, log)?;

        write_env_file(dir, &deployment.env)?;
        log.system(format!(
            "Wrote {} with {} variable(s)",
            ENV_FILE,
            deployment.env.len()
        ));

        let manager = PackageManager::detect(dir);
        prepare_workspace(dir, manager)?;
        log.system("Reinstalling dependencies");
        self.run(
            dir,
            format!("{} && {}", manager.install(), manager.add(ADAPTER_PACKAGE)),
            log,
        )
        .await?;

        let root = entry.packaging_root(dir);
        if entry.language.is_compiled() {
            self.compile(dir, &entry, manager, log).await?;
        }
        self.run(dir, manager.prune_dev(), log).await?;

        template.write(&root, &entry.packaged)?;
        log.system(format!("Generated {}", template.file_name()));

        let layer = layer_archive(dir).await?;
        let code = code_archive(&root).await?;

        let layer = self
            .upload(&deployment.project, ArtifactKind::DependencyLayer, layer, log)
            .await?;
        let code = self
            .upload(&deployment.project, ArtifactKind::FunctionCode, code, log)
            .await?;

        Ok(FunctionBundle {
            bucket: self.store.bucket().to_string(),
            layer,
            code,
            handler: template.handler(),
        })
    }

    /// Strip listeners and ensure exports in place; pick the adapter.
    fn rewrite_entry(&self, dir: &Path, entry: &EntryPoint, log: &BuildLog) -> Result<AdapterTemplate> {
        let source = std::fs::read_to_string(&entry.source)?;
        // Convention is decided on the untouched source.
        let module = detect_module_system(&PackageManifest::read(dir)?, &source);
        let app = detect_app_ident(&source);

        let stripped = strip_listener(&source, &app);
        if stripped.removed > 0 {
            log.system(format!("Removed {} listener call(s) on '{}'", stripped.removed, app));
        }
        if stripped.unclosed > 0 {
            warn!(unclosed = stripped.unclosed, app = %app, "listener call left in place");
            log.system(format!(
                "Warning: {} listener call(s) on '{}' could not be removed; the function may try to bind a port",
                stripped.unclosed, app
            ));
        }
        let rewritten = ensure_exports(&stripped.source, &app, module, entry.language);
        if rewritten != source {
            std::fs::write(&entry.source, &rewritten)?;
        }

        let template = AdapterTemplate::select(module, entry.language);
        info!(module = %module, language = %entry.language, app = %app, "Entry point prepared");
        Ok(template)
    }

    /// Compile into the output directory and copy forward what it lacks.
    async fn compile(
        &self,
        dir: &Path,
        entry: &EntryPoint,
        manager: PackageManager,
        log: &BuildLog,
    ) -> Result<()> {
        log.system("Compiling TypeScript");
        let command = if dir.join("tsconfig.json").is_file() {
            manager.exec(&format!("tsc --outDir {}", COMPILED_DIR))
        } else {
            manager.exec(&format!(
                "tsc {} --outDir {} --esModuleInterop",
                relative(dir, &entry.source),
                COMPILED_DIR
            ))
        };
        self.run(dir, command, log).await?;

        let out = dir.join(COMPILED_DIR);
        if !out.is_dir() {
            return Err(Error::MissingArtifact(format!(
                "compiled output directory {} not found",
                out.display()
            )));
        }
        for name in [PackageManifest::FILE, ENV_FILE, manager.lockfile()] {
            let from = dir.join(name);
            if from.is_file() {
                std::fs::copy(&from, out.join(name))?;
            }
        }
        Ok(())
    }

    async fn run(&self, dir: &Path, command: String, log: &BuildLog) -> Result<()> {
        let outcome = self.runner.run(&Script::new(dir, command.clone()), log).await?;
        if !outcome.success() {
            return Err(Error::BuildFailure {
                exit_code: Some(outcome.exit_code),
                message: format!("'{}' exited with code {}", command, outcome.exit_code),
            });
        }
        Ok(())
    }

    async fn upload(
        &self,
        project: &ProjectId,
        kind: ArtifactKind,
        archive: Archive,
        log: &BuildLog,
    ) -> Result<Artifact> {
        let key = artifact_key(project, kind);
        let artifact = Artifact {
            project: project.clone(),
            kind,
            key: key.clone(),
            size: archive.bytes.len() as u64,
            checksum: hex::encode(Sha256::digest(&archive.bytes)),
        };

        self.store.put(&key, archive.bytes).await?;
        log.system(format!(
            "Uploaded {} ({} bytes) to {}/{}",
            kind,
            artifact.size,
            self.store.bucket(),
            key
        ));
        Ok(artifact)
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn list_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path.clone());
            }
            files.push(relative(root, &path));
        }
    }
    files.sort();
    Ok(files)
}
