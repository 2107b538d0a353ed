//! Build executor: one install-then-compile run per deployment.

use crate::plan::{BuildPlan, PackageManager, prepare_workspace};
use launchpad_core::executor::{Script, ScriptRunner};
use launchpad_core::{BuildLog, Deployment, Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const BUILD_COMPLETE: &str = "Build Complete";

/// Exit code reported when the build process never started.
const NO_EXIT_CODE: i32 = -1;

/// What a successful build leaves behind for the packager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub manager: PackageManager,
    pub source_dir: PathBuf,
}

pub struct BuildExecutor {
    runner: Arc<dyn ScriptRunner>,
}

impl BuildExecutor {
    pub fn new(runner: Arc<dyn ScriptRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<dyn ScriptRunner> {
        &self.runner
    }

    /// Run the category's command sequence in the deployment's source tree.
    ///
    /// Always publishes exactly one terminal line, `Build Complete` or
    /// `Build failed with exit code <n>`. Success is decided by the exit code
    /// alone.
    pub async fn build(&self, deployment: &Deployment, log: &BuildLog) -> Result<BuildReport> {
        let dir = &deployment.source_dir;
        if !dir.is_dir() {
            return Err(failed(
                log,
                NO_EXIT_CODE,
                Error::MissingArtifact(format!("source directory {} not found", dir.display())),
            ));
        }

        let plan = BuildPlan::for_category(deployment.category, dir)
            .map_err(|e| failed(log, NO_EXIT_CODE, e))?;
        prepare_workspace(dir, plan.manager).map_err(|e| failed(log, NO_EXIT_CODE, e))?;

        info!(
            project = %deployment.project,
            category = %deployment.category,
            manager = plan.manager.name(),
            runner = self.runner.name(),
            "Starting build"
        );

        let mut script = Script::new(dir, plan.script());
        script.env.extend(deployment.env.clone());

        let outcome = self
            .runner
            .run(&script, log)
            .await
            .map_err(|e| failed(log, NO_EXIT_CODE, e))?;

        if !outcome.success() {
            return Err(failed(
                log,
                outcome.exit_code,
                Error::build_failed(outcome.exit_code),
            ));
        }

        log.system(BUILD_COMPLETE);
        Ok(BuildReport {
            manager: plan.manager,
            source_dir: dir.clone(),
        })
    }
}

/// Publish the terminal failure line and hand the error back.
fn failed(log: &BuildLog, exit_code: i32, err: Error) -> Error {
    log.system(format!("Build failed with exit code {}", exit_code));
    err
}
