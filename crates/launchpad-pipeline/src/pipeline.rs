//! Deployment pipeline - drives one deployment through build, package and
//! provision.
//!
//! Stages run strictly in order; each only starts once the previous one has
//! succeeded, and the first fatal error ends the run with a final log line.

use launchpad_config::defaults::PagesDefaults;
use launchpad_core::resource::ReconcileReport;
use launchpad_core::{BuildCategory, BuildLog, Deployment, DeploymentStatus, Error, Result};
use launchpad_deployer::{FunctionArtifacts, FunctionReconciler, StaticReconciler};
use launchpad_executor::BuildExecutor;
use launchpad_packager::{FunctionBundle, FunctionPackager, StaticBundle, package_static};
use tracing::{error, info};

pub const BUILD_STARTED: &str = "New Build Started...";

/// Category-specific packaging and provisioning.
pub enum DeployTarget {
    Static {
        pages: PagesDefaults,
        reconciler: StaticReconciler,
    },
    Dynamic {
        packager: FunctionPackager,
        reconciler: FunctionReconciler,
    },
}

impl DeployTarget {
    pub fn category(&self) -> BuildCategory {
        match self {
            DeployTarget::Static { .. } => BuildCategory::Static,
            DeployTarget::Dynamic { .. } => BuildCategory::Dynamic,
        }
    }
}

enum Packaged {
    Static(StaticBundle),
    Function(FunctionBundle),
}

pub struct DeploymentPipeline {
    executor: BuildExecutor,
    target: DeployTarget,
}

impl DeploymentPipeline {
    pub fn new(executor: BuildExecutor, target: DeployTarget) -> Self {
        Self { executor, target }
    }

    pub fn category(&self) -> BuildCategory {
        self.target.category()
    }

    /// Run the deployment to a terminal state.
    ///
    /// On error the deployment is left `failed` (when it got past `pending`)
    /// and the log has already received the final line.
    pub async fn run(&self, deployment: &mut Deployment, log: &BuildLog) -> Result<ReconcileReport> {
        if deployment.category != self.target.category() {
            let err = Error::Configuration(format!(
                "deployment category '{}' does not match the configured '{}' target",
                deployment.category,
                self.target.category()
            ));
            log.system(format!("Initialization error: {}", err));
            return Err(err);
        }

        log.system(BUILD_STARTED);
        info!(
            project = %deployment.project,
            deployment = %deployment.id,
            category = %deployment.category,
            "starting deployment"
        );

        match self.stages(deployment, log).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(project = %deployment.project, status = %deployment.status, error = %err, "deployment failed");
                // The build already published its own terminal line.
                if !matches!(err, Error::BuildFailure { .. }) {
                    log.system(format!("Deployment failed: {}", err));
                }
                if deployment.fail() {
                    log.system(format!("Status: {}", DeploymentStatus::Failed));
                }
                Err(err)
            }
        }
    }

    async fn stages(&self, deployment: &mut Deployment, log: &BuildLog) -> Result<ReconcileReport> {
        transition(deployment, DeploymentStatus::Building, log)?;
        self.executor.build(deployment, log).await?;
        transition(deployment, DeploymentStatus::Built, log)?;

        transition(deployment, DeploymentStatus::Packaging, log)?;
        let packaged = match &self.target {
            DeployTarget::Static { pages, .. } => {
                Packaged::Static(package_static(deployment, pages, log)?)
            }
            DeployTarget::Dynamic { packager, .. } => {
                Packaged::Function(packager.package(deployment, log).await?)
            }
        };
        transition(deployment, DeploymentStatus::Packaged, log)?;

        transition(deployment, DeploymentStatus::Provisioning, log)?;
        let report = match (&self.target, packaged) {
            (DeployTarget::Static { reconciler, .. }, Packaged::Static(bundle)) => {
                reconciler
                    .reconcile(&deployment.project, &bundle.project_dir, log)
                    .await?
            }
            (DeployTarget::Dynamic { reconciler, .. }, Packaged::Function(bundle)) => {
                reconciler
                    .reconcile(
                        &deployment.project,
                        &function_artifacts(&bundle),
                        &deployment.env,
                        log,
                    )
                    .await?
            }
            _ => return Err(Error::Internal("packaged output does not match target".into())),
        };
        transition(deployment, DeploymentStatus::Deployed, log)?;

        info!(
            project = %deployment.project,
            resources = report.resources.len(),
            url = report.url.as_deref().unwrap_or("-"),
            "deployment finished"
        );
        Ok(report)
    }
}

fn transition(deployment: &mut Deployment, next: DeploymentStatus, log: &BuildLog) -> Result<()> {
    deployment.advance(next)?;
    log.system(format!("Status: {}", next));
    Ok(())
}

fn function_artifacts(bundle: &FunctionBundle) -> FunctionArtifacts {
    FunctionArtifacts {
        layer: bundle.layer_location(),
        code: bundle.code_location(),
        handler: bundle.handler.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_config::PlatformDefaults;
    use launchpad_core::testing::{MemoryArtifactStore, MemoryLogPublisher, ScriptedRunner};
    use launchpad_core::{EnvVars, ProjectId};
    use launchpad_deployer::FunctionSettings;
    use launchpad_deployer::testing::{InMemoryCloud, RecordingStaticHost};
    use launchpad_executor::STATIC_OUTPUT_SUBDIR;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    fn log() -> (BuildLog, Arc<MemoryLogPublisher>) {
        let publisher = Arc::new(MemoryLogPublisher::default());
        (
            BuildLog::new(ProjectId::parse("demo").unwrap(), publisher.clone()),
            publisher,
        )
    }

    fn deployment(dir: &Path, category: BuildCategory) -> Deployment {
        Deployment::new(
            ProjectId::parse("demo").unwrap(),
            category,
            dir,
            EnvVars::new(),
        )
    }

    fn static_pipeline(runner: Arc<ScriptedRunner>, host: Arc<RecordingStaticHost>) -> DeploymentPipeline {
        let defaults = PlatformDefaults::default();
        DeploymentPipeline::new(
            BuildExecutor::new(runner),
            DeployTarget::Static {
                reconciler: StaticReconciler::new(host, defaults.pages.branch.clone()),
                pages: defaults.pages,
            },
        )
    }

    fn dynamic_pipeline(
        runner: Arc<ScriptedRunner>,
        store: Arc<MemoryArtifactStore>,
        cloud: Arc<InMemoryCloud>,
    ) -> DeploymentPipeline {
        let defaults = PlatformDefaults::default();
        let settings = FunctionSettings {
            runtime: defaults.function.runtime,
            role_arn: "arn:aws:iam::123456789012:role/lambda".to_string(),
            memory_mb: defaults.function.memory_mb,
            timeout_secs: defaults.function.timeout_secs,
            stage: defaults.routing.stage,
        };
        DeploymentPipeline::new(
            BuildExecutor::new(runner.clone()),
            DeployTarget::Dynamic {
                packager: FunctionPackager::new(runner, store),
                reconciler: FunctionReconciler::new(cloud.clone(), cloud, settings),
            },
        )
    }

    fn next_app(dir: &Path) {
        fs::write(dir.join("package.json"), r#"{"name":"demo"}"#).unwrap();
    }

    fn express_app(dir: &Path) {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("package.json"), r#"{"name":"demo"}"#).unwrap();
        fs::write(
            dir.join("src/index.js"),
            "const express = require(\"express\");\n\
             const app = express();\n\
             app.get(\"/\", (req, res) => res.send(\"ok\"));\n\
             app.listen(3000, () => console.log(\"up\"));\n",
        )
        .unwrap();
    }

    /// Installs create a dependency tree; the static build writes its output.
    fn runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .on("next-on-pages", |script| {
                let out = script.dir.join(STATIC_OUTPUT_SUBDIR);
                fs::create_dir_all(&out).unwrap();
                fs::write(out.join("index.html"), "<html></html>").unwrap();
            })
            .on("npm install", |script| {
                let dir = script.dir.join("node_modules/express");
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("index.js"), "module.exports = {};\n").unwrap();
            })
    }

    #[tokio::test]
    async fn test_static_project_is_created_and_deployed_to_main() {
        let dir = tempfile::tempdir().unwrap();
        next_app(dir.path());
        let host = Arc::new(RecordingStaticHost::new());
        let (log, publisher) = log();
        let mut deployment = deployment(dir.path(), BuildCategory::Static);

        let report = static_pipeline(Arc::new(runner()), host.clone())
            .run(&mut deployment, &log)
            .await
            .unwrap();

        assert_eq!(deployment.status, DeploymentStatus::Deployed);
        assert_eq!(host.projects(), vec!["demo".to_string()]);
        let deployments = host.deployments();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].2, "main");
        assert!(report.url.is_some());

        let lines = publisher.lines();
        assert_eq!(lines[0], BUILD_STARTED);
        assert!(lines.contains(&"Build Complete".to_string()));
        assert!(lines.contains(&"Project 'demo' created successfully.".to_string()));
        assert_eq!(lines.last().unwrap(), "Status: deployed");
    }

    #[tokio::test]
    async fn test_build_failure_stops_before_packaging_static() {
        let dir = tempfile::tempdir().unwrap();
        next_app(dir.path());
        let host = Arc::new(RecordingStaticHost::new());
        let runner = Arc::new(ScriptedRunner::new().respond("npm install", 1, &["npm ERR! code E404"]));
        let (log, publisher) = log();
        let mut deployment = deployment(dir.path(), BuildCategory::Static);

        let err = static_pipeline(runner, host.clone())
            .run(&mut deployment, &log)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BuildFailure { exit_code: Some(1), .. }));
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert!(host.projects().is_empty());
        assert!(!dir.path().join("wrangler.toml").exists());

        let lines = publisher.lines();
        assert!(lines.contains(&"Build failed with exit code 1".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("Preparing")));
        assert_eq!(lines.last().unwrap(), "Status: failed");
    }

    #[tokio::test]
    async fn test_build_failure_stops_before_packaging_dynamic() {
        let dir = tempfile::tempdir().unwrap();
        express_app(dir.path());
        let runner = Arc::new(ScriptedRunner::new().respond("npm install", 2, &[]));
        let store = Arc::new(MemoryArtifactStore::default());
        let cloud = Arc::new(InMemoryCloud::new());
        let (log, _) = log();
        let mut deployment = deployment(dir.path(), BuildCategory::Dynamic);

        dynamic_pipeline(runner.clone(), store.clone(), cloud.clone())
            .run(&mut deployment, &log)
            .await
            .unwrap_err();

        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert_eq!(runner.calls().len(), 1);
        assert!(store.puts().is_empty());
        assert!(cloud.calls().is_empty());
        let source = fs::read_to_string(dir.path().join("src/index.js")).unwrap();
        assert!(source.contains("app.listen"));
    }

    #[tokio::test]
    async fn test_dynamic_twice_leaves_no_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        express_app(dir.path());
        let runner = Arc::new(runner());
        let store = Arc::new(MemoryArtifactStore::default());
        let cloud = Arc::new(InMemoryCloud::new());
        let pipeline = dynamic_pipeline(runner, store.clone(), cloud.clone());

        for _ in 0..2 {
            let (log, publisher) = log();
            let mut deployment = deployment(dir.path(), BuildCategory::Dynamic);
            pipeline.run(&mut deployment, &log).await.unwrap();
            assert_eq!(deployment.status, DeploymentStatus::Deployed);
            assert_eq!(publisher.last_line().unwrap(), "Status: deployed");
        }

        let api = cloud.api("demo").unwrap();
        assert_eq!(cloud.function_count(), 1);
        assert_eq!(cloud.api_count(), 1);
        assert_eq!(cloud.proxy_node_count(&api.id), 1);
        assert_eq!(cloud.stage_count(&api.id), 1);
        assert_eq!(cloud.permission_count("demo"), 1);
        assert_eq!(store.keys(), vec!["demo/function.zip", "demo/layer.zip"]);
        assert_eq!(store.puts().len(), 4);

        let source = fs::read_to_string(dir.path().join("src/index.js")).unwrap();
        assert_eq!(source.matches("module.exports = app;").count(), 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure_publishes_final_line() {
        let dir = tempfile::tempdir().unwrap();
        express_app(dir.path());
        let cloud = Arc::new(InMemoryCloud::new().failing("create_api"));
        let (log, publisher) = log();
        let mut deployment = deployment(dir.path(), BuildCategory::Dynamic);

        let err = dynamic_pipeline(
            Arc::new(runner()),
            Arc::new(MemoryArtifactStore::default()),
            cloud,
        )
        .run(&mut deployment, &log)
        .await
        .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        let lines = publisher.lines();
        let failed = &lines[lines.len() - 2];
        assert!(failed.starts_with("Deployment failed:"));
        assert!(failed.contains("create_api"));
        assert_eq!(lines.last().unwrap(), "Status: failed");
    }

    #[tokio::test]
    async fn test_upload_failure_aborts_before_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        express_app(dir.path());
        let cloud = Arc::new(InMemoryCloud::new());
        let (log, _) = log();
        let mut deployment = deployment(dir.path(), BuildCategory::Dynamic);

        let err = dynamic_pipeline(
            Arc::new(runner()),
            Arc::new(MemoryArtifactStore::failing()),
            cloud.clone(),
        )
        .run(&mut deployment, &log)
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Remote(_)));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_category_mismatch_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let (log, publisher) = log();
        let mut deployment = deployment(dir.path(), BuildCategory::Dynamic);

        let err = static_pipeline(runner.clone(), Arc::new(RecordingStaticHost::new()))
            .run(&mut deployment, &log)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(deployment.status, DeploymentStatus::Pending);
        assert!(runner.calls().is_empty());
        assert!(publisher.last_line().unwrap().starts_with("Initialization error:"));
    }
}
