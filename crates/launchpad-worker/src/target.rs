//! Wiring a validated config into a runnable pipeline.

use launchpad_config::{TargetConfig, WorkerConfig};
use launchpad_core::executor::ScriptRunner;
use launchpad_core::{BuildLog, Result};
use launchpad_deployer::{
    AwsPlatform, FunctionReconciler, FunctionSettings, StaticReconciler, WranglerHost,
};
use launchpad_executor::{BuildExecutor, ShellRunner};
use launchpad_packager::{FunctionPackager, ObjectArtifactStore};
use launchpad_pipeline::{DeployTarget, DeploymentPipeline};
use std::sync::Arc;

/// Build the pipeline for the configured category, with real platforms.
pub async fn pipeline(
    config: &WorkerConfig,
    log: &BuildLog,
    shell: ShellRunner,
) -> Result<DeploymentPipeline> {
    let runner: Arc<dyn ScriptRunner> = Arc::new(shell);
    let executor = BuildExecutor::new(runner.clone());

    let target = match &config.target {
        TargetConfig::Static(target) => {
            let workdir = std::path::absolute(&config.source_dir)?;
            let host = WranglerHost::new(runner, target.api_token.clone(), workdir, log.clone());
            DeployTarget::Static {
                pages: config.defaults.pages.clone(),
                reconciler: StaticReconciler::new(
                    Arc::new(host),
                    config.defaults.pages.branch.clone(),
                ),
            }
        }
        TargetConfig::Dynamic(target) => {
            let store = Arc::new(ObjectArtifactStore::s3(target)?);
            let platform = Arc::new(AwsPlatform::connect(target).await);
            let settings = function_settings(config, &target.role_arn);
            DeployTarget::Dynamic {
                packager: FunctionPackager::new(runner, store),
                reconciler: FunctionReconciler::new(platform.clone(), platform, settings),
            }
        }
    };

    Ok(DeploymentPipeline::new(executor, target))
}

fn function_settings(config: &WorkerConfig, role_arn: &str) -> FunctionSettings {
    let function = &config.defaults.function;
    FunctionSettings {
        runtime: function.runtime.clone(),
        role_arn: role_arn.to_string(),
        memory_mb: function.memory_mb,
        timeout_secs: function.timeout_secs,
        stage: config.defaults.routing.stage.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_config::{DispatchEnv, PlatformDefaults};
    use launchpad_core::BuildCategory;
    use launchpad_core::testing::MemoryLogPublisher;

    fn dynamic_config() -> WorkerConfig {
        let raw = DispatchEnv {
            project_id: Some("demo".into()),
            category: Some("dynamic".into()),
            aws_region: Some("us-east-1".into()),
            aws_access_key_id: Some("AKIDEXAMPLE".into()),
            aws_secret_access_key: Some("secret".into()),
            bucket: Some("artifacts".into()),
            lambda_role_arn: Some("arn:aws:iam::123456789012:role/lambda".into()),
            ..Default::default()
        };
        WorkerConfig::from_dispatch(raw, PlatformDefaults::default()).unwrap()
    }

    #[test]
    fn test_function_settings_come_from_defaults() {
        let config = dynamic_config();
        let settings = function_settings(&config, "arn:aws:iam::123456789012:role/lambda");
        assert_eq!(settings.runtime, config.defaults.function.runtime);
        assert_eq!(settings.stage, config.defaults.routing.stage);
        assert_eq!(settings.memory_mb, config.defaults.function.memory_mb);
    }

    #[tokio::test]
    async fn test_static_target_wires_without_remote_calls() {
        let raw = DispatchEnv {
            project_id: Some("demo".into()),
            category: Some("static".into()),
            cloudflare_api_token: Some("token".into()),
            ..Default::default()
        };
        let config = WorkerConfig::from_dispatch(raw, PlatformDefaults::default()).unwrap();
        let log = BuildLog::new(config.project.clone(), Arc::new(MemoryLogPublisher::default()));

        let pipeline = pipeline(&config, &log, ShellRunner::new()).await.unwrap();
        assert_eq!(pipeline.category(), BuildCategory::Static);
    }
}
