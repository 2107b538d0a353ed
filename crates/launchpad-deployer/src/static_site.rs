//! Static-site provisioning: hosting project plus a branch deployment.

use launchpad_core::deployer::StaticHost;
use launchpad_core::resource::{CloudResource, ReconcileReport, ResourceAction, ResourceKind};
use launchpad_core::{BuildLog, ProjectId, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::upsert::{Recovery, create_or_update};

pub struct StaticReconciler {
    host: Arc<dyn StaticHost>,
    branch: String,
}

impl StaticReconciler {
    pub fn new(host: Arc<dyn StaticHost>, branch: impl Into<String>) -> Self {
        Self {
            host,
            branch: branch.into(),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Ensure the hosting project exists, then deploy `bundle_dir` to the
    /// production branch.
    pub async fn reconcile(
        &self,
        project: &ProjectId,
        bundle_dir: &Path,
        log: &BuildLog,
    ) -> Result<ReconcileReport> {
        let name = project.as_str();
        let mut report = ReconcileReport::default();

        info!(project = %project, host = self.host.name(), "logging in to static host");
        self.host.login().await?;

        let created = create_or_update(
            || self.host.create_project(name, &self.branch),
            |err| {
                if err.is_existing() {
                    log.system(format!("Project creation failed: {}", err.message));
                    Recovery::Update
                } else {
                    Recovery::Propagate
                }
            },
            |_| async { Ok(()) },
        )
        .await?;

        let action = if created.was_created() {
            log.system(format!("Project '{}' created successfully.", name));
            ResourceAction::Created
        } else {
            ResourceAction::Unchanged
        };
        report.record(
            CloudResource::new(ResourceKind::HostingProject, name, action)
                .with_config(json!({ "production_branch": self.branch })),
        );

        log.system(format!("Deployment Started for {}", name));
        let url = self.host.deploy(name, bundle_dir, &self.branch).await?;
        log.system("Deployment completed successfully");
        if let Some(url) = &url {
            log.system(format!("Deployed to {}", url));
        }

        report.record(
            CloudResource::new(ResourceKind::DeploymentStage, &self.branch, ResourceAction::Created)
                .with_parent(name)
                .with_config(json!({ "bundle_dir": bundle_dir.display().to_string() })),
        );
        report.url = url;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStaticHost;
    use launchpad_core::Error;
    use launchpad_core::testing::MemoryLogPublisher;
    use std::path::PathBuf;

    fn log() -> (BuildLog, Arc<MemoryLogPublisher>) {
        let publisher = Arc::new(MemoryLogPublisher::default());
        let log = BuildLog::new(ProjectId::parse("demo").unwrap(), publisher.clone());
        (log, publisher)
    }

    #[tokio::test]
    async fn test_creates_project_and_deploys_to_main() {
        let host = Arc::new(RecordingStaticHost::new());
        let reconciler = StaticReconciler::new(host.clone(), "main");
        let (log, publisher) = log();

        let report = reconciler
            .reconcile(&ProjectId::parse("demo").unwrap(), Path::new("/work/output"), &log)
            .await
            .unwrap();

        assert_eq!(host.projects(), vec!["demo".to_string()]);
        assert_eq!(
            host.deployments(),
            vec![(
                "demo".to_string(),
                PathBuf::from("/work/output"),
                "main".to_string()
            )]
        );
        assert_eq!(report.url.as_deref(), Some("https://main.demo.pages.dev"));

        let project = report.of_kind(ResourceKind::HostingProject).next().unwrap();
        assert_eq!(project.action, ResourceAction::Created);

        let lines = publisher.lines();
        assert!(lines.contains(&"Project 'demo' created successfully.".to_string()));
        assert!(lines.contains(&"Deployment Started for demo".to_string()));
        assert!(lines.contains(&"Deployment completed successfully".to_string()));
    }

    #[tokio::test]
    async fn test_existing_project_is_not_fatal() {
        let host = Arc::new(RecordingStaticHost::new().with_project("demo"));
        let reconciler = StaticReconciler::new(host.clone(), "main");
        let (log, publisher) = log();

        let report = reconciler
            .reconcile(&ProjectId::parse("demo").unwrap(), Path::new("/work/output"), &log)
            .await
            .unwrap();

        assert_eq!(host.projects().len(), 1);
        assert_eq!(host.deployments().len(), 1);
        let project = report.of_kind(ResourceKind::HostingProject).next().unwrap();
        assert_eq!(project.action, ResourceAction::Unchanged);
        assert!(
            publisher
                .lines()
                .iter()
                .any(|l| l.starts_with("Project creation failed:"))
        );
    }

    #[tokio::test]
    async fn test_login_failure_stops_before_project_calls() {
        let host = Arc::new(RecordingStaticHost::new().failing_login());
        let reconciler = StaticReconciler::new(host.clone(), "main");
        let (log, _) = log();

        let err = reconciler
            .reconcile(&ProjectId::parse("demo").unwrap(), Path::new("/work/output"), &log)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(_)));
        assert!(host.projects().is_empty());
        assert!(host.deployments().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_failure_is_fatal() {
        let host = Arc::new(RecordingStaticHost::new().failing_deploy());
        let reconciler = StaticReconciler::new(host, "main");
        let (log, publisher) = log();

        let err = reconciler
            .reconcile(&ProjectId::parse("demo").unwrap(), Path::new("/work/output"), &log)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(
            !publisher
                .lines()
                .contains(&"Deployment completed successfully".to_string())
        );
    }
}
