//! Static hosting through the Wrangler CLI.
//!
//! Every call runs through the build's `ScriptRunner`, so CLI output lands in
//! the same log channel as the build. The API token travels in the child's
//! environment only.

use async_trait::async_trait;
use launchpad_core::deployer::{PlatformError, PlatformErrorKind, PlatformResult, StaticHost};
use launchpad_core::executor::{Script, ScriptOutcome, ScriptRunner};
use launchpad_core::{BuildLog, Secret};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

const TOKEN_VAR: &str = "CLOUDFLARE_API_TOKEN";

/// Error code the hosting API returns for a taken project name.
const PROJECT_EXISTS_CODE: &str = "8000002";

static DEPLOY_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://[A-Za-z0-9.-]+\.pages\.dev\S*").unwrap());

pub struct WranglerHost {
    runner: Arc<dyn ScriptRunner>,
    token: Secret,
    /// Directory holding the hosting manifest; non-deploy calls run here.
    workdir: PathBuf,
    log: BuildLog,
    wrangler_bin: String,
}

impl WranglerHost {
    pub fn new(
        runner: Arc<dyn ScriptRunner>,
        token: Secret,
        workdir: impl Into<PathBuf>,
        log: BuildLog,
    ) -> Self {
        Self {
            runner,
            token,
            workdir: workdir.into(),
            log,
            wrangler_bin: "wrangler".to_string(),
        }
    }

    pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
        self.wrangler_bin = bin.into();
        self
    }

    async fn wrangler(
        &self,
        operation: &'static str,
        dir: &Path,
        args: &str,
    ) -> PlatformResult<ScriptOutcome> {
        let command = format!("{} {}", self.wrangler_bin, args);
        debug!(command = %command, dir = %dir.display(), "running wrangler");
        let script = Script::new(dir, command).with_env(TOKEN_VAR, self.token.expose());
        self.runner
            .run(&script, &self.log)
            .await
            .map_err(|e| PlatformError::other(operation, e.to_string()))
    }
}

/// Last non-empty output line, for error messages.
fn last_line(outcome: &ScriptOutcome) -> String {
    outcome
        .tail
        .iter()
        .rev()
        .find(|l| !l.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| format!("exit code {}", outcome.exit_code))
}

fn deploy_url(outcome: &ScriptOutcome) -> Option<String> {
    outcome
        .tail
        .iter()
        .rev()
        .find_map(|line| DEPLOY_URL.find(line).map(|m| m.as_str().to_string()))
}

#[async_trait]
impl StaticHost for WranglerHost {
    fn name(&self) -> &'static str {
        "wrangler"
    }

    async fn login(&self) -> PlatformResult<()> {
        let outcome = self.wrangler("login", &self.workdir, "whoami").await?;
        if !outcome.success() || outcome.output_contains("not authenticated") {
            return Err(PlatformError::other("login", last_line(&outcome)));
        }
        info!("static host credentials verified");
        Ok(())
    }

    async fn create_project(&self, project: &str, production_branch: &str) -> PlatformResult<()> {
        let args = format!(
            "pages project create {} --production-branch={}",
            project, production_branch
        );
        let outcome = self.wrangler("create_project", &self.workdir, &args).await?;
        if outcome.success() {
            return Ok(());
        }
        let kind = if outcome.output_contains("already exists")
            || outcome.output_contains(PROJECT_EXISTS_CODE)
        {
            PlatformErrorKind::AlreadyExists
        } else {
            PlatformErrorKind::Other
        };
        Err(PlatformError::new("create_project", kind, last_line(&outcome)))
    }

    /// Deploys from `bundle_dir`, where the hosting manifest points the CLI
    /// at the static output.
    async fn deploy(
        &self,
        project: &str,
        bundle_dir: &Path,
        branch: &str,
    ) -> PlatformResult<Option<String>> {
        let args = format!(
            "pages deploy --project-name={} --branch={} --commit-dirty=true",
            project, branch
        );
        let outcome = self.wrangler("deploy", bundle_dir, &args).await?;
        if !outcome.success() {
            return Err(PlatformError::other("deploy", last_line(&outcome)));
        }
        Ok(deploy_url(&outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::ProjectId;
    use launchpad_core::testing::{MemoryLogPublisher, ScriptedRunner};

    fn host(runner: ScriptedRunner) -> (WranglerHost, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let log = BuildLog::new(
            ProjectId::parse("demo").unwrap(),
            Arc::new(MemoryLogPublisher::default()),
        );
        let host = WranglerHost::new(runner.clone(), Secret::new("cf-token"), "/work/output", log);
        (host, runner)
    }

    #[tokio::test]
    async fn test_token_is_passed_in_environment() {
        let (host, runner) = host(ScriptedRunner::new());
        host.login().await.unwrap();

        let call = &runner.calls()[0];
        assert_eq!(call.command, "wrangler whoami");
        assert_eq!(call.env.get(TOKEN_VAR).map(String::as_str), Some("cf-token"));
        assert!(!call.command.contains("cf-token"));
    }

    #[tokio::test]
    async fn test_unauthenticated_login_fails() {
        let (host, _) = host(ScriptedRunner::new().respond(
            "whoami",
            0,
            &["You are not authenticated. Please run `wrangler login`."],
        ));
        let err = host.login().await.unwrap_err();
        assert_eq!(err.kind, PlatformErrorKind::Other);
        assert_eq!(err.operation, "login");
    }

    #[tokio::test]
    async fn test_existing_project_is_classified() {
        let (host, runner) = host(ScriptedRunner::new().respond(
            "pages project create",
            1,
            &["✘ [ERROR] A project with this name already exists. [code: 8000002]"],
        ));
        let err = host.create_project("demo", "main").await.unwrap_err();
        assert!(err.is_existing());
        assert_eq!(
            runner.commands(),
            vec!["wrangler pages project create demo --production-branch=main".to_string()]
        );
    }

    #[tokio::test]
    async fn test_other_create_failure() {
        let (host, _) = host(ScriptedRunner::new().respond(
            "pages project create",
            1,
            &["✘ [ERROR] Authentication error [code: 10000]"],
        ));
        let err = host.create_project("demo", "main").await.unwrap_err();
        assert!(!err.is_existing());
        assert!(err.message.contains("10000"));
    }

    #[tokio::test]
    async fn test_deploy_runs_in_bundle_dir_and_reports_url() {
        let (host, runner) = host(ScriptedRunner::new().respond(
            "pages deploy",
            0,
            &[
                "✨ Success! Uploaded 12 files (3.21 sec)",
                "✨ Deployment complete! Take a peek over at https://4f2a1c9e.demo.pages.dev",
            ],
        ));
        let url = host
            .deploy("demo", Path::new("/work/output"), "main")
            .await
            .unwrap();

        assert_eq!(url.as_deref(), Some("https://4f2a1c9e.demo.pages.dev"));
        let call = &runner.calls()[0];
        assert_eq!(call.dir, PathBuf::from("/work/output"));
        assert_eq!(
            call.command,
            "wrangler pages deploy --project-name=demo --branch=main --commit-dirty=true"
        );
    }

    #[tokio::test]
    async fn test_missing_cli_is_a_platform_error() {
        let (host, _) = host(ScriptedRunner::new().unspawnable("No such file or directory"));
        let err = host
            .deploy("demo", Path::new("/work/output"), "main")
            .await
            .unwrap_err();
        assert_eq!(err.operation, "deploy");
        assert!(err.message.contains("No such file or directory"));
    }
}
