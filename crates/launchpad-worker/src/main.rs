//! Launchpad worker: builds and deploys one project, then exits.
//!
//! Exit status is 0 when the deployment reached `deployed` and 1 for any
//! failure, including bad arguments or configuration.

use anyhow::Result;
use clap::Parser;
use launchpad_config::dispatch::DEFAULT_REDIS_URL;
use launchpad_config::{ConfigError, DispatchEnv, WorkerConfig, load_defaults};
use launchpad_core::{BuildLog, LogPublisher, ProjectId};
use launchpad_executor::ShellRunner;
use launchpad_relay::RedisPublisher;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod signals;
mod target;

#[derive(Parser)]
#[command(name = "launchpad-worker")]
#[command(about = "Build and deploy one project", version)]
struct Args {
    /// Platform defaults file
    #[arg(long, env = "LAUNCHPAD_CONFIG")]
    config: Option<PathBuf>,

    /// Project identifier
    #[arg(long, env = "PROJECT_ID")]
    project_id: Option<String>,

    /// Build category, `static` or `dynamic`
    #[arg(long, env = "TASK")]
    task: Option<String>,

    /// Checked-out source tree
    #[arg(long, env = "SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// Where the source was checked out from
    #[arg(long, env = "GIT_REPOSITORY__URL")]
    source_url: Option<String>,

    /// JSON object of environment variables for the project
    #[arg(long, env = "ENVVARS")]
    env_vars: Option<String>,

    /// Log broker
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    cloudflare_api_token: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    aws_region: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    aws_access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    /// Artifact bucket
    #[arg(long, env = "BUCKET")]
    bucket: Option<String>,

    /// Execution role for the function
    #[arg(long, env = "LAMBDA_ROLE_ARN")]
    lambda_role_arn: Option<String>,
}

impl Args {
    fn dispatch(self) -> (Option<PathBuf>, DispatchEnv) {
        let raw = DispatchEnv {
            project_id: self.project_id,
            category: self.task,
            source_dir: self.source_dir,
            source_url: self.source_url,
            env_vars: self.env_vars,
            redis_url: self.redis_url,
            cloudflare_api_token: self.cloudflare_api_token,
            aws_region: self.aws_region,
            aws_access_key_id: self.aws_access_key_id,
            aws_secret_access_key: self.aws_secret_access_key,
            bucket: self.bucket,
            lambda_role_arn: self.lambda_role_arn,
        };
        (self.config, raw)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "deployment failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let (config_path, raw) = args.dispatch();
    let config = match load_defaults(config_path.as_deref())
        .and_then(|defaults| WorkerConfig::from_dispatch(raw.clone(), defaults))
    {
        Ok(config) => config,
        Err(e) => {
            report_init_failure(&raw, &e).await;
            return Err(e.into());
        }
    };

    let shutdown = config.defaults.shutdown.clone();
    let publisher: Arc<dyn LogPublisher> = Arc::new(RedisPublisher::connect(&config.redis_url)?);
    let shell = ShellRunner::new();
    signals::spawn_watch(publisher.clone(), shell.active(), shutdown.grace);

    let log = BuildLog::new(config.project.clone(), publisher);
    let mut deployment = config.deployment();
    info!(
        project = %config.project,
        category = %config.category,
        source = %config.source_dir.display(),
        "worker starting"
    );

    let outcome = match target::pipeline(&config, &log, shell).await {
        Ok(pipeline) => pipeline.run(&mut deployment, &log).await,
        Err(e) => {
            log.system(format!("Initialization error: {}", e));
            Err(e)
        }
    };
    log.close(shutdown.flush).await;

    let report = outcome?;
    info!(
        project = %config.project,
        status = %deployment.status,
        url = report.url.as_deref().unwrap_or("-"),
        resources = report.resources.len(),
        "worker exiting"
    );
    Ok(())
}

/// Publish a configuration failure on the project's channel when the project
/// identifier is usable, so viewers see why the worker stopped.
async fn report_init_failure(raw: &DispatchEnv, err: &ConfigError) {
    let Some(project) = raw
        .project_id
        .as_deref()
        .and_then(|p| ProjectId::parse(p).ok())
    else {
        return;
    };
    let url = raw
        .redis_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(DEFAULT_REDIS_URL);
    let Ok(publisher) = RedisPublisher::connect(url) else {
        return;
    };
    let log = BuildLog::new(project, Arc::new(publisher));
    log.system(format!("Initialization error: {}", err));
    log.close(std::time::Duration::from_secs(1)).await;
}
