//! Dispatch contract: the values a worker is launched with.
//!
//! The dispatcher hands a deployment to the worker through process
//! environment. `DispatchEnv` is the raw, possibly incomplete view of it;
//! `WorkerConfig` is the validated value every component receives.

use crate::defaults::PlatformDefaults;
use crate::{ConfigError, ConfigResult};
use launchpad_core::{BuildCategory, Deployment, EnvVars, ProjectId, Secret};
use serde_json::Value;
use std::path::PathBuf;

pub const DEFAULT_SOURCE_DIR: &str = "output";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Raw dispatch values, exactly as found.
#[derive(Debug, Clone, Default)]
pub struct DispatchEnv {
    pub project_id: Option<String>,
    pub category: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub source_url: Option<String>,
    /// JSON object of environment variables for the deployed project.
    pub env_vars: Option<String>,
    pub redis_url: Option<String>,
    pub cloudflare_api_token: Option<String>,
    pub aws_region: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub bucket: Option<String>,
    pub lambda_role_arn: Option<String>,
}

/// Credentials and settings for the target platform of one category.
#[derive(Debug, Clone)]
pub enum TargetConfig {
    Static(StaticTarget),
    Dynamic(DynamicTarget),
}

#[derive(Debug, Clone)]
pub struct StaticTarget {
    pub api_token: Secret,
}

#[derive(Debug, Clone)]
pub struct DynamicTarget {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: Secret,
    pub bucket: String,
    pub role_arn: String,
}

/// Validated worker configuration, built once at start-up.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub project: ProjectId,
    pub category: BuildCategory,
    pub source_dir: PathBuf,
    pub source_url: Option<String>,
    pub env: EnvVars,
    pub redis_url: String,
    pub target: TargetConfig,
    pub defaults: PlatformDefaults,
}

impl WorkerConfig {
    /// Validate dispatch values. Only the selected category's credentials are
    /// required.
    pub fn from_dispatch(raw: DispatchEnv, defaults: PlatformDefaults) -> ConfigResult<Self> {
        let project = required(raw.project_id, "PROJECT_ID")?;
        let project = ProjectId::parse(project)
            .map_err(|e| ConfigError::invalid("PROJECT_ID", e.to_string()))?;

        let category = required(raw.category, "TASK")?;
        let category: BuildCategory = category
            .parse()
            .map_err(|e: launchpad_core::Error| ConfigError::invalid("TASK", e.to_string()))?;

        let env = match raw.env_vars.as_deref().map(str::trim) {
            None | Some("") => EnvVars::new(),
            Some(json) => parse_env_vars(json)?,
        };

        let target = match category {
            BuildCategory::Static => TargetConfig::Static(StaticTarget {
                api_token: Secret::new(required(
                    raw.cloudflare_api_token,
                    "CLOUDFLARE_API_TOKEN",
                )?),
            }),
            BuildCategory::Dynamic => TargetConfig::Dynamic(DynamicTarget {
                region: required(raw.aws_region, "AWS_REGION")?,
                access_key_id: required(raw.aws_access_key_id, "AWS_ACCESS_KEY_ID")?,
                secret_access_key: Secret::new(required(
                    raw.aws_secret_access_key,
                    "AWS_SECRET_ACCESS_KEY",
                )?),
                bucket: required(raw.bucket, "BUCKET")?,
                role_arn: required(raw.lambda_role_arn, "LAMBDA_ROLE_ARN")?,
            }),
        };

        Ok(Self {
            project,
            category,
            source_dir: raw
                .source_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR)),
            source_url: raw.source_url.filter(|s| !s.trim().is_empty()),
            env,
            redis_url: raw
                .redis_url
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            target,
            defaults,
        })
    }

    /// The deployment this worker runs, in `pending` state.
    pub fn deployment(&self) -> Deployment {
        let mut deployment = Deployment::new(
            self.project.clone(),
            self.category,
            self.source_dir.clone(),
            self.env.clone(),
        );
        deployment.source_url = self.source_url.clone();
        deployment
    }
}

/// Parse the `ENVVARS` mapping.
///
/// Scalars are accepted and stringified; nested values and nulls are rejected.
pub fn parse_env_vars(json: &str) -> ConfigResult<EnvVars> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ConfigError::invalid("ENVVARS", format!("not valid JSON: {}", e)))?;

    let Value::Object(map) = value else {
        return Err(ConfigError::invalid("ENVVARS", "expected a JSON object"));
    };

    let mut env = EnvVars::new();
    for (key, value) in map {
        if key.is_empty() || key.contains('=') || key.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "ENVVARS",
                format!("'{}' is not a valid variable name", key),
            ));
        }
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(ConfigError::invalid(
                    "ENVVARS",
                    format!("value of '{}' must be a scalar, got {}", key, other),
                ));
            }
        };
        env.insert(key, value);
    }
    Ok(env)
}

fn required(value: Option<String>, name: &str) -> ConfigResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingField(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_dispatch() -> DispatchEnv {
        DispatchEnv {
            project_id: Some("demo".into()),
            category: Some("static".into()),
            cloudflare_api_token: Some("token".into()),
            ..Default::default()
        }
    }

    fn dynamic_dispatch() -> DispatchEnv {
        DispatchEnv {
            project_id: Some("demo".into()),
            category: Some("dynamic".into()),
            aws_region: Some("ap-south-1".into()),
            aws_access_key_id: Some("AKIA".into()),
            aws_secret_access_key: Some("secret".into()),
            bucket: Some("artifacts".into()),
            lambda_role_arn: Some("arn:aws:iam::123456789012:role/lambda".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_static_config() {
        let config =
            WorkerConfig::from_dispatch(static_dispatch(), PlatformDefaults::default()).unwrap();
        assert_eq!(config.project.as_str(), "demo");
        assert_eq!(config.category, BuildCategory::Static);
        assert_eq!(config.source_dir, PathBuf::from("output"));
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert!(config.env.is_empty());
        assert!(matches!(config.target, TargetConfig::Static(_)));
    }

    #[test]
    fn test_static_needs_token_only() {
        let mut raw = static_dispatch();
        raw.cloudflare_api_token = None;
        let err = WorkerConfig::from_dispatch(raw, PlatformDefaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "CLOUDFLARE_API_TOKEN"));
    }

    #[test]
    fn test_dynamic_requires_every_credential() {
        for field in ["region", "key", "secret", "bucket", "role"] {
            let mut raw = dynamic_dispatch();
            match field {
                "region" => raw.aws_region = None,
                "key" => raw.aws_access_key_id = Some("  ".into()),
                "secret" => raw.aws_secret_access_key = None,
                "bucket" => raw.bucket = None,
                _ => raw.lambda_role_arn = None,
            }
            let err = WorkerConfig::from_dispatch(raw, PlatformDefaults::default()).unwrap_err();
            assert!(matches!(err, ConfigError::MissingField(_)), "{field}");
        }
    }

    #[test]
    fn test_missing_identity() {
        let mut raw = static_dispatch();
        raw.project_id = None;
        assert!(matches!(
            WorkerConfig::from_dispatch(raw, PlatformDefaults::default()).unwrap_err(),
            ConfigError::MissingField(f) if f == "PROJECT_ID"
        ));

        let mut raw = static_dispatch();
        raw.category = Some("serverless".into());
        assert!(matches!(
            WorkerConfig::from_dispatch(raw, PlatformDefaults::default()).unwrap_err(),
            ConfigError::InvalidValue { field, .. } if field == "TASK"
        ));
    }

    #[test]
    fn test_env_vars() {
        let env = parse_env_vars(r#"{"API_URL":"https://x.test","PORT":8080,"DEBUG":true}"#)
            .unwrap();
        assert_eq!(env.get("API_URL").unwrap(), "https://x.test");
        assert_eq!(env.get("PORT").unwrap(), "8080");
        assert_eq!(env.get("DEBUG").unwrap(), "true");

        assert!(parse_env_vars("[1,2]").is_err());
        assert!(parse_env_vars(r#"{"A":null}"#).is_err());
        assert!(parse_env_vars(r#"{"A":{"b":1}}"#).is_err());
        assert!(parse_env_vars(r#"{"BAD KEY":"x"}"#).is_err());
        assert!(parse_env_vars("{").is_err());
    }

    #[test]
    fn test_malformed_env_vars_is_an_invalid_value() {
        let err = parse_env_vars("{not json").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "ENVVARS"
        ));
    }

    #[test]
    fn test_deployment_starts_pending() {
        let mut raw = dynamic_dispatch();
        raw.env_vars = Some(r#"{"GREETING":"hello world"}"#.into());
        raw.source_url = Some("https://github.com/acme/demo.git".into());
        let config = WorkerConfig::from_dispatch(raw, PlatformDefaults::default()).unwrap();

        let deployment = config.deployment();
        assert_eq!(deployment.status, launchpad_core::DeploymentStatus::Pending);
        assert_eq!(deployment.env.get("GREETING").unwrap(), "hello world");
        assert_eq!(
            deployment.source_url.as_deref(),
            Some("https://github.com/acme/demo.git")
        );
    }

    #[test]
    fn test_secrets_not_in_debug_output() {
        let config =
            WorkerConfig::from_dispatch(dynamic_dispatch(), PlatformDefaults::default()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret\""));
        assert!(debug.contains("Secret(***)"));
    }
}
