//! Dynamic provisioning: layer, function, routing tree, permission, stage.
//!
//! Every step resolves identity against the platform by name or parentage
//! before acting, so a second pass over the same project converges on the
//! same resources instead of duplicating them.

use launchpad_core::deployer::{
    FunctionPlatform, FunctionSpec, HttpVerb, Integration, InvokeGrant, ObjectLocation,
    PlatformError, PlatformResult, RestApi, RouteNode, RoutingPlatform,
};
use launchpad_core::resource::{CloudResource, ReconcileReport, ResourceAction, ResourceKind};
use launchpad_core::{BuildLog, EnvVars, Error, ProjectId, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::upsert::{Upserted, create_or_update, on_existing};

/// Path part of the catch-all node under the API root.
pub const PROXY_PATH: &str = "{proxy+}";

/// Principal allowed to invoke the function.
pub const ROUTING_PRINCIPAL: &str = "apigateway.amazonaws.com";

/// Environment keys the function platform reserves for itself.
const RESERVED_ENV_PREFIX: &str = "AWS_";

/// Fixed function settings, resolved once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSettings {
    pub runtime: String,
    pub role_arn: String,
    pub memory_mb: i32,
    pub timeout_secs: i32,
    pub stage: String,
}

/// Uploaded archives and the handler inside the code archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionArtifacts {
    pub layer: ObjectLocation,
    pub code: ObjectLocation,
    pub handler: String,
}

pub struct FunctionReconciler {
    functions: Arc<dyn FunctionPlatform>,
    routing: Arc<dyn RoutingPlatform>,
    settings: FunctionSettings,
}

impl FunctionReconciler {
    pub fn new(
        functions: Arc<dyn FunctionPlatform>,
        routing: Arc<dyn RoutingPlatform>,
        settings: FunctionSettings,
    ) -> Self {
        Self {
            functions,
            routing,
            settings,
        }
    }

    pub async fn reconcile(
        &self,
        project: &ProjectId,
        artifacts: &FunctionArtifacts,
        env: &EnvVars,
        log: &BuildLog,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let layer_arn = self.publish_layer(project, &artifacts.layer, log).await?;
        report.record(
            CloudResource::new(ResourceKind::LayerVersion, &layer_arn, ResourceAction::Created)
                .with_config(json!({ "runtime": self.settings.runtime })),
        );

        let spec = self.function_spec(project, artifacts, env, layer_arn);
        let function = self.upsert_function(&spec, log).await?;
        let action = function.action();
        let function_arn = function.into_inner();
        report.record(
            CloudResource::new(ResourceKind::Function, &function_arn, action).with_config(json!({
                "handler": spec.handler,
                "runtime": spec.runtime,
                "layers": spec.layers,
            })),
        );

        let (api, action) = self.resolve_api(project.as_str()).await?;
        report.record(CloudResource::new(ResourceKind::RoutingApi, &api.id, action));

        let (proxy, action) = self.resolve_proxy_node(&api).await?;
        report.record(
            CloudResource::new(ResourceKind::RoutingResourceNode, &proxy.id, action)
                .with_parent(&api.root_node_id)
                .with_config(json!({ "path_part": PROXY_PATH })),
        );

        let routes = [
            (
                HttpVerb::Any,
                Integration::FunctionProxy {
                    function_arn: function_arn.clone(),
                },
            ),
            (HttpVerb::Options, Integration::Mock),
        ];
        for (verb, integration) in routes {
            let method_id = format!("{}/{}", proxy.id, verb);
            let action = if proxy.has_method(verb) {
                ResourceAction::Unchanged
            } else {
                self.routing.put_method(&api.id, &proxy.id, verb).await?;
                ResourceAction::Created
            };
            report.record(
                CloudResource::new(ResourceKind::Method, &method_id, action).with_parent(&proxy.id),
            );

            self.routing
                .put_integration(&api.id, &proxy.id, verb, &integration)
                .await?;
            let action = match action {
                ResourceAction::Created => ResourceAction::Created,
                _ => ResourceAction::Updated,
            };
            report.record(
                CloudResource::new(ResourceKind::Integration, &method_id, action)
                    .with_parent(&method_id)
                    .with_config(serde_json::to_value(&integration)?),
            );
        }
        log.system(format!("Routing {} configured on {}", PROXY_PATH, api.id));

        let grant = InvokeGrant {
            statement_id: format!("apigateway-{}", api.id),
            principal: ROUTING_PRINCIPAL.to_string(),
            source_arn: execute_api_source_arn(&function_arn, &api.id)?,
        };
        let granted = create_or_update(
            || self.functions.add_permission(&spec.name, &grant),
            on_existing,
            |err| async move {
                debug!("{}", err);
                Ok(())
            },
        )
        .await?;
        let action = if granted.was_created() {
            ResourceAction::Created
        } else {
            log.system("Invoke permission already granted");
            ResourceAction::Unchanged
        };
        report.record(
            CloudResource::new(ResourceKind::InvokePermission, &grant.statement_id, action)
                .with_parent(&function_arn)
                .with_config(serde_json::to_value(&grant)?),
        );

        let deployment_id = self
            .routing
            .create_stage_deployment(&api.id, &self.settings.stage)
            .await?;
        report.record(
            CloudResource::new(
                ResourceKind::DeploymentStage,
                &self.settings.stage,
                ResourceAction::Created,
            )
            .with_parent(&api.id)
            .with_config(json!({ "deployment_id": deployment_id })),
        );

        let url = self.routing.invoke_url(&api.id, &self.settings.stage);
        info!(project = %project, url = %url, "function deployed");
        log.system(format!("Deployed to {}", url));
        report.url = Some(url);
        Ok(report)
    }

    async fn publish_layer(
        &self,
        project: &ProjectId,
        layer: &ObjectLocation,
        log: &BuildLog,
    ) -> Result<String> {
        let name = format!("{}-dependencies", project);
        let arn = self
            .functions
            .publish_layer_version(&name, layer, &self.settings.runtime)
            .await?;
        log.system(format!("Published layer version {}", arn));
        Ok(arn)
    }

    fn function_spec(
        &self,
        project: &ProjectId,
        artifacts: &FunctionArtifacts,
        env: &EnvVars,
        layer_arn: String,
    ) -> FunctionSpec {
        FunctionSpec {
            name: project.to_string(),
            runtime: self.settings.runtime.clone(),
            role_arn: self.settings.role_arn.clone(),
            handler: artifacts.handler.clone(),
            memory_mb: self.settings.memory_mb,
            timeout_secs: self.settings.timeout_secs,
            code: artifacts.code.clone(),
            layers: vec![layer_arn],
            env: function_env(env),
        }
    }

    /// Create the function, or on a name conflict push new code and
    /// configuration and look the ARN up again.
    async fn upsert_function(
        &self,
        spec: &FunctionSpec,
        log: &BuildLog,
    ) -> Result<Upserted<String>> {
        let functions = &self.functions;
        let upserted = create_or_update(
            || functions.create_function(spec),
            on_existing,
            |_: PlatformError| async move {
                functions.update_function_code(&spec.name, &spec.code).await?;
                functions.update_function_configuration(spec).await?;
                functions.get_function_arn(&spec.name).await
            },
        )
        .await?;

        match &upserted {
            Upserted::Created(arn) => log.system(format!("Function created: {}", arn)),
            Upserted::Updated(arn) => {
                log.system(format!("Function {} already exists, code updated", spec.name));
                debug!(arn = %arn, "re-fetched function arn");
            }
        }
        Ok(upserted)
    }

    async fn resolve_api(&self, name: &str) -> PlatformResult<(RestApi, ResourceAction)> {
        match self.routing.find_api(name).await? {
            Some(api) => Ok((api, ResourceAction::Unchanged)),
            None => Ok((self.routing.create_api(name).await?, ResourceAction::Created)),
        }
    }

    async fn resolve_proxy_node(&self, api: &RestApi) -> PlatformResult<(RouteNode, ResourceAction)> {
        let existing = self
            .routing
            .list_nodes(&api.id)
            .await?
            .into_iter()
            .find(|node| {
                node.parent_id.as_deref() == Some(api.root_node_id.as_str())
                    && node.path_part.as_deref() == Some(PROXY_PATH)
            });
        match existing {
            Some(node) => Ok((node, ResourceAction::Unchanged)),
            None => {
                let node = self
                    .routing
                    .create_node(&api.id, &api.root_node_id, PROXY_PATH)
                    .await?;
                Ok((node, ResourceAction::Created))
            }
        }
    }
}

/// Deployment env minus keys the platform rejects.
pub fn function_env(env: &EnvVars) -> EnvVars {
    env.iter()
        .filter(|(key, _)| !key.starts_with(RESERVED_ENV_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// `arn:<partition>:execute-api:<region>:<account>:<api>/*/*/*`, taking
/// partition, region and account from the function ARN.
pub fn execute_api_source_arn(function_arn: &str, api_id: &str) -> Result<String> {
    let parts: Vec<&str> = function_arn.split(':').collect();
    match parts.as_slice() {
        ["arn", partition, "lambda", region, account, "function", ..]
            if !region.is_empty() && !account.is_empty() =>
        {
            Ok(format!(
                "arn:{}:execute-api:{}:{}:{}/*/*/*",
                partition, region, account, api_id
            ))
        }
        _ => Err(Error::Remote(format!(
            "unexpected function ARN '{}'",
            function_arn
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCloud;
    use launchpad_core::testing::MemoryLogPublisher;

    fn settings() -> FunctionSettings {
        FunctionSettings {
            runtime: "nodejs20.x".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/lambda".to_string(),
            memory_mb: 512,
            timeout_secs: 30,
            stage: "prod".to_string(),
        }
    }

    fn artifacts() -> FunctionArtifacts {
        FunctionArtifacts {
            layer: ObjectLocation {
                bucket: "artifacts".into(),
                key: "demo/dependency-layer.zip".into(),
            },
            code: ObjectLocation {
                bucket: "artifacts".into(),
                key: "demo/function-code.zip".into(),
            },
            handler: "lambda.handler".into(),
        }
    }

    fn reconciler(cloud: &Arc<InMemoryCloud>) -> FunctionReconciler {
        FunctionReconciler::new(cloud.clone(), cloud.clone(), settings())
    }

    fn log() -> (BuildLog, Arc<MemoryLogPublisher>) {
        let publisher = Arc::new(MemoryLogPublisher::default());
        (
            BuildLog::new(ProjectId::parse("demo").unwrap(), publisher.clone()),
            publisher,
        )
    }

    #[tokio::test]
    async fn test_fresh_project_creates_everything() {
        let cloud = Arc::new(InMemoryCloud::new());
        let (log, _) = log();
        let project = ProjectId::parse("demo").unwrap();

        let report = reconciler(&cloud)
            .reconcile(&project, &artifacts(), &EnvVars::new(), &log)
            .await
            .unwrap();

        assert_eq!(cloud.function_count(), 1);
        assert_eq!(cloud.api_count(), 1);
        let api = cloud.api("demo").unwrap();
        assert_eq!(cloud.proxy_node_count(&api.id), 1);
        assert_eq!(cloud.methods(&api.id), vec!["ANY".to_string(), "OPTIONS".to_string()]);
        assert_eq!(cloud.permission_count("demo"), 1);
        assert!(cloud.active_deployment(&api.id, "prod").is_some());

        assert!(
            report
                .resources
                .iter()
                .filter(|r| r.kind != ResourceKind::DeploymentStage)
                .all(|r| r.action == ResourceAction::Created)
        );
        assert_eq!(
            report.url.as_deref(),
            Some(format!("https://{}.execute-api.us-east-1.amazonaws.com/prod", api.id).as_str())
        );
    }

    #[tokio::test]
    async fn test_second_pass_converges() {
        let cloud = Arc::new(InMemoryCloud::new());
        let (log, _) = log();
        let project = ProjectId::parse("demo").unwrap();
        let reconciler = reconciler(&cloud);

        let first = reconciler
            .reconcile(&project, &artifacts(), &EnvVars::new(), &log)
            .await
            .unwrap();
        let second = reconciler
            .reconcile(&project, &artifacts(), &EnvVars::new(), &log)
            .await
            .unwrap();

        let api = cloud.api("demo").unwrap();
        assert_eq!(cloud.function_count(), 1);
        assert_eq!(cloud.api_count(), 1);
        assert_eq!(cloud.proxy_node_count(&api.id), 1);
        assert_eq!(cloud.methods(&api.id).len(), 2);
        assert_eq!(cloud.permission_count("demo"), 1);
        assert_eq!(cloud.stage_count(&api.id), 1);
        assert_eq!(cloud.layer_versions("demo-dependencies"), 2);
        assert_eq!(first.url, second.url);

        let function = second.of_kind(ResourceKind::Function).next().unwrap();
        assert_eq!(function.action, ResourceAction::Updated);
        let api_resource = second.of_kind(ResourceKind::RoutingApi).next().unwrap();
        assert_eq!(api_resource.action, ResourceAction::Unchanged);
        assert!(
            second
                .of_kind(ResourceKind::Method)
                .all(|m| m.action == ResourceAction::Unchanged)
        );
    }

    #[tokio::test]
    async fn test_existing_function_falls_back_to_update_and_refetch() {
        let cloud = Arc::new(InMemoryCloud::new().with_function("demo"));
        let existing_arn = cloud.function_arn("demo").unwrap();
        let (log, publisher) = log();

        let report = reconciler(&cloud)
            .reconcile(
                &ProjectId::parse("demo").unwrap(),
                &artifacts(),
                &EnvVars::new(),
                &log,
            )
            .await
            .unwrap();

        let function = report.of_kind(ResourceKind::Function).next().unwrap();
        assert_eq!(function.external_id, existing_arn);
        assert_eq!(function.action, ResourceAction::Updated);
        assert_eq!(cloud.code_updates("demo"), 1);

        let calls = cloud.calls();
        let create = calls.iter().position(|c| c == "create_function:demo").unwrap();
        let update = calls.iter().position(|c| c == "update_function_code:demo").unwrap();
        let config = calls
            .iter()
            .position(|c| c == "update_function_configuration:demo")
            .unwrap();
        let fetch = calls.iter().position(|c| c == "get_function_arn:demo").unwrap();
        assert!(create < update && update < config && config < fetch);

        let integration = report
            .of_kind(ResourceKind::Integration)
            .find(|r| r.external_id.ends_with("/ANY"))
            .unwrap();
        assert_eq!(
            integration.config["FunctionProxy"]["function_arn"],
            json!(existing_arn)
        );
        assert!(
            publisher
                .lines()
                .contains(&"Function demo already exists, code updated".to_string())
        );
    }

    #[tokio::test]
    async fn test_unrecognized_failure_aborts_remaining_steps() {
        let cloud = Arc::new(InMemoryCloud::new().failing("create_function"));
        let (log, _) = log();

        let err = reconciler(&cloud)
            .reconcile(
                &ProjectId::parse("demo").unwrap(),
                &artifacts(),
                &EnvVars::new(),
                &log,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(_)));
        assert_eq!(cloud.api_count(), 0);
        assert!(!cloud.calls().iter().any(|c| c.starts_with("add_permission")));
    }

    #[tokio::test]
    async fn test_existing_permission_is_not_fatal() {
        let cloud = Arc::new(InMemoryCloud::new());
        let (log, publisher) = log();
        let project = ProjectId::parse("demo").unwrap();
        let reconciler = reconciler(&cloud);

        reconciler
            .reconcile(&project, &artifacts(), &EnvVars::new(), &log)
            .await
            .unwrap();
        let report = reconciler
            .reconcile(&project, &artifacts(), &EnvVars::new(), &log)
            .await
            .unwrap();

        let permission = report.of_kind(ResourceKind::InvokePermission).next().unwrap();
        assert_eq!(permission.action, ResourceAction::Unchanged);
        assert!(
            publisher
                .lines()
                .contains(&"Invoke permission already granted".to_string())
        );
    }

    #[tokio::test]
    async fn test_existing_api_without_proxy_node() {
        let cloud = Arc::new(InMemoryCloud::new().with_api("demo"));
        let (log, _) = log();

        let report = reconciler(&cloud)
            .reconcile(
                &ProjectId::parse("demo").unwrap(),
                &artifacts(),
                &EnvVars::new(),
                &log,
            )
            .await
            .unwrap();

        assert_eq!(cloud.api_count(), 1);
        let api = report.of_kind(ResourceKind::RoutingApi).next().unwrap();
        assert_eq!(api.action, ResourceAction::Unchanged);
        let node = report.of_kind(ResourceKind::RoutingResourceNode).next().unwrap();
        assert_eq!(node.action, ResourceAction::Created);
    }

    #[test]
    fn test_reserved_keys_are_filtered() {
        let mut env = EnvVars::new();
        env.insert("AWS_REGION".into(), "us-east-1".into());
        env.insert("DATABASE_URL".into(), "postgres://db".into());
        let filtered = function_env(&env);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("DATABASE_URL"));
    }

    #[test]
    fn test_source_arn_from_function_arn() {
        let arn = execute_api_source_arn(
            "arn:aws:lambda:ap-south-1:123456789012:function:demo",
            "a1b2c3",
        )
        .unwrap();
        assert_eq!(arn, "arn:aws:execute-api:ap-south-1:123456789012:a1b2c3/*/*/*");

        assert!(execute_api_source_arn("", "a1b2c3").is_err());
        assert!(execute_api_source_arn("arn:aws:s3:::bucket", "a1b2c3").is_err());
    }
}
