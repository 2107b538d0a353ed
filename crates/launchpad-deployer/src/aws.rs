//! Function and routing platform on AWS Lambda and API Gateway.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_apigateway::types::{EndpointConfiguration, EndpointType, IntegrationType};
use aws_sdk_lambda::config::Credentials;
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::types::{
    Environment, FunctionCode, LastUpdateStatus, LayerVersionContentInput, Runtime, State,
};
use launchpad_config::DynamicTarget;
use launchpad_core::deployer::{
    FunctionPlatform, FunctionSpec, HttpVerb, Integration, InvokeGrant, ObjectLocation,
    PlatformError, PlatformErrorKind, PlatformResult, RestApi, RouteNode, RoutingPlatform,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const INVOKE_ACTION: &str = "lambda:InvokeFunction";
const PAGE_SIZE: i32 = 500;
const SETTLE_POLL: Duration = Duration::from_secs(2);
const SETTLE_ATTEMPTS: u32 = 60;

const CORS_HEADERS: [(&str, &str); 3] = [
    (
        "Access-Control-Allow-Headers",
        "'Content-Type,Authorization,X-Amz-Date,X-Api-Key,X-Amz-Security-Token'",
    ),
    ("Access-Control-Allow-Methods", "'GET,POST,PUT,PATCH,DELETE,OPTIONS'"),
    ("Access-Control-Allow-Origin", "'*'"),
];

/// Lambda functions behind a REST API in one region.
pub struct AwsPlatform {
    lambda: aws_sdk_lambda::Client,
    apigateway: aws_sdk_apigateway::Client,
    region: String,
}

impl AwsPlatform {
    /// Clients for the dynamic target's region and static credentials.
    pub async fn connect(target: &DynamicTarget) -> Self {
        let credentials = Credentials::new(
            &target.access_key_id,
            target.secret_access_key.expose(),
            None,
            None,
            "launchpad-dispatch",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(target.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        Self {
            lambda: aws_sdk_lambda::Client::new(&config),
            apigateway: aws_sdk_apigateway::Client::new(&config),
            region: target.region.clone(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Block until the function has no update in flight; Lambda rejects
    /// configuration changes while one is pending.
    async fn wait_until_settled(&self, name: &str) -> PlatformResult<()> {
        for attempt in 0..SETTLE_ATTEMPTS {
            let config = self
                .lambda
                .get_function_configuration()
                .function_name(name)
                .send()
                .await
                .map_err(|e| classify("get_function_configuration", e))?;

            let pending = matches!(config.state(), Some(State::Pending))
                || matches!(config.last_update_status(), Some(LastUpdateStatus::InProgress));
            if !pending {
                return Ok(());
            }
            debug!(function = name, attempt, "waiting for function update to settle");
            tokio::time::sleep(SETTLE_POLL).await;
        }
        Err(PlatformError::new(
            "wait_until_settled",
            PlatformErrorKind::Conflict,
            format!("function {} is still updating", name),
        ))
    }

    async fn put_cors_responses(&self, api_id: &str, node_id: &str) -> PlatformResult<()> {
        let verb = HttpVerb::Options.as_str();

        let mut method_response = self
            .apigateway
            .put_method_response()
            .rest_api_id(api_id)
            .resource_id(node_id)
            .http_method(verb)
            .status_code("200");
        for (header, _) in CORS_HEADERS {
            method_response =
                method_response.response_parameters(format!("method.response.header.{}", header), false);
        }
        match method_response.send().await {
            Ok(_) => {}
            Err(e) => {
                let err = classify("put_method_response", e);
                if !err.is_existing() {
                    return Err(err);
                }
            }
        }

        let mut integration_response = self
            .apigateway
            .put_integration_response()
            .rest_api_id(api_id)
            .resource_id(node_id)
            .http_method(verb)
            .status_code("200")
            .response_templates("application/json", "");
        for (header, value) in CORS_HEADERS {
            integration_response = integration_response
                .response_parameters(format!("method.response.header.{}", header), value);
        }
        integration_response
            .send()
            .await
            .map_err(|e| classify("put_integration_response", e))?;
        Ok(())
    }
}

/// Map an SDK failure onto the platform error classification.
fn classify<E, R>(operation: &'static str, err: SdkError<E, R>) -> PlatformError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let kind = match err.code() {
        Some("ResourceConflictException" | "ConflictException") => PlatformErrorKind::Conflict,
        Some("ResourceNotFoundException" | "NotFoundException") => PlatformErrorKind::NotFound,
        _ => PlatformErrorKind::Other,
    };
    let message = match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        _ => DisplayErrorContext(&err).to_string(),
    };
    PlatformError::new(operation, kind, message)
}

fn missing(operation: &'static str, field: &str) -> PlatformError {
    PlatformError::other(operation, format!("response has no {}", field))
}

/// Integration URI that proxies a method to a function.
pub fn lambda_integration_uri(region: &str, function_arn: &str) -> String {
    format!(
        "arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations",
        region, function_arn
    )
}

fn environment(spec: &FunctionSpec) -> Environment {
    let variables: HashMap<String, String> = spec.env.clone().into_iter().collect();
    Environment::builder().set_variables(Some(variables)).build()
}

#[async_trait]
impl FunctionPlatform for AwsPlatform {
    async fn publish_layer_version(
        &self,
        layer_name: &str,
        content: &ObjectLocation,
        runtime: &str,
    ) -> PlatformResult<String> {
        let output = self
            .lambda
            .publish_layer_version()
            .layer_name(layer_name)
            .content(
                LayerVersionContentInput::builder()
                    .s3_bucket(&content.bucket)
                    .s3_key(&content.key)
                    .build(),
            )
            .compatible_runtimes(Runtime::from(runtime))
            .send()
            .await
            .map_err(|e| classify("publish_layer_version", e))?;

        output
            .layer_version_arn()
            .map(str::to_string)
            .ok_or_else(|| missing("publish_layer_version", "layer version ARN"))
    }

    async fn create_function(&self, spec: &FunctionSpec) -> PlatformResult<String> {
        let output = self
            .lambda
            .create_function()
            .function_name(&spec.name)
            .runtime(Runtime::from(spec.runtime.as_str()))
            .role(&spec.role_arn)
            .handler(&spec.handler)
            .memory_size(spec.memory_mb)
            .timeout(spec.timeout_secs)
            .code(
                FunctionCode::builder()
                    .s3_bucket(&spec.code.bucket)
                    .s3_key(&spec.code.key)
                    .build(),
            )
            .set_layers(Some(spec.layers.clone()))
            .environment(environment(spec))
            .send()
            .await
            .map_err(|e| classify("create_function", e))?;

        info!(function = %spec.name, "created function");
        output
            .function_arn()
            .map(str::to_string)
            .ok_or_else(|| missing("create_function", "function ARN"))
    }

    async fn update_function_code(&self, name: &str, code: &ObjectLocation) -> PlatformResult<()> {
        self.wait_until_settled(name).await?;
        self.lambda
            .update_function_code()
            .function_name(name)
            .s3_bucket(&code.bucket)
            .s3_key(&code.key)
            .send()
            .await
            .map_err(|e| classify("update_function_code", e))?;
        info!(function = name, "updated function code");
        Ok(())
    }

    async fn update_function_configuration(&self, spec: &FunctionSpec) -> PlatformResult<()> {
        self.wait_until_settled(&spec.name).await?;
        self.lambda
            .update_function_configuration()
            .function_name(&spec.name)
            .runtime(Runtime::from(spec.runtime.as_str()))
            .role(&spec.role_arn)
            .handler(&spec.handler)
            .memory_size(spec.memory_mb)
            .timeout(spec.timeout_secs)
            .set_layers(Some(spec.layers.clone()))
            .environment(environment(spec))
            .send()
            .await
            .map_err(|e| classify("update_function_configuration", e))?;
        Ok(())
    }

    async fn get_function_arn(&self, name: &str) -> PlatformResult<String> {
        let output = self
            .lambda
            .get_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| classify("get_function", e))?;

        output
            .configuration()
            .and_then(|c| c.function_arn())
            .map(str::to_string)
            .ok_or_else(|| missing("get_function", "function ARN"))
    }

    async fn add_permission(&self, function: &str, grant: &InvokeGrant) -> PlatformResult<()> {
        self.lambda
            .add_permission()
            .function_name(function)
            .statement_id(&grant.statement_id)
            .action(INVOKE_ACTION)
            .principal(&grant.principal)
            .source_arn(&grant.source_arn)
            .send()
            .await
            .map_err(|e| classify("add_permission", e))?;
        Ok(())
    }
}

#[async_trait]
impl RoutingPlatform for AwsPlatform {
    async fn find_api(&self, name: &str) -> PlatformResult<Option<RestApi>> {
        let mut position: Option<String> = None;
        loop {
            let page = self
                .apigateway
                .get_rest_apis()
                .limit(PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .map_err(|e| classify("get_rest_apis", e))?;

            let found = page.items().iter().find(|api| api.name() == Some(name));
            if let Some(api) = found {
                return Ok(Some(RestApi {
                    id: api.id().ok_or_else(|| missing("get_rest_apis", "id"))?.to_string(),
                    name: name.to_string(),
                    root_node_id: api
                        .root_resource_id()
                        .ok_or_else(|| missing("get_rest_apis", "root resource id"))?
                        .to_string(),
                }));
            }

            match page.position() {
                Some(next) if !page.items().is_empty() => position = Some(next.to_string()),
                _ => return Ok(None),
            }
        }
    }

    async fn create_api(&self, name: &str) -> PlatformResult<RestApi> {
        let output = self
            .apigateway
            .create_rest_api()
            .name(name)
            .endpoint_configuration(
                EndpointConfiguration::builder()
                    .types(EndpointType::Regional)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify("create_rest_api", e))?;

        info!(api = name, "created routing API");
        Ok(RestApi {
            id: output
                .id()
                .ok_or_else(|| missing("create_rest_api", "id"))?
                .to_string(),
            name: name.to_string(),
            root_node_id: output
                .root_resource_id()
                .ok_or_else(|| missing("create_rest_api", "root resource id"))?
                .to_string(),
        })
    }

    async fn list_nodes(&self, api_id: &str) -> PlatformResult<Vec<RouteNode>> {
        let mut nodes = Vec::new();
        let mut position: Option<String> = None;
        loop {
            let page = self
                .apigateway
                .get_resources()
                .rest_api_id(api_id)
                .limit(PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .map_err(|e| classify("get_resources", e))?;

            for resource in page.items() {
                let Some(id) = resource.id() else { continue };
                let mut methods: Vec<String> = resource
                    .resource_methods()
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default();
                methods.sort();
                nodes.push(RouteNode {
                    id: id.to_string(),
                    parent_id: resource.parent_id().map(str::to_string),
                    path_part: resource.path_part().map(str::to_string),
                    methods,
                });
            }

            match page.position() {
                Some(next) if !page.items().is_empty() => position = Some(next.to_string()),
                _ => return Ok(nodes),
            }
        }
    }

    async fn create_node(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> PlatformResult<RouteNode> {
        let output = self
            .apigateway
            .create_resource()
            .rest_api_id(api_id)
            .parent_id(parent_id)
            .path_part(path_part)
            .send()
            .await
            .map_err(|e| classify("create_resource", e))?;

        Ok(RouteNode {
            id: output
                .id()
                .ok_or_else(|| missing("create_resource", "id"))?
                .to_string(),
            parent_id: Some(parent_id.to_string()),
            path_part: Some(path_part.to_string()),
            methods: Vec::new(),
        })
    }

    async fn put_method(&self, api_id: &str, node_id: &str, verb: HttpVerb) -> PlatformResult<()> {
        self.apigateway
            .put_method()
            .rest_api_id(api_id)
            .resource_id(node_id)
            .http_method(verb.as_str())
            .authorization_type("NONE")
            .send()
            .await
            .map_err(|e| classify("put_method", e))?;
        Ok(())
    }

    async fn put_integration(
        &self,
        api_id: &str,
        node_id: &str,
        verb: HttpVerb,
        integration: &Integration,
    ) -> PlatformResult<()> {
        let request = self
            .apigateway
            .put_integration()
            .rest_api_id(api_id)
            .resource_id(node_id)
            .http_method(verb.as_str());

        match integration {
            Integration::FunctionProxy { function_arn } => {
                request
                    .r#type(IntegrationType::AwsProxy)
                    .integration_http_method("POST")
                    .uri(lambda_integration_uri(&self.region, function_arn))
                    .send()
                    .await
                    .map_err(|e| classify("put_integration", e))?;
            }
            Integration::Mock => {
                request
                    .r#type(IntegrationType::Mock)
                    .request_templates("application/json", r#"{"statusCode": 200}"#)
                    .send()
                    .await
                    .map_err(|e| classify("put_integration", e))?;
                self.put_cors_responses(api_id, node_id).await?;
            }
        }
        Ok(())
    }

    async fn create_stage_deployment(&self, api_id: &str, stage: &str) -> PlatformResult<String> {
        let output = self
            .apigateway
            .create_deployment()
            .rest_api_id(api_id)
            .stage_name(stage)
            .send()
            .await
            .map_err(|e| classify("create_deployment", e))?;

        output
            .id()
            .map(str::to_string)
            .ok_or_else(|| missing("create_deployment", "id"))
    }

    fn invoke_url(&self, api_id: &str, stage: &str) -> String {
        format!(
            "https://{}.execute-api.{}.amazonaws.com/{}",
            api_id, self.region, stage
        )
    }
}
