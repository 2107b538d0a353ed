//! Hosting platform traits and their shared types.
//!
//! Reconcilers talk to remote platforms only through these traits:
//! - `StaticHost` for the static-site hosting platform
//! - `FunctionPlatform` for functions, layers and invoke permissions
//! - `RoutingPlatform` for the HTTP routing tree and stage deployments

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::deployment::EnvVars;

/// How a failed remote call should be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PlatformErrorKind {
    /// A named resource with this identity already exists.
    #[display("already exists")]
    AlreadyExists,
    /// The call conflicts with existing state (name taken, permission granted,
    /// update in progress).
    #[display("conflict")]
    Conflict,
    #[display("not found")]
    NotFound,
    #[display("error")]
    Other,
}

/// Failure of a single remote call.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct PlatformError {
    pub operation: &'static str,
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(
        operation: &'static str,
        kind: PlatformErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    pub fn other(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, PlatformErrorKind::Other, message)
    }

    /// Name clash on create: the resource is already there.
    pub fn is_existing(&self) -> bool {
        matches!(
            self.kind,
            PlatformErrorKind::AlreadyExists | PlatformErrorKind::Conflict
        )
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Static-site hosting platform.
#[async_trait]
pub trait StaticHost: Send + Sync {
    fn name(&self) -> &'static str;

    /// Verify credentials before any project call.
    async fn login(&self) -> PlatformResult<()>;

    /// Create a hosting project. Fails with `AlreadyExists` if the name is taken.
    async fn create_project(&self, project: &str, production_branch: &str) -> PlatformResult<()>;

    /// Deploy a bundle directory to a project branch; returns the public URL
    /// when the platform reports one.
    async fn deploy(
        &self,
        project: &str,
        bundle_dir: &Path,
        branch: &str,
    ) -> PlatformResult<Option<String>>;
}

/// Location of an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

/// Desired configuration of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub runtime: String,
    pub role_arn: String,
    /// `<module>.<export>` inside the code archive.
    pub handler: String,
    pub memory_mb: i32,
    pub timeout_secs: i32,
    pub code: ObjectLocation,
    /// Layer version ARNs attached to the function.
    pub layers: Vec<String>,
    pub env: EnvVars,
}

/// Permission for a principal to invoke a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeGrant {
    pub statement_id: String,
    pub principal: String,
    pub source_arn: String,
}

/// Remote compute platform.
#[async_trait]
pub trait FunctionPlatform: Send + Sync {
    /// Publish a new layer version; layer versions are append-only.
    async fn publish_layer_version(
        &self,
        layer_name: &str,
        content: &ObjectLocation,
        runtime: &str,
    ) -> PlatformResult<String>;

    /// Create a function, returning its ARN. A taken name is a `Conflict`.
    async fn create_function(&self, spec: &FunctionSpec) -> PlatformResult<String>;

    /// Replace a function's code. Does not return the ARN.
    async fn update_function_code(&self, name: &str, code: &ObjectLocation) -> PlatformResult<()>;

    /// Refresh layers and environment of an existing function.
    async fn update_function_configuration(&self, spec: &FunctionSpec) -> PlatformResult<()>;

    async fn get_function_arn(&self, name: &str) -> PlatformResult<String>;

    /// Grant invoke permission. An existing statement id is a `Conflict`.
    async fn add_permission(&self, function: &str, grant: &InvokeGrant) -> PlatformResult<()>;
}

/// HTTP verbs the routing tree wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum HttpVerb {
    /// Catch-all verb routed to the function.
    #[display("ANY")]
    Any,
    /// Preflight verb answered by a mock integration.
    #[display("OPTIONS")]
    Options,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Any => "ANY",
            HttpVerb::Options => "OPTIONS",
        }
    }
}

/// Where a method sends its requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Integration {
    /// Proxy the whole request to a function.
    FunctionProxy { function_arn: String },
    /// Answer with a fixed response without calling anything.
    Mock,
}

/// A routing API and its implicit root node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestApi {
    pub id: String,
    pub name: String,
    pub root_node_id: String,
}

/// A node in the routing resource tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteNode {
    pub id: String,
    pub parent_id: Option<String>,
    /// Last path segment; `None` for the root.
    pub path_part: Option<String>,
    /// Verbs that already have a method on this node.
    pub methods: Vec<String>,
}

impl RouteNode {
    pub fn has_method(&self, verb: HttpVerb) -> bool {
        self.methods.iter().any(|m| m == verb.as_str())
    }
}

/// HTTP routing platform.
#[async_trait]
pub trait RoutingPlatform: Send + Sync {
    /// Look a routing API up by name.
    async fn find_api(&self, name: &str) -> PlatformResult<Option<RestApi>>;

    async fn create_api(&self, name: &str) -> PlatformResult<RestApi>;

    async fn list_nodes(&self, api_id: &str) -> PlatformResult<Vec<RouteNode>>;

    async fn create_node(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> PlatformResult<RouteNode>;

    async fn put_method(&self, api_id: &str, node_id: &str, verb: HttpVerb) -> PlatformResult<()>;

    /// Create or replace a method's integration. Safe to repeat.
    async fn put_integration(
        &self,
        api_id: &str,
        node_id: &str,
        verb: HttpVerb,
        integration: &Integration,
    ) -> PlatformResult<()>;

    /// Publish the current tree onto `stage`, returning the deployment id.
    async fn create_stage_deployment(&self, api_id: &str, stage: &str) -> PlatformResult<String>;

    /// Public invoke URL of a stage.
    fn invoke_url(&self, api_id: &str, stage: &str) -> String;
}
