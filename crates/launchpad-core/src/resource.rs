//! Working model of remote hosting resources.

use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    #[display("hosting-project")]
    HostingProject,
    #[display("function")]
    Function,
    #[display("layer-version")]
    LayerVersion,
    #[display("routing-api")]
    RoutingApi,
    #[display("routing-resource-node")]
    RoutingResourceNode,
    #[display("method")]
    Method,
    #[display("integration")]
    Integration,
    #[display("invoke-permission")]
    InvokePermission,
    #[display("deployment-stage")]
    DeploymentStage,
}

/// What the reconciler did to bring a resource to its desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    #[display("created")]
    Created,
    #[display("updated")]
    Updated,
    /// Already in the desired state.
    #[display("unchanged")]
    Unchanged,
}

/// A remote object as the reconciler last saw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    pub kind: ResourceKind,
    /// Platform identifier (ARN, id, or name where the platform has no id).
    pub external_id: String,
    /// External id of the parent, e.g. the routing API for its root node.
    pub parent: Option<String>,
    pub action: ResourceAction,
    /// Desired configuration the resource was reconciled against.
    pub config: serde_json::Value,
}

impl CloudResource {
    pub fn new(kind: ResourceKind, external_id: impl Into<String>, action: ResourceAction) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
            parent: None,
            action,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Everything a reconcile pass touched, in the order it touched it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub resources: Vec<CloudResource>,
    /// Public URL of the deployment, when the platform reports one.
    pub url: Option<String>,
}

impl ReconcileReport {
    pub fn record(&mut self, resource: CloudResource) {
        self.resources.push(resource);
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &CloudResource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }
}
