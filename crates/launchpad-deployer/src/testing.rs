//! In-memory hosting platforms, for tests.
//!
//! `InMemoryCloud` answers the function and routing traits with the same
//! conflict behavior as the real platform: duplicate function names and
//! permission statements conflict, while routing APIs may share a name.

use async_trait::async_trait;
use launchpad_core::deployer::{
    FunctionPlatform, FunctionSpec, HttpVerb, Integration, InvokeGrant, ObjectLocation,
    PlatformError, PlatformErrorKind, PlatformResult, RestApi, RouteNode, RoutingPlatform,
    StaticHost,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::function::PROXY_PATH;

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "123456789012";

#[derive(Debug, Default)]
struct StoredFunction {
    arn: String,
    spec: Option<FunctionSpec>,
    code_updates: usize,
}

#[derive(Debug, Default)]
struct CloudState {
    next_id: u64,
    layers: BTreeMap<String, u32>,
    functions: BTreeMap<String, StoredFunction>,
    apis: Vec<RestApi>,
    nodes: BTreeMap<String, Vec<RouteNode>>,
    integrations: BTreeMap<String, Integration>,
    permissions: BTreeMap<String, Vec<InvokeGrant>>,
    /// (api, stage) -> active deployment id
    stages: BTreeMap<(String, String), String>,
    calls: Vec<String>,
}

impl CloudState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:04}", prefix, self.next_id)
    }

    fn add_api(&mut self, name: &str) -> RestApi {
        let api = RestApi {
            id: self.id("api"),
            name: name.to_string(),
            root_node_id: self.id("root"),
        };
        self.nodes.insert(
            api.id.clone(),
            vec![RouteNode {
                id: api.root_node_id.clone(),
                parent_id: None,
                path_part: None,
                methods: Vec::new(),
            }],
        );
        self.apis.push(api.clone());
        api
    }

    fn node_mut(&mut self, api_id: &str, node_id: &str) -> PlatformResult<&mut RouteNode> {
        self.nodes
            .get_mut(api_id)
            .and_then(|nodes| nodes.iter_mut().find(|n| n.id == node_id))
            .ok_or_else(|| {
                PlatformError::new(
                    "routing",
                    PlatformErrorKind::NotFound,
                    format!("Invalid resource identifier {}", node_id),
                )
            })
    }
}

/// Function and routing platform held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCloud {
    state: Mutex<CloudState>,
    failing: BTreeSet<&'static str>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a function that already exists under `name`.
    pub fn with_function(self, name: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.functions.insert(
                name.to_string(),
                StoredFunction {
                    arn: function_arn(name),
                    ..Default::default()
                },
            );
        }
        self
    }

    /// Seed a routing API with only its root node.
    pub fn with_api(self, name: &str) -> Self {
        self.state.lock().unwrap().add_api(name);
        self
    }

    /// Fail every call to `operation` with an unclassified error.
    pub fn failing(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    /// `operation:subject` for every call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn function_count(&self) -> usize {
        self.state.lock().unwrap().functions.len()
    }

    pub fn function_arn(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .functions
            .get(name)
            .map(|f| f.arn.clone())
    }

    pub fn function_spec(&self, name: &str) -> Option<FunctionSpec> {
        self.state
            .lock()
            .unwrap()
            .functions
            .get(name)
            .and_then(|f| f.spec.clone())
    }

    pub fn code_updates(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .functions
            .get(name)
            .map_or(0, |f| f.code_updates)
    }

    pub fn layer_versions(&self, layer: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .layers
            .get(layer)
            .copied()
            .unwrap_or(0)
    }

    pub fn api_count(&self) -> usize {
        self.state.lock().unwrap().apis.len()
    }

    pub fn api(&self, name: &str) -> Option<RestApi> {
        self.state
            .lock()
            .unwrap()
            .apis
            .iter()
            .find(|a| a.name == name)
            .cloned()
    }

    pub fn proxy_node_count(&self, api_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(api_id)
            .map_or(0, |nodes| {
                nodes
                    .iter()
                    .filter(|n| n.path_part.as_deref() == Some(PROXY_PATH))
                    .count()
            })
    }

    /// Every method on every node of an API, sorted.
    pub fn methods(&self, api_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut methods: Vec<String> = state
            .nodes
            .get(api_id)
            .into_iter()
            .flatten()
            .flat_map(|n| n.methods.iter().cloned())
            .collect();
        methods.sort();
        methods
    }

    pub fn integration(&self, api_id: &str, node_id: &str, verb: HttpVerb) -> Option<Integration> {
        self.state
            .lock()
            .unwrap()
            .integrations
            .get(&integration_key(api_id, node_id, verb))
            .cloned()
    }

    pub fn permission_count(&self, function: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .permissions
            .get(function)
            .map_or(0, Vec::len)
    }

    pub fn active_deployment(&self, api_id: &str, stage: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .stages
            .get(&(api_id.to_string(), stage.to_string()))
            .cloned()
    }

    pub fn stage_count(&self, api_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .stages
            .keys()
            .filter(|(api, _)| api == api_id)
            .count()
    }

    /// Record the call and apply injected failures.
    fn enter(
        &self,
        operation: &'static str,
        subject: &str,
    ) -> PlatformResult<MutexGuard<'_, CloudState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{}:{}", operation, subject));
        if self.failing.contains(operation) {
            return Err(PlatformError::other(operation, "injected failure"));
        }
        Ok(state)
    }
}

fn function_arn(name: &str) -> String {
    format!("arn:aws:lambda:{}:{}:function:{}", REGION, ACCOUNT, name)
}

fn integration_key(api_id: &str, node_id: &str, verb: HttpVerb) -> String {
    format!("{}/{}/{}", api_id, node_id, verb)
}

#[async_trait]
impl FunctionPlatform for InMemoryCloud {
    async fn publish_layer_version(
        &self,
        layer_name: &str,
        _content: &ObjectLocation,
        _runtime: &str,
    ) -> PlatformResult<String> {
        let mut state = self.enter("publish_layer_version", layer_name)?;
        let version = state.layers.entry(layer_name.to_string()).or_insert(0);
        *version += 1;
        Ok(format!(
            "arn:aws:lambda:{}:{}:layer:{}:{}",
            REGION, ACCOUNT, layer_name, version
        ))
    }

    async fn create_function(&self, spec: &FunctionSpec) -> PlatformResult<String> {
        let mut state = self.enter("create_function", &spec.name)?;
        if state.functions.contains_key(&spec.name) {
            return Err(PlatformError::new(
                "create_function",
                PlatformErrorKind::Conflict,
                format!("Function already exist: {}", spec.name),
            ));
        }
        let arn = function_arn(&spec.name);
        state.functions.insert(
            spec.name.clone(),
            StoredFunction {
                arn: arn.clone(),
                spec: Some(spec.clone()),
                code_updates: 0,
            },
        );
        Ok(arn)
    }

    async fn update_function_code(&self, name: &str, code: &ObjectLocation) -> PlatformResult<()> {
        let mut state = self.enter("update_function_code", name)?;
        let function = state.functions.get_mut(name).ok_or_else(|| {
            PlatformError::new("update_function_code", PlatformErrorKind::NotFound, name)
        })?;
        function.code_updates += 1;
        if let Some(spec) = function.spec.as_mut() {
            spec.code = code.clone();
        }
        Ok(())
    }

    async fn update_function_configuration(&self, spec: &FunctionSpec) -> PlatformResult<()> {
        let mut state = self.enter("update_function_configuration", &spec.name)?;
        let function = state.functions.get_mut(&spec.name).ok_or_else(|| {
            PlatformError::new(
                "update_function_configuration",
                PlatformErrorKind::NotFound,
                spec.name.clone(),
            )
        })?;
        function.spec = Some(spec.clone());
        Ok(())
    }

    async fn get_function_arn(&self, name: &str) -> PlatformResult<String> {
        let state = self.enter("get_function_arn", name)?;
        state
            .functions
            .get(name)
            .map(|f| f.arn.clone())
            .ok_or_else(|| PlatformError::new("get_function_arn", PlatformErrorKind::NotFound, name))
    }

    async fn add_permission(&self, function: &str, grant: &InvokeGrant) -> PlatformResult<()> {
        let mut state = self.enter("add_permission", function)?;
        let grants = state.permissions.entry(function.to_string()).or_default();
        if grants.iter().any(|g| g.statement_id == grant.statement_id) {
            return Err(PlatformError::new(
                "add_permission",
                PlatformErrorKind::Conflict,
                format!(
                    "The statement id ({}) provided already exists",
                    grant.statement_id
                ),
            ));
        }
        grants.push(grant.clone());
        Ok(())
    }
}

#[async_trait]
impl RoutingPlatform for InMemoryCloud {
    async fn find_api(&self, name: &str) -> PlatformResult<Option<RestApi>> {
        let state = self.enter("find_api", name)?;
        Ok(state.apis.iter().find(|a| a.name == name).cloned())
    }

    async fn create_api(&self, name: &str) -> PlatformResult<RestApi> {
        let mut state = self.enter("create_api", name)?;
        Ok(state.add_api(name))
    }

    async fn list_nodes(&self, api_id: &str) -> PlatformResult<Vec<RouteNode>> {
        let state = self.enter("list_nodes", api_id)?;
        Ok(state.nodes.get(api_id).cloned().unwrap_or_default())
    }

    async fn create_node(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> PlatformResult<RouteNode> {
        let mut state = self.enter("create_node", api_id)?;
        state.node_mut(api_id, parent_id)?;
        let node = RouteNode {
            id: state.id("node"),
            parent_id: Some(parent_id.to_string()),
            path_part: Some(path_part.to_string()),
            methods: Vec::new(),
        };
        if let Some(nodes) = state.nodes.get_mut(api_id) {
            if nodes.iter().any(|n| {
                n.parent_id.as_deref() == Some(parent_id) && n.path_part.as_deref() == Some(path_part)
            }) {
                return Err(PlatformError::new(
                    "create_node",
                    PlatformErrorKind::Conflict,
                    "Another resource with the same parent already has this name",
                ));
            }
            nodes.push(node.clone());
        }
        Ok(node)
    }

    async fn put_method(&self, api_id: &str, node_id: &str, verb: HttpVerb) -> PlatformResult<()> {
        let mut state = self.enter("put_method", node_id)?;
        let node = state.node_mut(api_id, node_id)?;
        if node.has_method(verb) {
            return Err(PlatformError::new(
                "put_method",
                PlatformErrorKind::Conflict,
                "Method already exists for this resource",
            ));
        }
        node.methods.push(verb.as_str().to_string());
        Ok(())
    }

    async fn put_integration(
        &self,
        api_id: &str,
        node_id: &str,
        verb: HttpVerb,
        integration: &Integration,
    ) -> PlatformResult<()> {
        let mut state = self.enter("put_integration", node_id)?;
        if !state.node_mut(api_id, node_id)?.has_method(verb) {
            return Err(PlatformError::new(
                "put_integration",
                PlatformErrorKind::NotFound,
                "Invalid Method identifier specified",
            ));
        }
        state
            .integrations
            .insert(integration_key(api_id, node_id, verb), integration.clone());
        Ok(())
    }

    async fn create_stage_deployment(&self, api_id: &str, stage: &str) -> PlatformResult<String> {
        let mut state = self.enter("create_stage_deployment", api_id)?;
        let id = state.id("dep");
        state
            .stages
            .insert((api_id.to_string(), stage.to_string()), id.clone());
        Ok(id)
    }

    fn invoke_url(&self, api_id: &str, stage: &str) -> String {
        format!("https://{}.execute-api.{}.amazonaws.com/{}", api_id, REGION, stage)
    }
}

#[derive(Debug, Default)]
struct HostState {
    projects: Vec<String>,
    deployments: Vec<(String, PathBuf, String)>,
}

/// Static host that records projects and deployments.
#[derive(Debug, Default)]
pub struct RecordingStaticHost {
    state: Mutex<HostState>,
    fail_login: bool,
    fail_deploy: bool,
}

impl RecordingStaticHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, name: &str) -> Self {
        self.state.lock().unwrap().projects.push(name.to_string());
        self
    }

    pub fn failing_login(mut self) -> Self {
        self.fail_login = true;
        self
    }

    pub fn failing_deploy(mut self) -> Self {
        self.fail_deploy = true;
        self
    }

    pub fn projects(&self) -> Vec<String> {
        self.state.lock().unwrap().projects.clone()
    }

    /// (project, bundle dir, branch) per deploy call.
    pub fn deployments(&self) -> Vec<(String, PathBuf, String)> {
        self.state.lock().unwrap().deployments.clone()
    }
}

#[async_trait]
impl StaticHost for RecordingStaticHost {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn login(&self) -> PlatformResult<()> {
        if self.fail_login {
            return Err(PlatformError::other("login", "Authentication error [code: 10000]"));
        }
        Ok(())
    }

    async fn create_project(&self, project: &str, _production_branch: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.projects.iter().any(|p| p == project) {
            return Err(PlatformError::new(
                "create_project",
                PlatformErrorKind::AlreadyExists,
                "A project with this name already exists. [code: 8000002]",
            ));
        }
        state.projects.push(project.to_string());
        Ok(())
    }

    async fn deploy(
        &self,
        project: &str,
        bundle_dir: &Path,
        branch: &str,
    ) -> PlatformResult<Option<String>> {
        if self.fail_deploy {
            return Err(PlatformError::other("deploy", "Upload failed"));
        }
        self.state.lock().unwrap().deployments.push((
            project.to_string(),
            bundle_dir.to_path_buf(),
            branch.to_string(),
        ));
        Ok(Some(format!("https://{}.{}.pages.dev", branch, project)))
    }
}
