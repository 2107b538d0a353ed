//! Platform defaults, optionally overridden from a KDL file.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Fixed platform settings the pipeline applies to every deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformDefaults {
    pub pages: PagesDefaults,
    pub function: FunctionDefaults,
    pub routing: RoutingDefaults,
    pub shutdown: ShutdownDefaults,
}

/// Static hosting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagesDefaults {
    /// Production branch deployments are published to.
    pub branch: String,
    pub compatibility_date: String,
    pub compatibility_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefaults {
    pub runtime: String,
    pub memory_mb: i32,
    pub timeout_secs: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDefaults {
    pub stage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownDefaults {
    /// How long a signalled worker waits before forcing exit.
    pub grace: Duration,
    /// How long a finishing worker lets queued log events drain.
    pub flush: Duration,
}

impl Default for PlatformDefaults {
    fn default() -> Self {
        Self {
            pages: PagesDefaults {
                branch: "main".to_string(),
                compatibility_date: "2023-09-04".to_string(),
                compatibility_flags: vec!["nodejs_compat".to_string()],
            },
            function: FunctionDefaults {
                runtime: "nodejs20.x".to_string(),
                memory_mb: 512,
                timeout_secs: 30,
            },
            routing: RoutingDefaults {
                stage: "prod".to_string(),
            },
            shutdown: ShutdownDefaults {
                grace: Duration::from_secs(3),
                flush: Duration::from_millis(1000),
            },
        }
    }
}

/// Load defaults from `path`, or the built-ins when no file is given.
pub fn load_defaults(path: Option<&Path>) -> ConfigResult<PlatformDefaults> {
    match path {
        Some(path) => parse_defaults(&std::fs::read_to_string(path)?),
        None => Ok(PlatformDefaults::default()),
    }
}

/// Parse a defaults file. Anything the file leaves out keeps its built-in value.
pub fn parse_defaults(kdl: &str) -> ConfigResult<PlatformDefaults> {
    let doc: KdlDocument = kdl.parse()?;
    let mut defaults = PlatformDefaults::default();

    for node in doc.nodes() {
        let Some(children) = node.children() else {
            continue;
        };
        match node.name().value() {
            "pages" => {
                for child in children.nodes() {
                    match child.name().value() {
                        "branch" => defaults.pages.branch = require_string(child)?,
                        "compatibility-date" => {
                            defaults.pages.compatibility_date = require_string(child)?
                        }
                        "compatibility-flags" => {
                            defaults.pages.compatibility_flags = get_all_string_args(child)
                        }
                        _ => {}
                    }
                }
            }
            "function" => {
                for child in children.nodes() {
                    match child.name().value() {
                        "runtime" => defaults.function.runtime = require_string(child)?,
                        "memory" => defaults.function.memory_mb = require_i32(child)?,
                        "timeout" => defaults.function.timeout_secs = require_i32(child)?,
                        _ => {}
                    }
                }
            }
            "routing" => {
                for child in children.nodes() {
                    if child.name().value() == "stage" {
                        defaults.routing.stage = require_string(child)?;
                    }
                }
            }
            "shutdown" => {
                for child in children.nodes() {
                    match child.name().value() {
                        "grace-secs" => {
                            defaults.shutdown.grace = Duration::from_secs(require_u64(child)?)
                        }
                        "flush-millis" => {
                            defaults.shutdown.flush = Duration::from_millis(require_u64(child)?)
                        }
                        _ => {}
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(defaults)
}

// Helper functions for extracting values from KDL nodes

fn get_first_arg(node: &KdlNode) -> Option<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn require_string(node: &KdlNode) -> ConfigResult<String> {
    get_first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::MissingField(node.name().value().to_string()))
}

fn require_integer(node: &KdlNode) -> ConfigResult<i128> {
    get_first_arg(node)
        .and_then(|v| v.as_integer())
        .ok_or_else(|| ConfigError::MissingField(node.name().value().to_string()))
}

fn require_i32(node: &KdlNode) -> ConfigResult<i32> {
    let value = require_integer(node)?;
    i32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::invalid(node.name().value(), format!("{} is out of range", value)))
}

fn require_u64(node: &KdlNode) -> ConfigResult<u64> {
    let value = require_integer(node)?;
    u64::try_from(value)
        .map_err(|_| ConfigError::invalid(node.name().value(), format!("{} is out of range", value)))
}
