//! Core domain types and traits for the Launchpad deployment pipeline.
//!
//! This crate contains:
//! - Identifiers and the deployment status state machine
//! - Build log events and the log publisher trait
//! - Artifact types and the artifact store trait
//! - Script runner trait used for every external command
//! - Hosting platform traits (static host, functions, routing)
//! - The reconciler's working model of remote resources

pub mod artifact;
pub mod deployer;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod id;
pub mod log;
pub mod resource;
pub mod secret;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use deployment::{BuildCategory, Deployment, DeploymentStatus, EnvVars};
pub use error::{Error, Result};
pub use id::{DeploymentId, ProjectId};
pub use log::{BuildLog, LogEvent, LogPublisher};
pub use secret::Secret;
