//! Deployment pipeline for Launchpad.
//!
//! Runs one deployment through the status state machine:
//! build, then package, then provision, publishing a status line at every
//! transition.

pub mod pipeline;

pub use pipeline::{BUILD_STARTED, DeployTarget, DeploymentPipeline};
