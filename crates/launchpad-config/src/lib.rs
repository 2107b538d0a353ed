//! Configuration for Launchpad workers.
//!
//! This crate handles:
//! - The dispatch contract (process environment handed to a worker)
//! - Platform defaults, optionally overridden from a KDL file

pub mod defaults;
pub mod dispatch;
pub mod error;

pub use defaults::{PlatformDefaults, load_defaults, parse_defaults};
pub use dispatch::{DispatchEnv, DynamicTarget, StaticTarget, TargetConfig, WorkerConfig};
pub use error::{ConfigError, ConfigResult};
