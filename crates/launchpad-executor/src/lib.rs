//! Build executor for Launchpad.
//!
//! Provides:
//! - Package-manager selection and the per-category command plan
//! - A shell runner that streams process output into the build log
//! - The `BuildExecutor` that runs one build and reports its terminal line

pub mod build;
pub mod plan;
pub mod shell;

pub use build::{BUILD_COMPLETE, BuildExecutor, BuildReport};
pub use plan::{
    BuildPlan, DEPENDENCY_DIR, PackageManager, PackageManifest, STATIC_OUTPUT_SUBDIR,
    prepare_workspace,
};
pub use shell::{ActiveChildren, ShellRunner};
