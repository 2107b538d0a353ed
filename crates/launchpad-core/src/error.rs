//! Error types for Launchpad.

use thiserror::Error;

use crate::deployment::DeploymentStatus;
use crate::deployer::{PlatformError, PlatformErrorKind};

#[derive(Debug, Error)]
pub enum Error {
    #[error("build failed: {message}")]
    BuildFailure {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this condition aborts the pipeline.
    ///
    /// `AlreadyExists` and `Conflict` are the only recoverable signals; the
    /// reconciler falls through to its update path on them.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::AlreadyExists(_) | Error::Conflict(_))
    }

    pub fn build_failed(exit_code: i32) -> Self {
        Error::BuildFailure {
            exit_code: Some(exit_code),
            message: format!("Build failed with exit code {}", exit_code),
        }
    }
}

impl From<PlatformError> for Error {
    fn from(err: PlatformError) -> Self {
        let message = err.to_string();
        match err.kind {
            PlatformErrorKind::AlreadyExists => Error::AlreadyExists(message),
            PlatformErrorKind::Conflict => Error::Conflict(message),
            PlatformErrorKind::NotFound | PlatformErrorKind::Other => Error::Remote(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
