//! Packaged artifacts and the remote artifact store.

use async_trait::async_trait;
use bytes::Bytes;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::id::ProjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    #[display("static-bundle")]
    StaticBundle,
    #[display("function-code")]
    FunctionCode,
    #[display("dependency-layer")]
    DependencyLayer,
}

impl ArtifactKind {
    /// Object name under the project's namespace in the artifact store.
    pub fn object_name(&self) -> &'static str {
        match self {
            ArtifactKind::StaticBundle => "static",
            ArtifactKind::FunctionCode => "function.zip",
            ArtifactKind::DependencyLayer => "layer.zip",
        }
    }
}

/// Storage key for an artifact.
///
/// Keys are not versioned: a retry overwrites the previous attempt's object.
pub fn artifact_key(project: &ProjectId, kind: ArtifactKind) -> String {
    format!("{}/{}", project, kind.object_name())
}

/// An immutable packaged unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub project: ProjectId,
    pub kind: ArtifactKind,
    /// Remote storage key (or local bundle path for static bundles, which
    /// the hosting platform uploads itself).
    pub key: String,
    pub size: u64,
    /// SHA-256 of the content, hex encoded.
    pub checksum: String,
}

/// Remote artifact storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Bucket (or equivalent container) the store writes into.
    fn bucket(&self) -> &str;

    /// Store `data` under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;
}
