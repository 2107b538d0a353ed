//! Artifact storage using object_store.

use async_trait::async_trait;
use bytes::Bytes;
use launchpad_config::DynamicTarget;
use launchpad_core::artifact::ArtifactStore;
use launchpad_core::{Error, Result};
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use std::sync::Arc;
use tracing::debug;

/// Artifact store over any `object_store` backend.
pub struct ObjectArtifactStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectArtifactStore {
    /// S3 bucket from the dynamic target's credentials.
    pub fn s3(target: &DynamicTarget) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(&target.bucket)
            .with_region(&target.region)
            .with_access_key_id(&target.access_key_id)
            .with_secret_access_key(target.secret_access_key.expose())
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create S3 store: {e}")))?;
        Ok(Self::with_store(Arc::new(store), target.bucket.clone()))
    }

    /// Use a pre-configured object store.
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for ObjectArtifactStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = ObjectPath::from(key);
        debug!(bucket = %self.bucket, path = %path, size = data.len(), "uploading artifact");
        self.store
            .put(&path, data.into())
            .await
            .map_err(|e| Error::Remote(format!("failed to upload {key}: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::Secret;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_put_overwrites_by_key() {
        let memory = Arc::new(InMemory::new());
        let store = ObjectArtifactStore::with_store(memory.clone(), "artifacts");

        store.put("demo/function.zip", Bytes::from_static(b"one")).await.unwrap();
        store.put("demo/function.zip", Bytes::from_static(b"two")).await.unwrap();

        let stored = memory
            .get(&ObjectPath::from("demo/function.zip"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(stored.as_ref(), b"two");
        assert_eq!(store.bucket(), "artifacts");
    }

    #[test]
    fn test_s3_store_builds_from_target() {
        let target = DynamicTarget {
            region: "ap-south-1".to_string(),
            access_key_id: "AKIA".to_string(),
            secret_access_key: Secret::new("secret"),
            bucket: "artifacts".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/lambda".to_string(),
        };
        let store = ObjectArtifactStore::s3(&target).unwrap();
        assert_eq!(store.bucket(), "artifacts");
    }

    #[tokio::test]
    #[ignore] // Requires AWS credentials
    async fn test_s3_upload() {
        let target = DynamicTarget {
            region: std::env::var("AWS_REGION").unwrap(),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap(),
            secret_access_key: Secret::new(std::env::var("AWS_SECRET_ACCESS_KEY").unwrap()),
            bucket: std::env::var("BUCKET").unwrap(),
            role_arn: String::new(),
        };
        let store = ObjectArtifactStore::s3(&target).unwrap();
        store
            .put("launchpad-test/check.txt", Bytes::from_static(b"ok"))
            .await
            .unwrap();
    }
}
