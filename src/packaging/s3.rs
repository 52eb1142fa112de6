//! S3-backed artifact packager.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::aws::classify_sdk_error;
use crate::config::ArtifactLocation;
use crate::error::{ConfigError, PackageError, RemoteError, Result, StackforgeError};

use super::archive::ZipArchiver;
use super::hash::SourceHasher;
use super::packager::{Artifact, ArtifactPackager, PackageRequest, artifact_key};

/// Packager that archives locally and stores artifacts in S3.
#[derive(Debug)]
pub struct S3Packager {
    /// S3 client.
    client: Client,
    /// Bucket name; packaging works without one, uploads do not.
    bucket: Option<String>,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
    /// Local archiver.
    archiver: ZipArchiver,
}

impl S3Packager {
    /// Creates a packager with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: Option<&str>, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.map(str::to_string),
            prefix: prefix.to_string(),
            archiver: ZipArchiver::default(),
        }
    }

    fn bucket(&self, operation: &str) -> Result<&str> {
        self.bucket.as_deref().ok_or_else(|| {
            ConfigError::MissingBucket {
                operation: operation.to_string(),
            }
            .into()
        })
    }

    /// Checks if an object exists in S3.
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let result = self.client.head_object().bucket(bucket).key(key).send().await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let not_found = sdk_err
                    .as_service_error()
                    .is_some_and(aws_sdk_s3::operation::head_object::HeadObjectError::is_not_found);
                let status = sdk_err.raw_response().map(|r| r.status().as_u16());
                if object_absent(status, not_found) {
                    debug!("Object s3://{bucket}/{key} not visible, uploading");
                    Ok(false)
                } else {
                    Err(classify_sdk_error("HeadObject", &sdk_err).into())
                }
            }
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        match self.client.config().region() {
            Some(region) => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
            None => format!("https://{bucket}.s3.amazonaws.com/{key}"),
        }
    }
}

/// A HEAD without `s3:ListBucket` permission answers 403 for missing keys,
/// so 403 counts as absent and the upload decides.
const fn object_absent(status: Option<u16>, not_found: bool) -> bool {
    not_found || matches!(status, Some(403 | 404))
}

/// Transient failures stay retryable; anything else is a fatal upload error.
fn upload_error(key: &str, err: RemoteError) -> StackforgeError {
    match err {
        transient @ RemoteError::Transient { .. } => transient.into(),
        other => PackageError::UploadFailed {
            key: key.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}

#[async_trait]
impl ArtifactPackager for S3Packager {
    async fn package(&self, request: &PackageRequest) -> Result<Artifact> {
        let label = request.label();
        let source = request.source.clone();
        let hash_label = label.clone();
        let hash = tokio::task::spawn_blocking(move || {
            SourceHasher::new().hash_path(&hash_label, &source)
        })
        .await
        .map_err(|e| StackforgeError::internal(format!("hashing task failed: {e}")))??;

        let archive = self.archiver.build(&label, &request.source, &hash).await?;

        Ok(Artifact {
            source: request.source.clone(),
            units: request.units.clone(),
            key: artifact_key(&self.prefix, &hash),
            hash,
            archive,
        })
    }

    async fn upload(&self, artifact: &Artifact) -> Result<ArtifactLocation> {
        let bucket = self.bucket("upload")?;
        let location = ArtifactLocation {
            bucket: bucket.to_string(),
            key: artifact.key.clone(),
            hash: Some(artifact.hash.clone()),
        };

        if self.object_exists(bucket, &artifact.key).await? {
            info!("Artifact for {} unchanged, s3://{bucket}/{} exists", artifact.label(), artifact.key);
            return Ok(location);
        }

        let body = ByteStream::from_path(&artifact.archive).await.map_err(|e| {
            PackageError::UploadFailed {
                key: artifact.key.clone(),
                message: format!("failed to read archive: {e}"),
            }
        })?;

        info!("Uploading {} to s3://{bucket}/{}", artifact.label(), artifact.key);
        self.client
            .put_object()
            .bucket(bucket)
            .key(&artifact.key)
            .body(body)
            .content_type("application/zip")
            .send()
            .await
            .map_err(|e| upload_error(&artifact.key, classify_sdk_error("PutObject", &e)))?;

        debug!("Uploaded {}", artifact.key);
        Ok(location)
    }

    async fn upload_template(&self, key: &str, body: &str) -> Result<String> {
        let bucket = self.bucket("template upload")?;

        info!("Uploading template to s3://{bucket}/{key}");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body.as_bytes().to_vec().into())
            .content_type("text/plain")
            .send()
            .await
            .map_err(|e| upload_error(key, classify_sdk_error("PutObject", &e)))?;

        Ok(self.object_url(bucket, key))
    }
}
