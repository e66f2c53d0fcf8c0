use super::multipart::{MIN_PART_SIZE, MultipartUploader};
use super::{ObjectBody, ObjectStore};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use futures_util::StreamExt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
    signed_url_ttl: Duration,
}

impl StorageService {
    pub async fn new(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        signed_url_ttl: Duration,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Connected to S3 bucket '{}'", bucket);

        Self {
            client,
            bucket: bucket.to_string(),
            signed_url_ttl,
        }
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        let size = tokio::fs::metadata(path).await?.len();

        if size as usize > MIN_PART_SIZE {
            let uploader =
                MultipartUploader::new(&self.client, &self.bucket, key, content_type).await?;
            uploader.upload_file(path).await?;
        } else {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .body(body)
                .send()
                .await
                .map_err(|e| anyhow!("Failed to upload {}: {}", key, e))?;
        }

        debug!(key, size, "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ObjectBody>> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None);
            }
            Err(e) => return Err(anyhow!("Failed to fetch {}: {}", key, e)),
        };

        let content_length = resp.content_length();
        let stream = futures_util::stream::unfold(resp.body, |mut body| async move {
            body.next()
                .await
                .map(|chunk| (chunk.map_err(std::io::Error::other), body))
        })
        .boxed();

        Ok(Some(ObjectBody {
            content_length,
            stream,
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 DeleteObject already succeeds for missing keys.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to delete {}: {}", key, e))?;
        debug!(key, "Deleted object");
        Ok(())
    }

    async fn signed_url(&self, key: &str) -> Result<String> {
        let presigning = PresigningConfig::expires_in(self.signed_url_ttl)
            .map_err(|e| anyhow!("Invalid signed url ttl: {}", e))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| anyhow!("Failed to presign {}: {}", key, e))?;

        Ok(request.uri().to_string())
    }
}
