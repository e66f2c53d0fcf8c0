use anyhow::{Result, anyhow};
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
pub const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

pub struct MultipartUploader<'a> {
    client: &'a Client,
    bucket: &'a str,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    part_number: i32,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(
        client: &'a Client,
        bucket: &'a str,
        key: &str,
        content_type: &str,
    ) -> Result<Self> {
        let created = client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to initiate upload of {}: {}", key, e))?;

        let upload_id = created
            .upload_id
            .ok_or_else(|| anyhow!("Storage returned no upload id for {}", key))?;

        Ok(Self {
            client,
            bucket,
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
            part_number: 1,
        })
    }

    async fn upload_part(&mut self, body: Bytes) -> Result<()> {
        let result = self
            .client
            .upload_part()
            .bucket(self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(self.part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to upload part {}: {}", self.part_number, e))?;

        let e_tag = result
            .e_tag
            .ok_or_else(|| anyhow!("Part {} returned no ETag", self.part_number))?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(e_tag)
                .part_number(self.part_number)
                .build(),
        );
        self.part_number += 1;
        Ok(())
    }

    async fn complete(self) -> Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(self.parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to complete upload of {}: {}", self.key, e))?;
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to abort upload of {}: {}", self.key, e))?;
        Ok(())
    }

    async fn send_file(&mut self, path: &Path) -> Result<()> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut buffer = vec![0u8; MIN_PART_SIZE];

        loop {
            // Fill a whole part; only the last one may be short.
            let mut filled = 0;
            while filled < MIN_PART_SIZE {
                let read = file.read(&mut buffer[filled..]).await?;
                if read == 0 {
                    break;
                }
                filled += read;
            }
            if filled == 0 {
                break;
            }
            self.upload_part(Bytes::copy_from_slice(&buffer[..filled])).await?;
            if filled < MIN_PART_SIZE {
                break;
            }
        }

        debug!(key = %self.key, parts = self.parts.len(), "Uploaded all parts");
        Ok(())
    }

    /// Streams a local file in parts, aborting the upload on any failure.
    pub async fn upload_file(mut self, path: &Path) -> Result<()> {
        if let Err(e) = self.send_file(path).await {
            error!("Multipart upload of {} failed: {}", self.key, e);
            self.abort().await?;
            return Err(e);
        }
        self.complete().await
    }
}
