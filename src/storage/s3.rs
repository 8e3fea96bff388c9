//! S3-compatible blob backend.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region as AwsRegion;
use tracing::{debug, info};

use crate::config::Config;

use super::{alternative_key, BlobStore};

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: &Config) -> Result<Self> {
        if config.s3_bucket.is_empty() {
            return Err(anyhow!("Bucket name is required"));
        }
        if config.s3_access_key_id.is_empty() {
            return Err(anyhow!("Access key ID is required"));
        }
        if config.s3_secret_access_key.is_empty() {
            return Err(anyhow!("Secret access key is required"));
        }

        let credentials = Credentials::new(
            &config.s3_access_key_id,
            &config.s3_secret_access_key,
            None, // session token
            None, // expiry
            "davbox-blob-store",
        );

        let region = if config.s3_region.is_empty() {
            "us-east-1".to_string()
        } else {
            config.s3_region.clone()
        };

        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .region(AwsRegion::new(region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .behavior_version_latest();

        // Custom endpoint for S3-compatible services (MinIO etc.)
        if let Some(endpoint_url) = &config.s3_endpoint_url {
            if !endpoint_url.is_empty() {
                s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
                info!("Using custom S3 endpoint: {}", endpoint_url);
            }
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            bucket: config.s3_bucket.clone(),
        })
    }

    /// Validate bucket access. Used at startup so misconfiguration fails fast.
    pub async fn test_connection(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| anyhow!("Cannot access bucket {}: {}", self.bucket, e))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, content: &[u8]) -> Result<String> {
        let mut actual_key = key.to_string();
        while self.exists(&actual_key).await? {
            actual_key = alternative_key(key);
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&actual_key)
            .body(ByteStream::from(content.to_vec()))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to upload S3 object {}: {}", actual_key, e))?;

        debug!("Stored blob: {} ({} bytes)", actual_key, content.len());
        Ok(actual_key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to download S3 object {}: {}", key, e))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| anyhow!("Failed to read S3 object body: {}", e))?;

        Ok(body.into_bytes().to_vec())
    }

    async fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to range-read S3 object {}: {}", key, e))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| anyhow!("Failed to read S3 object body: {}", e))?;

        Ok(body.into_bytes().to_vec())
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<()> {
        // CopySource is "{bucket}/{key}", URL-encoded.
        let copy_source = format!(
            "{}/{}",
            self.bucket,
            urlencoding::encode(src_key).into_owned()
        );

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to copy S3 object {} -> {}: {}", src_key, dst_key, e))?;

        debug!("Copied blob: {} -> {}", src_key, dst_key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to delete S3 object {}: {}", key, e))?;

        debug!("Deleted blob: {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow!("Failed to stat S3 object {}: {}", key, service_err))
                }
            }
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| anyhow!("Failed to list S3 objects: {}", e))?;

            if let Some(contents) = response.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        keys.push(key);
                    }
                }
            }

            if response.is_truncated == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(keys)
    }

    fn storage_type(&self) -> &'static str {
        "s3"
    }
}
