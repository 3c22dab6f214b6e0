//! S3 adapter on aws-sdk-s3, with retries, content-MD5 validation, and
//! MinIO/localstack-style custom endpoints.

use crate::objstore::client::ObjectBackend;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::SdkBody;
use aws_sdk_s3::{Client, config::Credentials, config::Region};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use tokio::time::{Duration, sleep};

/// S3 backend configuration options.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name.
    pub bucket: String,
    /// AWS region (optional, falls back to the environment default).
    pub region: Option<String>,
    /// Custom endpoint URL (e.g. for MinIO or localstack).
    pub endpoint: Option<String>,
    /// Force path-style access (required for some S3-compatible services).
    pub force_path_style: bool,
    /// Static credentials; when absent the default provider chain is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Maximum retry attempts for failed operations (default: 3).
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds (default: 100ms).
    pub retry_base_delay: u64,
    /// Enable MD5 checksums for uploads (default: true).
    pub enable_md5: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            endpoint: None,
            force_path_style: false,
            access_key: None,
            secret_key: None,
            max_retries: 3,
            retry_base_delay: 100,
            enable_md5: true,
        }
    }
}

#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    config: S3Config,
}

impl S3Backend {
    /// Create a new S3 backend with default configuration.
    pub async fn new(bucket: impl Into<String>) -> Result<Self> {
        let config = S3Config {
            bucket: bucket.into(),
            ..Default::default()
        };
        Self::with_config(config).await
    }

    /// Create a new S3 backend with custom configuration.
    pub async fn with_config(config: S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(anyhow!("bucket name cannot be empty"));
        }

        let mut aws_config_loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            aws_config_loader = aws_config_loader.region(Region::new(region.clone()));
        }
        let aws_config = aws_config_loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }
        if let (Some(access), Some(secret)) = (&config.access_key, &config.secret_key) {
            s3_config_builder = s3_config_builder.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "slatefs",
            ));
        }

        let client = Client::from_conf(s3_config_builder.build());
        Ok(Self { client, config })
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put_object_vectored(&self, key: &str, parts: Vec<Bytes>) -> Result<()> {
        // The SDK takes a single body; log objects are bounded by the flush
        // thresholds, so they always fit one direct PUT.
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for part in &parts {
            data.extend_from_slice(part);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut request = self
                .client
                .put_object()
                .bucket(&self.config.bucket)
                .key(key)
                .body(SdkBody::from(data.clone()).into());

            if self.config.enable_md5 {
                request = request.content_md5(Self::md5_base64(&data));
            }

            match request.send().await {
                Ok(_) => return Ok(()),
                Err(_e) if attempt < self.config.max_retries => {
                    let delay = self.config.retry_base_delay * (1 << (attempt - 1));
                    sleep(Duration::from_millis(delay)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get_object_range(&self, key: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset + buf.len() as u64 - 1;
        let resp = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .range(format!("bytes={offset}-{end}"))
            .send()
            .await?;
        let data = resp.body.collect().await?.into_bytes();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix);
            if let Some(t) = &token {
                request = request.continuation_token(t);
            }
            let resp = request.send().await?;
            for object in resp.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            if resp.is_truncated() == Some(true) {
                token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(keys)
    }
}
