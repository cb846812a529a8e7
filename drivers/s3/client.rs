//! S3 客户端封装
//!
//! 基于 rust-s3，关闭了 fail-on-err，所有响应都需要自行检查状态码
//!
//! rust-s3 的自动重试是进程级开关，这里统一关闭：重试由上层决定，
//! 否则非幂等的请求（分片上传）会在库内部被静默重放

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::request::ResponseData;
use s3::serde_types::Part;
use s3::Region;

use crate::storage::{
    encode_key, Acl, MultipartApi, ObjectLocator, PartRecord, StorageError, StorageResult,
};
use super::config::S3Config;
use super::types::error_from_response;

/// S3 最小分片 5MB
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// SigV4 预签名最长 7 天
pub const MAX_PRESIGN_SECS: u64 = 7 * 24 * 3600;

impl From<S3Error> for StorageError {
    fn from(err: S3Error) -> Self {
        match err {
            S3Error::HttpFailWithBody(status, body) => error_from_response(status, &body, None),
            other => {
                let msg = other.to_string();
                let lower = msg.to_lowercase();
                if lower.contains("timed out")
                    || lower.contains("timeout")
                    || lower.contains("connect")
                    || lower.contains("dns")
                {
                    StorageError::network(msg)
                } else {
                    StorageError::unknown(msg)
                }
            }
        }
    }
}

/// 响应中的请求ID
pub fn request_id(response: &ResponseData) -> Option<String> {
    response.headers().get("x-amz-request-id").cloned()
}

/// 检查响应状态码
///
/// CompleteMultipartUpload 可能返回 200 但响应体是 `<Error>`，一并检查
pub fn check_response(response: &ResponseData) -> StorageResult<()> {
    let status = response.status_code();
    let body = String::from_utf8_lossy(response.as_slice());
    if (200..300).contains(&status) && !body.contains("<Error>") {
        return Ok(());
    }
    let status = if (200..300).contains(&status) { 500 } else { status };
    Err(error_from_response(status, &body, request_id(response)))
}

/// S3客户端
pub struct S3Client {
    config: S3Config,
    bucket: Box<Bucket>,
    /// 分片直传用，rust-s3 的 put_multipart_chunk 失败时会自行 abort
    http: reqwest::Client,
}

impl S3Client {
    pub fn new(config: S3Config) -> Result<Self> {
        s3::set_retries(0);
        let bucket = Self::create_bucket(&config, &config.bucket)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow!("创建HTTP客户端失败: {}", e))?;
        Ok(Self { config, bucket, http })
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(config: &S3Config, name: &str) -> Result<Box<Bucket>> {
        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_access_key),
            if config.session_token.is_empty() { None } else { Some(&config.session_token) },
            None,
            None,
        )
        .map_err(|e| anyhow!("创建S3凭证失败: {}", e))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.effective_endpoint(),
        };

        // set_request_timeout 对 reqwest 后端无效，需要重建客户端
        let bucket = Bucket::new(name, region, credentials)
            .and_then(|b| b.with_request_timeout(Duration::from_secs(config.timeout_secs)))
            .map_err(|e| anyhow!("创建S3 Bucket失败: {}", e))?;

        let bucket = if config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(bucket)
    }

    /// 获取指定存储桶的句柄，非默认ACL时附加 x-amz-acl
    pub fn bucket(&self, name: &str, acl: Acl) -> StorageResult<Box<Bucket>> {
        let mut bucket = if name == self.config.bucket {
            self.bucket.clone()
        } else {
            Self::create_bucket(&self.config, name)
                .map_err(|e| StorageError::validation(e.to_string()))?
        };
        if let Some(value) = acl.as_header() {
            bucket.add_header("x-amz-acl", value);
        }
        Ok(bucket)
    }

    /// (scheme, host[:port])
    pub fn endpoint_parts(&self) -> StorageResult<(String, String)> {
        let endpoint = self.config.effective_endpoint();
        let url = url::Url::parse(&endpoint)
            .map_err(|e| StorageError::validation(format!("无效的S3端点 {}: {}", endpoint, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| StorageError::validation(format!("S3端点缺少主机名: {}", endpoint)))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok((url.scheme().to_string(), host))
    }

    /// 对象所在的 host 与路径（路径已编码）
    pub fn object_host_path(&self, locator: &ObjectLocator) -> StorageResult<(String, String, String)> {
        let (scheme, host) = self.endpoint_parts()?;
        let key = encode_key(&locator.key);
        if self.config.force_path_style {
            Ok((scheme, host, format!("/{}/{}", locator.bucket, key)))
        } else {
            Ok((scheme, format!("{}.{}", locator.bucket, host), format!("/{}", key)))
        }
    }

    /// 对象访问地址，配置了自定义域名时使用自定义域名
    pub fn object_url(&self, locator: &ObjectLocator) -> String {
        if !self.config.custom_host.is_empty() && locator.bucket == self.config.bucket {
            let host = self.config.custom_host.trim_end_matches('/');
            let host = if host.contains("://") { host.to_string() } else { format!("https://{}", host) };
            return format!("{}/{}", host, encode_key(&locator.key));
        }
        match self.object_host_path(locator) {
            Ok((scheme, host, path)) => format!("{}://{}{}", scheme, host, path),
            Err(_) => format!("{}/{}", locator.bucket, locator.key),
        }
    }

    /// HEAD 对象，不存在时返回 NotFound
    pub async fn require_object(&self, bucket: &Bucket, key: &str) -> StorageResult<u64> {
        let (head, status) = bucket.head_object(key).await?;
        match status {
            200..=299 => Ok(head.content_length.unwrap_or(0).max(0) as u64),
            404 => Err(StorageError::not_found(format!("对象不存在: {}/{}", bucket.name(), key))),
            other => Err(StorageError::from_http_status(
                other,
                format!("HEAD {}/{} 返回 {}", bucket.name(), key, other),
            )),
        }
    }

    /// 对象是否存在
    pub async fn exists(&self, bucket: &Bucket, key: &str) -> StorageResult<bool> {
        match self.require_object(bucket, key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == crate::storage::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MultipartApi for S3Client {
    fn min_part_size(&self) -> u64 {
        MIN_PART_SIZE
    }

    async fn initiate(&self, locator: &ObjectLocator, content_type: &str, acl: Acl) -> StorageResult<String> {
        let bucket = self.bucket(&locator.bucket, acl)?;
        let response = bucket
            .initiate_multipart_upload(&locator.key, content_type)
            .await?;
        if response.upload_id.is_empty() {
            return Err(StorageError::unknown("初始化分片上传未返回UploadId"));
        }
        Ok(response.upload_id)
    }

    async fn upload_part(
        &self,
        locator: &ObjectLocator,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        let bucket = self.bucket(&locator.bucket, Acl::Default)?;
        let mut queries = HashMap::new();
        queries.insert("partNumber".to_string(), part_number.to_string());
        queries.insert("uploadId".to_string(), upload_id.to_string());
        let ttl = self.config.timeout_secs.clamp(60, MAX_PRESIGN_SECS) as u32;
        let url = bucket.presign_put(&locator.key, ttl, None, Some(queries)).await?;

        let response = self.http.put(&url).body(data).send().await?;
        let status = response.status().as_u16();
        let rid = response
            .headers()
            .get("x-amz-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body, rid));
        }
        match etag {
            Some(etag) if !etag.is_empty() => Ok(etag),
            _ => Err(StorageError::unknown(format!("分片 {} 未返回ETag", part_number))),
        }
    }

    async fn complete(
        &self,
        locator: &ObjectLocator,
        upload_id: &str,
        parts: &[PartRecord],
        _content_type: &str,
    ) -> StorageResult<()> {
        let bucket = self.bucket(&locator.bucket, Acl::Default)?;
        let parts: Vec<Part> = parts
            .iter()
            .map(|p| Part {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();
        let response = bucket
            .complete_multipart_upload(&locator.key, upload_id, parts)
            .await?;
        check_response(&response)
    }

    async fn abort(&self, locator: &ObjectLocator, upload_id: &str) -> StorageResult<()> {
        let bucket = self.bucket(&locator.bucket, Acl::Default)?;
        bucket.abort_upload(&locator.key, upload_id).await?;
        Ok(())
    }
}
