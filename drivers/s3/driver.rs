//! S3驱动核心实现
//!
//! - 小文件单次上传，大文件按分片并发上传
//! - 移动 = 条件复制 + 校验 + 删除，删除失败时回滚新对象
//! - 过期删除通过对象标签实现，需要存储桶配置对应的生命周期规则

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use crate::storage::hash::metadata_for_bytes;
use crate::storage::multipart::upload_file_in_parts;
use crate::storage::{
    check_expiry, check_put_size, Acl, Capability, Credential, FileMetadata, LifecycleJob,
    MultipartApi, ObjectLocator, ObjectReader, ObjectStorage, OperationResult, PresignOptions,
    PresignedPolicy, PresignedUpload, PutLargeOptions, Status, StorageError, StorageResult,
};
use super::client::{check_response, request_id, S3Client, MAX_PRESIGN_SECS, MIN_PART_SIZE};
use super::config::S3Config;
use super::types::error_from_response;

/// 生命周期标签名，存储桶规则按此标签过滤
pub const EXPIRE_TAG: &str = "yaolist-expire-days";

const BACKEND: &str = "S3";

/// S3后端
pub struct S3Backend {
    client: Arc<S3Client>,
    credential: Credential,
}

impl S3Backend {
    pub fn new(config: S3Config) -> anyhow::Result<Self> {
        let credential = Credential::new(
            &config.access_key_id,
            &config.secret_access_key,
            config.effective_endpoint(),
            &config.bucket,
        );
        let client = S3Client::new(config)?;
        Ok(Self {
            client: Arc::new(client),
            credential,
        })
    }

    fn config(&self) -> &S3Config {
        self.client.config()
    }

    async fn put_inner(&self, locator: &ObjectLocator, content: Bytes, acl: Acl) -> StorageResult<OperationResult> {
        check_put_size(content.len(), self.config().max_put_size)?;
        let bucket = self.client.bucket(&locator.bucket, acl)?;
        let metadata = metadata_for_bytes(&locator.key, &content);

        let response = bucket
            .put_object_with_content_type(&locator.key, &content, &metadata.file_type)
            .await?;
        check_response(&response)?;

        Ok(OperationResult::success("File uploaded successfully.")
            .with_url(self.client.object_url(locator))
            .with_metadata(metadata)
            .with_request_id(request_id(&response)))
    }

    async fn put_large_inner(
        &self,
        locator: &ObjectLocator,
        local_path: &Path,
        options: PutLargeOptions,
    ) -> StorageResult<OperationResult> {
        let (digest, content_type) = upload_file_in_parts(
            self.multipart(),
            locator,
            local_path,
            &options,
            self.config().chunk_size,
            self.config().upload_parallelism,
        )
        .await?;

        tracing::debug!("S3分片上传完成: {} ({} 片)", locator, digest.part_count);
        Ok(OperationResult::success("File uploaded successfully.")
            .with_url(self.client.object_url(locator))
            .with_metadata(FileMetadata {
                file_name: locator.file_name().to_string(),
                file_size: digest.size,
                file_type: content_type,
                content_hash: digest.content_hash,
            }))
    }

    async fn get_inner(&self, locator: &ObjectLocator) -> StorageResult<ObjectReader> {
        let bucket = self.client.bucket(&locator.bucket, Acl::Default)?;
        self.client.require_object(&bucket, &locator.key).await?;

        let response = bucket.get_object_stream(&locator.key).await?;
        if !(200..300).contains(&response.status_code) {
            // HEAD 与 GET 之间对象可能被删除或权限变化，错误体不能当作内容返回
            let body: Vec<u8> = response
                .bytes
                .try_fold(Vec::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await
                .unwrap_or_default();
            return Err(error_from_response(
                response.status_code,
                &String::from_utf8_lossy(&body),
                None,
            ));
        }

        let stream = response
            .bytes
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn delete_inner(&self, locator: &ObjectLocator) -> StorageResult<OperationResult> {
        let bucket = self.client.bucket(&locator.bucket, Acl::Default)?;
        self.client.require_object(&bucket, &locator.key).await?;

        let response = bucket.delete_object(&locator.key).await?;
        check_response(&response)?;
        Ok(OperationResult::success("File deleted successfully.").with_request_id(request_id(&response)))
    }

    async fn move_inner(&self, from: &ObjectLocator, to: &ObjectLocator) -> StorageResult<OperationResult> {
        if from.bucket != to.bucket {
            return Err(StorageError::validation("S3 move requires source and target in the same bucket"));
        }
        if from.key == to.key {
            return Err(StorageError::validation("source and target are the same object"));
        }
        let bucket = self.client.bucket(&from.bucket, Acl::Default)?;
        self.client.require_object(&bucket, &from.key).await?;
        if self.client.exists(&bucket, &to.key).await? {
            return Err(StorageError::conflict(format!("目标对象已存在: {}", to)));
        }

        // HEAD 之后仍可能有并发写入目标，复制带 If-None-Match 由服务端兜底（412 -> Conflict）
        // 不支持条件复制的兼容服务会忽略该头，此时只剩 HEAD 检查
        let mut conditional = bucket.clone();
        conditional.add_header("If-None-Match", "*");
        // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
        let encoded_src = urlencoding::encode(&from.key);
        let status = conditional.copy_object_internal(&encoded_src, &to.key).await?;
        if !(200..300).contains(&status) {
            return Err(StorageError::from_http_status(status, format!("S3 CopyObject返回: {}", status)));
        }

        // 验证新文件是否存在
        if !self.client.exists(&bucket, &to.key).await? {
            return Err(StorageError::unknown(format!("S3 CopyObject后新文件不存在: {}", to)));
        }

        let deleted = match bucket.delete_object(&from.key).await {
            Ok(response) => check_response(&response),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = deleted {
            // 回滚：删除新对象，保证源对象仍是唯一可见的副本
            tracing::warn!("S3移动删除源对象失败，回滚: {} - {}", from, e);
            if let Err(rollback) = bucket.delete_object(&to.key).await {
                tracing::error!("S3移动回滚失败: {} - {}", to, rollback);
            }
            return Err(e);
        }

        Ok(OperationResult::success("File moved successfully.").with_url(self.client.object_url(to)))
    }

    async fn presign_inner(
        &self,
        locator: &ObjectLocator,
        expiry: Duration,
        options: PresignOptions,
    ) -> StorageResult<PresignedUpload> {
        check_expiry(expiry, Duration::from_secs(MAX_PRESIGN_SECS))?;
        let mut builder = PresignedPolicy::builder(locator.clone())
            .expires_in(expiry)
            .insert_only(options.insert_only);
        if let Some(template) = options.return_template {
            builder = builder.return_template(template);
        }
        let policy = builder.build()?;
        if policy.return_template().is_some() {
            tracing::debug!("S3 不支持自定义返回体，忽略模板: {}", locator);
        }

        let mut headers = BTreeMap::new();
        let mut signed = http::HeaderMap::new();
        if policy.insert_only() {
            headers.insert("If-None-Match".to_string(), "*".to_string());
            signed.insert(http::header::IF_NONE_MATCH, http::HeaderValue::from_static("*"));
        }

        let expires = policy.remaining_secs(Utc::now());
        let bucket = self.client.bucket(&locator.bucket, Acl::Default)?;
        let signed = (!signed.is_empty()).then_some(signed);
        let url = bucket.presign_put(&locator.key, expires as u32, signed, None).await?;
        let token = signature_of(&url)
            .ok_or_else(|| StorageError::unknown("预签名URL缺少X-Amz-Signature"))?;

        Ok(PresignedUpload {
            token,
            upload_url: url,
            key: locator.key.clone(),
            method: "PUT".to_string(),
            deadline: policy.deadline(),
            headers,
            form_fields: BTreeMap::new(),
        })
    }

    async fn presign_download_inner(&self, locator: &ObjectLocator, expiry: Duration) -> StorageResult<String> {
        check_expiry(expiry, Duration::from_secs(MAX_PRESIGN_SECS))?;
        let bucket = self.client.bucket(&locator.bucket, Acl::Default)?;
        // 不足一秒按一秒算，避免签出立即过期的链接
        let secs = expiry.as_millis().div_ceil(1000).max(1);
        let url = bucket.presign_get(&locator.key, secs as u32, None).await?;
        Ok(url)
    }

    async fn set_lifecycle_inner(&self, locator: &ObjectLocator, days: u32) -> StorageResult<LifecycleJob> {
        if days == 0 {
            return Err(StorageError::validation("lifecycle days must be at least 1"));
        }
        let bucket = self.client.bucket(&locator.bucket, Acl::Default)?;
        self.client.require_object(&bucket, &locator.key).await?;

        let days = days.to_string();
        let response = bucket
            .put_object_tagging(&locator.key, &[(EXPIRE_TAG, days.as_str())])
            .await?;
        check_response(&response)?;

        Ok(LifecycleJob {
            status: Status::Success,
            persistent_job_id: format!("s3-lifecycle-{}", uuid::Uuid::new_v4()),
        })
    }
}

/// 预签名URL中的签名值
fn signature_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "X-Amz-Signature")
        .map(|(_, v)| v.into_owned())
}

#[async_trait]
impl ObjectStorage for S3Backend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_native_rename: false,
            can_return_template: false,
            can_insert_only: true,
            provider_job_id: false,
            min_part_size: MIN_PART_SIZE,
            default_chunk_size: self.config().chunk_size,
            max_put_size: self.config().max_put_size,
        }
    }

    fn credential(&self) -> &Credential {
        &self.credential
    }

    fn multipart(&self) -> Arc<dyn MultipartApi> {
        self.client.clone()
    }

    async fn put(&self, locator: &ObjectLocator, content: Bytes, acl: Acl) -> OperationResult {
        OperationResult::from_result(self.put_inner(locator, content, acl).await)
            .logged(BACKEND, "put", &locator.to_string())
    }

    async fn put_large(&self, locator: &ObjectLocator, local_path: &Path, options: PutLargeOptions) -> OperationResult {
        OperationResult::from_result(self.put_large_inner(locator, local_path, options).await)
            .logged(BACKEND, "put_large", &locator.to_string())
    }

    async fn get(&self, locator: &ObjectLocator) -> Result<ObjectReader, OperationResult> {
        self.get_inner(locator)
            .await
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "get", &locator.to_string()))
    }

    async fn delete(&self, locator: &ObjectLocator) -> OperationResult {
        OperationResult::from_result(self.delete_inner(locator).await)
            .logged(BACKEND, "delete", &locator.to_string())
    }

    async fn move_object(&self, from: &ObjectLocator, to: &ObjectLocator) -> OperationResult {
        OperationResult::from_result(self.move_inner(from, to).await)
            .logged(BACKEND, "move", &format!("{} -> {}", from, to))
    }

    async fn presign(
        &self,
        locator: &ObjectLocator,
        expiry: Duration,
        options: PresignOptions,
    ) -> Result<PresignedUpload, OperationResult> {
        self.presign_inner(locator, expiry, options)
            .await
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "presign", &locator.to_string()))
    }

    async fn presign_download(&self, locator: &ObjectLocator, expiry: Duration) -> Result<String, OperationResult> {
        self.presign_download_inner(locator, expiry)
            .await
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "presign_download", &locator.to_string()))
    }

    async fn set_lifecycle(&self, locator: &ObjectLocator, days: u32) -> Result<LifecycleJob, OperationResult> {
        self.set_lifecycle_inner(locator, days)
            .await
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "set_lifecycle", &locator.to_string()))
    }
}
