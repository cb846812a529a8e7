//! Kodo驱动核心实现

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use crate::storage::hash::metadata_for_bytes;
use crate::storage::multipart::upload_file_in_parts;
use crate::storage::{
    check_expiry, check_put_size, Acl, Capability, Credential, FileMetadata, LifecycleJob,
    MultipartApi, ObjectLocator, ObjectReader, ObjectStorage, OperationResult, PresignOptions,
    PresignedPolicy, PresignedUpload, PutLargeOptions, Status, StorageError, StorageResult,
    TemplateField,
};
use super::client::{KodoClient, MIN_PART_SIZE};
use super::config::KodoConfig;
use super::types::{magic_variable, PutPolicy};

const BACKEND: &str = "Kodo";

/// 上传凭证最长有效期（30天）
pub const MAX_TOKEN_SECS: u64 = 30 * 24 * 3600;

/// Kodo后端
pub struct KodoBackend {
    client: Arc<KodoClient>,
    credential: Credential,
}

impl KodoBackend {
    pub fn new(config: KodoConfig) -> anyhow::Result<Self> {
        let credential = Credential::new(
            &config.access_key,
            &config.secret_key,
            config.up_url(),
            &config.bucket,
        );
        Ok(Self {
            client: Arc::new(KodoClient::new(config)?),
            credential,
        })
    }

    fn config(&self) -> &KodoConfig {
        self.client.config()
    }

    /// 带签名的限时下载链接
    pub fn private_download_url(&self, key: &str, expires: Duration) -> String {
        let base = self.client.public_url(key);
        let deadline = chrono::Utc::now().timestamp() + expires.as_secs() as i64;
        self.client.signer().private_download_url(&base, deadline)
    }

    /// 上传结果中返回的访问地址
    fn result_url(&self, key: &str) -> String {
        self.client
            .download_url(key, Duration::from_secs(self.config().download_expire_secs))
    }

    fn check_bucket(&self, locator: &ObjectLocator) -> StorageResult<()> {
        if locator.bucket.is_empty() {
            return Err(StorageError::validation("bucket is required"));
        }
        if locator.key.is_empty() {
            return Err(StorageError::validation("object key is required"));
        }
        Ok(())
    }

    async fn put_inner(&self, locator: &ObjectLocator, content: Bytes, acl: Acl) -> StorageResult<OperationResult> {
        self.check_bucket(locator)?;
        check_put_size(content.len(), self.config().max_put_size)?;
        if acl != Acl::Default {
            tracing::debug!("Kodo 不支持对象级ACL，忽略: {:?}", acl);
        }

        let metadata = metadata_for_bytes(&locator.key, &content);
        let token = self.client.scoped_token(locator, 3600)?;
        let (_, reqid) = self
            .client
            .form_upload(&token, &locator.key, content, &metadata.file_name, &metadata.file_type)
            .await?;

        Ok(OperationResult::success("File uploaded successfully.")
            .with_url(self.result_url(&locator.key))
            .with_metadata(metadata)
            .with_request_id(reqid))
    }

    async fn put_large_inner(
        &self,
        locator: &ObjectLocator,
        local_path: &Path,
        options: PutLargeOptions,
    ) -> StorageResult<OperationResult> {
        self.check_bucket(locator)?;
        let (digest, content_type) = upload_file_in_parts(
            self.multipart(),
            locator,
            local_path,
            &options,
            self.config().chunk_size,
            self.config().upload_parallelism,
        )
        .await?;

        Ok(OperationResult::success("File uploaded successfully.")
            .with_url(self.result_url(&locator.key))
            .with_metadata(FileMetadata {
                file_name: locator.file_name().to_string(),
                file_size: digest.size,
                file_type: content_type,
                content_hash: digest.content_hash,
            }))
    }

    async fn get_inner(&self, locator: &ObjectLocator) -> StorageResult<ObjectReader> {
        self.check_bucket(locator)?;
        if locator.bucket != self.config().bucket {
            return Err(StorageError::validation(format!(
                "下载域名只绑定了存储空间 {}",
                self.config().bucket
            )));
        }
        let url = self.result_url(&locator.key);
        let response = self.client.open(&url).await?;

        // 流式传输：将响应体转换为AsyncRead，不加载到内存
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn delete_inner(&self, locator: &ObjectLocator) -> StorageResult<OperationResult> {
        self.check_bucket(locator)?;
        let reqid = self.client.delete(locator).await?;
        Ok(OperationResult::success("File deleted successfully.").with_request_id(reqid))
    }

    async fn move_inner(&self, from: &ObjectLocator, to: &ObjectLocator) -> StorageResult<OperationResult> {
        self.check_bucket(from)?;
        self.check_bucket(to)?;
        let reqid = self.client.move_object(from, to, false).await?;
        Ok(OperationResult::success("File moved successfully.")
            .with_url(self.result_url(&to.key))
            .with_request_id(reqid))
    }

    fn presign_inner(
        &self,
        locator: &ObjectLocator,
        expiry: Duration,
        options: PresignOptions,
    ) -> StorageResult<PresignedUpload> {
        check_expiry(expiry, Duration::from_secs(MAX_TOKEN_SECS))?;
        let mut builder = PresignedPolicy::builder(locator.clone())
            .expires_in(expiry)
            .insert_only(options.insert_only);
        if let Some(template) = options.return_template {
            builder = builder.return_template(template);
        }
        let policy = builder.build()?;

        let return_body = match policy.return_template() {
            Some(template) => {
                // 访问地址在签发时计算，有效期与凭证一致
                let url = self.client.download_url(&locator.key, expiry);
                let rendered = template.render(|field| match field {
                    TemplateField::Url => Some(url.clone()),
                    other => magic_variable(other),
                });
                Some(
                    serde_json::to_string(&rendered)
                        .map_err(|e| StorageError::unknown(format!("序列化返回体失败: {}", e)))?,
                )
            }
            None => None,
        };

        let token = self.client.upload_token(&PutPolicy {
            scope: format!("{}:{}", locator.bucket, locator.key),
            deadline: policy.deadline_unix(),
            insert_only: policy.insert_only().then_some(1),
            return_body,
        })?;

        let mut form_fields = BTreeMap::new();
        form_fields.insert("token".to_string(), token.clone());
        form_fields.insert("key".to_string(), locator.key.clone());

        Ok(PresignedUpload {
            token,
            upload_url: self.config().up_url(),
            key: locator.key.clone(),
            method: "POST".to_string(),
            deadline: policy.deadline(),
            headers: BTreeMap::new(),
            form_fields,
        })
    }

    async fn set_lifecycle_inner(&self, locator: &ObjectLocator, days: u32) -> StorageResult<LifecycleJob> {
        self.check_bucket(locator)?;
        if days == 0 {
            return Err(StorageError::validation("lifecycle days must be at least 1"));
        }
        // pfop 对不存在的文件只会在任务执行时失败，这里先确认
        let stat = self.client.stat(locator).await?;
        tracing::debug!("Kodo设置过期: {} ({} bytes, {} 天)", locator, stat.fsize, days);
        let persistent_id = self
            .client
            .pfop(locator, &format!("deleteAfterDays/{}", days))
            .await?;
        Ok(LifecycleJob {
            status: Status::Success,
            persistent_job_id: persistent_id,
        })
    }
}

#[async_trait]
impl ObjectStorage for KodoBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_native_rename: true,
            can_return_template: true,
            can_insert_only: true,
            provider_job_id: true,
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
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "presign", &locator.to_string()))
    }

    async fn presign_download(&self, locator: &ObjectLocator, expiry: Duration) -> Result<String, OperationResult> {
        check_expiry(expiry, Duration::from_secs(MAX_TOKEN_SECS))
            .map(|_| self.private_download_url(&locator.key, expiry))
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "presign_download", &locator.to_string()))
    }

    async fn set_lifecycle(&self, locator: &ObjectLocator, days: u32) -> Result<LifecycleJob, OperationResult> {
        self.set_lifecycle_inner(locator, days)
            .await
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "set_lifecycle", &locator.to_string()))
    }
}
