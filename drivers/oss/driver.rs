//! OSS驱动核心实现

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::json;
use tokio_util::io::StreamReader;

use crate::storage::hash::metadata_for_bytes;
use crate::storage::multipart::upload_file_in_parts;
use crate::storage::{
    check_expiry, check_put_size, Acl, Capability, Credential, FileMetadata, LifecycleJob,
    MultipartApi, ObjectLocator, ObjectReader, ObjectStorage, OperationResult, PresignOptions,
    PresignedPolicy, PresignedUpload, PutLargeOptions, Status, StorageError, StorageResult,
    TemplateField,
};
use super::client::{request_id, OssClient, MIN_PART_SIZE};
use super::config::OssConfig;
use super::types::{callback_variable, EXPIRE_TAG};

const BACKEND: &str = "OSS";

/// 签名链接和表单策略的最长有效期（7天）
pub const MAX_PRESIGN_SECS: u64 = 7 * 24 * 3600;

/// OSS后端
pub struct OssBackend {
    client: Arc<OssClient>,
    credential: Credential,
}

impl OssBackend {
    pub fn new(config: OssConfig) -> anyhow::Result<Self> {
        let credential = Credential::new(
            &config.access_key_id,
            &config.access_key_secret,
            &config.endpoint,
            &config.bucket,
        );
        Ok(Self {
            client: Arc::new(OssClient::new(config)?),
            credential,
        })
    }

    fn config(&self) -> &OssConfig {
        self.client.config()
    }

    async fn put_inner(&self, locator: &ObjectLocator, content: Bytes, acl: Acl) -> StorageResult<OperationResult> {
        check_put_size(content.len(), self.config().max_put_size)?;
        let metadata = metadata_for_bytes(&locator.key, &content);
        let response = self
            .client
            .put_object(locator, content, &metadata.file_type, acl)
            .await?;

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
        let response = self.client.get_object(locator).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn delete_inner(&self, locator: &ObjectLocator) -> StorageResult<OperationResult> {
        if !self.client.exists(locator).await? {
            return Err(StorageError::not_found(format!("对象不存在: {}", locator)));
        }
        let response = self.client.delete_object(locator).await?;
        Ok(OperationResult::success("File deleted successfully.").with_request_id(request_id(&response)))
    }

    async fn move_inner(&self, from: &ObjectLocator, to: &ObjectLocator) -> StorageResult<OperationResult> {
        if from == to {
            return Err(StorageError::validation("source and target are the same object"));
        }
        if !self.client.exists(from).await? {
            return Err(StorageError::not_found(format!("对象不存在: {}", from)));
        }

        self.client.copy_object(from, to).await?;
        if !self.client.exists(to).await? {
            return Err(StorageError::unknown(format!("OSS复制后新文件不存在: {}", to)));
        }

        if let Err(e) = self.client.delete_object(from).await {
            // 回滚：删除新对象，源对象保持不变
            tracing::warn!("OSS移动删除源对象失败，回滚: {} - {}", from, e);
            if let Err(rollback) = self.client.delete_object(to).await {
                tracing::error!("OSS移动回滚失败: {} - {}", to, rollback);
            }
            return Err(e);
        }

        Ok(OperationResult::success("File moved successfully.").with_url(self.client.object_url(to)))
    }

    fn presign_inner(
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

        let mut form_fields = BTreeMap::new();
        let mut conditions = vec![
            json!({ "bucket": locator.bucket }),
            json!(["eq", "$key", locator.key]),
        ];
        if policy.insert_only() {
            conditions.push(json!(["eq", "$x-oss-forbid-overwrite", "true"]));
            form_fields.insert("x-oss-forbid-overwrite".to_string(), "true".to_string());
        }

        if let Some(template) = policy.return_template() {
            if self.config().callback_url.is_empty() {
                tracing::debug!("OSS 未配置回调地址，忽略返回体模板: {}", locator);
            } else {
                let url = self.client.object_url(locator);
                let rendered = template.render(|field| match field {
                    TemplateField::Url => Some(url.clone()),
                    other => callback_variable(other),
                });
                let callback_body = serde_json::to_string(&rendered)
                    .map_err(|e| StorageError::unknown(format!("序列化回调体失败: {}", e)))?;
                let callback = json!({
                    "callbackUrl": self.config().callback_url,
                    "callbackBody": callback_body,
                    "callbackBodyType": "application/json",
                });
                form_fields.insert("callback".to_string(), BASE64.encode(callback.to_string()));
            }
        }

        let expiration = policy.deadline().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let policy_json = json!({ "expiration": expiration, "conditions": conditions });
        let policy_base64 = BASE64.encode(policy_json.to_string());
        let signature = self.client.sign_policy(&policy_base64);

        form_fields.insert("key".to_string(), locator.key.clone());
        form_fields.insert("OSSAccessKeyId".to_string(), self.config().access_key_id.clone());
        form_fields.insert("policy".to_string(), policy_base64);
        form_fields.insert("Signature".to_string(), signature.clone());
        form_fields.insert("success_action_status".to_string(), "200".to_string());

        Ok(PresignedUpload {
            token: signature,
            upload_url: self.config().bucket_url(&locator.bucket),
            key: locator.key.clone(),
            method: "POST".to_string(),
            deadline: policy.deadline(),
            headers: BTreeMap::new(),
            form_fields,
        })
    }

    async fn set_lifecycle_inner(&self, locator: &ObjectLocator, days: u32) -> StorageResult<LifecycleJob> {
        if days == 0 {
            return Err(StorageError::validation("lifecycle days must be at least 1"));
        }
        if !self.client.exists(locator).await? {
            return Err(StorageError::not_found(format!("对象不存在: {}", locator)));
        }
        let days = days.to_string();
        self.client
            .put_tagging(locator, &[(EXPIRE_TAG, days.as_str())])
            .await?;
        Ok(LifecycleJob {
            status: Status::Success,
            persistent_job_id: format!("oss-lifecycle-{}", uuid::Uuid::new_v4()),
        })
    }
}

#[async_trait]
impl ObjectStorage for OssBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_native_rename: false,
            can_return_template: !self.config().callback_url.is_empty(),
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
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "presign", &locator.to_string()))
    }

    async fn presign_download(&self, locator: &ObjectLocator, expiry: Duration) -> Result<String, OperationResult> {
        check_expiry(expiry, Duration::from_secs(MAX_PRESIGN_SECS))
            .map(|_| self.client.presign_get(locator, expiry))
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "presign_download", &locator.to_string()))
    }

    async fn set_lifecycle(&self, locator: &ObjectLocator, days: u32) -> Result<LifecycleJob, OperationResult> {
        self.set_lifecycle_inner(locator, days)
            .await
            .map_err(|e| OperationResult::error(e).logged(BACKEND, "set_lifecycle", &locator.to_string()))
    }
}
