//! Kodo HTTP 客户端

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Response};

use crate::storage::{
    encode_key, Acl, MultipartApi, ObjectLocator, PartRecord, StorageError, StorageResult,
};
use super::auth::{encoded_entry, urlsafe_base64, Signer};
use super::config::KodoConfig;
use super::types::{
    error_from_response, CompletePart, CompletePartsRequest, InitPartsResponse, PfopResponse,
    PutPolicy, StatResponse, UploadPartResponse,
};

/// 分片上传 v2 最小分片 1MB
pub const MIN_PART_SIZE: u64 = 1024 * 1024;

/// 分片上传所用凭证的有效期
const MULTIPART_TOKEN_SECS: i64 = 24 * 3600;

/// 响应中的请求ID
pub fn request_id(response: &Response) -> Option<String> {
    response
        .headers()
        .get("X-Reqid")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// 非 2xx 响应转为错误
pub async fn check(response: Response) -> StorageResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let reqid = request_id(&response);
    let body = response.text().await.unwrap_or_default();
    Err(error_from_response(status, &body, reqid))
}

/// Kodo客户端
pub struct KodoClient {
    config: KodoConfig,
    signer: Signer,
    http: Client,
}

impl KodoClient {
    pub fn new(config: KodoConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let signer = Signer::new(&config.access_key, &config.secret_key);
        Ok(Self { config, signer, http })
    }

    pub fn config(&self) -> &KodoConfig {
        &self.config
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// 由策略生成上传凭证
    pub fn upload_token(&self, policy: &PutPolicy) -> StorageResult<String> {
        let json = serde_json::to_string(policy)
            .map_err(|e| StorageError::unknown(format!("序列化上传策略失败: {}", e)))?;
        Ok(self.signer.upload_token(&json))
    }

    /// 限定到单个对象、允许覆盖的上传凭证
    pub fn scoped_token(&self, locator: &ObjectLocator, ttl_secs: i64) -> StorageResult<String> {
        self.upload_token(&PutPolicy {
            scope: format!("{}:{}", locator.bucket, locator.key),
            deadline: Utc::now().timestamp() + ttl_secs,
            insert_only: None,
            return_body: None,
        })
    }

    /// 未签名的下载地址
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.domain_url(), encode_key(key))
    }

    /// 下载地址，私有空间时附带签名
    pub fn download_url(&self, key: &str, expires: Duration) -> String {
        let base = self.public_url(key);
        if self.config.private {
            let deadline = Utc::now().timestamp() + expires.as_secs() as i64;
            self.signer.private_download_url(&base, deadline)
        } else {
            base
        }
    }

    /// 表单上传，返回上传响应体和请求ID
    pub async fn form_upload(
        &self,
        token: &str,
        key: &str,
        data: Bytes,
        file_name: &str,
        content_type: &str,
    ) -> StorageResult<(serde_json::Value, Option<String>)> {
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new()
            .text("token", token.to_string())
            .text("key", key.to_string())
            .part("file", part);

        tracing::debug!("Kodo表单上传: key={}", key);
        let response = check(self.http.post(self.config.up_url()).multipart(form).send().await?).await?;
        let reqid = request_id(&response);
        let body: serde_json::Value = response.json().await?;
        Ok((body, reqid))
    }

    async fn manage(&self, method: reqwest::Method, path: &str) -> StorageResult<Response> {
        let url = format!("{}{}", self.config.rs_url(), path);
        let authorization = self.signer.qbox_token(path, None);
        let response = self
            .http
            .request(method, &url)
            .header("Authorization", authorization)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await?;
        check(response).await
    }

    /// 查询对象信息
    pub async fn stat(&self, locator: &ObjectLocator) -> StorageResult<StatResponse> {
        let path = format!("/stat/{}", encoded_entry(&locator.bucket, &locator.key));
        let response = self.manage(reqwest::Method::GET, &path).await?;
        Ok(response.json().await?)
    }

    /// 删除对象，不存在时返回 612
    pub async fn delete(&self, locator: &ObjectLocator) -> StorageResult<Option<String>> {
        let path = format!("/delete/{}", encoded_entry(&locator.bucket, &locator.key));
        let response = self.manage(reqwest::Method::POST, &path).await?;
        Ok(request_id(&response))
    }

    /// 原生移动，force=false 时目标已存在返回 614
    pub async fn move_object(
        &self,
        from: &ObjectLocator,
        to: &ObjectLocator,
        force: bool,
    ) -> StorageResult<Option<String>> {
        let path = format!(
            "/move/{}/{}/force/{}",
            encoded_entry(&from.bucket, &from.key),
            encoded_entry(&to.bucket, &to.key),
            force
        );
        let response = self.manage(reqwest::Method::POST, &path).await?;
        Ok(request_id(&response))
    }

    /// 提交持久化处理任务，返回 persistentId
    pub async fn pfop(&self, locator: &ObjectLocator, fops: &str) -> StorageResult<String> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("bucket", &locator.bucket)
            .append_pair("key", &locator.key)
            .append_pair("fops", fops)
            .finish();
        let path = "/pfop/";
        let authorization = self.signer.qbox_token(path, Some(body.as_bytes()));
        let response = self
            .http
            .post(format!("{}{}", self.config.api_url(), path))
            .header("Authorization", authorization)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let response: PfopResponse = check(response).await?.json().await?;
        if response.persistent_id.is_empty() {
            return Err(StorageError::unknown("pfop 未返回 persistentId"));
        }
        Ok(response.persistent_id)
    }

    /// GET 下载地址
    pub async fn open(&self, url: &str) -> StorageResult<Response> {
        check(self.http.get(url).send().await?).await
    }

    fn uploads_url(&self, locator: &ObjectLocator) -> String {
        let object = if locator.key.is_empty() {
            "~".to_string()
        } else {
            urlsafe_base64(locator.key.as_bytes())
        };
        format!(
            "{}/buckets/{}/objects/{}/uploads",
            self.config.up_url(),
            locator.bucket,
            object
        )
    }

    fn up_token_header(&self, locator: &ObjectLocator) -> StorageResult<String> {
        Ok(format!("UpToken {}", self.scoped_token(locator, MULTIPART_TOKEN_SECS)?))
    }
}

#[async_trait]
impl MultipartApi for KodoClient {
    fn min_part_size(&self) -> u64 {
        MIN_PART_SIZE
    }

    async fn initiate(&self, locator: &ObjectLocator, _content_type: &str, acl: Acl) -> StorageResult<String> {
        if acl != Acl::Default {
            tracing::debug!("Kodo 不支持对象级ACL，忽略: {:?}", acl);
        }
        let response = self
            .http
            .post(self.uploads_url(locator))
            .header("Authorization", self.up_token_header(locator)?)
            .send()
            .await?;
        let init: InitPartsResponse = check(response).await?.json().await?;
        Ok(init.upload_id)
    }

    async fn upload_part(
        &self,
        locator: &ObjectLocator,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        let url = format!("{}/{}/{}", self.uploads_url(locator), upload_id, part_number);
        let response = self
            .http
            .put(url)
            .header("Authorization", self.up_token_header(locator)?)
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await?;
        let part: UploadPartResponse = check(response).await?.json().await?;
        Ok(part.etag)
    }

    async fn complete(
        &self,
        locator: &ObjectLocator,
        upload_id: &str,
        parts: &[PartRecord],
        content_type: &str,
    ) -> StorageResult<()> {
        let request = CompletePartsRequest {
            parts: parts
                .iter()
                .map(|p| CompletePart {
                    etag: p.etag.clone(),
                    part_number: p.part_number,
                })
                .collect(),
            fname: locator.file_name().to_string(),
            mime_type: content_type.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/{}", self.uploads_url(locator), upload_id))
            .header("Authorization", self.up_token_header(locator)?)
            .json(&request)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn abort(&self, locator: &ObjectLocator, upload_id: &str) -> StorageResult<()> {
        let response = self
            .http
            .delete(format!("{}/{}", self.uploads_url(locator), upload_id))
            .header("Authorization", self.up_token_header(locator)?)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
