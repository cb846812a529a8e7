//! OSS HTTP 客户端

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Method, Response};

use crate::storage::{
    encode_key, Acl, MultipartApi, ObjectLocator, PartRecord, StorageError, StorageResult,
};
use super::config::OssConfig;
use super::sign::{canonical_resource, gmt_date, hmac_base64, StringToSign};
use super::types::{complete_body, error_from_response, tagging_body, InitiateMultipartUploadResult};

/// OSS 最小分片 100KB
pub const MIN_PART_SIZE: u64 = 100 * 1024;

pub fn request_id(response: &Response) -> Option<String> {
    response
        .headers()
        .get("x-oss-request-id")
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

/// 一次 OSS 请求
pub struct OssRequest<'a> {
    pub method: Method,
    pub locator: &'a ObjectLocator,
    pub query: Vec<(&'static str, Option<String>)>,
    pub headers: BTreeMap<String, String>,
    pub content_type: String,
    /// base64(md5(body))，服务端据此校验内容
    pub content_md5: String,
    pub body: Option<Bytes>,
}

impl<'a> OssRequest<'a> {
    pub fn new(method: Method, locator: &'a ObjectLocator) -> Self {
        Self {
            method,
            locator,
            query: Vec::new(),
            headers: BTreeMap::new(),
            content_type: String::new(),
            content_md5: String::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: &'static str, value: Option<String>) -> Self {
        self.query.push((name, value));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn body(mut self, content_type: &str, body: Bytes) -> Self {
        self.content_type = content_type.to_string();
        if !body.is_empty() {
            self.content_md5 = BASE64.encode(md5::compute(&body).0);
        }
        self.body = Some(body);
        self
    }
}

/// OSS客户端
pub struct OssClient {
    config: OssConfig,
    http: Client,
}

impl OssClient {
    pub fn new(config: OssConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &OssConfig {
        &self.config
    }

    /// 对象地址
    pub fn object_url(&self, locator: &ObjectLocator) -> String {
        format!("{}/{}", self.config.bucket_url(&locator.bucket), encode_key(&locator.key))
    }

    /// 发送签名请求
    pub async fn send(&self, request: OssRequest<'_>) -> StorageResult<Response> {
        let date = gmt_date(Utc::now());
        let oss_headers: BTreeMap<String, String> = request
            .headers
            .iter()
            .filter(|(k, _)| k.starts_with("x-oss-"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let resource = canonical_resource(&request.locator.bucket, &request.locator.key, &request.query);
        let signature = StringToSign {
            verb: request.method.as_str(),
            content_md5: &request.content_md5,
            content_type: &request.content_type,
            date: &date,
            oss_headers: &oss_headers,
            resource: &resource,
        }
        .sign(&self.config.access_key_secret);

        let mut url = self.object_url(request.locator);
        if !request.query.is_empty() {
            let query = request
                .query
                .iter()
                .map(|(name, value)| match value {
                    Some(v) => format!("{}={}", name, urlencoding::encode(v)),
                    None => name.to_string(),
                })
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{}?{}", url, query);
        }

        tracing::debug!("OSS请求: {} {}", request.method, url);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header("Date", date)
            .header(
                "Authorization",
                format!("OSS {}:{}", self.config.access_key_id, signature),
            );
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.content_md5.is_empty() {
            builder = builder.header("Content-MD5", request.content_md5.as_str());
        }
        if !request.content_type.is_empty() {
            builder = builder.header("Content-Type", request.content_type.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        check(builder.send().await?).await
    }

    /// HEAD 对象，返回对象是否存在
    pub async fn exists(&self, locator: &ObjectLocator) -> StorageResult<bool> {
        match self.send(OssRequest::new(Method::HEAD, locator)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == crate::storage::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn put_object(
        &self,
        locator: &ObjectLocator,
        data: Bytes,
        content_type: &str,
        acl: Acl,
    ) -> StorageResult<Response> {
        let mut request = OssRequest::new(Method::PUT, locator).body(content_type, data);
        if let Some(value) = acl.as_header() {
            request = request.header("x-oss-object-acl", value);
        }
        self.send(request).await
    }

    pub async fn get_object(&self, locator: &ObjectLocator) -> StorageResult<Response> {
        self.send(OssRequest::new(Method::GET, locator)).await
    }

    /// OSS 删除不存在的对象也返回 204，调用方需要先 HEAD
    pub async fn delete_object(&self, locator: &ObjectLocator) -> StorageResult<Response> {
        self.send(OssRequest::new(Method::DELETE, locator)).await
    }

    /// 服务端复制，目标已存在时返回 FileAlreadyExists
    pub async fn copy_object(&self, from: &ObjectLocator, to: &ObjectLocator) -> StorageResult<Response> {
        let source = format!("/{}/{}", from.bucket, encode_key(&from.key));
        let request = OssRequest::new(Method::PUT, to)
            .header("x-oss-copy-source", source)
            .header("x-oss-forbid-overwrite", "true");
        self.send(request).await
    }

    pub async fn put_tagging(&self, locator: &ObjectLocator, tags: &[(&str, &str)]) -> StorageResult<Response> {
        let request = OssRequest::new(Method::PUT, locator)
            .query("tagging", None)
            .body("application/xml", Bytes::from(tagging_body(tags)));
        self.send(request).await
    }

    /// URL 签名的限时下载地址
    pub fn presign_get(&self, locator: &ObjectLocator, expires: Duration) -> String {
        let deadline = Utc::now().timestamp() + expires.as_secs() as i64;
        let deadline = deadline.to_string();
        let resource = canonical_resource(&locator.bucket, &locator.key, &[]);
        let signature = StringToSign {
            verb: "GET",
            content_md5: "",
            content_type: "",
            date: &deadline,
            oss_headers: &BTreeMap::new(),
            resource: &resource,
        }
        .sign(&self.config.access_key_secret);
        format!(
            "{}?OSSAccessKeyId={}&Expires={}&Signature={}",
            self.object_url(locator),
            urlencoding::encode(&self.config.access_key_id),
            deadline,
            urlencoding::encode(&signature)
        )
    }

    /// PostObject 策略签名
    pub fn sign_policy(&self, policy_base64: &str) -> String {
        hmac_base64(&self.config.access_key_secret, policy_base64)
    }
}

#[async_trait]
impl MultipartApi for OssClient {
    fn min_part_size(&self) -> u64 {
        MIN_PART_SIZE
    }

    async fn initiate(&self, locator: &ObjectLocator, content_type: &str, acl: Acl) -> StorageResult<String> {
        let mut request = OssRequest::new(Method::POST, locator)
            .query("uploads", None)
            .body(content_type, Bytes::new());
        if let Some(value) = acl.as_header() {
            request = request.header("x-oss-object-acl", value);
        }
        let body = self.send(request).await?.text().await?;
        let result: InitiateMultipartUploadResult = quick_xml::de::from_str(&body)
            .map_err(|e| StorageError::unknown(format!("解析InitiateMultipartUpload响应失败: {}", e)))?;
        Ok(result.upload_id)
    }

    async fn upload_part(
        &self,
        locator: &ObjectLocator,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        let request = OssRequest::new(Method::PUT, locator)
            .query("partNumber", Some(part_number.to_string()))
            .query("uploadId", Some(upload_id.to_string()))
            .body("application/octet-stream", data);
        let response = self.send(request).await?;
        response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| StorageError::unknown(format!("分片 {} 未返回ETag", part_number)))
    }

    async fn complete(
        &self,
        locator: &ObjectLocator,
        upload_id: &str,
        parts: &[PartRecord],
        _content_type: &str,
    ) -> StorageResult<()> {
        let request = OssRequest::new(Method::POST, locator)
            .query("uploadId", Some(upload_id.to_string()))
            .body("application/xml", Bytes::from(complete_body(parts)));
        self.send(request).await?;
        Ok(())
    }

    async fn abort(&self, locator: &ObjectLocator, upload_id: &str) -> StorageResult<()> {
        let request = OssRequest::new(Method::DELETE, locator).query("uploadId", Some(upload_id.to_string()));
        self.send(request).await?;
        Ok(())
    }
}
