//! Normalized results returned by every backend / 统一的操作结果

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// File metadata attached to upload results / 文件元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    /// SHA-256 (hex) of the uploaded bytes, computed locally / 本地计算的SHA-256
    pub content_hash: String,
}

/// Support information, never required for control flow / 诊断信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_error_code: Option<String>,
}

/// Result envelope of every public operation / 操作结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            kind: None,
            message: message.into(),
            url: None,
            metadata: None,
            diagnostic: None,
        }
    }

    pub fn error(err: StorageError) -> Self {
        let diagnostic = if err.request_id.is_some() || err.provider_code.is_some() {
            Some(Diagnostic {
                request_id: err.request_id,
                provider_error_code: err.provider_code,
            })
        } else {
            None
        };
        Self {
            status: Status::Error,
            kind: Some(err.kind),
            message: format!("{}: {}", err.kind, err.message),
            url: None,
            metadata: None,
            diagnostic,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, metadata: FileMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        if let Some(id) = request_id.filter(|id| !id.is_empty()) {
            self.diagnostic.get_or_insert_with(Diagnostic::default).request_id = Some(id);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Error category, `None` on success / 错误类别
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    /// Emit a structured log line for the finished operation / 记录操作日志
    pub fn logged(self, backend: &str, op: &str, target: &str) -> Self {
        if self.is_success() {
            tracing::info!(backend, op, target, "{}", self.message);
        } else {
            let request_id = self.diagnostic.as_ref().and_then(|d| d.request_id.as_deref());
            tracing::warn!(backend, op, target, request_id, "{}", self.message);
        }
        self
    }

    /// Collapse a backend-internal result into the envelope / 转换内部结果
    pub fn from_result(result: Result<OperationResult, StorageError>) -> Self {
        result.unwrap_or_else(OperationResult::error)
    }
}

impl From<StorageError> for OperationResult {
    fn from(err: StorageError) -> Self {
        OperationResult::error(err)
    }
}

/// Grant for a direct client upload / 客户端直传凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    /// Single-use token (upload token, policy signature) / 上传凭证
    pub token: String,
    pub upload_url: String,
    pub key: String,
    /// HTTP method the client must use ("PUT" or "POST") / 上传方法
    pub method: String,
    pub deadline: DateTime<Utc>,
    /// Headers the client must send with a PUT upload / 必须携带的请求头
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Form fields for a POST form upload / 表单上传字段
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub form_fields: BTreeMap<String, String>,
}

/// Handle of an asynchronous provider-side lifecycle job / 生命周期任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleJob {
    pub status: Status,
    pub persistent_job_id: String,
}
