//! Provider-independent error taxonomy / 与存储商无关的错误分类
//!
//! Every provider failure is classified into an [`ErrorKind`] before it leaves a
//! backend. Provider-specific error types never cross the backend boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error category / 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transport failure or timeout / 网络错误或超时
    #[serde(rename = "NetworkError")]
    Network,
    /// Credential rejected, signature invalid / 鉴权失败
    #[serde(rename = "AuthError")]
    Auth,
    /// Object or bucket absent / 对象或存储桶不存在
    #[serde(rename = "NotFoundError")]
    NotFound,
    /// insertOnly violated, object exists / 对象已存在
    #[serde(rename = "ConflictError")]
    Conflict,
    /// Malformed part list, missing required field / 参数校验失败
    #[serde(rename = "ValidationError")]
    Validation,
    /// Provider-side limit / 存储商限制
    #[serde(rename = "QuotaError")]
    Quota,
    /// Operation attempted on a finished multipart session / 分片会话状态错误
    #[serde(rename = "InvalidStateError")]
    InvalidState,
    /// Unclassified provider response / 未分类错误
    #[serde(rename = "UnknownError")]
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "NetworkError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Quota => "QuotaError",
            ErrorKind::InvalidState => "InvalidStateError",
            ErrorKind::Unknown => "UnknownError",
        }
    }

    /// Classify a bare HTTP status / 根据HTTP状态码分类
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::Auth,
            404 => ErrorKind::NotFound,
            409 | 412 => ErrorKind::Conflict,
            400 | 411 => ErrorKind::Validation,
            413 | 429 | 507 => ErrorKind::Quota,
            408 | 502 | 503 | 504 => ErrorKind::Network,
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage error carried inside a backend / 后端内部错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StorageError {
    pub kind: ErrorKind,
    pub message: String,
    /// Provider request id, if the response carried one / 请求ID
    pub request_id: Option<String>,
    /// Provider native error code / 存储商原始错误码
    pub provider_code: Option<String>,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id: None,
            provider_code: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quota, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Classify by HTTP status / 按HTTP状态码构造
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_http_status(status), message)
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id.filter(|id| !id.is_empty());
        self
    }

    pub fn with_provider_code(mut self, code: Option<String>) -> Self {
        self.provider_code = code.filter(|c| !c.is_empty());
        self
    }

    /// Local file errors (the file being uploaded) / 本地文件读取错误
    pub fn local_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                Self::validation(format!("local file not found: {}", path.display()))
            }
            _ => Self::unknown(format!("failed to read {}: {}", path.display(), err)),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return StorageError::unknown(format!("unexpected response body: {}", err));
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return StorageError::network(err.to_string());
        }
        match err.status() {
            Some(status) => StorageError::from_http_status(status.as_u16(), err.to_string()),
            None => StorageError::network(err.to_string()),
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
