//! S3 错误响应解析与分类

use serde::Deserialize;

use crate::storage::{ErrorKind, StorageError};

/// `<Error>` 响应体
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: String,
}

impl S3ErrorBody {
    pub fn parse(body: &str) -> Option<Self> {
        if !body.contains("<Error") {
            return None;
        }
        quick_xml::de::from_str(body).ok()
    }
}

/// 按 S3 错误码分类，未知错误码返回 None
pub fn classify_code(code: &str) -> Option<ErrorKind> {
    let kind = match code {
        "NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" | "NotFound" => ErrorKind::NotFound,
        "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken"
        | "InvalidToken" | "AccountProblem" => ErrorKind::Auth,
        "PreconditionFailed" | "ConditionalRequestConflict" | "BucketAlreadyExists" => {
            ErrorKind::Conflict
        }
        "EntityTooLarge" | "QuotaExceeded" | "SlowDown" | "TooManyBuckets" => ErrorKind::Quota,
        "InvalidPart" | "InvalidPartOrder" | "EntityTooSmall" | "MalformedXML"
        | "InvalidArgument" | "InvalidRequest" | "KeyTooLongError" | "InvalidBucketName" => {
            ErrorKind::Validation
        }
        "RequestTimeout" | "InternalError" | "ServiceUnavailable" => ErrorKind::Network,
        _ => return None,
    };
    Some(kind)
}

/// 由状态码和响应体构造错误
pub fn error_from_response(status: u16, body: &str, request_id: Option<String>) -> StorageError {
    match S3ErrorBody::parse(body) {
        Some(parsed) => {
            let kind = classify_code(&parsed.code).unwrap_or_else(|| ErrorKind::from_http_status(status));
            let message = if parsed.message.is_empty() {
                format!("HTTP {} {}", status, parsed.code)
            } else {
                parsed.message.clone()
            };
            let request_id = if parsed.request_id.is_empty() {
                request_id
            } else {
                Some(parsed.request_id)
            };
            StorageError::new(kind, message)
                .with_request_id(request_id)
                .with_provider_code(Some(parsed.code))
        }
        None => StorageError::from_http_status(status, format!("HTTP {}", status))
            .with_request_id(request_id),
    }
}
