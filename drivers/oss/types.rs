//! OSS XML 结构与错误分类

use serde::Deserialize;

use crate::storage::{ErrorKind, PartRecord, StorageError, TemplateField};

/// 生命周期标签名，存储空间规则按此标签过滤
pub const EXPIRE_TAG: &str = "yaolist-expire-days";

/// `<Error>` 响应体
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OssErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateMultipartUploadResult {
    pub upload_id: String,
}

/// 按 OSS 错误码分类
pub fn classify_code(code: &str) -> Option<ErrorKind> {
    let kind = match code {
        "NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" => ErrorKind::NotFound,
        "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
        | "SecurityTokenExpired" | "InvalidSecurityToken" => ErrorKind::Auth,
        "FileAlreadyExists" | "PreconditionFailed" | "ObjectAlreadyExists" => ErrorKind::Conflict,
        "EntityTooLarge" | "QpsLimitExceeded" | "TooManyBuckets" => ErrorKind::Quota,
        "InvalidPart" | "InvalidPartOrder" | "EntityTooSmall" | "InvalidArgument"
        | "MalformedXML" | "InvalidObjectName" | "InvalidDigest" => ErrorKind::Validation,
        "RequestTimeout" | "InternalError" => ErrorKind::Network,
        _ => return None,
    };
    Some(kind)
}

pub fn error_from_response(status: u16, body: &str, request_id: Option<String>) -> StorageError {
    let parsed = if body.contains("<Error") {
        quick_xml::de::from_str::<OssErrorBody>(body).ok()
    } else {
        None
    };
    match parsed {
        Some(parsed) => {
            let kind = classify_code(&parsed.code).unwrap_or_else(|| ErrorKind::from_http_status(status));
            let message = if parsed.message.is_empty() {
                format!("HTTP {} {}", status, parsed.code)
            } else {
                parsed.message
            };
            let request_id = Some(parsed.request_id).filter(|id| !id.is_empty()).or(request_id);
            StorageError::new(kind, message)
                .with_request_id(request_id)
                .with_provider_code(Some(parsed.code))
        }
        None => StorageError::from_http_status(status, format!("HTTP {}", status))
            .with_request_id(request_id),
    }
}

/// CompleteMultipartUpload 请求体
pub fn complete_body(parts: &[PartRecord]) -> String {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for part in parts {
        xml.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part.part_number,
            quick_xml::escape::escape(part.etag.as_str())
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// PutObjectTagging 请求体
pub fn tagging_body(tags: &[(&str, &str)]) -> String {
    let mut xml = String::from("<Tagging><TagSet>");
    for (key, value) in tags {
        xml.push_str(&format!(
            "<Tag><Key>{}</Key><Value>{}</Value></Tag>",
            quick_xml::escape::escape(*key),
            quick_xml::escape::escape(*value)
        ));
    }
    xml.push_str("</TagSet></Tagging>");
    xml
}

/// 回调系统变量
pub fn callback_variable(field: TemplateField) -> Option<String> {
    let token = match field {
        TemplateField::FileSize => "${size}",
        TemplateField::ContentHash => "${etag}",
        TemplateField::FileName => "${x:filename}",
        TemplateField::FileType => "${mimeType}",
        TemplateField::Key => "${object}",
        TemplateField::Bucket => "${bucket}",
        TemplateField::Url => return None,
    };
    Some(token.to_string())
}
