//! Kodo 接口数据结构与错误分类

use serde::{Deserialize, Serialize};

use crate::storage::{ErrorKind, StorageError, TemplateField};

/// 上传策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutPolicy {
    /// `bucket` 或 `bucket:key`
    pub scope: String,
    /// Unix 秒
    pub deadline: i64,
    /// 1 表示禁止覆盖
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_only: Option<u8>,
    /// 上传成功后返回给客户端的 JSON 模板
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_body: Option<String>,
}

/// 魔法变量
pub fn magic_variable(field: TemplateField) -> Option<String> {
    let token = match field {
        TemplateField::FileSize => "$(fsize)",
        TemplateField::ContentHash => "$(etag)",
        TemplateField::FileName => "$(fname)",
        TemplateField::FileType => "$(mimeType)",
        TemplateField::Key => "$(key)",
        TemplateField::Bucket => "$(bucket)",
        // 地址在签发时计算，不是魔法变量
        TemplateField::Url => return None,
    };
    Some(token.to_string())
}

/// 错误响应 `{"error": "..."}`
#[derive(Debug, Default, Deserialize)]
pub struct KodoErrorBody {
    #[serde(default)]
    pub error: String,
}

/// stat 响应
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatResponse {
    #[serde(default)]
    pub fsize: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub mime_type: String,
}

/// 初始化分片上传响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPartsResponse {
    pub upload_id: String,
    #[serde(default)]
    pub expire_at: i64,
}

/// 上传分片响应
#[derive(Debug, Deserialize)]
pub struct UploadPartResponse {
    pub etag: String,
    #[serde(default)]
    pub md5: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePart {
    pub etag: String,
    pub part_number: u32,
}

/// 完成分片上传请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePartsRequest {
    pub parts: Vec<CompletePart>,
    pub fname: String,
    pub mime_type: String,
}

/// pfop 响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PfopResponse {
    pub persistent_id: String,
}

/// 按 Kodo 状态码分类
///
/// 612 文件不存在，614 目标已存在，631 空间不存在
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        612 | 631 => ErrorKind::NotFound,
        614 => ErrorKind::Conflict,
        401 | 403 => ErrorKind::Auth,
        400 | 701 => ErrorKind::Validation,
        413 | 573 => ErrorKind::Quota,
        599 => ErrorKind::Network,
        other => ErrorKind::from_http_status(other),
    }
}

/// 由状态码、响应体和 X-Reqid 构造错误
pub fn error_from_response(status: u16, body: &str, request_id: Option<String>) -> StorageError {
    let message = serde_json::from_str::<KodoErrorBody>(body)
        .ok()
        .map(|b| b.error)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status));
    StorageError::new(classify_status(status), message)
        .with_request_id(request_id)
        .with_provider_code(Some(status.to_string()))
}
