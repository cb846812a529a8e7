//! Presigned policy builder / 预签名策略构建
//!
//! A policy binds a locator, an absolute deadline, the insert-only flag and an
//! optional return-body template. Each backend turns it into its own token
//! format when minting (Kodo upload token, OSS POST policy, S3 query signature).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageError;
use super::ObjectLocator;

/// Value a provider resolves after the client upload / 上传完成后由存储商填充的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateField {
    /// Final object size / 文件大小
    FileSize,
    /// Provider-computed content hash / 存储商计算的哈希
    ContentHash,
    /// Original file name reported by the client / 原始文件名
    FileName,
    /// Detected content type / 文件类型
    FileType,
    /// Fully qualified object URL / 文件访问地址
    Url,
    Key,
    Bucket,
}

/// Mapping of result-variable name to provider-resolved field / 返回体模板
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnTemplate {
    entries: BTreeMap<String, TemplateField>,
}

impl ReturnTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, field: TemplateField) -> Self {
        self.entries.insert(name.to_string(), field);
        self
    }

    /// The usual upload receipt: size, hash, name, type and url / 常用返回体
    pub fn standard() -> Self {
        Self::new()
            .field("file_size", TemplateField::FileSize)
            .field("file_hash", TemplateField::ContentHash)
            .field("file_name", TemplateField::FileName)
            .field("file_type", TemplateField::FileType)
            .field("url", TemplateField::Url)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, TemplateField)> {
        self.entries.iter().map(|(name, field)| (name.as_str(), *field))
    }

    /// Render with provider substitution tokens; fields the provider cannot
    /// resolve (`None`) are left out / 使用存储商占位符渲染
    pub fn render<F>(&self, token_for: F) -> BTreeMap<String, String>
    where
        F: Fn(TemplateField) -> Option<String>,
    {
        self.entries
            .iter()
            .filter_map(|(name, field)| token_for(*field).map(|token| (name.clone(), token)))
            .collect()
    }
}

/// Scoped, time-limited access grant / 预签名策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedPolicy {
    locator: ObjectLocator,
    deadline: DateTime<Utc>,
    insert_only: bool,
    return_template: Option<ReturnTemplate>,
}

impl PresignedPolicy {
    pub fn builder(locator: ObjectLocator) -> PresignedPolicyBuilder {
        PresignedPolicyBuilder {
            locator,
            expiry: None,
            deadline: None,
            insert_only: false,
            return_template: None,
        }
    }

    pub fn locator(&self) -> &ObjectLocator {
        &self.locator
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Unix seconds of the deadline / 截止时间（Unix秒）
    pub fn deadline_unix(&self) -> i64 {
        self.deadline.timestamp()
    }

    /// Seconds left until the deadline, rounded up, at least 1 / 剩余有效秒数
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.deadline - now).num_milliseconds();
        ((millis + 999) / 1000).max(1) as u64
    }

    pub fn insert_only(&self) -> bool {
        self.insert_only
    }

    pub fn return_template(&self) -> Option<&ReturnTemplate> {
        self.return_template.as_ref().filter(|t| !t.is_empty())
    }
}

pub struct PresignedPolicyBuilder {
    locator: ObjectLocator,
    expiry: Option<Duration>,
    deadline: Option<DateTime<Utc>>,
    insert_only: bool,
    return_template: Option<ReturnTemplate>,
}

impl PresignedPolicyBuilder {
    /// Relative expiry, counted from `build()` / 相对有效期
    pub fn expires_in(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Absolute deadline / 绝对截止时间
    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn insert_only(mut self, insert_only: bool) -> Self {
        self.insert_only = insert_only;
        self
    }

    pub fn return_template(mut self, template: ReturnTemplate) -> Self {
        self.return_template = Some(template);
        self
    }

    pub fn build(self) -> Result<PresignedPolicy, StorageError> {
        if self.locator.bucket.is_empty() {
            return Err(StorageError::validation("policy requires a bucket"));
        }
        if self.locator.key.is_empty() {
            return Err(StorageError::validation("policy requires an object key"));
        }

        let now = Utc::now();
        let deadline = match (self.deadline, self.expiry) {
            (Some(deadline), _) => deadline,
            (None, Some(expiry)) => {
                let expiry = chrono::Duration::from_std(expiry)
                    .map_err(|_| StorageError::validation("expiry out of range"))?;
                now + expiry
            }
            (None, None) => return Err(StorageError::validation("policy requires an expiry")),
        };
        if deadline <= now {
            return Err(StorageError::validation("policy deadline is in the past"));
        }

        Ok(PresignedPolicy {
            locator: self.locator,
            deadline,
            insert_only: self.insert_only,
            return_template: self.return_template,
        })
    }
}
