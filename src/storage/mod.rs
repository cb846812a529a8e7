use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

pub mod error;
pub mod hash;
pub mod manager;
pub mod multipart;
pub mod policy;
pub mod result;

pub use error::{ErrorKind, StorageError, StorageResult};
pub use manager::{BackendBox, BackendFactory, StorageManager};
pub use multipart::{FileDigest, MultipartApi, MultipartSession, PartRecord, SessionState};
pub use policy::{PresignedPolicy, ReturnTemplate, TemplateField};
pub use result::{Diagnostic, FileMetadata, LifecycleJob, OperationResult, PresignedUpload, Status};

/// 进度回调类型 / Progress callback type
/// 参数: (已完成字节数, 总字节数) / Parameters: (completed_bytes, total_bytes)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Scoped readable stream of an object body / 对象内容读取流
/// The caller must drain or drop it / 调用方负责读完或关闭
pub type ObjectReader = Box<dyn AsyncRead + Unpin + Send>;

/// Configuration item definition / 配置项定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigItem {
    pub name: String,
    /// Display title (friendly name) / 显示标题
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl ConfigItem {
    pub fn new(name: &str, item_type: &str) -> Self {
        Self {
            name: name.to_string(),
            title: None,
            item_type: item_type.to_string(),
            default: None,
            required: false,
            help: None,
        }
    }

    pub fn title(mut self, val: &str) -> Self {
        self.title = Some(val.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, val: &str) -> Self {
        self.default = Some(val.to_string());
        self
    }

    pub fn help(mut self, val: &str) -> Self {
        self.help = Some(val.to_string());
        self
    }
}

/// Complete backend information / 后端完整信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub backend_type: String,
    pub display_name: String,
    /// Backend-specific configuration items / 后端特有配置项
    pub additional: Vec<ConfigItem>,
}

/// Backend capability declaration / 后端能力声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Rename is a single provider call (no copy+delete) / 支持原生重命名
    pub can_native_rename: bool,
    /// Presign honours a return-body template / 支持自定义返回体
    pub can_return_template: bool,
    /// Presign can forbid overwriting an existing key / 支持禁止覆盖
    pub can_insert_only: bool,
    /// Lifecycle job id is assigned by the provider / 生命周期任务ID由存储商分配
    pub provider_job_id: bool,
    /// Minimum size of every part but the last / 最小分片大小
    pub min_part_size: u64,
    /// Default chunk size for put_large / 默认分片大小
    pub default_chunk_size: u64,
    /// Single-request upload limit / 单次上传大小上限
    pub max_put_size: u64,
}

/// Object ACL / 对象权限
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    /// Inherit the bucket ACL / 继承存储桶权限
    #[default]
    Default,
    Private,
    PublicRead,
    PublicReadWrite,
}

impl Acl {
    /// Canned ACL header value, `None` for bucket default / 标准ACL取值
    pub fn as_header(&self) -> Option<&'static str> {
        match self {
            Acl::Default => None,
            Acl::Private => Some("private"),
            Acl::PublicRead => Some("public-read"),
            Acl::PublicReadWrite => Some("public-read-write"),
        }
    }
}

/// (bucket, key) pair addressing one object / 对象定位
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocator {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into().trim_start_matches('/').to_string(),
        }
    }

    pub fn file_name(&self) -> &str {
        hash::file_name_of(&self.key)
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bucket, self.key)
    }
}

/// Secret key material of one backend, immutable once built / 凭证
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_key: String,
    secret_key: String,
    endpoint: String,
    bucket: String,
}

impl Credential {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            endpoint: endpoint.into(),
            bucket: bucket.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Default bucket / 默认存储桶
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Options of a chunked upload / 分片上传参数
#[derive(Clone, Default)]
pub struct PutLargeOptions {
    /// Chunk size, backend default when `None` / 分片大小
    pub chunk_size: Option<u64>,
    pub acl: Acl,
    /// Parts in flight at once, backend default when `None` / 并发分片数
    pub parallelism: Option<usize>,
    pub progress: Option<ProgressCallback>,
}

impl PutLargeOptions {
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn acl(mut self, acl: Acl) -> Self {
        self.acl = acl;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Options of a presigned upload grant / 预签名上传参数
#[derive(Debug, Clone, Default)]
pub struct PresignOptions {
    /// Reject the upload when the key already exists / 禁止覆盖同名对象
    pub insert_only: bool,
    pub return_template: Option<ReturnTemplate>,
}

/// Object storage backend interface / 对象存储后端接口
///
/// Every operation returns a normalized result; provider errors never escape.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Backend name / 后端名称
    fn name(&self) -> &str;

    /// Backend capabilities / 后端能力
    fn capabilities(&self) -> Capability;

    /// Credential the backend was built with / 凭证
    fn credential(&self) -> &Credential;

    /// Locator in the default bucket / 默认存储桶中的定位
    fn locator(&self, key: &str) -> ObjectLocator {
        ObjectLocator::new(self.credential().bucket(), key)
    }

    /// Multipart wire protocol of this backend / 分片上传协议
    fn multipart(&self) -> Arc<dyn MultipartApi>;

    /// Single-shot upload / 单次上传
    async fn put(&self, locator: &ObjectLocator, content: Bytes, acl: Acl) -> OperationResult;

    /// Chunked upload of a local file / 本地文件分片上传
    async fn put_large(
        &self,
        locator: &ObjectLocator,
        local_path: &Path,
        options: PutLargeOptions,
    ) -> OperationResult;

    /// Stream object content / 读取对象
    async fn get(&self, locator: &ObjectLocator) -> Result<ObjectReader, OperationResult>;

    /// Delete object / 删除对象
    async fn delete(&self, locator: &ObjectLocator) -> OperationResult;

    /// Move (rename) object / 移动（重命名）对象
    async fn move_object(&self, from: &ObjectLocator, to: &ObjectLocator) -> OperationResult;

    /// Mint a direct-upload grant / 生成直传凭证
    async fn presign(
        &self,
        locator: &ObjectLocator,
        expiry: Duration,
        options: PresignOptions,
    ) -> Result<PresignedUpload, OperationResult>;

    /// Time-limited download URL / 生成限时下载链接
    async fn presign_download(
        &self,
        locator: &ObjectLocator,
        expiry: Duration,
    ) -> Result<String, OperationResult>;

    /// Schedule deletion after `days` / 设置过期删除
    async fn set_lifecycle(
        &self,
        locator: &ObjectLocator,
        days: u32,
    ) -> Result<LifecycleJob, OperationResult>;
}

/// Check an in-memory upload against the single-request limit / 单次上传大小检查
pub fn check_put_size(len: usize, max_put_size: u64) -> Result<(), StorageError> {
    if len as u64 > max_put_size {
        return Err(StorageError::quota(format!(
            "content of {} bytes exceeds the single-request limit of {} bytes, use put_large",
            len, max_put_size
        )));
    }
    Ok(())
}

/// Validate a presign expiry against the provider maximum / 有效期检查
pub fn check_expiry(expiry: Duration, max: Duration) -> Result<(), StorageError> {
    if expiry.is_zero() {
        return Err(StorageError::validation("expiry must be positive"));
    }
    if expiry > max {
        return Err(StorageError::validation(format!(
            "expiry of {}s exceeds the provider maximum of {}s",
            expiry.as_secs(),
            max.as_secs()
        )));
    }
    Ok(())
}

/// Percent-encode an object key, keeping `/` separators / 对象键URL编码
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
