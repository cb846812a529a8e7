//! S3驱动配置

use serde::{Deserialize, Serialize};

/// S3配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// 存储桶名称
    pub bucket: String,
    /// S3端点地址，为空时使用 AWS 区域端点
    /// AWS: https://s3.{region}.amazonaws.com
    /// 天翼云ZOS / MinIO 等填写自己的地址
    #[serde(default)]
    pub endpoint: String,
    /// 区域
    #[serde(default = "default_region")]
    pub region: String,
    /// Access Key ID
    pub access_key_id: String,
    /// Secret Access Key
    pub secret_access_key: String,
    /// Session Token（用于临时凭证）
    #[serde(default)]
    pub session_token: String,
    /// 自定义域名（用于CDN加速）
    #[serde(default)]
    pub custom_host: String,
    /// 强制使用路径风格（而非虚拟主机风格）
    /// MinIO等需要设置为true
    #[serde(default)]
    pub force_path_style: bool,
    /// 默认分片大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 单次上传大小上限（字节）
    #[serde(default = "default_max_put_size")]
    pub max_put_size: u64,
    /// 并发上传分片数
    #[serde(default = "default_parallelism")]
    pub upload_parallelism: usize,
    /// 单个请求超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_chunk_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_put_size() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_parallelism() -> usize {
    2
}

fn default_timeout() -> u64 {
    300
}

impl S3Config {
    /// 实际使用的端点地址
    pub fn effective_endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            format!("https://s3.{}.amazonaws.com", self.region)
        } else if self.endpoint.contains("://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.endpoint.trim_end_matches('/'))
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: String::new(),
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
            custom_host: String::new(),
            force_path_style: false,
            chunk_size: default_chunk_size(),
            max_put_size: default_max_put_size(),
            upload_parallelism: default_parallelism(),
            timeout_secs: default_timeout(),
        }
    }
}
