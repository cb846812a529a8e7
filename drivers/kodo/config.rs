//! Kodo驱动配置

use serde::{Deserialize, Serialize};

/// Kodo配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KodoConfig {
    /// Access Key
    pub access_key: String,
    /// Secret Key
    pub secret_key: String,
    /// 存储空间名称
    pub bucket: String,
    /// 下载域名，未带协议时按 http 处理
    pub domain: String,
    /// 上传域名
    #[serde(default = "default_up_host")]
    pub up_host: String,
    /// 资源管理域名
    #[serde(default = "default_rs_host")]
    pub rs_host: String,
    /// 数据处理（pfop）域名
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// 默认分片大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 表单上传大小上限（字节）
    #[serde(default = "default_max_put_size")]
    pub max_put_size: u64,
    /// 并发上传分片数
    #[serde(default = "default_parallelism")]
    pub upload_parallelism: usize,
    /// 私有空间，下载链接需要签名
    #[serde(default = "default_true")]
    pub private: bool,
    /// 下载链接有效期（秒）
    #[serde(default = "default_download_expire")]
    pub download_expire_secs: u64,
    /// 单个请求超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_up_host() -> String {
    "https://up.qiniup.com".to_string()
}

fn default_rs_host() -> String {
    "https://rs.qiniuapi.com".to_string()
}

fn default_api_host() -> String {
    "https://api.qiniuapi.com".to_string()
}

fn default_chunk_size() -> u64 {
    4 * 1024 * 1024
}

fn default_max_put_size() -> u64 {
    1024 * 1024 * 1024
}

fn default_parallelism() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_download_expire() -> u64 {
    3600
}

fn default_timeout() -> u64 {
    300
}

/// 补全协议并去掉末尾斜杠
pub fn normalize_host(host: &str, default_scheme: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("{}://{}", default_scheme, host)
    }
}

impl KodoConfig {
    pub fn up_url(&self) -> String {
        normalize_host(&self.up_host, "https")
    }

    pub fn rs_url(&self) -> String {
        normalize_host(&self.rs_host, "https")
    }

    pub fn api_url(&self) -> String {
        normalize_host(&self.api_host, "https")
    }

    pub fn domain_url(&self) -> String {
        normalize_host(&self.domain, "http")
    }
}
