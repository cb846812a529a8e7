//! OSS驱动配置

use serde::{Deserialize, Serialize};

/// OSS配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OssConfig {
    /// AccessKey ID
    pub access_key_id: String,
    /// AccessKey Secret
    pub access_key_secret: String,
    /// 地域节点，如 oss-cn-hangzhou.aliyuncs.com
    pub endpoint: String,
    /// 存储空间名称
    pub bucket: String,
    /// 使用路径风格访问（自建兼容服务）
    #[serde(default)]
    pub path_style: bool,
    /// 端点未带协议时是否使用 https
    #[serde(default = "default_true")]
    pub use_https: bool,
    /// 上传回调地址，配置后直传支持自定义返回体
    #[serde(default)]
    pub callback_url: String,
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

fn default_true() -> bool {
    true
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

impl OssConfig {
    /// (scheme, host[:port])
    pub fn scheme_host(&self) -> (String, String) {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        match endpoint.split_once("://") {
            Some((scheme, host)) => (scheme.to_string(), host.to_string()),
            None => {
                let scheme = if self.use_https { "https" } else { "http" };
                (scheme.to_string(), endpoint.to_string())
            }
        }
    }

    /// 存储空间根地址（不带末尾斜杠）
    pub fn bucket_url(&self, bucket: &str) -> String {
        let (scheme, host) = self.scheme_host();
        if self.path_style {
            format!("{}://{}/{}", scheme, host, bucket)
        } else {
            format!("{}://{}.{}", scheme, bucket, host)
        }
    }
}
