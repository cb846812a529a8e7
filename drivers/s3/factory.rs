//! S3后端工厂

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::storage::{BackendFactory, ConfigItem, ObjectStorage};
use super::config::S3Config;
use super::driver::S3Backend;

/// S3后端工厂
pub struct S3BackendFactory;

impl BackendFactory for S3BackendFactory {
    fn backend_type(&self) -> &'static str {
        "s3"
    }

    fn display_name(&self) -> &'static str {
        "S3"
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![
            ConfigItem::new("bucket", "string")
                .title("存储桶名称")
                .help("S3存储桶名称")
                .required(),
            ConfigItem::new("endpoint", "string")
                .title("端点地址")
                .help("S3端点URL（天翼云ZOS、MinIO 等），为空时使用 AWS 区域端点"),
            ConfigItem::new("region", "string")
                .title("区域")
                .help("S3区域，如 us-east-1、cn-hangzhou")
                .default("us-east-1"),
            ConfigItem::new("access_key_id", "string")
                .title("Access Key ID")
                .required(),
            ConfigItem::new("secret_access_key", "password")
                .title("Secret Access Key")
                .required(),
            ConfigItem::new("session_token", "password")
                .title("Session Token")
                .help("临时凭证的会话令牌（可选）"),
            ConfigItem::new("custom_host", "string")
                .title("自定义域名")
                .help("CDN加速域名（可选）"),
            ConfigItem::new("force_path_style", "bool")
                .title("强制路径风格")
                .help("MinIO等需要开启此选项")
                .default("false"),
            ConfigItem::new("chunk_size", "number")
                .title("分片大小")
                .help("分片上传的默认分片大小（字节），不小于5MB")
                .default("10485760"),
            ConfigItem::new("max_put_size", "number")
                .title("单次上传上限")
                .help("超过此大小需使用分片上传（字节）")
                .default("5368709120"),
            ConfigItem::new("upload_parallelism", "number")
                .title("并发分片数")
                .default("2"),
            ConfigItem::new("timeout_secs", "number")
                .title("请求超时")
                .help("单个请求超时（秒）")
                .default("300"),
        ]
    }

    fn create_backend(&self, config: Value) -> Result<Box<dyn ObjectStorage>> {
        let config: S3Config = serde_json::from_value(config)
            .map_err(|e| anyhow!("配置解析失败: {}", e))?;
        if config.bucket.is_empty() {
            return Err(anyhow!("配置解析失败: bucket 不能为空"));
        }
        Ok(Box::new(S3Backend::new(config)?))
    }
}
