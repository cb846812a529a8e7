//! OSS后端工厂

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::storage::{BackendFactory, ConfigItem, ObjectStorage};
use super::config::OssConfig;
use super::driver::OssBackend;

/// OSS后端工厂
pub struct OssBackendFactory;

impl BackendFactory for OssBackendFactory {
    fn backend_type(&self) -> &'static str {
        "oss"
    }

    fn display_name(&self) -> &'static str {
        "阿里云 OSS"
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![
            ConfigItem::new("access_key_id", "string")
                .title("AccessKey ID")
                .required(),
            ConfigItem::new("access_key_secret", "password")
                .title("AccessKey Secret")
                .required(),
            ConfigItem::new("endpoint", "string")
                .title("地域节点")
                .help("如 oss-cn-hangzhou.aliyuncs.com")
                .required(),
            ConfigItem::new("bucket", "string")
                .title("存储空间")
                .required(),
            ConfigItem::new("path_style", "bool")
                .title("路径风格")
                .help("自建兼容服务需要开启")
                .default("false"),
            ConfigItem::new("use_https", "bool")
                .title("使用HTTPS")
                .default("true"),
            ConfigItem::new("callback_url", "string")
                .title("上传回调地址")
                .help("配置后直传可返回自定义返回体（可选）"),
            ConfigItem::new("chunk_size", "number")
                .title("分片大小")
                .default("10485760"),
            ConfigItem::new("max_put_size", "number")
                .title("单次上传上限")
                .default("5368709120"),
            ConfigItem::new("upload_parallelism", "number")
                .title("并发分片数")
                .default("2"),
            ConfigItem::new("timeout_secs", "number")
                .title("请求超时")
                .default("300"),
        ]
    }

    fn create_backend(&self, config: Value) -> Result<Box<dyn ObjectStorage>> {
        let config: OssConfig = serde_json::from_value(config)
            .map_err(|e| anyhow!("配置解析失败: {}", e))?;
        Ok(Box::new(OssBackend::new(config)?))
    }
}
