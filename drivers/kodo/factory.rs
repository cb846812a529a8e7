//! Kodo后端工厂

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::storage::{BackendFactory, ConfigItem, ObjectStorage};
use super::config::KodoConfig;
use super::driver::KodoBackend;

/// Kodo后端工厂
pub struct KodoBackendFactory;

impl BackendFactory for KodoBackendFactory {
    fn backend_type(&self) -> &'static str {
        "kodo"
    }

    fn display_name(&self) -> &'static str {
        "七牛云 Kodo"
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![
            ConfigItem::new("access_key", "string")
                .title("Access Key")
                .required(),
            ConfigItem::new("secret_key", "password")
                .title("Secret Key")
                .required(),
            ConfigItem::new("bucket", "string")
                .title("存储空间")
                .required(),
            ConfigItem::new("domain", "string")
                .title("下载域名")
                .help("绑定到存储空间的域名，未带协议时使用 http")
                .required(),
            ConfigItem::new("up_host", "string")
                .title("上传域名")
                .help("按存储区域填写，如 https://up-z2.qiniup.com")
                .default("https://up.qiniup.com"),
            ConfigItem::new("rs_host", "string")
                .title("资源管理域名")
                .default("https://rs.qiniuapi.com"),
            ConfigItem::new("api_host", "string")
                .title("数据处理域名")
                .default("https://api.qiniuapi.com"),
            ConfigItem::new("chunk_size", "number")
                .title("分片大小")
                .help("分片上传的默认分片大小（字节），不小于1MB")
                .default("4194304"),
            ConfigItem::new("max_put_size", "number")
                .title("表单上传上限")
                .default("1073741824"),
            ConfigItem::new("upload_parallelism", "number")
                .title("并发分片数")
                .default("2"),
            ConfigItem::new("private", "bool")
                .title("私有空间")
                .help("开启后下载链接带签名")
                .default("true"),
            ConfigItem::new("download_expire_secs", "number")
                .title("下载链接有效期")
                .help("秒")
                .default("3600"),
            ConfigItem::new("timeout_secs", "number")
                .title("请求超时")
                .default("300"),
        ]
    }

    fn create_backend(&self, config: Value) -> Result<Box<dyn ObjectStorage>> {
        let config: KodoConfig = serde_json::from_value(config)
            .map_err(|e| anyhow!("配置解析失败: {}", e))?;
        Ok(Box::new(KodoBackend::new(config)?))
    }
}
