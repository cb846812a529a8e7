//! 阿里云 OSS 对象存储后端
//!
//! 使用 OSS 原生接口（Header 签名 V1），直传采用 PostObject 表单策略

pub mod client;
pub mod config;
pub mod driver;
pub mod factory;
pub mod sign;
pub mod types;

pub use config::OssConfig;
pub use driver::OssBackend;
pub use factory::OssBackendFactory;
