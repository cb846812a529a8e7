//! S3兼容对象存储后端
//!
//! - 基于 rust-s3 完成上传、下载、删除、分片上传
//! - 直传链接使用 SigV4 查询串签名，禁止覆盖时签入 If-None-Match
//! - 分片走预签名URL单独发送，失败只影响该分片，是否中止由会话决定

pub mod client;
pub mod config;
pub mod driver;
pub mod factory;
pub mod types;

pub use config::S3Config;
pub use driver::S3Backend;
pub use factory::S3BackendFactory;
