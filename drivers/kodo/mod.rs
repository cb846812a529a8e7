//! 七牛云 Kodo 对象存储后端
//!
//! - 表单上传 + 分片上传 v2（UpToken 鉴权）
//! - 资源管理（stat/delete/move）使用 QBox 管理凭证
//! - 直传凭证支持 insertOnly 与自定义 returnBody
//! - 过期删除通过 pfop 异步任务提交，返回 persistentId

pub mod auth;
pub mod client;
pub mod config;
pub mod driver;
pub mod factory;
pub mod types;

pub use config::KodoConfig;
pub use driver::KodoBackend;
pub use factory::KodoBackendFactory;
