// Backend package / 存储后端包
pub mod kodo;
pub mod oss;
pub mod s3;

use crate::storage::StorageManager;

/// Register all backends to StorageManager / 注册所有存储后端
pub async fn register_all(manager: &StorageManager) -> anyhow::Result<()> {
    // Register S3 compatible backend (AWS, 天翼云ZOS, MinIO) / 注册S3兼容存储
    manager.register_factory(Box::new(s3::S3BackendFactory)).await?;
    // Register Qiniu Kodo backend / 注册七牛云Kodo
    manager.register_factory(Box::new(kodo::KodoBackendFactory)).await?;
    // Register Aliyun OSS backend / 注册阿里云OSS
    manager.register_factory(Box::new(oss::OssBackendFactory)).await?;
    Ok(())
}
