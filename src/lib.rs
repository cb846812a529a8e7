pub mod config;
pub mod storage;

// Backend modules (point to project root drivers via path attribute) / 后端模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

/// Register all storage backends / 注册所有存储后端
pub async fn register_storage_backends(manager: &storage::StorageManager) -> anyhow::Result<()> {
    drivers::register_all(manager).await
}

/// Build every backend listed in the config; failures are logged and recorded
/// on the manager / 根据配置创建所有后端
pub async fn build_manager(config: &config::AppConfig) -> anyhow::Result<storage::StorageManager> {
    let manager = storage::StorageManager::new();
    register_storage_backends(&manager).await?;
    for entry in &config.backends {
        if let Err(e) = manager
            .create_backend(&entry.id, &entry.backend_type, entry.config.clone())
            .await
        {
            tracing::warn!("Skipping backend {}: {}", entry.id, e);
        }
    }
    Ok(manager)
}
