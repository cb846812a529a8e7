use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{BackendInfo, ConfigItem, ObjectStorage};

pub type BackendBox = Arc<dyn ObjectStorage>;

/// Backend factory trait / 后端工厂 trait
///
/// Builds a backend (and its provider client) from secret key material and
/// endpoint configuration. 凭证在构建时解析，之后不可变。
pub trait BackendFactory: Send + Sync {
    /// Backend type name / 后端类型名称
    fn backend_type(&self) -> &'static str;

    /// Display name / 显示名称
    fn display_name(&self) -> &'static str;

    /// 创建后端实例
    fn create_backend(&self, config: Value) -> Result<Box<dyn ObjectStorage>>;

    /// Return backend specific config items / 返回后端特有配置项
    fn additional_items(&self) -> Vec<ConfigItem>;

    /// Generate complete backend info / 生成完整的后端信息
    fn backend_info(&self) -> BackendInfo {
        BackendInfo {
            backend_type: self.backend_type().to_string(),
            display_name: self.display_name().to_string(),
            additional: self.additional_items(),
        }
    }
}

/// Storage manager (owns all backend instances) / 存储管理器
#[derive(Clone)]
pub struct StorageManager {
    backends: Arc<RwLock<HashMap<String, BackendBox>>>,
    factories: Arc<RwLock<HashMap<String, Arc<dyn BackendFactory>>>>,
    /// Backend creation errors (id -> error message) / 后端创建错误
    backend_errors: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            backends: Arc::new(RwLock::new(HashMap::new())),
            factories: Arc::new(RwLock::new(HashMap::new())),
            backend_errors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register backend factory / 注册后端工厂
    pub async fn register_factory(&self, factory: Box<dyn BackendFactory>) -> Result<()> {
        let backend_type = factory.backend_type().to_string();
        let mut factories = self.factories.write().await;
        factories.insert(backend_type.clone(), Arc::from(factory));

        tracing::info!("Backend factory registered: {}", backend_type);
        Ok(())
    }

    /// Create backend instance, record error on failure / 创建后端实例
    pub async fn create_backend(&self, id: &str, backend_type: &str, config: Value) -> Result<String> {
        let factory = {
            let factories = self.factories.read().await;
            factories
                .get(backend_type)
                .cloned()
                .ok_or_else(|| anyhow!("Backend type not found: {}", backend_type))?
        };

        match factory.create_backend(config) {
            Ok(backend) => {
                let backend: BackendBox = Arc::from(backend);
                self.backends.write().await.insert(id.to_string(), backend);
                self.backend_errors.write().await.remove(id);
                tracing::info!("Backend created: {} ({})", id, backend_type);
                Ok(id.to_string())
            }
            Err(e) => {
                let error_msg = e.to_string();
                self.backend_errors
                    .write()
                    .await
                    .insert(id.to_string(), error_msg.clone());
                tracing::error!("Backend creation failed: {} ({}) - {}", id, backend_type, error_msg);
                Err(e)
            }
        }
    }

    /// Get backend error status / 获取后端错误状态
    pub async fn get_backend_error(&self, id: &str) -> Option<String> {
        self.backend_errors.read().await.get(id).cloned()
    }

    /// Get all backend error statuses / 获取所有后端错误状态
    pub async fn get_all_backend_errors(&self) -> HashMap<String, String> {
        self.backend_errors.read().await.clone()
    }

    /// Get backend instance / 获取后端实例
    pub async fn get_backend(&self, id: &str) -> Option<BackendBox> {
        self.backends.read().await.get(id).cloned()
    }

    /// Remove backend instance / 移除后端实例
    pub async fn remove_backend(&self, id: &str) -> Result<()> {
        self.backends
            .write()
            .await
            .remove(id)
            .ok_or_else(|| anyhow!("Backend not found: {}", id))?;

        tracing::info!("Backend removed: {}", id);
        Ok(())
    }

    /// List all backend ids / 列出所有后端
    pub async fn list_backends(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.backends.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// List all available backend types / 列出所有可用的后端类型
    pub async fn list_backend_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Info of one backend type / 获取后端类型信息
    pub async fn backend_info(&self, backend_type: &str) -> Option<BackendInfo> {
        self.factories
            .read()
            .await
            .get(backend_type)
            .map(|factory| factory.backend_info())
    }
}
