use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::providers::{GoogleSheetsStorage, StorageBackend};
use super::sheets::{HttpSheetsConnector, SheetsConnector};
use crate::config::{load_config, ConfigLoad, ConfigOrigin, ConfigSource, StorageConfig, GOOGLE_SHEETS_KEY};
use crate::infrastructure::error::StorageError;
use crate::models::ReviewRecord;

type SharedBackend = Arc<RwLock<Box<dyn StorageBackend>>>;

/// 配置是如何得到的
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStatus {
    pub origin: ConfigOrigin,
    /// 加载失败时的原因；此时使用默认配置
    pub defaults_reason: Option<StorageError>,
}

impl ConfigStatus {
    pub fn using_defaults(&self) -> bool {
        self.defaults_reason.is_some()
    }
}

/// 存储管理器
pub struct StorageManager {
    config: StorageConfig,
    config_status: ConfigStatus,
    backends: BTreeMap<String, SharedBackend>,
}

impl StorageManager {
    /// 使用 HTTP 客户端创建
    pub fn new(config: StorageConfig) -> Self {
        Self::with_sheets_connector(config, Arc::new(HttpSheetsConnector))
    }

    /// 从任意配置来源创建；加载失败时使用默认配置并记录原因
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        Self::from_load(load_config(source), Arc::new(HttpSheetsConnector))
    }

    pub fn from_load(load: ConfigLoad, connector: Arc<dyn SheetsConnector>) -> Self {
        let status = ConfigStatus {
            origin: load.origin().clone(),
            defaults_reason: load.reason().cloned(),
        };
        Self::build(load.into_config(), status, connector)
    }

    /// 指定表格 API 连接器（测试与 dry-run 使用内存实现）
    pub fn with_sheets_connector(config: StorageConfig, connector: Arc<dyn SheetsConnector>) -> Self {
        let status = ConfigStatus {
            origin: ConfigOrigin::Direct,
            defaults_reason: None,
        };
        Self::build(config, status, connector)
    }

    fn build(config: StorageConfig, config_status: ConfigStatus, connector: Arc<dyn SheetsConnector>) -> Self {
        let mut backends: BTreeMap<String, SharedBackend> = BTreeMap::new();

        if let Some(sheets) = config.enabled_google_sheets() {
            info!("Initializing Google Sheets storage backend");
            let backend: Box<dyn StorageBackend> =
                Box::new(GoogleSheetsStorage::with_connector(sheets.clone(), connector));
            backends.insert(GOOGLE_SHEETS_KEY.to_string(), Arc::new(RwLock::new(backend)));
        }

        for provider in config.unsupported_enabled_providers() {
            warn!(provider = %provider, "storage provider is enabled but not supported");
        }

        Self {
            config,
            config_status,
            backends,
        }
    }

    /// 注册自定义后端，同名后端会被替换
    pub fn register_backend(&mut self, backend: Box<dyn StorageBackend>) {
        let name = backend.name().to_string();
        info!(backend = %name, "Registering storage backend");
        if self.backends.insert(name.clone(), Arc::new(RwLock::new(backend))).is_some() {
            debug!(backend = %name, "replaced existing backend");
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn config_status(&self) -> &ConfigStatus {
        &self.config_status
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn is_storage_enabled(&self) -> bool {
        self.config.is_storage_enabled()
    }

    /// 写入所有启用的后端，返回各后端结果的逻辑与
    pub async fn store_reviews(&self, records: &[ReviewRecord]) -> bool {
        if !self.is_storage_enabled() {
            info!("Storage is disabled, skipping export");
            return true;
        }
        if records.is_empty() {
            info!("No reviews to store");
            return true;
        }
        if self.backends.is_empty() {
            warn!("Storage is enabled but no backend could be initialized");
            return false;
        }

        let mut success = true;
        for (name, backend) in &self.backends {
            let mut backend = backend.write().await;

            if !backend.connect().await {
                error!(backend = %name, "Failed to connect to storage backend");
                backend.disconnect().await;
                success = false;
                continue;
            }

            let stored = backend.store_reviews(records).await;
            backend.disconnect().await;

            if stored {
                info!(backend = %name, count = records.len(), "Stored reviews");
            } else {
                error!(backend = %name, "Failed to store reviews");
                success = false;
            }
        }

        success
    }

    /// 各提供商的凭据检查结果；已配置但未初始化的提供商为 false
    pub async fn get_credentials_status(&self) -> BTreeMap<String, bool> {
        let mut status = BTreeMap::new();
        for name in self.config.configured_providers() {
            status.insert(name, false);
        }
        for (name, backend) in &self.backends {
            let backend = backend.read().await;
            status.insert(name.clone(), backend.has_valid_credentials());
        }
        status
    }

    /// 第一个能给出文档地址的后端
    pub async fn get_spreadsheet_url(&self) -> Option<String> {
        for backend in self.backends.values() {
            if let Some(url) = backend.read().await.spreadsheet_url() {
                return Some(url);
            }
        }
        None
    }

    /// 本次运行新建的文档 ID（用于写回配置）
    pub async fn created_spreadsheet_id(&self) -> Option<String> {
        let backend = self.backends.get(GOOGLE_SHEETS_KEY)?;
        let backend = backend.read().await;
        backend.created_document_id()
    }

    /// 在 Google Sheets 后端上重命名工作表
    pub async fn rename_tab(&self, from: &str, to: &str) -> bool {
        let Some(backend) = self.backends.get(GOOGLE_SHEETS_KEY) else {
            error!("Google Sheets storage is not enabled");
            return false;
        };

        let mut backend = backend.write().await;
        if !backend.connect().await {
            backend.disconnect().await;
            return false;
        }
        let renamed = backend.rename_tab(from, to).await;
        backend.disconnect().await;
        renamed
    }
}
