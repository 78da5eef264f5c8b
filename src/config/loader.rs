use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::{StorageConfig, GOOGLE_SHEETS_KEY};
use crate::infrastructure::error::StorageError;

/// 配置来源：文件、内存映射或提供配置访问器的对象
pub trait ConfigSource {
    fn load(&self) -> Result<StorageConfig, StorageError>;

    fn origin(&self) -> ConfigOrigin;
}

/// 配置的实际来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// 调用方直接传入的配置值
    Direct,
    File(PathBuf),
    Mapping,
    Provider(String),
}

/// 配置加载结果
#[derive(Debug, Clone)]
pub enum ConfigLoad {
    Loaded {
        config: StorageConfig,
        origin: ConfigOrigin,
    },
    /// 加载失败，使用默认配置（存储关闭）
    Defaults {
        config: StorageConfig,
        origin: ConfigOrigin,
        reason: StorageError,
    },
}

impl ConfigLoad {
    pub fn config(&self) -> &StorageConfig {
        match self {
            ConfigLoad::Loaded { config, .. } | ConfigLoad::Defaults { config, .. } => config,
        }
    }

    pub fn into_config(self) -> StorageConfig {
        match self {
            ConfigLoad::Loaded { config, .. } | ConfigLoad::Defaults { config, .. } => config,
        }
    }

    pub fn origin(&self) -> &ConfigOrigin {
        match self {
            ConfigLoad::Loaded { origin, .. } | ConfigLoad::Defaults { origin, .. } => origin,
        }
    }

    /// 在保留来源信息的前提下调整配置（例如应用环境变量覆盖）
    pub fn map_config(self, f: impl FnOnce(StorageConfig) -> StorageConfig) -> Self {
        match self {
            ConfigLoad::Loaded { config, origin } => ConfigLoad::Loaded {
                config: f(config),
                origin,
            },
            ConfigLoad::Defaults { config, origin, reason } => ConfigLoad::Defaults {
                config: f(config),
                origin,
                reason,
            },
        }
    }

    pub fn is_defaults(&self) -> bool {
        matches!(self, ConfigLoad::Defaults { .. })
    }

    pub fn reason(&self) -> Option<&StorageError> {
        match self {
            ConfigLoad::Defaults { reason, .. } => Some(reason),
            ConfigLoad::Loaded { .. } => None,
        }
    }
}

/// 从任意来源加载配置，失败时返回带原因的默认配置
pub fn load_config(source: &dyn ConfigSource) -> ConfigLoad {
    let origin = source.origin();
    match source.load() {
        Ok(config) => {
            info!("Loaded storage configuration from {:?}", origin);
            ConfigLoad::Loaded { config, origin }
        }
        Err(reason) => {
            error!("Failed to load storage config from {:?}: {}. Using defaults.", origin, reason);
            ConfigLoad::Defaults {
                config: StorageConfig::default(),
                origin,
                reason,
            }
        }
    }
}

/// 文件配置来源，按扩展名选择 JSON 或 TOML
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_toml(&self) -> bool {
        self.path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false)
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<StorageConfig, StorageError> {
        let content = fs::read_to_string(&self.path).map_err(|e| StorageError::FileSystem {
            message: format!("cannot read storage configuration: {}", e),
            path: Some(self.path.display().to_string()),
        })?;

        let config = if self.is_toml() {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };

        Ok(config)
    }

    fn origin(&self) -> ConfigOrigin {
        ConfigOrigin::File(self.path.clone())
    }
}

/// 内存中的 JSON 映射
#[derive(Debug, Clone)]
pub struct MappingConfigSource {
    mapping: serde_json::Value,
}

impl MappingConfigSource {
    pub fn new(mapping: serde_json::Value) -> Self {
        Self { mapping }
    }
}

impl ConfigSource for MappingConfigSource {
    fn load(&self) -> Result<StorageConfig, StorageError> {
        if !self.mapping.is_object() {
            return Err(StorageError::config("storage configuration must be a JSON object"));
        }
        Ok(serde_json::from_value(self.mapping.clone())?)
    }

    fn origin(&self) -> ConfigOrigin {
        ConfigOrigin::Mapping
    }
}

/// 暴露 `storage_config()` 访问器的对象
pub trait StorageConfigProvider {
    fn storage_config(&self) -> serde_json::Value;

    fn provider_name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

pub struct ProviderConfigSource<'a, P: StorageConfigProvider + ?Sized> {
    provider: &'a P,
}

impl<'a, P: StorageConfigProvider + ?Sized> ProviderConfigSource<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }
}

impl<P: StorageConfigProvider + ?Sized> ConfigSource for ProviderConfigSource<'_, P> {
    fn load(&self) -> Result<StorageConfig, StorageError> {
        MappingConfigSource::new(self.provider.storage_config()).load()
    }

    fn origin(&self) -> ConfigOrigin {
        ConfigOrigin::Provider(self.provider.provider_name())
    }
}

/// 写出模板配置文件
pub fn write_default_config(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let template = StorageConfig::template();
    let content = if path.extension().map(|e| e.eq_ignore_ascii_case("toml")).unwrap_or(false) {
        toml::to_string_pretty(&template).map_err(|e| StorageError::Parsing {
            message: e.to_string(),
            content_type: "TOML".to_string(),
        })?
    } else {
        serde_json::to_string_pretty(&template)?
    };

    fs::write(path, content)?;
    info!("Saved storage configuration to {}", path.display());
    Ok(())
}

/// 将新建表格的 ID 写回 JSON 配置文件，保留其它键
pub fn persist_spreadsheet_id(path: &Path, spreadsheet_id: &str) -> Result<(), StorageError> {
    let content = fs::read_to_string(path)?;
    let mut document: serde_json::Value = serde_json::from_str(&content)?;

    let root = document
        .as_object_mut()
        .ok_or_else(|| StorageError::config("storage configuration must be a JSON object"))?;
    let sheets = root
        .entry(GOOGLE_SHEETS_KEY)
        .or_insert_with(|| serde_json::json!({}));
    match sheets.as_object_mut() {
        Some(sheets) => {
            sheets.insert(
                "spreadsheet_id".to_string(),
                serde_json::Value::String(spreadsheet_id.to_string()),
            );
        }
        None => {
            warn!("'{}' in {} is not an object, not persisting spreadsheet id", GOOGLE_SHEETS_KEY, path.display());
            return Err(StorageError::config(format!("'{}' must be an object", GOOGLE_SHEETS_KEY)));
        }
    }

    fs::write(path, serde_json::to_string_pretty(&document)?)?;
    info!("Updated spreadsheet ID in {}", path.display());
    Ok(())
}
