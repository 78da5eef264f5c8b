use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

pub mod loader;

pub use loader::{
    load_config, persist_spreadsheet_id, write_default_config, ConfigLoad, ConfigOrigin, ConfigSource,
    FileConfigSource, MappingConfigSource, ProviderConfigSource, StorageConfigProvider,
};

/// Google Sheets 提供商在配置中的键名
pub const GOOGLE_SHEETS_KEY: &str = "google_sheets";

/// 存储配置（一次运行内不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 全局开关
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_sheets: Option<GoogleSheetsConfig>,

    /// 尚未支持的提供商配置，原样保留
    #[serde(flatten)]
    pub other_providers: BTreeMap<String, serde_json::Value>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            google_sheets: None,
            other_providers: BTreeMap::new(),
        }
    }
}

impl StorageConfig {
    /// `init-config` 写出的模板配置
    pub fn template() -> Self {
        Self {
            enabled: false,
            google_sheets: Some(GoogleSheetsConfig::default()),
            other_providers: BTreeMap::new(),
        }
    }

    /// 全局开关打开且至少一个提供商启用
    pub fn is_storage_enabled(&self) -> bool {
        self.enabled && self.any_provider_enabled()
    }

    fn any_provider_enabled(&self) -> bool {
        self.google_sheets.as_ref().map(|g| g.enabled).unwrap_or(false)
            || !self.unsupported_enabled_providers().is_empty()
    }

    /// 启用的已知提供商
    pub fn enabled_google_sheets(&self) -> Option<&GoogleSheetsConfig> {
        self.google_sheets.as_ref().filter(|g| g.enabled)
    }

    /// 配置中标记为启用但本程序不认识的提供商
    pub fn unsupported_enabled_providers(&self) -> Vec<String> {
        self.other_providers
            .iter()
            .filter(|(_, value)| {
                value
                    .get("enabled")
                    .and_then(|enabled| enabled.as_bool())
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// 所有已配置的提供商名称
    pub fn configured_providers(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.google_sheets.is_some() {
            names.push(GOOGLE_SHEETS_KEY.to_string());
        }
        names.extend(
            self.other_providers
                .iter()
                .filter(|(_, value)| value.is_object())
                .map(|(name, _)| name.clone()),
        );
        names
    }

    /// 应用环境变量覆盖（GOOGLE_CREDENTIALS_PATH / GOOGLE_SPREADSHEET_ID）
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(sheets) = self.google_sheets.as_mut() {
            if let Ok(path) = env::var("GOOGLE_CREDENTIALS_PATH") {
                if !path.trim().is_empty() {
                    sheets.credentials_path = PathBuf::from(path);
                }
            }
            if let Ok(id) = env::var("GOOGLE_SPREADSHEET_ID") {
                if !id.trim().is_empty() {
                    sheets.spreadsheet_id = id;
                }
            }
        }
        self
    }
}

/// Google Sheets 提供商配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSheetsConfig {
    pub enabled: bool,
    pub credentials_path: PathBuf,
    pub spreadsheet_id: String,
    pub create_if_missing: bool,
    #[serde(alias = "default_sheet_name")]
    pub sheet_name: String,
    pub spreadsheet_title: String,
    pub columns: Vec<Column>,
    pub format_by_sentiment: bool,
    pub create_dashboard: bool,
    pub incremental_updates: bool,
    pub error_handling: ErrorHandlingConfig,
    pub dashboard_options: DashboardOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

impl Default for GoogleSheetsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credentials_path: PathBuf::from("credentials/google_sheets_credentials.json"),
            spreadsheet_id: String::new(),
            create_if_missing: true,
            sheet_name: "IK_Reviews".to_string(),
            spreadsheet_title: "Interview Kickstart Reviews".to_string(),
            columns: Column::default_order(),
            format_by_sentiment: true,
            create_dashboard: true,
            incremental_updates: true,
            error_handling: ErrorHandlingConfig::default(),
            dashboard_options: DashboardOptions::default(),
            api_base_url: None,
        }
    }
}

impl GoogleSheetsConfig {
    /// 空列配置回退到默认列顺序
    pub fn effective_columns(&self) -> Vec<Column> {
        if self.columns.is_empty() {
            Column::default_order()
        } else {
            self.columns.clone()
        }
    }
}

/// 错误处理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    pub max_retries: u32,
    /// 秒
    pub retry_delay: f64,
    pub log_errors: bool,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: 5.0,
            log_errors: true,
        }
    }
}

/// 仪表板选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardOptions {
    pub show_platform_distribution: bool,
    pub show_sentiment_distribution: bool,
    pub show_score_histogram: bool,
    pub add_color_legend: bool,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            show_platform_distribution: true,
            show_sentiment_distribution: true,
            show_score_histogram: true,
            add_color_legend: true,
        }
    }
}

/// 导出列
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Column {
    SerialNumber,
    Platform,
    ReviewDate,
    Rating,
    Content,
    ReviewerName,
    SentimentScore,
    SentimentCategory,
    Extra(String),
}

impl Column {
    pub fn default_order() -> Vec<Column> {
        vec![
            Column::SerialNumber,
            Column::Platform,
            Column::ReviewDate,
            Column::Rating,
            Column::Content,
            Column::ReviewerName,
            Column::SentimentScore,
            Column::SentimentCategory,
        ]
    }

    /// 配置中使用的键
    pub fn key(&self) -> &str {
        match self {
            Column::SerialNumber => "s_no",
            Column::Platform => "platform",
            Column::ReviewDate => "review_date",
            Column::Rating => "rating",
            Column::Content => "content",
            Column::ReviewerName => "reviewer_name",
            Column::SentimentScore => "sentiment_score",
            Column::SentimentCategory => "sentiment_category",
            Column::Extra(key) => key,
        }
    }

    /// 表头文字
    pub fn header(&self) -> String {
        match self {
            Column::SerialNumber => "S.NO".to_string(),
            Column::Platform => "PLATFORM".to_string(),
            Column::ReviewDate => "REVIEW DATE".to_string(),
            Column::Rating => "RATING".to_string(),
            Column::Content => "REVIEW CONTENT".to_string(),
            Column::ReviewerName => "REVIEWER NAME".to_string(),
            Column::SentimentScore => "SENTIMENT SCORE".to_string(),
            Column::SentimentCategory => "SENTIMENT CATEGORY".to_string(),
            Column::Extra(key) => key.to_uppercase(),
        }
    }
}

impl From<String> for Column {
    fn from(key: String) -> Self {
        match key.trim() {
            "s_no" | "serial_number" => Column::SerialNumber,
            "platform" => Column::Platform,
            "review_date" => Column::ReviewDate,
            "rating" => Column::Rating,
            "content" | "review_content" => Column::Content,
            "reviewer_name" => Column::ReviewerName,
            "sentiment_score" => Column::SentimentScore,
            "sentiment_category" => Column::SentimentCategory,
            other => Column::Extra(other.to_string()),
        }
    }
}

impl From<Column> for String {
    fn from(column: Column) -> Self {
        column.key().to_string()
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
