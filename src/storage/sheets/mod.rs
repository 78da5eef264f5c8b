//! Spreadsheet API seam: the operations the Google Sheets backend needs, with
//! an HTTP client for the real service and an in-memory document for dry runs.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::GoogleSheetsConfig;
use crate::infrastructure::error::StorageError;

pub mod a1;
pub mod auth;
pub mod http;
pub mod memory;

pub use auth::{AuthorizedUserKey, Credentials, ServiceAccountKey, TokenProvider};
pub use http::{HttpSheetsClient, HttpSheetsConnector, DEFAULT_API_BASE_URL};
pub use memory::{ApiCall, InMemoryConnector, InMemorySheets, SheetsOperation};

/// 写入值时的解析方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueInputOption {
    Raw,
}

impl ValueInputOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueInputOption::Raw => "RAW",
        }
    }
}

/// 工作表属性
#[derive(Debug, Clone, PartialEq)]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
    pub index: usize,
    pub conditional_format_count: usize,
    pub chart_ids: Vec<i64>,
}

/// 表格元数据
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadsheetMeta {
    pub spreadsheet_id: String,
    pub title: String,
    pub sheets: Vec<SheetProperties>,
}

/// 工作表名按不区分大小写判重，与 Google Sheets 一致
pub fn same_title(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl SpreadsheetMeta {
    pub fn find_sheet(&self, title: &str) -> Option<&SheetProperties> {
        self.sheets.iter().find(|sheet| same_title(&sheet.title, title))
    }

    /// 从 API 的 Spreadsheet 资源解析
    pub fn from_resource(resource: &Value) -> Result<Self, StorageError> {
        let spreadsheet_id = resource
            .get("spreadsheetId")
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::Parsing {
                message: "spreadsheet resource has no spreadsheetId".to_string(),
                content_type: "JSON".to_string(),
            })?
            .to_string();
        let title = resource
            .pointer("/properties/title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let sheets = resource
            .get("sheets")
            .and_then(Value::as_array)
            .map(|sheets| sheets.iter().filter_map(parse_sheet).collect())
            .unwrap_or_default();

        Ok(Self {
            spreadsheet_id,
            title,
            sheets,
        })
    }
}

fn parse_sheet(sheet: &Value) -> Option<SheetProperties> {
    let properties = sheet.get("properties")?;
    Some(SheetProperties {
        sheet_id: properties.get("sheetId").and_then(Value::as_i64).unwrap_or(0),
        title: properties.get("title")?.as_str()?.to_string(),
        index: properties.get("index").and_then(Value::as_u64).unwrap_or(0) as usize,
        conditional_format_count: sheet
            .get("conditionalFormats")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0),
        chart_ids: sheet
            .get("charts")
            .and_then(Value::as_array)
            .map(|charts| {
                charts
                    .iter()
                    .filter_map(|chart| chart.get("chartId").and_then(Value::as_i64))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// batchUpdate 的响应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchUpdateReply {
    pub replies: Vec<Value>,
}

impl BatchUpdateReply {
    /// 第一个 addSheet 回复中的 sheetId
    pub fn added_sheet_id(&self) -> Option<i64> {
        self.replies
            .iter()
            .find_map(|reply| reply.pointer("/addSheet/properties/sheetId").and_then(Value::as_i64))
    }
}

/// Google Sheets v4 的最小操作集
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn create_spreadsheet(&self, title: &str, first_sheet: &str) -> Result<SpreadsheetMeta, StorageError>;

    async fn get_spreadsheet(&self, spreadsheet_id: &str) -> Result<SpreadsheetMeta, StorageError>;

    /// 返回格式化后的单元格文本；末尾空行与空单元格被省略
    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, StorageError>;

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<Value>>,
        option: ValueInputOption,
    ) -> Result<(), StorageError>;

    async fn clear_values(&self, spreadsheet_id: &str, range: &str) -> Result<(), StorageError>;

    async fn batch_update(&self, spreadsheet_id: &str, requests: Vec<Value>) -> Result<BatchUpdateReply, StorageError>;
}

/// 根据配置建立 API 会话
#[async_trait]
pub trait SheetsConnector: Send + Sync {
    async fn connect(&self, config: &GoogleSheetsConfig) -> Result<Arc<dyn SheetsApi>, StorageError>;

    /// 本地凭据检查，不发起网络请求
    fn has_valid_credentials(&self, config: &GoogleSheetsConfig) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_from_resource() {
        let resource = json!({
            "spreadsheetId": "abc",
            "properties": { "title": "Reviews" },
            "sheets": [
                { "properties": { "sheetId": 0, "title": "Dashboard", "index": 0 }, "charts": [{ "chartId": 11 }] },
                { "properties": { "sheetId": 7, "title": "G2", "index": 1 }, "conditionalFormats": [{}, {}] }
            ]
        });
        let meta = SpreadsheetMeta::from_resource(&resource).unwrap();
        assert_eq!(meta.spreadsheet_id, "abc");
        assert_eq!(meta.find_sheet("Dashboard").unwrap().chart_ids, vec![11]);
        assert_eq!(meta.find_sheet("G2").unwrap().conditional_format_count, 2);
        assert!(meta.find_sheet("Trustpilot").is_none());
        assert_eq!(meta.find_sheet("g2").unwrap().title, "G2");
        assert!(same_title("Trustpilot", "TRUSTPILOT"));
    }

    #[test]
    fn test_added_sheet_id() {
        let reply = BatchUpdateReply {
            replies: vec![json!({}), json!({ "addSheet": { "properties": { "sheetId": 42 } } })],
        };
        assert_eq!(reply.added_sheet_id(), Some(42));
    }
}
