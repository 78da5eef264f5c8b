use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::auth::{Credentials, TokenProvider};
use super::{BatchUpdateReply, SheetsApi, SheetsConnector, SpreadsheetMeta, ValueInputOption};
use crate::config::GoogleSheetsConfig;
use crate::infrastructure::error::StorageError;

pub const DEFAULT_API_BASE_URL: &str = "https://sheets.googleapis.com";

const METADATA_FIELDS: &str =
    "spreadsheetId,properties.title,sheets(properties(sheetId,title,index),conditionalFormats,charts(chartId))";

/// 全局共享 HTTP 客户端
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
});

pub fn shared_client() -> &'static Client {
    &HTTP_CLIENT
}

/// Google Sheets v4 REST 客户端
pub struct HttpSheetsClient {
    client: &'static Client,
    base_url: String,
    tokens: TokenProvider,
}

impl HttpSheetsClient {
    pub fn new(base_url: impl Into<String>, tokens: TokenProvider) -> Self {
        Self {
            client: shared_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str) -> String {
        format!("{}/v4/spreadsheets/{}", self.base_url, urlencoding::encode(spreadsheet_id))
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> String {
        format!(
            "{}/values/{}",
            self.spreadsheet_url(spreadsheet_id),
            urlencoding::encode(range)
        )
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, StorageError> {
        let token = self.tokens.access_token().await?;
        debug!(%method, url, "sheets request");

        let mut request = self.client.request(method, url).bearer_auth(token).query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            if status.as_u16() == 401 {
                warn!("access token rejected, dropping cached token");
                self.tokens.invalidate().await;
            }
            return Err(StorageError::from_status(status.as_u16(), &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetsApi for HttpSheetsClient {
    async fn create_spreadsheet(&self, title: &str, first_sheet: &str) -> Result<SpreadsheetMeta, StorageError> {
        let url = format!("{}/v4/spreadsheets", self.base_url);
        let body = json!({
            "properties": { "title": title },
            "sheets": [{ "properties": { "title": first_sheet } }]
        });
        let resource = self.send(Method::POST, &url, &[], Some(body)).await?;
        SpreadsheetMeta::from_resource(&resource)
    }

    async fn get_spreadsheet(&self, spreadsheet_id: &str) -> Result<SpreadsheetMeta, StorageError> {
        let url = self.spreadsheet_url(spreadsheet_id);
        let resource = self
            .send(Method::GET, &url, &[("fields", METADATA_FIELDS)], None)
            .await?;
        SpreadsheetMeta::from_resource(&resource)
    }

    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, StorageError> {
        let url = self.values_url(spreadsheet_id, range);
        let response = self
            .send(
                Method::GET,
                &url,
                &[("majorDimension", "ROWS"), ("valueRenderOption", "FORMATTED_VALUE")],
                None,
            )
            .await?;

        Ok(response
            .get("values")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| cells.iter().map(cell_text).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<Value>>,
        option: ValueInputOption,
    ) -> Result<(), StorageError> {
        let url = self.values_url(spreadsheet_id, range);
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": rows });
        self.send(Method::PUT, &url, &[("valueInputOption", option.as_str())], Some(body))
            .await?;
        Ok(())
    }

    async fn clear_values(&self, spreadsheet_id: &str, range: &str) -> Result<(), StorageError> {
        let url = format!("{}:clear", self.values_url(spreadsheet_id, range));
        self.send(Method::POST, &url, &[], Some(json!({}))).await?;
        Ok(())
    }

    async fn batch_update(&self, spreadsheet_id: &str, requests: Vec<Value>) -> Result<BatchUpdateReply, StorageError> {
        if requests.is_empty() {
            return Ok(BatchUpdateReply::default());
        }
        let url = format!("{}:batchUpdate", self.spreadsheet_url(spreadsheet_id));
        let response = self
            .send(Method::POST, &url, &[], Some(json!({ "requests": requests })))
            .await?;

        Ok(BatchUpdateReply {
            replies: response
                .get("replies")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

/// 读取凭据文件并换取访问令牌的连接器
#[derive(Debug, Clone, Default)]
pub struct HttpSheetsConnector;

#[async_trait]
impl SheetsConnector for HttpSheetsConnector {
    async fn connect(&self, config: &GoogleSheetsConfig) -> Result<Arc<dyn SheetsApi>, StorageError> {
        let credentials = Credentials::from_file(&config.credentials_path)?;
        if let Some(email) = credentials.client_email() {
            debug!(email, "using service account");
        }

        let tokens = TokenProvider::new(credentials, shared_client());
        // 连接时即验证凭据可以换到令牌
        tokens.access_token().await?;

        let base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        Ok(Arc::new(HttpSheetsClient::new(base_url, tokens)))
    }

    fn has_valid_credentials(&self, config: &GoogleSheetsConfig) -> bool {
        match Credentials::from_file(&config.credentials_path) {
            Ok(_) => true,
            Err(e) => {
                debug!("credentials check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sheets::auth::AuthorizedUserKey;

    fn client(base_url: &str) -> HttpSheetsClient {
        let credentials = Credentials::AuthorizedUser(AuthorizedUserKey {
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
            token_uri: "http://localhost/token".into(),
        });
        HttpSheetsClient::new(base_url, TokenProvider::new(credentials, shared_client()))
    }

    #[test]
    fn test_range_is_path_encoded() {
        let client = client("https://sheets.example.com/");
        assert_eq!(
            client.values_url("abc", "'Course Report'!A2:H"),
            "https://sheets.example.com/v4/spreadsheets/abc/values/%27Course%20Report%27%21A2%3AH"
        );
    }

    #[test]
    fn test_shared_client_returns_same_instance() {
        assert!(std::ptr::eq(shared_client(), shared_client()));
    }
}
