use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::StorageBackend;
use crate::config::{Column, GoogleSheetsConfig, GOOGLE_SHEETS_KEY};
use crate::infrastructure::error::StorageError;
use crate::infrastructure::retry::{RetryExecutor, RetryPolicy};
use crate::models::review::parse_serial;
use crate::models::{Fingerprint, ReviewRecord, SentimentCategory};
use crate::storage::dashboard::{DashboardSummary, DASHBOARD_TAB};
use crate::storage::formatting;
use crate::storage::sheets::{
    a1, same_title, HttpSheetsConnector, SheetProperties, SheetsApi, SheetsConnector, ValueInputOption,
};

const SPREADSHEET_URL_PREFIX: &str = "https://docs.google.com/spreadsheets/d/";
const MAX_TAB_TITLE: usize = 100;

/// 平台名转工作表名：替换非法字符并截断
pub fn tab_title(platform: &str, fallback: &str) -> String {
    let platform = platform.trim();
    let source = if platform.is_empty() { fallback.trim() } else { platform };
    let cleaned: String = source
        .chars()
        .map(|c| match c {
            ':' | '\\' | '/' | '?' | '*' | '[' | ']' => '_',
            other => other,
        })
        .take(MAX_TAB_TITLE)
        .collect();

    if cleaned.is_empty() {
        "Reviews".to_string()
    } else if same_title(&cleaned, DASHBOARD_TAB) {
        format!("{} Reviews", cleaned)
    } else {
        cleaned
    }
}

/// 按平台分组，保持首次出现的顺序
fn group_by_tab<'a>(records: &'a [ReviewRecord], fallback: &str) -> Vec<(String, Vec<&'a ReviewRecord>)> {
    let mut groups: Vec<(String, Vec<&ReviewRecord>)> = Vec::new();
    for record in records {
        let title = tab_title(&record.platform, fallback);
        match groups.iter_mut().find(|(existing, _)| same_title(existing, &title)) {
            Some((_, group)) => group.push(record),
            None => groups.push((title, vec![record])),
        }
    }
    groups
}

/// 写入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    FullRefresh,
    Incremental,
}

/// 单个工作表的写入结果，供格式化步骤使用
#[derive(Debug, Clone)]
struct TabWrite {
    sheet: SheetProperties,
    mode: WriteMode,
    /// 第一条写入记录所在的网格行（0 起始）
    first_row: usize,
    written: Vec<Option<SentimentCategory>>,
    skipped: usize,
}

/// 已有数据行的摘要
#[derive(Debug, Default)]
struct ExistingRows {
    row_count: usize,
    last_serial: u32,
    fingerprints: HashSet<Fingerprint>,
}

struct Session {
    api: Arc<dyn SheetsApi>,
    spreadsheet_id: String,
}

/// Google Sheets 存储后端
pub struct GoogleSheetsStorage {
    config: GoogleSheetsConfig,
    columns: Vec<Column>,
    connector: Arc<dyn SheetsConnector>,
    retry: RetryExecutor,
    session: Option<Session>,
    spreadsheet_id: Option<String>,
    created_id: Option<String>,
}

impl GoogleSheetsStorage {
    pub fn new(config: GoogleSheetsConfig) -> Self {
        Self::with_connector(config, Arc::new(HttpSheetsConnector))
    }

    pub fn with_connector(config: GoogleSheetsConfig, connector: Arc<dyn SheetsConnector>) -> Self {
        let columns = config.effective_columns();
        let retry = RetryExecutor::new(RetryPolicy::from_config(&config.error_handling));
        let spreadsheet_id = Some(config.spreadsheet_id.trim().to_string()).filter(|id| !id.is_empty());
        Self {
            config,
            columns,
            connector,
            retry,
            session: None,
            spreadsheet_id,
            created_id: None,
        }
    }

    pub fn config(&self) -> &GoogleSheetsConfig {
        &self.config
    }

    /// 每次远程调用的尝试记录
    pub fn retry_log(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn spreadsheet_id(&self) -> Option<&str> {
        self.spreadsheet_id.as_deref()
    }

    fn headers(&self) -> Vec<String> {
        self.columns.iter().map(Column::header).collect()
    }

    fn column_position(&self, column: &Column) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    fn log_failure(&self, context: &str, error: &StorageError) {
        error!("{}: {}", context, error);
        if let Some(hint) = error.recovery_hint() {
            warn!("{}", hint);
        }
    }

    /// 打开已配置的表格，或按需新建
    async fn resolve_spreadsheet(&mut self, api: &dyn SheetsApi) -> Result<String, StorageError> {
        if let Some(id) = self.spreadsheet_id.clone() {
            let meta = self
                .retry
                .execute("open spreadsheet", || api.get_spreadsheet(&id))
                .await?;
            info!(spreadsheet_id = %id, title = %meta.title, "opened spreadsheet");
            return Ok(id);
        }

        if !self.config.create_if_missing {
            return Err(StorageError::config(
                "no spreadsheet_id configured and create_if_missing is disabled",
            ));
        }

        let title = self.config.spreadsheet_title.clone();
        let first_tab = tab_title(&self.config.sheet_name, &self.config.sheet_name);
        let meta = self
            .retry
            .execute("create spreadsheet", || api.create_spreadsheet(&title, &first_tab))
            .await?;
        info!(
            spreadsheet_id = %meta.spreadsheet_id,
            "created new spreadsheet: {}{}",
            SPREADSHEET_URL_PREFIX,
            meta.spreadsheet_id
        );
        self.spreadsheet_id = Some(meta.spreadsheet_id.clone());
        self.created_id = Some(meta.spreadsheet_id.clone());
        Ok(meta.spreadsheet_id)
    }

    async fn ensure_tab(&self, api: &dyn SheetsApi, id: &str, title: &str) -> Result<SheetProperties, StorageError> {
        let meta = self
            .retry
            .execute("read spreadsheet metadata", || api.get_spreadsheet(id))
            .await?;
        if let Some(sheet) = meta.find_sheet(title) {
            return Ok(sheet.clone());
        }

        let request = json!({ "addSheet": { "properties": { "title": title } } });
        let reply = self
            .retry
            .execute("create tab", || api.batch_update(id, vec![request.clone()]))
            .await?;
        let sheet_id = reply.added_sheet_id().ok_or_else(|| StorageError::Parsing {
            message: format!("addSheet reply for '{}' carried no sheetId", title),
            content_type: "JSON".to_string(),
        })?;
        info!(tab = title, "created tab");

        Ok(SheetProperties {
            sheet_id,
            title: title.to_string(),
            index: meta.sheets.len(),
            conditional_format_count: 0,
            chart_ids: Vec::new(),
        })
    }

    async fn write_header(&self, api: &dyn SheetsApi, id: &str, title: &str) -> Result<(), StorageError> {
        let range = a1::row_range(title, 1, self.columns.len());
        let header: Vec<serde_json::Value> = self.headers().into_iter().map(serde_json::Value::String).collect();
        self.retry
            .execute("write header", || {
                api.update_values(id, &range, vec![header.clone()], ValueInputOption::Raw)
            })
            .await
    }

    async fn read_existing(
        &self,
        api: &dyn SheetsApi,
        id: &str,
        title: &str,
        default_platform: &str,
    ) -> Result<ExistingRows, StorageError> {
        let range = a1::rows_from(title, 2, self.columns.len());
        let rows = self
            .retry
            .execute("read existing rows", || api.get_values(id, &range))
            .await?;

        let serial_col = self.column_position(&Column::SerialNumber);
        let platform_col = self.column_position(&Column::Platform);
        let content_col = self.column_position(&Column::Content);

        let mut existing = ExistingRows {
            row_count: rows.len(),
            ..ExistingRows::default()
        };
        for row in &rows {
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let cell = move |col: Option<usize>| col.and_then(|c| row.get(c)).map(String::as_str);
            let platform = cell(platform_col).unwrap_or(default_platform);
            let content = cell(content_col).unwrap_or("");
            existing.fingerprints.insert(Fingerprint::new(platform, content));
            if let Some(serial) = cell(serial_col).and_then(parse_serial) {
                existing.last_serial = existing.last_serial.max(serial);
            }
        }
        if serial_col.is_none() {
            existing.last_serial = existing.row_count as u32;
        }

        debug!(
            tab = title,
            rows = existing.row_count,
            last_serial = existing.last_serial,
            "read existing rows"
        );
        Ok(existing)
    }

    async fn append_new(
        &self,
        api: &dyn SheetsApi,
        id: &str,
        sheet: SheetProperties,
        existing: ExistingRows,
        records: &[&ReviewRecord],
    ) -> Result<TabWrite, StorageError> {
        let mut seen = existing.fingerprints;
        let mut serial = existing.last_serial;
        let mut rows = Vec::new();
        let mut written = Vec::new();
        let mut skipped = 0;

        for record in records {
            if !seen.insert(record.fingerprint()) {
                skipped += 1;
                continue;
            }
            serial += 1;
            rows.push(record.to_row(&self.columns, serial));
            written.push(record.sentiment_category());
        }

        // 表头占第 1 行
        let start_row = existing.row_count + 2;
        if !rows.is_empty() {
            let range = a1::rows_from(&sheet.title, start_row, self.columns.len());
            self.retry
                .execute("append rows", || {
                    api.update_values(id, &range, rows.clone(), ValueInputOption::Raw)
                })
                .await?;
        }

        Ok(TabWrite {
            sheet,
            mode: WriteMode::Incremental,
            first_row: start_row - 1,
            written,
            skipped,
        })
    }

    async fn full_refresh(
        &self,
        api: &dyn SheetsApi,
        id: &str,
        sheet: SheetProperties,
        records: &[&ReviewRecord],
    ) -> Result<TabWrite, StorageError> {
        let range = a1::rows_from(&sheet.title, 2, self.columns.len());
        self.retry
            .execute("clear rows", || api.clear_values(id, &range))
            .await?;

        let rows: Vec<Vec<serde_json::Value>> = records
            .iter()
            .enumerate()
            .map(|(i, record)| record.to_row(&self.columns, i as u32 + 1))
            .collect();
        if !rows.is_empty() {
            self.retry
                .execute("write rows", || {
                    api.update_values(id, &range, rows.clone(), ValueInputOption::Raw)
                })
                .await?;
        }

        Ok(TabWrite {
            sheet,
            mode: WriteMode::FullRefresh,
            first_row: 1,
            written: records.iter().map(|r| r.sentiment_category()).collect(),
            skipped: 0,
        })
    }

    /// 写入一个平台工作表（不含格式化）
    async fn write_tab(
        &self,
        api: &dyn SheetsApi,
        id: &str,
        title: &str,
        records: &[&ReviewRecord],
    ) -> Result<TabWrite, StorageError> {
        let sheet = self.ensure_tab(api, id, title).await?;
        let title = sheet.title.clone();
        self.write_header(api, id, &title).await?;

        if self.config.incremental_updates {
            let default_platform = records.first().map(|r| r.platform.as_str()).unwrap_or("");
            match self.read_existing(api, id, &title, default_platform).await {
                Ok(existing) => return self.append_new(api, id, sheet, existing, records).await,
                Err(e) => {
                    warn!(tab = %title, "cannot read existing rows, falling back to full refresh: {}", e);
                }
            }
        }

        self.full_refresh(api, id, sheet, records).await
    }

    /// 格式化步骤；失败不影响写入结果
    async fn format_tab(&self, api: &dyn SheetsApi, id: &str, write: &TabWrite) -> Result<(), StorageError> {
        let columns = self.columns.len();
        let sheet_id = write.sheet.sheet_id;
        let mut requests = formatting::header_requests(sheet_id, columns);

        if self.config.format_by_sentiment {
            if write.mode == WriteMode::FullRefresh {
                requests.push(formatting::reset_rows_request(sheet_id, columns));
            }
            requests.extend(formatting::row_color_requests(
                sheet_id,
                columns,
                write.first_row,
                &write.written,
            ));
            if let Some(score_col) = self.column_position(&Column::SentimentScore) {
                requests.extend(formatting::delete_conditional_rules(
                    sheet_id,
                    write.sheet.conditional_format_count,
                ));
                requests.push(formatting::score_gradient_rule(sheet_id, score_col));
            }
        }

        if self.config.dashboard_options.add_color_legend {
            let legend_col = formatting::legend_column(columns);
            let values = formatting::legend_values();
            let range = a1::block_range(&write.sheet.title, legend_col, 1, legend_col + 1, values.len());
            self.retry
                .execute("write legend", || {
                    api.update_values(id, &range, values.clone(), ValueInputOption::Raw)
                })
                .await?;
            requests.extend(formatting::legend_requests(sheet_id, legend_col));
        }

        self.retry
            .execute("format tab", || api.batch_update(id, requests.clone()))
            .await?;
        Ok(())
    }

    /// 读回所有表头匹配的平台工作表
    async fn read_all_records(&self, api: &dyn SheetsApi, id: &str) -> Result<Vec<ReviewRecord>, StorageError> {
        let meta = self
            .retry
            .execute("read spreadsheet metadata", || api.get_spreadsheet(id))
            .await?;
        let headers = self.headers();
        let mut records = Vec::new();

        for sheet in meta.sheets.iter().filter(|s| !same_title(&s.title, DASHBOARD_TAB)) {
            let range = a1::rows_from(&sheet.title, 1, self.columns.len());
            let rows = self
                .retry
                .execute("read tab", || api.get_values(id, &range))
                .await?;

            let Some((header, data)) = rows.split_first() else {
                continue;
            };
            if header.as_slice() != headers.as_slice() {
                debug!(tab = %sheet.title, "skipping tab without review header");
                continue;
            }

            records.extend(
                data.iter()
                    .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
                    .map(|row| ReviewRecord::from_row(&self.columns, row)),
            );
        }

        Ok(records)
    }

    /// 重新生成仪表板；失败只记录日志
    async fn refresh_dashboard(&self, api: &dyn SheetsApi, id: &str) -> Result<(), StorageError> {
        let records = self.read_all_records(api, id).await?;
        let summary = DashboardSummary::from_records(&records);
        let layout = summary.render(&self.config.dashboard_options, Utc::now());

        let meta = self
            .retry
            .execute("read spreadsheet metadata", || api.get_spreadsheet(id))
            .await?;

        let sheet_id = match meta.find_sheet(DASHBOARD_TAB) {
            Some(sheet) => {
                let mut requests = Vec::new();
                if sheet.index != 0 {
                    requests.push(json!({
                        "updateSheetProperties": {
                            "properties": { "sheetId": sheet.sheet_id, "index": 0 },
                            "fields": "index"
                        }
                    }));
                }
                requests.extend(
                    sheet
                        .chart_ids
                        .iter()
                        .map(|chart_id| json!({ "deleteEmbeddedObject": { "objectId": chart_id } })),
                );
                if !requests.is_empty() {
                    self.retry
                        .execute("prepare dashboard", || api.batch_update(id, requests.clone()))
                        .await?;
                }
                sheet.sheet_id
            }
            None => {
                let request = json!({ "addSheet": { "properties": { "title": DASHBOARD_TAB, "index": 0 } } });
                let reply = self
                    .retry
                    .execute("create dashboard", || api.batch_update(id, vec![request.clone()]))
                    .await?;
                reply.added_sheet_id().ok_or_else(|| StorageError::Parsing {
                    message: "addSheet reply for dashboard carried no sheetId".to_string(),
                    content_type: "JSON".to_string(),
                })?
            }
        };

        let clear_range = a1::tab_range(DASHBOARD_TAB);
        self.retry
            .execute("clear dashboard", || api.clear_values(id, &clear_range))
            .await?;

        let width = layout.rows.iter().map(Vec::len).max().unwrap_or(1);
        let range = a1::rows_from(DASHBOARD_TAB, 1, width);
        self.retry
            .execute("write dashboard", || {
                api.update_values(id, &range, layout.rows.clone(), ValueInputOption::Raw)
            })
            .await?;

        let mut requests = layout.format_requests(sheet_id);
        requests.extend(layout.chart_requests(sheet_id));
        self.retry
            .execute("format dashboard", || api.batch_update(id, requests.clone()))
            .await?;

        info!(total = summary.total, "dashboard refreshed");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for GoogleSheetsStorage {
    fn name(&self) -> &str {
        GOOGLE_SHEETS_KEY
    }

    async fn connect(&mut self) -> bool {
        self.session = None;

        let connector = self.connector.clone();
        let config = self.config.clone();
        let api = match self
            .retry
            .execute("authenticate", || connector.connect(&config))
            .await
        {
            Ok(api) => api,
            Err(e) => {
                self.log_failure("Failed to authenticate with Google Sheets", &e);
                return false;
            }
        };

        match self.resolve_spreadsheet(api.as_ref()).await {
            Ok(spreadsheet_id) => {
                info!(%spreadsheet_id, "connected to Google Sheets");
                self.session = Some(Session { api, spreadsheet_id });
                true
            }
            Err(e) => {
                self.log_failure("Failed to open spreadsheet", &e);
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!("disconnected from Google Sheets");
        }
    }

    fn has_valid_credentials(&self) -> bool {
        self.connector.has_valid_credentials(&self.config)
    }

    async fn store_reviews(&mut self, records: &[ReviewRecord]) -> bool {
        let Some(session) = self.session.as_ref() else {
            error!("Not connected to Google Sheets");
            return false;
        };
        let api = session.api.clone();
        let id = session.spreadsheet_id.clone();

        if records.is_empty() {
            info!("No reviews to store");
            return true;
        }

        let mut all_written = true;
        let mut any_written = false;

        for (title, group) in group_by_tab(records, &self.config.sheet_name) {
            match self.write_tab(api.as_ref(), &id, &title, &group).await {
                Ok(write) => {
                    any_written = true;
                    info!(
                        tab = %title,
                        mode = ?write.mode,
                        written = write.written.len(),
                        skipped = write.skipped,
                        "stored reviews"
                    );
                    if let Err(e) = self.format_tab(api.as_ref(), &id, &write).await {
                        warn!(tab = %title, "formatting failed, rows were written: {}", e);
                    }
                }
                Err(e) => {
                    self.log_failure(&format!("Failed to store reviews in tab '{}'", title), &e);
                    all_written = false;
                }
            }
        }

        if any_written && self.config.create_dashboard {
            if let Err(e) = self.refresh_dashboard(api.as_ref(), &id).await {
                warn!("dashboard refresh failed: {}", e);
            }
        }

        all_written
    }

    async fn get_reviews(&self) -> Result<Vec<ReviewRecord>, StorageError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| StorageError::not_connected("Google Sheets session is not open"))?;
        self.read_all_records(session.api.as_ref(), &session.spreadsheet_id)
            .await
    }

    async fn clear_data(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            error!("Not connected to Google Sheets");
            return false;
        };
        let api = session.api.clone();
        let id = session.spreadsheet_id.clone();

        let meta = match self
            .retry
            .execute("read spreadsheet metadata", || api.get_spreadsheet(&id))
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                self.log_failure("Failed to read spreadsheet", &e);
                return false;
            }
        };

        let headers = self.headers();
        let mut cleared = true;
        for sheet in meta.sheets.iter().filter(|s| !same_title(&s.title, DASHBOARD_TAB)) {
            let header_range = a1::row_range(&sheet.title, 1, self.columns.len());
            let header = match self
                .retry
                .execute("read header", || api.get_values(&id, &header_range))
                .await
            {
                Ok(rows) => rows.into_iter().next().unwrap_or_default(),
                Err(e) => {
                    self.log_failure(&format!("Failed to read tab '{}'", sheet.title), &e);
                    cleared = false;
                    continue;
                }
            };
            if header != headers {
                continue;
            }

            let range = a1::rows_from(&sheet.title, 2, self.columns.len());
            if let Err(e) = self
                .retry
                .execute("clear rows", || api.clear_values(&id, &range))
                .await
            {
                self.log_failure(&format!("Failed to clear tab '{}'", sheet.title), &e);
                cleared = false;
            } else {
                info!(tab = %sheet.title, "cleared data rows");
            }
        }

        if self.config.create_dashboard {
            if let Err(e) = self.refresh_dashboard(api.as_ref(), &id).await {
                warn!("dashboard refresh failed: {}", e);
            }
        }

        cleared
    }

    fn spreadsheet_url(&self) -> Option<String> {
        self.spreadsheet_id
            .as_ref()
            .map(|id| format!("{}{}", SPREADSHEET_URL_PREFIX, id))
    }

    fn created_document_id(&self) -> Option<String> {
        self.created_id.clone()
    }

    async fn rename_tab(&mut self, from: &str, to: &str) -> bool {
        let Some(session) = self.session.as_ref() else {
            error!("Not connected to Google Sheets");
            return false;
        };
        let api = session.api.clone();
        let id = session.spreadsheet_id.clone();
        let to = tab_title(to, to);

        let meta = match self
            .retry
            .execute("read spreadsheet metadata", || api.get_spreadsheet(&id))
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                self.log_failure("Failed to read spreadsheet", &e);
                return false;
            }
        };

        let Some(sheet) = meta.find_sheet(from) else {
            error!(from, "tab to rename does not exist");
            return false;
        };
        if meta
            .find_sheet(&to)
            .is_some_and(|existing| existing.sheet_id != sheet.sheet_id)
        {
            error!(to = %to, "a tab with the new name already exists");
            return false;
        }

        let request = json!({
            "updateSheetProperties": {
                "properties": { "sheetId": sheet.sheet_id, "title": to },
                "fields": "title"
            }
        });
        match self
            .retry
            .execute("rename tab", || api.batch_update(&id, vec![request.clone()]))
            .await
        {
            Ok(_) => {
                info!(from, to = %to, "renamed tab");
                true
            }
            Err(e) => {
                self.log_failure("Failed to rename tab", &e);
                false
            }
        }
    }
}

impl std::fmt::Debug for GoogleSheetsStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSheetsStorage")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("connected", &self.session.is_some())
            .field("columns", &self.columns)
            .finish()
    }
}
