//! In-memory spreadsheet document used by `--dry-run` and the test suite.
//!
//! It interprets the subset of `batchUpdate` requests the backend issues,
//! records every call, and can inject failures per operation.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::a1::parse_range;
use super::{
    same_title, BatchUpdateReply, SheetProperties, SheetsApi, SheetsConnector, SpreadsheetMeta, ValueInputOption,
};
use crate::config::GoogleSheetsConfig;
use crate::infrastructure::error::StorageError;

/// API 操作种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SheetsOperation {
    CreateSpreadsheet,
    GetSpreadsheet,
    GetValues,
    UpdateValues,
    ClearValues,
    BatchUpdate,
}

/// 调用日志条目
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub operation: SheetsOperation,
    /// 表格 ID、范围，或 batchUpdate 的请求种类列表
    pub target: String,
    pub failed: bool,
}

#[derive(Debug, Clone)]
struct Fault {
    remaining: Option<u32>,
    matching: Option<String>,
    error: StorageError,
}

#[derive(Debug, Clone, Default)]
struct Tab {
    sheet_id: i64,
    title: String,
    cells: Vec<Vec<String>>,
    conditional_formats: usize,
    charts: Vec<i64>,
    frozen_rows: usize,
    format_requests: usize,
}

#[derive(Debug, Clone, Default)]
struct Document {
    title: String,
    tabs: Vec<Tab>,
}

impl Document {
    fn tab(&self, title: &str) -> Option<&Tab> {
        self.tabs.iter().find(|tab| same_title(&tab.title, title))
    }

    fn tab_mut(&mut self, title: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|tab| same_title(&tab.title, title))
    }

    fn tab_by_id_mut(&mut self, sheet_id: i64) -> Result<&mut Tab, StorageError> {
        self.tabs
            .iter_mut()
            .find(|tab| tab.sheet_id == sheet_id)
            .ok_or_else(|| invalid(format!("No grid with id: {}", sheet_id)))
    }
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<String, Document>,
    next_document: u32,
    next_object_id: i64,
    calls: Vec<ApiCall>,
    faults: BTreeMap<SheetsOperation, VecDeque<Fault>>,
}

impl State {
    fn next_object_id(&mut self) -> i64 {
        self.next_object_id += 1;
        self.next_object_id
    }

    fn document(&self, spreadsheet_id: &str) -> Result<&Document, StorageError> {
        self.documents.get(spreadsheet_id).ok_or_else(|| StorageError::NotFound {
            resource: format!("Requested entity was not found: spreadsheet {}", spreadsheet_id),
        })
    }

    fn document_mut(&mut self, spreadsheet_id: &str) -> Result<&mut Document, StorageError> {
        self.documents.get_mut(spreadsheet_id).ok_or_else(|| StorageError::NotFound {
            resource: format!("Requested entity was not found: spreadsheet {}", spreadsheet_id),
        })
    }

    /// 记录调用并检查是否需要注入故障
    fn begin(&mut self, operation: SheetsOperation, target: String) -> Result<(), StorageError> {
        let mut injected = None;
        if let Some(faults) = self.faults.get_mut(&operation) {
            if let Some(position) = faults.iter().position(|fault| {
                fault
                    .matching
                    .as_ref()
                    .map(|needle| target.contains(needle.as_str()))
                    .unwrap_or(true)
            }) {
                let fault = &mut faults[position];
                injected = Some(fault.error.clone());
                if let Some(remaining) = fault.remaining.as_mut() {
                    *remaining -= 1;
                    if *remaining == 0 {
                        faults.remove(position);
                    }
                }
            }
        }

        self.calls.push(ApiCall {
            operation,
            target,
            failed: injected.is_some(),
        });

        match injected {
            Some(error) => {
                debug!(?operation, "injected failure: {}", error);
                Err(error)
            }
            None => Ok(()),
        }
    }
}

fn invalid(message: impl Into<String>) -> StorageError {
    StorageError::InvalidRequest {
        status: 400,
        message: message.into(),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        other => other.to_string(),
    }
}

/// 内存中的表格服务
#[derive(Debug, Default)]
pub struct InMemorySheets {
    state: Mutex<State>,
}

impl InMemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 预先放入一个只有 `Sheet1` 的表格
    pub fn add_spreadsheet(&self, spreadsheet_id: &str, title: &str) {
        let mut state = self.lock();
        let sheet_id = state.next_object_id();
        state.documents.insert(
            spreadsheet_id.to_string(),
            Document {
                title: title.to_string(),
                tabs: vec![Tab {
                    sheet_id,
                    title: "Sheet1".to_string(),
                    ..Tab::default()
                }],
            },
        );
    }

    /// 直接写入某个工作表的全部单元格（不存在则创建）
    pub fn seed_tab(&self, spreadsheet_id: &str, title: &str, rows: Vec<Vec<String>>) {
        let mut state = self.lock();
        let sheet_id = state.next_object_id();
        let Some(document) = state.documents.get_mut(spreadsheet_id) else {
            return;
        };
        match document.tab_mut(title) {
            Some(tab) => tab.cells = rows,
            None => document.tabs.push(Tab {
                sheet_id,
                title: title.to_string(),
                cells: rows,
                ..Tab::default()
            }),
        }
    }

    pub fn spreadsheet_ids(&self) -> Vec<String> {
        self.lock().documents.keys().cloned().collect()
    }

    /// 按位置顺序的工作表名
    pub fn tab_titles(&self, spreadsheet_id: &str) -> Vec<String> {
        self.lock()
            .documents
            .get(spreadsheet_id)
            .map(|document| document.tabs.iter().map(|tab| tab.title.clone()).collect())
            .unwrap_or_default()
    }

    /// 工作表的单元格，去掉末尾空行与空单元格
    pub fn tab_values(&self, spreadsheet_id: &str, title: &str) -> Option<Vec<Vec<String>>> {
        let state = self.lock();
        let tab = state.documents.get(spreadsheet_id)?.tab(title)?;
        Some(trimmed(&tab.cells, 0, None, 0, None))
    }

    /// 表头以下的非空行，截到表头宽度（不含右侧图例）
    pub fn data_rows(&self, spreadsheet_id: &str, title: &str) -> Vec<Vec<String>> {
        let Some(rows) = self.tab_values(spreadsheet_id, title) else {
            return Vec::new();
        };
        let width = rows
            .first()
            .map(|header| header.iter().take_while(|cell| !cell.is_empty()).count())
            .unwrap_or(0);

        rows.into_iter()
            .skip(1)
            .map(|mut row| {
                row.truncate(width);
                row
            })
            .filter(|row| row.iter().any(|cell| !cell.is_empty()))
            .collect()
    }

    pub fn conditional_format_count(&self, spreadsheet_id: &str, title: &str) -> usize {
        let state = self.lock();
        state
            .documents
            .get(spreadsheet_id)
            .and_then(|document| document.tab(title))
            .map(|tab| tab.conditional_formats)
            .unwrap_or(0)
    }

    pub fn chart_count(&self, spreadsheet_id: &str, title: &str) -> usize {
        let state = self.lock();
        state
            .documents
            .get(spreadsheet_id)
            .and_then(|document| document.tab(title))
            .map(|tab| tab.charts.len())
            .unwrap_or(0)
    }

    pub fn frozen_rows(&self, spreadsheet_id: &str, title: &str) -> usize {
        let state = self.lock();
        state
            .documents
            .get(spreadsheet_id)
            .and_then(|document| document.tab(title))
            .map(|tab| tab.frozen_rows)
            .unwrap_or(0)
    }

    /// 作用在该工作表上的格式请求数（repeatCell 等）
    pub fn format_request_count(&self, spreadsheet_id: &str, title: &str) -> usize {
        let state = self.lock();
        state
            .documents
            .get(spreadsheet_id)
            .and_then(|document| document.tab(title))
            .map(|tab| tab.format_requests)
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, operation: SheetsOperation) -> Vec<ApiCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// 接下来 `times` 次该操作失败
    pub fn fail_next(&self, operation: SheetsOperation, times: u32, error: StorageError) {
        if times == 0 {
            return;
        }
        self.push_fault(
            operation,
            Fault {
                remaining: Some(times),
                matching: None,
                error,
            },
        );
    }

    /// 该操作始终失败
    pub fn fail_always(&self, operation: SheetsOperation, error: StorageError) {
        self.push_fault(
            operation,
            Fault {
                remaining: None,
                matching: None,
                error,
            },
        );
    }

    /// 目标（范围或请求种类）包含 `needle` 时始终失败
    pub fn fail_when(&self, operation: SheetsOperation, needle: &str, error: StorageError) {
        self.push_fault(
            operation,
            Fault {
                remaining: None,
                matching: Some(needle.to_string()),
                error,
            },
        );
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    fn push_fault(&self, operation: SheetsOperation, fault: Fault) {
        self.lock().faults.entry(operation).or_default().push_back(fault);
    }
}

/// 截取区域并去掉末尾空白
fn trimmed(
    cells: &[Vec<String>],
    start_row: usize,
    end_row: Option<usize>,
    start_col: usize,
    end_col: Option<usize>,
) -> Vec<Vec<String>> {
    let end_row = end_row.map(|r| r.min(cells.len())).unwrap_or(cells.len());
    let mut rows: Vec<Vec<String>> = (start_row.min(end_row)..end_row)
        .map(|r| {
            let row = &cells[r];
            let end_col = end_col.map(|c| c.min(row.len())).unwrap_or(row.len());
            let mut out: Vec<String> = row
                .get(start_col.min(end_col)..end_col)
                .map(|slice| slice.to_vec())
                .unwrap_or_default();
            while out.last().map(|c| c.is_empty()).unwrap_or(false) {
                out.pop();
            }
            out
        })
        .collect();
    while rows.last().map(|r| r.is_empty()).unwrap_or(false) {
        rows.pop();
    }
    rows
}

fn meta(spreadsheet_id: &str, document: &Document) -> SpreadsheetMeta {
    SpreadsheetMeta {
        spreadsheet_id: spreadsheet_id.to_string(),
        title: document.title.clone(),
        sheets: document
            .tabs
            .iter()
            .enumerate()
            .map(|(index, tab)| SheetProperties {
                sheet_id: tab.sheet_id,
                title: tab.title.clone(),
                index,
                conditional_format_count: tab.conditional_formats,
                chart_ids: tab.charts.clone(),
            })
            .collect(),
    }
}

fn request_kinds(requests: &[Value]) -> String {
    requests
        .iter()
        .filter_map(|request| request.as_object().and_then(|o| o.keys().next().cloned()))
        .collect::<Vec<_>>()
        .join(",")
}

fn sheet_id_at(value: &Value, pointer: &str) -> Result<i64, StorageError> {
    value
        .pointer(pointer)
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid(format!("missing {}", pointer)))
}

fn apply_request(state: &mut State, document: &mut Document, request: &Value) -> Result<Value, StorageError> {
    let (kind, body) = request
        .as_object()
        .and_then(|o| o.iter().next())
        .ok_or_else(|| invalid("empty request"))?;

    match kind.as_str() {
        "addSheet" => {
            let title = body
                .pointer("/properties/title")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("addSheet needs a title"))?
                .to_string();
            if document.tab(&title).is_some() {
                return Err(invalid(format!(
                    "A sheet with the name \"{}\" already exists. Please enter another name.",
                    title
                )));
            }
            let sheet_id = state.next_object_id();
            let index = body
                .pointer("/properties/index")
                .and_then(Value::as_u64)
                .map(|i| (i as usize).min(document.tabs.len()))
                .unwrap_or(document.tabs.len());
            document.tabs.insert(
                index,
                Tab {
                    sheet_id,
                    title: title.clone(),
                    ..Tab::default()
                },
            );
            Ok(json!({ "addSheet": { "properties": { "sheetId": sheet_id, "title": title, "index": index } } }))
        }
        "updateSheetProperties" => {
            let sheet_id = sheet_id_at(body, "/properties/sheetId")?;
            if let Some(title) = body.pointer("/properties/title").and_then(Value::as_str) {
                if document.tabs.iter().any(|tab| same_title(&tab.title, title) && tab.sheet_id != sheet_id) {
                    return Err(invalid(format!("A sheet with the name \"{}\" already exists.", title)));
                }
                document.tab_by_id_mut(sheet_id)?.title = title.to_string();
            }
            if let Some(frozen) = body
                .pointer("/properties/gridProperties/frozenRowCount")
                .and_then(Value::as_u64)
            {
                document.tab_by_id_mut(sheet_id)?.frozen_rows = frozen as usize;
            }
            if let Some(index) = body.pointer("/properties/index").and_then(Value::as_u64) {
                let position = document
                    .tabs
                    .iter()
                    .position(|tab| tab.sheet_id == sheet_id)
                    .ok_or_else(|| invalid(format!("No grid with id: {}", sheet_id)))?;
                let tab = document.tabs.remove(position);
                let index = (index as usize).min(document.tabs.len());
                document.tabs.insert(index, tab);
            }
            Ok(json!({}))
        }
        "deleteSheet" => {
            let sheet_id = sheet_id_at(body, "/sheetId")?;
            let before = document.tabs.len();
            document.tabs.retain(|tab| tab.sheet_id != sheet_id);
            if document.tabs.len() == before {
                return Err(invalid(format!("No sheet with id: {}", sheet_id)));
            }
            Ok(json!({}))
        }
        "addConditionalFormatRule" => {
            let sheet_id = sheet_id_at(body, "/rule/ranges/0/sheetId")?;
            document.tab_by_id_mut(sheet_id)?.conditional_formats += 1;
            Ok(json!({}))
        }
        "deleteConditionalFormatRule" => {
            let sheet_id = sheet_id_at(body, "/sheetId")?;
            let tab = document.tab_by_id_mut(sheet_id)?;
            if tab.conditional_formats == 0 {
                return Err(invalid("Invalid conditional format rule index"));
            }
            tab.conditional_formats -= 1;
            Ok(json!({}))
        }
        "addChart" => {
            let sheet_id = sheet_id_at(body, "/chart/position/overlayPosition/anchorCell/sheetId")?;
            let chart_id = state.next_object_id();
            document.tab_by_id_mut(sheet_id)?.charts.push(chart_id);
            Ok(json!({ "addChart": { "chart": { "chartId": chart_id } } }))
        }
        "deleteEmbeddedObject" => {
            let object_id = sheet_id_at(body, "/objectId")?;
            let tab = document
                .tabs
                .iter_mut()
                .find(|tab| tab.charts.contains(&object_id))
                .ok_or_else(|| invalid(format!("No object with id: {}", object_id)))?;
            tab.charts.retain(|id| *id != object_id);
            Ok(json!({}))
        }
        "repeatCell" | "updateCells" | "updateBorders" | "mergeCells" | "autoResizeDimensions"
        | "updateDimensionProperties" => {
            let pointer = match kind.as_str() {
                "autoResizeDimensions" | "updateDimensionProperties" => {
                    if body.get("dimensions").is_some() {
                        "/dimensions/sheetId"
                    } else {
                        "/range/sheetId"
                    }
                }
                "updateCells" if body.get("start").is_some() => "/start/sheetId",
                _ => "/range/sheetId",
            };
            let sheet_id = sheet_id_at(body, pointer)?;
            document.tab_by_id_mut(sheet_id)?.format_requests += 1;
            Ok(json!({}))
        }
        other => Err(invalid(format!("unsupported request: {}", other))),
    }
}

#[async_trait]
impl SheetsApi for InMemorySheets {
    async fn create_spreadsheet(&self, title: &str, first_sheet: &str) -> Result<SpreadsheetMeta, StorageError> {
        let mut state = self.lock();
        state.begin(SheetsOperation::CreateSpreadsheet, title.to_string())?;

        state.next_document += 1;
        let spreadsheet_id = format!("mem-{}", state.next_document);
        let sheet_id = state.next_object_id();
        let document = Document {
            title: title.to_string(),
            tabs: vec![Tab {
                sheet_id,
                title: first_sheet.to_string(),
                ..Tab::default()
            }],
        };
        let result = meta(&spreadsheet_id, &document);
        state.documents.insert(spreadsheet_id, document);
        Ok(result)
    }

    async fn get_spreadsheet(&self, spreadsheet_id: &str) -> Result<SpreadsheetMeta, StorageError> {
        let mut state = self.lock();
        state.begin(SheetsOperation::GetSpreadsheet, spreadsheet_id.to_string())?;
        let document = state.document(spreadsheet_id)?;
        Ok(meta(spreadsheet_id, document))
    }

    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, StorageError> {
        let mut state = self.lock();
        state.begin(SheetsOperation::GetValues, range.to_string())?;

        let parsed = parse_range(range).ok_or_else(|| invalid(format!("Unable to parse range: {}", range)))?;
        let tab = state
            .document(spreadsheet_id)?
            .tab(&parsed.title)
            .ok_or_else(|| invalid(format!("Unable to parse range: {}", range)))?;

        Ok(trimmed(
            &tab.cells,
            parsed.start_row.saturating_sub(1),
            parsed.end_row,
            parsed.start_col,
            parsed.end_col.map(|c| c + 1),
        ))
    }

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<Value>>,
        _option: ValueInputOption,
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.begin(SheetsOperation::UpdateValues, range.to_string())?;

        let parsed = parse_range(range).ok_or_else(|| invalid(format!("Unable to parse range: {}", range)))?;
        let tab = state
            .document_mut(spreadsheet_id)?
            .tab_mut(&parsed.title)
            .ok_or_else(|| invalid(format!("Unable to parse range: {}", range)))?;

        for (offset, row) in rows.iter().enumerate() {
            let r = parsed.start_row.saturating_sub(1) + offset;
            if let Some(end_row) = parsed.end_row {
                if r >= end_row {
                    return Err(invalid("Requested writing within range, but tried to write past it"));
                }
            }
            if tab.cells.len() <= r {
                tab.cells.resize(r + 1, Vec::new());
            }
            let cells = &mut tab.cells[r];
            for (col_offset, value) in row.iter().enumerate() {
                let c = parsed.start_col + col_offset;
                if cells.len() <= c {
                    cells.resize(c + 1, String::new());
                }
                cells[c] = cell_text(value);
            }
        }
        Ok(())
    }

    async fn clear_values(&self, spreadsheet_id: &str, range: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.begin(SheetsOperation::ClearValues, range.to_string())?;

        let parsed = parse_range(range).ok_or_else(|| invalid(format!("Unable to parse range: {}", range)))?;
        let tab = state
            .document_mut(spreadsheet_id)?
            .tab_mut(&parsed.title)
            .ok_or_else(|| invalid(format!("Unable to parse range: {}", range)))?;

        let end_row = parsed.end_row.unwrap_or(tab.cells.len()).min(tab.cells.len());
        for r in (parsed.start_row.saturating_sub(1))..end_row {
            let row = &mut tab.cells[r];
            let end_col = parsed.end_col.map(|c| c + 1).unwrap_or(row.len()).min(row.len());
            for c in parsed.start_col.min(end_col)..end_col {
                row[c].clear();
            }
        }
        Ok(())
    }

    async fn batch_update(&self, spreadsheet_id: &str, requests: Vec<Value>) -> Result<BatchUpdateReply, StorageError> {
        let mut state = self.lock();
        state.begin(SheetsOperation::BatchUpdate, request_kinds(&requests))?;

        // 整批原子生效
        let mut document = state.document(spreadsheet_id)?.clone();
        let mut replies = Vec::with_capacity(requests.len());
        for request in &requests {
            replies.push(apply_request(&mut state, &mut document, request)?);
        }
        state.documents.insert(spreadsheet_id.to_string(), document);

        Ok(BatchUpdateReply { replies })
    }
}

/// 总是返回同一个内存表格的连接器
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    sheets: Arc<InMemorySheets>,
}

impl InMemoryConnector {
    pub fn new(sheets: Arc<InMemorySheets>) -> Self {
        Self { sheets }
    }

    pub fn sheets(&self) -> &Arc<InMemorySheets> {
        &self.sheets
    }
}

#[async_trait]
impl SheetsConnector for InMemoryConnector {
    async fn connect(&self, _config: &GoogleSheetsConfig) -> Result<Arc<dyn SheetsApi>, StorageError> {
        Ok(self.sheets.clone())
    }

    fn has_valid_credentials(&self, _config: &GoogleSheetsConfig) -> bool {
        true
    }
}
