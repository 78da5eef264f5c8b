use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::load_storage_config;
use crate::cli::args::Args;
use crate::config::{persist_spreadsheet_id, StorageConfig};
use crate::models::ReviewRecord;
use crate::storage::sheets::{HttpSheetsConnector, InMemoryConnector, InMemorySheets};
use crate::storage::StorageManager;

/// 读取评论文件：JSON 数组，或带 `reviews` 数组的对象；格式错误的条目被跳过
pub fn load_reviews(path: &Path) -> Result<Vec<ReviewRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read reviews from {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("reviews") {
            Some(Value::Array(items)) => items,
            _ => bail!("{} has no \"reviews\" array", path.display()),
        },
        _ => bail!("{} must contain a JSON array of reviews", path.display()),
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<ReviewRecord>(item) {
            Ok(record) => records.push(record),
            Err(e) => warn!(index, "skipping malformed review: {}", e),
        }
    }

    info!("Loaded {} reviews from {}", records.len(), path.display());
    Ok(records)
}

pub async fn handle_store(args: &Args, input: &Path, dry_run: bool) -> Result<bool> {
    let records = load_reviews(input)?;
    let load = load_storage_config(args);

    if dry_run {
        return run_dry(load.into_config(), &records).await;
    }

    let persist_to = (!load.is_defaults() && is_json(&args.config)).then(|| args.config.clone());
    let manager = StorageManager::from_load(load, Arc::new(HttpSheetsConnector));

    if !manager.is_storage_enabled() {
        println!("ℹ️  Storage is disabled in {}, nothing exported", args.config.display());
        return Ok(true);
    }

    let stored = manager.store_reviews(&records).await;

    if let Some(id) = manager.created_spreadsheet_id().await {
        match persist_to {
            Some(path) => {
                if let Err(e) = persist_spreadsheet_id(&path, &id) {
                    warn!("Could not save the new spreadsheet id to {}: {}", path.display(), e);
                }
            }
            None => println!("ℹ️  Set google_sheets.spreadsheet_id = \"{}\" to reuse this spreadsheet", id),
        }
    }

    if let Some(url) = manager.get_spreadsheet_url().await {
        println!("📊 Spreadsheet: {}", url);
    }

    if stored {
        println!("✅ Stored {} reviews", records.len());
    } else {
        println!("❌ Failed to store reviews, see the log for details");
    }
    Ok(stored)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// 写入内存文档并打印每个工作表的行数
async fn run_dry(mut config: StorageConfig, records: &[ReviewRecord]) -> Result<bool> {
    config.enabled = true;
    let sheets_config = config.google_sheets.get_or_insert_with(Default::default);
    sheets_config.enabled = true;
    sheets_config.create_if_missing = true;
    sheets_config.spreadsheet_id.clear();

    let sheets = Arc::new(InMemorySheets::new());
    let manager = StorageManager::with_sheets_connector(config, Arc::new(InMemoryConnector::new(sheets.clone())));
    let stored = manager.store_reviews(records).await;

    println!("🧪 Dry run: {} reviews", records.len());
    for id in sheets.spreadsheet_ids() {
        for title in sheets.tab_titles(&id) {
            println!("  {:<30} {} rows", title, sheets.data_rows(&id, &title).len());
        }
    }
    println!("  {} API calls", sheets.calls().len());

    Ok(stored)
}
