use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};

use review_export::config::{load_config, MappingConfigSource};
use review_export::infrastructure::StorageError;
use review_export::models::ReviewRecord;
use review_export::storage::sheets::{InMemoryConnector, InMemorySheets};
use review_export::storage::{StorageBackend, StorageManager, DASHBOARD_TAB};

/// 记录调用顺序的测试后端
struct RecordingBackend {
    name: String,
    connects: bool,
    stores: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackend {
    fn new(name: &str, connects: bool, stores: bool) -> (Self, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backend = Self {
            name: name.to_string(),
            connects,
            stores,
            calls: calls.clone(),
        };
        (backend, calls)
    }

    fn log(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> bool {
        self.log("connect");
        self.connects
    }

    async fn disconnect(&mut self) {
        self.log("disconnect");
    }

    fn has_valid_credentials(&self) -> bool {
        self.connects
    }

    async fn store_reviews(&mut self, records: &[ReviewRecord]) -> bool {
        self.log(&format!("store {}", records.len()));
        self.stores
    }

    async fn get_reviews(&self) -> Result<Vec<ReviewRecord>, StorageError> {
        Ok(Vec::new())
    }

    async fn clear_data(&mut self) -> bool {
        true
    }
}

fn manager(config: serde_json::Value) -> (StorageManager, Arc<InMemorySheets>) {
    let sheets = Arc::new(InMemorySheets::new());
    sheets.add_spreadsheet("doc", "Reviews");
    let manager = StorageManager::from_load(
        load_config(&MappingConfigSource::new(config)),
        Arc::new(InMemoryConnector::new(sheets.clone())),
    );
    (manager, sheets)
}

fn sheets_enabled(incremental: bool) -> serde_json::Value {
    json!({
        "enabled": true,
        "google_sheets": {
            "enabled": true,
            "spreadsheet_id": "doc",
            "incremental_updates": incremental,
            "error_handling": { "max_retries": 2, "retry_delay": 0.0 }
        }
    })
}

fn reviews() -> Vec<ReviewRecord> {
    vec![
        ReviewRecord::new("Trustpilot", "Loved the mock interviews").with_score(88),
        ReviewRecord::new("Trustpilot", "Average experience").with_score(65),
        ReviewRecord::new("Trustpilot", "Refund took months").with_score(5),
    ]
}

#[test]
fn test_oversized_retry_delay_does_not_abort_construction() {
    let (manager, _sheets) = manager(json!({
        "enabled": true,
        "google_sheets": {
            "enabled": true,
            "spreadsheet_id": "doc",
            "error_handling": { "retry_delay": 1e30 }
        }
    }));

    assert!(manager.is_storage_enabled());
    assert_eq!(manager.backend_names(), vec!["google_sheets"]);
}

#[tokio::test]
async fn test_store_three_reviews_full_refresh() {
    let (manager, sheets) = manager(sheets_enabled(false));

    assert!(manager.is_storage_enabled());
    assert_eq!(manager.backend_names(), vec!["google_sheets"]);
    assert!(manager.store_reviews(&reviews()).await);

    let rows = sheets.data_rows("doc", "Trustpilot");
    let serials: Vec<&str> = rows.iter().map(|row| row[0].as_str()).collect();
    assert_eq!(serials, vec!["1", "2", "3"]);
    let categories: Vec<&str> = rows.iter().map(|row| row[7].as_str()).collect();
    assert_eq!(categories, vec!["Positive", "Neutral", "Negative"]);

    let dashboard = sheets.tab_values("doc", DASHBOARD_TAB).unwrap();
    assert!(dashboard
        .iter()
        .any(|row| row.len() > 1 && row[0] == "Total reviews" && row[1] == "3"));
    assert_eq!(
        manager.get_spreadsheet_url().await.as_deref(),
        Some("https://docs.google.com/spreadsheets/d/doc")
    );
    assert!(manager.created_spreadsheet_id().await.is_none());
}

#[tokio::test]
async fn test_disabled_provider_means_storage_disabled() {
    let (manager, sheets) = manager(json!({
        "enabled": true,
        "google_sheets": { "enabled": false, "spreadsheet_id": "doc" }
    }));

    assert!(!manager.is_storage_enabled());
    assert!(manager.backend_names().is_empty());
    assert!(manager.store_reviews(&reviews()).await);
    assert!(sheets.calls().is_empty());
}

#[tokio::test]
async fn test_unsupported_provider_only_fails_store() {
    let (manager, _) = manager(json!({
        "enabled": true,
        "airtable": { "enabled": true }
    }));

    assert!(manager.is_storage_enabled());
    assert!(manager.backend_names().is_empty());
    assert!(!manager.store_reviews(&reviews()).await);
}

#[tokio::test]
async fn test_results_are_combined_across_backends() {
    let (mut manager, sheets) = manager(sheets_enabled(true));
    let (backend, calls) = RecordingBackend::new("archive", true, false);
    manager.register_backend(Box::new(backend));

    assert_eq!(manager.backend_names(), vec!["archive", "google_sheets"]);
    assert!(!manager.store_reviews(&reviews()).await);

    // 一个后端失败不影响另一个后端写入
    assert_eq!(sheets.data_rows("doc", "Trustpilot").len(), 3);
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["connect".to_string(), "store 3".to_string(), "disconnect".to_string()]
    );
}

#[tokio::test]
async fn test_failed_connect_still_disconnects() {
    let (mut manager, _) = manager(json!({ "enabled": true, "archive": { "enabled": true } }));
    let (backend, calls) = RecordingBackend::new("archive", false, true);
    manager.register_backend(Box::new(backend));

    assert!(!manager.store_reviews(&reviews()).await);
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["connect".to_string(), "disconnect".to_string()]
    );

    let status = manager.get_credentials_status().await;
    assert_eq!(status.get("archive"), Some(&false));
}

#[tokio::test]
async fn test_all_backends_succeeding() {
    let (mut manager, sheets) = manager(sheets_enabled(true));
    let (backend, _) = RecordingBackend::new("archive", true, true);
    manager.register_backend(Box::new(backend));

    assert!(manager.store_reviews(&reviews()).await);
    assert!(manager.store_reviews(&reviews()).await);
    assert_eq!(sheets.data_rows("doc", "Trustpilot").len(), 3);
}

#[tokio::test]
async fn test_manager_rename_tab() {
    let (manager, sheets) = manager(sheets_enabled(true));
    assert!(manager.store_reviews(&reviews()).await);

    assert!(manager.rename_tab("Trustpilot", "Trustpilot (old)").await);
    assert!(sheets.tab_titles("doc").contains(&"Trustpilot (old)".to_string()));

    let (disabled, _) = manager_disabled();
    assert!(!disabled.rename_tab("Trustpilot", "x").await);
}

fn manager_disabled() -> (StorageManager, Arc<InMemorySheets>) {
    manager(json!({ "enabled": false }))
}

#[tokio::test]
async fn test_spreadsheet_created_when_id_missing() {
    let (manager, sheets) = manager(json!({
        "enabled": true,
        "google_sheets": {
            "enabled": true,
            "create_if_missing": true,
            "error_handling": { "retry_delay": 0.0 }
        }
    }));

    assert!(manager.store_reviews(&reviews()).await);
    let created = manager.created_spreadsheet_id().await.unwrap();
    assert!(sheets.spreadsheet_ids().contains(&created));
    assert_eq!(sheets.data_rows(&created, "Trustpilot").len(), 3);
    assert!(manager.get_spreadsheet_url().await.unwrap().ends_with(&created));
}
