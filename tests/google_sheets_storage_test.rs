use std::sync::Arc;

use review_export::config::{ErrorHandlingConfig, GoogleSheetsConfig};
use review_export::infrastructure::StorageError;
use review_export::models::{ReviewRecord, SentimentCategory};
use review_export::storage::sheets::{InMemoryConnector, InMemorySheets, SheetsOperation};
use review_export::storage::{GoogleSheetsStorage, StorageBackend, DASHBOARD_TAB};

const DOC: &str = "doc";

fn sheets_config(incremental: bool) -> GoogleSheetsConfig {
    GoogleSheetsConfig {
        spreadsheet_id: DOC.to_string(),
        incremental_updates: incremental,
        error_handling: ErrorHandlingConfig {
            max_retries: 3,
            retry_delay: 0.0,
            log_errors: false,
        },
        ..GoogleSheetsConfig::default()
    }
}

fn storage(config: GoogleSheetsConfig) -> (GoogleSheetsStorage, Arc<InMemorySheets>) {
    let sheets = Arc::new(InMemorySheets::new());
    sheets.add_spreadsheet(DOC, "Reviews");
    let storage = GoogleSheetsStorage::with_connector(config, Arc::new(InMemoryConnector::new(sheets.clone())));
    (storage, sheets)
}

fn trustpilot_reviews() -> Vec<ReviewRecord> {
    vec![
        ReviewRecord::new("Trustpilot", "Great course, landed an offer")
            .with_score(92)
            .with_rating("5/5")
            .with_reviewer("Ann"),
        ReviewRecord::new("Trustpilot", "Decent material, pricey").with_score(60),
        ReviewRecord::new("Trustpilot", "Support never answered").with_score(12),
    ]
}

fn serials(rows: &[Vec<String>]) -> Vec<String> {
    rows.iter().map(|row| row[0].clone()).collect()
}

fn dashboard_total(sheets: &InMemorySheets) -> Option<String> {
    sheets
        .tab_values(DOC, DASHBOARD_TAB)?
        .into_iter()
        .find(|row| row.first().map(String::as_str) == Some("Total reviews"))
        .and_then(|row| row.get(1).cloned())
}

#[tokio::test]
async fn test_full_refresh_is_idempotent() {
    let (mut storage, sheets) = storage(sheets_config(false));
    let records = trustpilot_reviews();

    assert!(storage.connect().await);
    assert!(storage.store_reviews(&records).await);
    let first = sheets.data_rows(DOC, "Trustpilot");
    assert_eq!(serials(&first), vec!["1", "2", "3"]);

    assert!(storage.store_reviews(&records).await);
    let second = sheets.data_rows(DOC, "Trustpilot");
    assert_eq!(first, second);
    assert_eq!(dashboard_total(&sheets).as_deref(), Some("3"));
}

#[tokio::test]
async fn test_header_is_written_and_frozen() {
    let (mut storage, sheets) = storage(sheets_config(false));
    assert!(storage.connect().await);
    assert!(storage.store_reviews(&trustpilot_reviews()).await);

    let values = sheets.tab_values(DOC, "Trustpilot").unwrap();
    assert_eq!(
        values[0],
        vec![
            "S.NO",
            "PLATFORM",
            "REVIEW DATE",
            "RATING",
            "REVIEW CONTENT",
            "REVIEWER NAME",
            "SENTIMENT SCORE",
            "SENTIMENT CATEGORY",
            "",
            "SENTIMENT COLOR KEY",
        ]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>()
    );
    assert_eq!(sheets.frozen_rows(DOC, "Trustpilot"), 1);
    assert_eq!(sheets.conditional_format_count(DOC, "Trustpilot"), 1);
}

fn existing_row(serial: &str, content: &str, score: &str, category: &str) -> Vec<String> {
    [serial, "Trustpilot", "2024-01-10", "4.0/5", content, "Ann", score, category]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

#[tokio::test]
async fn test_incremental_appends_only_new_reviews() {
    let (mut storage, sheets) = storage(sheets_config(true));
    let header: Vec<String> = storage.config().effective_columns().iter().map(|c| c.header()).collect();
    sheets.seed_tab(
        DOC,
        "Trustpilot",
        vec![
            header,
            existing_row("6", "Great course, landed an offer", "92", "Positive"),
            existing_row("7", "Support never answered", "12", "Negative"),
        ],
    );

    assert!(storage.connect().await);
    assert!(storage.store_reviews(&trustpilot_reviews()).await);

    let rows = sheets.data_rows(DOC, "Trustpilot");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2][0], "8");
    assert_eq!(rows[2][4], "Decent material, pricey");

    // 再次写入同样的数据不产生重复行
    assert!(storage.store_reviews(&trustpilot_reviews()).await);
    assert_eq!(sheets.data_rows(DOC, "Trustpilot").len(), 3);
}

#[tokio::test]
async fn test_platform_spellings_share_one_tab() {
    let (mut storage, sheets) = storage(sheets_config(true));
    let records = vec![
        ReviewRecord::new("Trustpilot", "Great course, landed an offer").with_score(92),
        ReviewRecord::new("trustpilot", "Support never answered").with_score(12),
    ];

    assert!(storage.connect().await);
    assert!(storage.store_reviews(&records).await);

    let trustpilot_tabs = sheets
        .tab_titles(DOC)
        .into_iter()
        .filter(|title| title.eq_ignore_ascii_case("trustpilot"))
        .count();
    assert_eq!(trustpilot_tabs, 1);
    assert_eq!(sheets.data_rows(DOC, "Trustpilot").len(), 2);
    assert_eq!(dashboard_total(&sheets).as_deref(), Some("2"));
}

#[tokio::test]
async fn test_existing_tab_is_reused_regardless_of_case() {
    let (mut storage, sheets) = storage(sheets_config(true));
    let header: Vec<String> = storage.config().effective_columns().iter().map(|c| c.header()).collect();
    sheets.seed_tab(
        DOC,
        "Trustpilot",
        vec![header, existing_row("1", "Great course, landed an offer", "92", "Positive")],
    );

    assert!(storage.connect().await);
    let records = vec![ReviewRecord::new("TRUSTPILOT", "Decent material, pricey").with_score(60)];
    assert!(storage.store_reviews(&records).await);

    assert!(!sheets.tab_titles(DOC).contains(&"TRUSTPILOT".to_string()));
    let rows = sheets.data_rows(DOC, "Trustpilot");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][0], "2");
}

#[tokio::test]
async fn test_reviews_are_split_by_platform() {
    let (mut storage, sheets) = storage(sheets_config(true));
    let mut records = trustpilot_reviews();
    records.push(ReviewRecord::new("G2", "Solid prep").with_score(81));
    records.push(ReviewRecord::new("", "No platform given").with_score(50));

    assert!(storage.connect().await);
    assert!(storage.store_reviews(&records).await);

    let titles = sheets.tab_titles(DOC);
    assert_eq!(titles[0], DASHBOARD_TAB);
    assert!(titles.contains(&"G2".to_string()));
    assert!(titles.contains(&"IK_Reviews".to_string()));
    assert_eq!(sheets.data_rows(DOC, "Trustpilot").len(), 3);
    assert_eq!(sheets.data_rows(DOC, "G2").len(), 1);
    assert_eq!(dashboard_total(&sheets).as_deref(), Some("5"));
}

#[tokio::test]
async fn test_written_category_matches_score() {
    let (mut storage, sheets) = storage(sheets_config(false));
    let records: Vec<ReviewRecord> = [0u8, 49, 50, 79, 80, 100]
        .iter()
        .map(|score| ReviewRecord::new("G2", format!("review {}", score)).with_score(*score))
        .collect();

    assert!(storage.connect().await);
    assert!(storage.store_reviews(&records).await);

    for row in sheets.data_rows(DOC, "G2") {
        let score: u8 = row[6].parse().unwrap();
        assert_eq!(row[7], SentimentCategory::from_score(score).as_str());
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let config = sheets_config(true);
    let max_attempts = config.error_handling.max_retries as usize;
    let (mut storage, sheets) = storage(config);
    sheets.fail_next(
        SheetsOperation::GetSpreadsheet,
        max_attempts as u32 - 1,
        StorageError::timeout("get spreadsheet"),
    );

    assert!(storage.connect().await);
    let attempts = storage.retry_log().attempts_for("open spreadsheet");
    assert_eq!(attempts.len(), max_attempts);
    assert!(attempts.last().unwrap().succeeded());
    assert_eq!(storage.retry_log().get_statistics().recovered_operations, 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_connect() {
    let (mut storage, sheets) = storage(sheets_config(true));
    sheets.fail_always(SheetsOperation::GetSpreadsheet, StorageError::timeout("get spreadsheet"));

    assert!(!storage.connect().await);
    assert!(!storage.is_connected());
    assert_eq!(storage.retry_log().attempts_for("open spreadsheet").len(), 3);
    assert!(!storage.store_reviews(&trustpilot_reviews()).await);
}

#[tokio::test]
async fn test_permission_denied_is_not_retried() {
    let (mut storage, sheets) = storage(sheets_config(true));
    sheets.fail_always(
        SheetsOperation::GetSpreadsheet,
        StorageError::from_status(403, r#"{"error": {"code": 403, "message": "The caller does not have permission"}}"#),
    );

    assert!(!storage.connect().await);
    assert_eq!(sheets.calls_for(SheetsOperation::GetSpreadsheet).len(), 1);
    assert_eq!(storage.retry_log().get_statistics().non_retryable_failures, 1);
}

#[tokio::test]
async fn test_unreadable_rows_fall_back_to_full_refresh() {
    let (mut storage, sheets) = storage(sheets_config(true));
    sheets.fail_always(
        SheetsOperation::GetValues,
        StorageError::Server {
            status: 500,
            message: "backend error".to_string(),
        },
    );

    assert!(storage.connect().await);
    assert!(storage.store_reviews(&trustpilot_reviews()).await);

    assert_eq!(serials(&sheets.data_rows(DOC, "Trustpilot")), vec!["1", "2", "3"]);
    assert_eq!(storage.retry_log().attempts_for("read existing rows").len(), 3);
    assert!(!storage.retry_log().attempts_for("clear rows").is_empty());
}

#[tokio::test]
async fn test_formatting_failure_keeps_rows() {
    let (mut storage, sheets) = storage(sheets_config(false));
    sheets.fail_when(
        SheetsOperation::BatchUpdate,
        "addConditionalFormatRule",
        StorageError::InvalidRequest {
            status: 400,
            message: "Invalid requests[3]".to_string(),
        },
    );

    assert!(storage.connect().await);
    assert!(storage.store_reviews(&trustpilot_reviews()).await);
    assert_eq!(sheets.data_rows(DOC, "Trustpilot").len(), 3);
    assert_eq!(sheets.conditional_format_count(DOC, "Trustpilot"), 0);
}

#[tokio::test]
async fn test_formatting_can_be_disabled() {
    let mut config = sheets_config(false);
    config.format_by_sentiment = false;
    config.create_dashboard = false;
    config.dashboard_options.add_color_legend = false;
    let (mut storage, sheets) = storage(config);

    assert!(storage.connect().await);
    assert!(storage.store_reviews(&trustpilot_reviews()).await);

    assert_eq!(sheets.conditional_format_count(DOC, "Trustpilot"), 0);
    assert!(!sheets.tab_titles(DOC).contains(&DASHBOARD_TAB.to_string()));
    assert_eq!(sheets.tab_values(DOC, "Trustpilot").unwrap()[0].len(), 8);
}

#[tokio::test]
async fn test_dashboard_stays_first_and_reflects_all_runs() {
    let (mut storage, sheets) = storage(sheets_config(true));
    assert!(storage.connect().await);
    assert!(storage.store_reviews(&trustpilot_reviews()).await);
    assert!(storage
        .store_reviews(&[ReviewRecord::new("G2", "Solid prep").with_score(81)])
        .await);

    assert_eq!(sheets.tab_titles(DOC)[0], DASHBOARD_TAB);
    assert_eq!(dashboard_total(&sheets).as_deref(), Some("4"));
    // 重新生成时旧图表被删除
    assert_eq!(sheets.chart_count(DOC, DASHBOARD_TAB), 3);
}

#[tokio::test]
async fn test_creates_spreadsheet_when_missing() {
    let mut config = sheets_config(true);
    config.spreadsheet_id.clear();
    let (mut storage, sheets) = storage(config);

    assert!(storage.connect().await);
    let created = storage.created_document_id().expect("spreadsheet should be created");
    assert_eq!(storage.spreadsheet_id(), Some(created.as_str()));
    assert_eq!(
        storage.spreadsheet_url(),
        Some(format!("https://docs.google.com/spreadsheets/d/{}", created))
    );
    assert!(sheets.spreadsheet_ids().contains(&created));
    assert_eq!(sheets.calls_for(SheetsOperation::CreateSpreadsheet).len(), 1);
}

#[tokio::test]
async fn test_missing_id_without_create_fails() {
    let mut config = sheets_config(true);
    config.spreadsheet_id.clear();
    config.create_if_missing = false;
    let (mut storage, sheets) = storage(config);

    assert!(!storage.connect().await);
    assert!(sheets.calls_for(SheetsOperation::CreateSpreadsheet).is_empty());
    assert!(storage.spreadsheet_url().is_none());
}

#[tokio::test]
async fn test_rename_tab() {
    let (mut storage, sheets) = storage(sheets_config(true));
    assert!(storage.connect().await);
    assert!(storage.store_reviews(&trustpilot_reviews()).await);

    assert!(storage.rename_tab("Trustpilot", "Trustpilot 2024").await);
    assert!(sheets.tab_titles(DOC).contains(&"Trustpilot 2024".to_string()));
    assert!(!storage.rename_tab("Trustpilot", "Other").await);
    assert!(!storage.rename_tab("Trustpilot 2024", "Sheet1").await);
}

#[tokio::test]
async fn test_get_reviews_and_clear_data() {
    let (mut storage, sheets) = storage(sheets_config(true));
    assert!(storage.connect().await);
    assert!(storage.store_reviews(&trustpilot_reviews()).await);

    let stored = storage.get_reviews().await.unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].serial_number, Some(1));
    assert_eq!(stored[0].sentiment_category(), Some(SentimentCategory::Positive));
    assert_eq!(stored[2].sentiment_category(), Some(SentimentCategory::Negative));

    assert!(storage.clear_data().await);
    assert!(sheets.data_rows(DOC, "Trustpilot").is_empty());
    assert_eq!(sheets.tab_values(DOC, "Trustpilot").unwrap()[0][0], "S.NO");
    assert_eq!(dashboard_total(&sheets).as_deref(), Some("0"));
}

#[tokio::test]
async fn test_operations_require_connection() {
    let (mut storage, sheets) = storage(sheets_config(true));

    assert!(!storage.store_reviews(&trustpilot_reviews()).await);
    assert!(matches!(
        storage.get_reviews().await,
        Err(StorageError::NotConnected { .. })
    ));
    assert!(sheets.calls().is_empty());

    assert!(storage.connect().await);
    storage.disconnect().await;
    assert!(!storage.is_connected());
    assert!(!storage.clear_data().await);
}
