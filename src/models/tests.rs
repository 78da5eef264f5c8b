use super::review::{normalize_rating, truncate_content, MAX_CONTENT_CHARS, TRUNCATION_SUFFIX};
use super::*;
use crate::config::Column;
use serde_json::{json, Value};

#[test]
fn test_category_thresholds() {
    assert_eq!(SentimentCategory::from_score(0), SentimentCategory::Negative);
    assert_eq!(SentimentCategory::from_score(49), SentimentCategory::Negative);
    assert_eq!(SentimentCategory::from_score(50), SentimentCategory::Neutral);
    assert_eq!(SentimentCategory::from_score(79), SentimentCategory::Neutral);
    assert_eq!(SentimentCategory::from_score(80), SentimentCategory::Positive);
    assert_eq!(SentimentCategory::from_score(100), SentimentCategory::Positive);
}

#[test]
fn test_category_consistency_for_every_score() {
    for score in 0..=100u8 {
        let record = ReviewRecord::new("Trustpilot", "x").with_score(score);
        let category = record.sentiment_category().unwrap();
        let expected = match score {
            0..=49 => SentimentCategory::Negative,
            50..=79 => SentimentCategory::Neutral,
            _ => SentimentCategory::Positive,
        };
        assert_eq!(category, expected, "score {}", score);
    }
}

#[test]
fn test_no_score_no_category() {
    let record = ReviewRecord::new("G2", "fine");
    assert_eq!(record.sentiment_score(), None);
    assert_eq!(record.sentiment_category(), None);
}

#[test]
fn test_flat_input_with_disagreeing_category() {
    let record: ReviewRecord = serde_json::from_value(json!({
        "platform": "Trustpilot",
        "review_date": "2024-03-01",
        "rating": "5/5",
        "content": "Great course",
        "reviewer_name": "Ann",
        "sentiment_score": 91.6,
        "sentiment_category": "NEGATIVE"
    }))
    .unwrap();

    assert_eq!(record.sentiment_score(), Some(92));
    assert_eq!(record.sentiment_category(), Some(SentimentCategory::Positive));
}

#[test]
fn test_nested_sentiment_and_review_content() {
    let record: ReviewRecord = serde_json::from_value(json!({
        "platform": "Course Report",
        "review_content": "Too expensive",
        "rating": 2,
        "sentiment": { "score": 130, "category": "POSITIVE" },
        "relevant": true
    }))
    .unwrap();

    assert_eq!(record.content, "Too expensive");
    assert_eq!(record.rating, "2.0/5");
    assert_eq!(record.sentiment_score(), Some(100));
    assert_eq!(record.extra.get("relevant"), Some(&Value::Bool(true)));
}

#[test]
fn test_negative_score_clamped() {
    let record: ReviewRecord =
        serde_json::from_value(json!({ "platform": "G2", "content": "x", "sentiment_score": -4 })).unwrap();
    assert_eq!(record.sentiment_score(), Some(0));
}

#[test]
fn test_serialized_record_carries_derived_category() {
    let record = ReviewRecord::new("G2", "ok").with_score(60);
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["sentiment_category"], json!("Neutral"));
    assert_eq!(value["sentiment_score"], json!(60));
    assert!(value.get("sentiment").is_none());
}

#[test]
fn test_serialized_category_matches_sheet_cell() {
    let record = ReviewRecord::new("G2", "great").with_score(95);
    let value = serde_json::to_value(&record).unwrap();
    let row = record.to_row(&[Column::SentimentCategory], 1);
    assert_eq!(value["sentiment_category"], row[0]);
    assert_eq!(value["sentiment_category"], json!(SentimentCategory::Positive.as_str()));

    let back: ReviewRecord = serde_json::from_value(value).unwrap();
    assert_eq!(back.sentiment_category(), Some(SentimentCategory::Positive));
}

#[test]
fn test_content_truncation() {
    let long = "a".repeat(MAX_CONTENT_CHARS + 10);
    let stored = truncate_content(&long);
    assert!(stored.ends_with(TRUNCATION_SUFFIX));
    assert_eq!(stored.chars().count(), MAX_CONTENT_CHARS + TRUNCATION_SUFFIX.chars().count());
    assert_eq!(truncate_content("short"), "short");
}

#[test]
fn test_fingerprint_ignores_surrounding_whitespace() {
    let a = Fingerprint::new("Trustpilot ", "Great course");
    let b = Fingerprint::new("Trustpilot", "Great course\n");
    let c = Fingerprint::new("G2", "Great course");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.as_str().len(), 64);
}

#[test]
fn test_rating_normalization() {
    assert_eq!(normalize_rating("4/5"), Some(4.0));
    assert_eq!(normalize_rating("8 / 10"), Some(4.0));
    assert_eq!(normalize_rating("4.5"), Some(4.5));
    assert_eq!(normalize_rating("Rated 3/5 stars"), Some(3.0));
    assert_eq!(normalize_rating("excellent"), None);
    assert_eq!(normalize_rating("3/0"), None);
}

#[test]
fn test_row_round_trip_through_columns() {
    let columns = vec![
        Column::SerialNumber,
        Column::Platform,
        Column::Content,
        Column::SentimentScore,
        Column::SentimentCategory,
        Column::Extra("relevant".to_string()),
    ];
    let mut record = ReviewRecord::new("Trustpilot", "Loved it").with_score(85);
    record.extra.insert("relevant".to_string(), Value::Bool(false));

    let row = record.to_row(&columns, 7);
    assert_eq!(
        row,
        vec![json!(7), json!("Trustpilot"), json!("Loved it"), json!(85), json!("Positive"), json!("No")]
    );

    let cells: Vec<String> = vec!["7", "Trustpilot", "Loved it", "85", "Positive", "No"]
        .into_iter()
        .map(String::from)
        .collect();
    let parsed = ReviewRecord::from_row(&columns, &cells);
    assert_eq!(parsed.serial_number, Some(7));
    assert_eq!(parsed.platform, "Trustpilot");
    assert_eq!(parsed.sentiment_score(), Some(85));
    assert_eq!(parsed.fingerprint(), record.fingerprint());
}

#[test]
fn test_row_without_score_has_empty_cells() {
    let record = ReviewRecord::new("G2", "meh");
    let row = record.to_row(&[Column::SentimentScore, Column::SentimentCategory], 1);
    assert_eq!(row, vec![json!(""), json!("")]);
}
