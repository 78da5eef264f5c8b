use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::Column;

/// 单元格内容上限（Sheets 单元格最多 50 000 字符，留出余量）
pub const MAX_CONTENT_CHARS: usize = 40_000;
pub const TRUNCATION_SUFFIX: &str = "... (content truncated due to length)";

static RATING_FRACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*/\s*(\d+(?:\.\d+)?)").expect("rating regex is valid")
});

/// 情感类别，由分数按固定阈值推导
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SentimentCategory {
    Negative,
    Neutral,
    Positive,
}

impl SentimentCategory {
    /// 0–49 负面，50–79 中性，80–100 正面
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=49 => SentimentCategory::Negative,
            50..=79 => SentimentCategory::Neutral,
            _ => SentimentCategory::Positive,
        }
    }

    pub fn all() -> [SentimentCategory; 3] {
        [
            SentimentCategory::Positive,
            SentimentCategory::Neutral,
            SentimentCategory::Negative,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentCategory::Negative => "Negative",
            SentimentCategory::Neutral => "Neutral",
            SentimentCategory::Positive => "Positive",
        }
    }

    /// 图例中显示的分数区间
    pub fn score_range(&self) -> &'static str {
        match self {
            SentimentCategory::Negative => "0-49",
            SentimentCategory::Neutral => "50-79",
            SentimentCategory::Positive => "80-100",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "NEGATIVE" => Some(SentimentCategory::Negative),
            "NEUTRAL" => Some(SentimentCategory::Neutral),
            "POSITIVE" => Some(SentimentCategory::Positive),
            _ => None,
        }
    }
}

impl fmt::Display for SentimentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 去重指纹：(platform, content)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(platform: &str, content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(platform.trim().as_bytes());
        hasher.update([0x1f]);
        hasher.update(content.trim().as_bytes());
        let digest = hasher.finalize();
        Fingerprint(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 一条客户评论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawReview", into = "RawReview")]
pub struct ReviewRecord {
    /// 导出时按分页分配，从 1 开始
    pub serial_number: Option<u32>,
    pub platform: String,
    pub review_date: String,
    pub rating: String,
    pub content: String,
    pub reviewer_name: String,
    sentiment_score: Option<u8>,
    /// 其它字段（如 relevant），可通过自定义列导出
    pub extra: BTreeMap<String, Value>,
}

impl ReviewRecord {
    pub fn new(platform: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            serial_number: None,
            platform: platform.into(),
            review_date: String::new(),
            rating: String::new(),
            content: content.into(),
            reviewer_name: String::new(),
            sentiment_score: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.set_sentiment_score(Some(score as f64));
        self
    }

    pub fn with_rating(mut self, rating: impl Into<String>) -> Self {
        self.rating = rating.into();
        self
    }

    pub fn with_date(mut self, review_date: impl Into<String>) -> Self {
        self.review_date = review_date.into();
        self
    }

    pub fn with_reviewer(mut self, reviewer_name: impl Into<String>) -> Self {
        self.reviewer_name = reviewer_name.into();
        self
    }

    pub fn sentiment_score(&self) -> Option<u8> {
        self.sentiment_score
    }

    /// 没有分数就没有类别
    pub fn sentiment_category(&self) -> Option<SentimentCategory> {
        self.sentiment_score.map(SentimentCategory::from_score)
    }

    /// 四舍五入并截断到 0–100
    pub fn set_sentiment_score(&mut self, score: Option<f64>) {
        self.sentiment_score = score
            .filter(|s| s.is_finite())
            .map(|s| s.round().clamp(0.0, 100.0) as u8);
    }

    /// 写入单元格的内容（超长截断）
    pub fn stored_content(&self) -> String {
        truncate_content(&self.content)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.platform, &self.stored_content())
    }

    /// 评分折算为 5 分制
    pub fn normalized_rating(&self) -> Option<f64> {
        normalize_rating(&self.rating)
    }

    /// 按列顺序生成一行单元格
    pub fn to_row(&self, columns: &[Column], serial_number: u32) -> Vec<Value> {
        columns
            .iter()
            .map(|column| match column {
                Column::SerialNumber => Value::from(serial_number),
                Column::Platform => Value::String(self.platform.clone()),
                Column::ReviewDate => Value::String(self.review_date.clone()),
                Column::Rating => Value::String(self.rating.clone()),
                Column::Content => Value::String(self.stored_content()),
                Column::ReviewerName => Value::String(self.reviewer_name.clone()),
                Column::SentimentScore => self
                    .sentiment_score
                    .map(Value::from)
                    .unwrap_or_else(|| Value::String(String::new())),
                Column::SentimentCategory => Value::String(
                    self.sentiment_category()
                        .map(|c| c.as_str().to_string())
                        .unwrap_or_default(),
                ),
                Column::Extra(key) => render_extra(self.extra.get(key)),
            })
            .collect()
    }

    /// 从表格中读回的一行（格式化后的字符串）解析记录
    pub fn from_row(columns: &[Column], row: &[String]) -> Self {
        let mut record = ReviewRecord::new("", "");
        for (index, column) in columns.iter().enumerate() {
            let cell = row.get(index).map(|c| c.trim()).unwrap_or("");
            match column {
                Column::SerialNumber => record.serial_number = parse_serial(cell),
                Column::Platform => record.platform = cell.to_string(),
                Column::ReviewDate => record.review_date = cell.to_string(),
                Column::Rating => record.rating = cell.to_string(),
                Column::Content => record.content = row.get(index).cloned().unwrap_or_default(),
                Column::ReviewerName => record.reviewer_name = cell.to_string(),
                Column::SentimentScore => record.set_sentiment_score(cell.parse::<f64>().ok()),
                Column::SentimentCategory => {}
                Column::Extra(key) => {
                    if !cell.is_empty() {
                        record.extra.insert(key.clone(), Value::String(cell.to_string()));
                    }
                }
            }
        }
        record
    }
}

pub fn parse_serial(cell: &str) -> Option<u32> {
    cell.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 1.0)
        .map(|n| n as u32)
}

pub fn truncate_content(content: &str) -> String {
    if content.chars().count() > MAX_CONTENT_CHARS {
        let mut truncated: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        truncated.push_str(TRUNCATION_SUFFIX);
        truncated
    } else {
        content.to_string()
    }
}

/// "4/5"、"8/10"、"4.5" 折算为 5 分制
pub fn normalize_rating(rating: &str) -> Option<f64> {
    let rating = rating.trim();
    if let Some(captures) = RATING_FRACTION.captures(rating) {
        let numerator: f64 = captures.get(1)?.as_str().parse().ok()?;
        let denominator: f64 = captures.get(2)?.as_str().parse().ok()?;
        if denominator > 0.0 {
            return Some(numerator * 5.0 / denominator);
        }
        return None;
    }
    rating.parse::<f64>().ok().filter(|r| r.is_finite())
}

fn render_extra(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::String(String::new()),
        Some(Value::Bool(flag)) => Value::String(if *flag { "Yes" } else { "No" }.to_string()),
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Number(n)) => Value::Number(n.clone()),
        Some(other) => Value::String(other.to_string()),
    }
}

fn value_to_text(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

fn value_to_score(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawSentiment {
    #[serde(default)]
    score: Option<Value>,
    #[serde(default)]
    category: Option<String>,
}

/// 采集管道产出的原始评论结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawReview {
    #[serde(default, alias = "s_no", skip_serializing_if = "Option::is_none")]
    serial_number: Option<u32>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    review_date: Option<Value>,
    #[serde(default)]
    rating: Option<Value>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing)]
    review_content: Option<String>,
    #[serde(default)]
    reviewer_name: Option<String>,
    #[serde(default)]
    sentiment_score: Option<Value>,
    #[serde(default)]
    sentiment_category: Option<String>,
    #[serde(default, skip_serializing)]
    sentiment: Option<RawSentiment>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<RawReview> for ReviewRecord {
    fn from(raw: RawReview) -> Self {
        let rating = match raw.rating {
            Some(Value::Number(n)) => n
                .as_f64()
                .map(|r| format!("{:.1}/5", r))
                .unwrap_or_default(),
            other => value_to_text(other),
        };

        let content = raw
            .review_content
            .filter(|c| !c.is_empty())
            .or(raw.content)
            .unwrap_or_default();

        let nested = raw.sentiment.unwrap_or_default();
        let score = value_to_score(nested.score.as_ref()).or_else(|| value_to_score(raw.sentiment_score.as_ref()));

        let mut record = ReviewRecord {
            serial_number: raw.serial_number,
            platform: raw.platform.unwrap_or_default(),
            review_date: value_to_text(raw.review_date),
            rating,
            content,
            reviewer_name: raw.reviewer_name.unwrap_or_default(),
            sentiment_score: None,
            extra: raw.extra,
        };
        record.set_sentiment_score(score);

        let supplied = nested
            .category
            .or(raw.sentiment_category)
            .and_then(|c| SentimentCategory::parse(&c));
        if let (Some(supplied), Some(derived)) = (supplied, record.sentiment_category()) {
            if supplied != derived {
                tracing::debug!(
                    platform = %record.platform,
                    "supplied sentiment category {} disagrees with score, using {}",
                    supplied,
                    derived
                );
            }
        }

        record
    }
}

impl From<ReviewRecord> for RawReview {
    fn from(record: ReviewRecord) -> Self {
        let category = record.sentiment_category().map(|c| c.as_str().to_string());
        RawReview {
            serial_number: record.serial_number,
            platform: Some(record.platform),
            review_date: Some(Value::String(record.review_date)),
            rating: Some(Value::String(record.rating)),
            content: Some(record.content),
            review_content: None,
            reviewer_name: Some(record.reviewer_name),
            sentiment_score: record.sentiment_score.map(Value::from),
            sentiment_category: category,
            sentiment: None,
            extra: record.extra,
        }
    }
}
