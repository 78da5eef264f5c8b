//! Dashboard metrics computed from the rows read back out of every platform tab.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::config::DashboardOptions;
use crate::models::{ReviewRecord, SentimentCategory};

pub const DASHBOARD_TAB: &str = "Dashboard";
pub const DASHBOARD_TITLE: &str = "REVIEW DASHBOARD";
/// 图表放在第 E 列
const CHART_COLUMN: usize = 4;
const CHART_ROW_SPACING: usize = 20;

/// 汇总指标
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSummary {
    pub total: usize,
    /// 5 分制平均评分
    pub average_rating: Option<f64>,
    pub sentiment_counts: BTreeMap<SentimentCategory, usize>,
    /// 按数量降序，数量相同按平台名
    pub platform_counts: Vec<(String, usize)>,
    /// 0–9, 10–19, … 90–100
    pub histogram: [usize; 10],
}

impl DashboardSummary {
    pub fn from_records(records: &[ReviewRecord]) -> Self {
        let mut summary = DashboardSummary {
            total: records.len(),
            ..Default::default()
        };

        let ratings: Vec<f64> = records.iter().filter_map(ReviewRecord::normalized_rating).collect();
        if !ratings.is_empty() {
            summary.average_rating = Some(ratings.iter().sum::<f64>() / ratings.len() as f64);
        }

        let mut platforms: BTreeMap<String, usize> = BTreeMap::new();
        for record in records {
            if let Some(score) = record.sentiment_score() {
                *summary
                    .sentiment_counts
                    .entry(SentimentCategory::from_score(score))
                    .or_insert(0) += 1;
                summary.histogram[histogram_bucket(score)] += 1;
            }
            let platform = record.platform.trim();
            let platform = if platform.is_empty() { "Unknown" } else { platform };
            *platforms.entry(platform.to_string()).or_insert(0) += 1;
        }

        let mut platform_counts: Vec<(String, usize)> = platforms.into_iter().collect();
        platform_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary.platform_counts = platform_counts;
        summary
    }

    pub fn sentiment_count(&self, category: SentimentCategory) -> usize {
        self.sentiment_counts.get(&category).copied().unwrap_or(0)
    }

    /// 占全部评论的百分比
    pub fn sentiment_percentage(&self, category: SentimentCategory) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.sentiment_count(category) as f64 * 100.0 / self.total as f64
        }
    }

    pub fn render(&self, options: &DashboardOptions, updated_at: DateTime<Utc>) -> DashboardLayout {
        let mut layout = DashboardLayout::default();
        let rows = &mut layout.rows;

        rows.push(vec![json!(DASHBOARD_TITLE)]);
        rows.push(vec![
            json!("Last updated"),
            json!(updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ]);
        rows.push(Vec::new());
        rows.push(vec![json!("SUMMARY")]);
        rows.push(vec![json!("Total reviews"), json!(self.total)]);
        rows.push(vec![
            json!("Average rating"),
            json!(self
                .average_rating
                .map(|r| format!("{:.1}/5", r))
                .unwrap_or_else(|| "N/A".to_string())),
        ]);
        rows.push(Vec::new());

        if options.show_sentiment_distribution {
            let header = rows.len();
            rows.push(vec![json!("SENTIMENT"), json!("COUNT"), json!("PERCENTAGE")]);
            for category in SentimentCategory::all() {
                rows.push(vec![
                    json!(category.as_str()),
                    json!(self.sentiment_count(category)),
                    json!(format!("{:.1}%", self.sentiment_percentage(category))),
                ]);
            }
            layout.sentiment_block = Some(Block { header, len: 3 });
            rows.push(Vec::new());
        }

        if options.show_platform_distribution {
            let header = rows.len();
            rows.push(vec![json!("PLATFORM"), json!("COUNT")]);
            for (platform, count) in &self.platform_counts {
                rows.push(vec![json!(platform), json!(count)]);
            }
            layout.platform_block = Some(Block {
                header,
                len: self.platform_counts.len(),
            });
            rows.push(Vec::new());
        }

        if options.show_score_histogram {
            let header = rows.len();
            rows.push(vec![json!("SCORE RANGE"), json!("COUNT")]);
            for (bucket, count) in self.histogram.iter().enumerate() {
                rows.push(vec![json!(bucket_label(bucket)), json!(count)]);
            }
            layout.histogram_block = Some(Block { header, len: 10 });
        }

        layout
    }
}

/// 90–100 合为最后一档
pub fn histogram_bucket(score: u8) -> usize {
    ((score / 10) as usize).min(9)
}

fn bucket_label(bucket: usize) -> String {
    if bucket == 9 {
        "90-100".to_string()
    } else {
        format!("{}-{}", bucket * 10, bucket * 10 + 9)
    }
}

/// 一段表格数据：表头所在行（0 起始）与数据行数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub header: usize,
    pub len: usize,
}

/// 仪表板单元格及各数据块的位置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardLayout {
    pub rows: Vec<Vec<Value>>,
    pub sentiment_block: Option<Block>,
    pub platform_block: Option<Block>,
    pub histogram_block: Option<Block>,
}

impl DashboardLayout {
    /// 标题加粗等格式
    pub fn format_requests(&self, sheet_id: i64) -> Vec<Value> {
        let mut requests = vec![json!({
            "repeatCell": {
                "range": { "sheetId": sheet_id, "startRowIndex": 0, "endRowIndex": 1, "startColumnIndex": 0, "endColumnIndex": 1 },
                "cell": { "userEnteredFormat": { "textFormat": { "bold": true, "fontSize": 16 } } },
                "fields": "userEnteredFormat.textFormat"
            }
        })];

        let headers = [self.sentiment_block, self.platform_block, self.histogram_block];
        for block in headers.iter().flatten() {
            requests.push(json!({
                "repeatCell": {
                    "range": { "sheetId": sheet_id, "startRowIndex": block.header, "endRowIndex": block.header + 1, "startColumnIndex": 0, "endColumnIndex": 3 },
                    "cell": { "userEnteredFormat": { "textFormat": { "bold": true } } },
                    "fields": "userEnteredFormat.textFormat"
                }
            }));
        }
        requests
    }

    /// 饼图（情感分布）、条形图（平台分布）、柱状图（分数直方图）
    pub fn chart_requests(&self, sheet_id: i64) -> Vec<Value> {
        let mut requests = Vec::new();
        let mut anchor_row = 0;

        if let Some(block) = self.sentiment_block.filter(|b| b.len > 0) {
            requests.push(json!({
                "addChart": {
                    "chart": {
                        "spec": {
                            "title": "Sentiment Distribution",
                            "pieChart": {
                                "legendPosition": "RIGHT_LEGEND",
                                "domain": { "sourceRange": { "sources": [source(sheet_id, block, 0)] } },
                                "series": { "sourceRange": { "sources": [source(sheet_id, block, 1)] } }
                            }
                        },
                        "position": anchor(sheet_id, anchor_row)
                    }
                }
            }));
            anchor_row += CHART_ROW_SPACING;
        }

        if let Some(block) = self.platform_block.filter(|b| b.len > 0) {
            requests.push(basic_chart(sheet_id, block, "Platform Distribution", "BAR", anchor_row));
            anchor_row += CHART_ROW_SPACING;
        }

        if let Some(block) = self.histogram_block.filter(|b| b.len > 0) {
            requests.push(basic_chart(sheet_id, block, "Sentiment Score Histogram", "COLUMN", anchor_row));
        }

        requests
    }
}

fn source(sheet_id: i64, block: Block, column: usize) -> Value {
    json!({
        "sheetId": sheet_id,
        "startRowIndex": block.header + 1,
        "endRowIndex": block.header + 1 + block.len,
        "startColumnIndex": column,
        "endColumnIndex": column + 1
    })
}

fn anchor(sheet_id: i64, row: usize) -> Value {
    json!({
        "overlayPosition": {
            "anchorCell": { "sheetId": sheet_id, "rowIndex": row, "columnIndex": CHART_COLUMN }
        }
    })
}

fn basic_chart(sheet_id: i64, block: Block, title: &str, chart_type: &str, anchor_row: usize) -> Value {
    let value_axis = if chart_type == "BAR" { "BOTTOM_AXIS" } else { "LEFT_AXIS" };
    let domain_axis = if chart_type == "BAR" { "LEFT_AXIS" } else { "BOTTOM_AXIS" };
    json!({
        "addChart": {
            "chart": {
                "spec": {
                    "title": title,
                    "basicChart": {
                        "chartType": chart_type,
                        "legendPosition": "NO_LEGEND",
                        "axis": [
                            { "position": domain_axis },
                            { "position": value_axis, "title": "Reviews" }
                        ],
                        "domains": [{ "domain": { "sourceRange": { "sources": [source(sheet_id, block, 0)] } } }],
                        "series": [{
                            "series": { "sourceRange": { "sources": [source(sheet_id, block, 1)] } },
                            "targetAxis": value_axis
                        }]
                    }
                },
                "position": anchor(sheet_id, anchor_row)
            }
        }
    })
}
