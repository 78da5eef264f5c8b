//! Builders for the `batchUpdate` requests that style a platform tab.

use serde_json::{json, Value};

use crate::models::SentimentCategory;

pub const LEGEND_TITLE: &str = "SENTIMENT COLOR KEY";

/// RGB，分量范围 0.0–1.0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl Color {
    pub const fn rgb(red: f64, green: f64, blue: f64) -> Self {
        Self { red, green, blue }
    }

    pub fn to_json(self) -> Value {
        json!({ "red": self.red, "green": self.green, "blue": self.blue })
    }
}

pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
pub const HEADER_GREY: Color = Color::rgb(0.8, 0.8, 0.8);
pub const POSITIVE_ROW: Color = Color::rgb(0.8, 1.0, 0.8);
pub const NEUTRAL_ROW: Color = Color::rgb(0.95, 0.95, 0.95);
pub const NEGATIVE_ROW: Color = Color::rgb(1.0, 0.8, 0.8);
pub const GRADIENT_LOW: Color = Color::rgb(1.0, 0.4, 0.4);
pub const GRADIENT_MID: Color = Color::rgb(1.0, 1.0, 0.4);
pub const GRADIENT_HIGH: Color = Color::rgb(0.4, 1.0, 0.4);

pub fn sentiment_color(category: SentimentCategory) -> Color {
    match category {
        SentimentCategory::Positive => POSITIVE_ROW,
        SentimentCategory::Neutral => NEUTRAL_ROW,
        SentimentCategory::Negative => NEGATIVE_ROW,
    }
}

fn grid_range(sheet_id: i64, start_row: usize, end_row: Option<usize>, start_col: usize, end_col: usize) -> Value {
    let mut range = json!({
        "sheetId": sheet_id,
        "startRowIndex": start_row,
        "startColumnIndex": start_col,
        "endColumnIndex": end_col,
    });
    if let Some(end_row) = end_row {
        range["endRowIndex"] = json!(end_row);
    }
    range
}

fn background(sheet_id: i64, start_row: usize, end_row: Option<usize>, start_col: usize, end_col: usize, color: Color) -> Value {
    json!({
        "repeatCell": {
            "range": grid_range(sheet_id, start_row, end_row, start_col, end_col),
            "cell": { "userEnteredFormat": { "backgroundColor": color.to_json() } },
            "fields": "userEnteredFormat.backgroundColor"
        }
    })
}

/// 表头：加粗、灰底、居中，并冻结首行
pub fn header_requests(sheet_id: i64, columns: usize) -> Vec<Value> {
    vec![
        json!({
            "repeatCell": {
                "range": grid_range(sheet_id, 0, Some(1), 0, columns),
                "cell": {
                    "userEnteredFormat": {
                        "backgroundColor": HEADER_GREY.to_json(),
                        "horizontalAlignment": "CENTER",
                        "textFormat": { "bold": true }
                    }
                },
                "fields": "userEnteredFormat(backgroundColor,textFormat,horizontalAlignment)"
            }
        }),
        json!({
            "updateSheetProperties": {
                "properties": { "sheetId": sheet_id, "gridProperties": { "frozenRowCount": 1 } },
                "fields": "gridProperties.frozenRowCount"
            }
        }),
    ]
}

/// 全量刷新后把数据区背景恢复为白色
pub fn reset_rows_request(sheet_id: i64, columns: usize) -> Value {
    background(sheet_id, 1, None, 0, columns, WHITE)
}

/// 按情感类别给数据行上色；`first_row` 为 0 起始的网格行号，相邻同色行合并为一个请求
pub fn row_color_requests(
    sheet_id: i64,
    columns: usize,
    first_row: usize,
    categories: &[Option<SentimentCategory>],
) -> Vec<Value> {
    let mut requests = Vec::new();
    let mut run_start = 0;

    while run_start < categories.len() {
        let current = categories[run_start];
        let mut run_end = run_start + 1;
        while run_end < categories.len() && categories[run_end] == current {
            run_end += 1;
        }
        if let Some(category) = current {
            requests.push(background(
                sheet_id,
                first_row + run_start,
                Some(first_row + run_end),
                0,
                columns,
                sentiment_color(category),
            ));
        }
        run_start = run_end;
    }

    requests
}

/// 删除工作表上已有的条件格式规则（每次删除索引 0）
pub fn delete_conditional_rules(sheet_id: i64, count: usize) -> Vec<Value> {
    (0..count)
        .map(|_| json!({ "deleteConditionalFormatRule": { "sheetId": sheet_id, "index": 0 } }))
        .collect()
}

/// 分数列的三色渐变：0 红、50 黄、100 绿
pub fn score_gradient_rule(sheet_id: i64, score_column: usize) -> Value {
    json!({
        "addConditionalFormatRule": {
            "rule": {
                "ranges": [grid_range(sheet_id, 1, None, score_column, score_column + 1)],
                "gradientRule": {
                    "minpoint": { "color": GRADIENT_LOW.to_json(), "type": "NUMBER", "value": "0" },
                    "midpoint": { "color": GRADIENT_MID.to_json(), "type": "NUMBER", "value": "50" },
                    "maxpoint": { "color": GRADIENT_HIGH.to_json(), "type": "NUMBER", "value": "100" }
                }
            },
            "index": 0
        }
    })
}

/// 图例所在列：数据列右侧空一列
pub fn legend_column(data_columns: usize) -> usize {
    data_columns + 1
}

/// 图例单元格：标题行加三类情感
pub fn legend_values() -> Vec<Vec<Value>> {
    let mut rows = vec![vec![json!(LEGEND_TITLE), json!("")]];
    rows.extend(SentimentCategory::all().iter().map(|category| {
        vec![json!(category.as_str()), json!(category.score_range())]
    }));
    rows
}

pub fn legend_requests(sheet_id: i64, legend_col: usize) -> Vec<Value> {
    let mut requests = vec![json!({
        "repeatCell": {
            "range": grid_range(sheet_id, 0, Some(1), legend_col, legend_col + 2),
            "cell": { "userEnteredFormat": { "textFormat": { "bold": true }, "backgroundColor": HEADER_GREY.to_json() } },
            "fields": "userEnteredFormat(textFormat,backgroundColor)"
        }
    })];
    for (offset, category) in SentimentCategory::all().iter().enumerate() {
        let row = offset + 1;
        requests.push(background(
            sheet_id,
            row,
            Some(row + 1),
            legend_col,
            legend_col + 2,
            sentiment_color(*category),
        ));
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_colors_merge_runs_and_skip_unscored() {
        use SentimentCategory::*;
        let categories = [Some(Positive), Some(Positive), None, Some(Negative)];
        let requests = row_color_requests(3, 8, 1, &categories);
        assert_eq!(requests.len(), 2);

        let first = &requests[0]["repeatCell"]["range"];
        assert_eq!(first["startRowIndex"], json!(1));
        assert_eq!(first["endRowIndex"], json!(3));
        assert_eq!(
            requests[0]["repeatCell"]["cell"]["userEnteredFormat"]["backgroundColor"],
            POSITIVE_ROW.to_json()
        );
        assert_eq!(requests[1]["repeatCell"]["range"]["startRowIndex"], json!(4));
    }

    #[test]
    fn test_gradient_targets_score_column() {
        let rule = score_gradient_rule(5, 6);
        let range = &rule["addConditionalFormatRule"]["rule"]["ranges"][0];
        assert_eq!(range["startColumnIndex"], json!(6));
        assert_eq!(range["endColumnIndex"], json!(7));
        assert_eq!(
            rule["addConditionalFormatRule"]["rule"]["gradientRule"]["midpoint"]["value"],
            json!("50")
        );
    }

    #[test]
    fn test_legend() {
        let values = legend_values();
        assert_eq!(values[0][0], json!(LEGEND_TITLE));
        assert_eq!(values[1], vec![json!("Positive"), json!("80-100")]);
        assert_eq!(values[3], vec![json!("Negative"), json!("0-49")]);
        assert_eq!(legend_column(8), 9);
        assert_eq!(legend_requests(1, 9).len(), 4);
    }

    #[test]
    fn test_delete_rules() {
        assert!(delete_conditional_rules(1, 0).is_empty());
        assert_eq!(delete_conditional_rules(1, 2).len(), 2);
    }
}
