//! A1 notation helpers for tab-qualified ranges.

/// 列序号（从 0 开始）转列字母：0 -> A, 25 -> Z, 26 -> AA
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// 列字母转列序号（从 0 开始）
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        n = n * 26 + (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
    }
    Some(n - 1)
}

/// 带引号的表名：'Course Report'，内部单引号加倍
pub fn quote_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// 去掉表名引号
pub fn unquote_title(quoted: &str) -> String {
    let trimmed = quoted.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        trimmed[1..trimmed.len() - 1].replace("''", "'")
    } else {
        trimmed.to_string()
    }
}

/// 整张表的范围
pub fn tab_range(title: &str) -> String {
    quote_title(title)
}

/// 单行范围，如 'Trustpilot'!A1:H1（行号从 1 开始）
pub fn row_range(title: &str, row: usize, columns: usize) -> String {
    format!(
        "{}!A{}:{}{}",
        quote_title(title),
        row,
        column_letter(columns.saturating_sub(1)),
        row
    )
}

/// 从 start_row 开始的开放范围，如 'Trustpilot'!A2:H
pub fn rows_from(title: &str, start_row: usize, columns: usize) -> String {
    format!(
        "{}!A{}:{}",
        quote_title(title),
        start_row,
        column_letter(columns.saturating_sub(1))
    )
}

/// 任意矩形区域
pub fn block_range(title: &str, start_col: usize, start_row: usize, end_col: usize, end_row: usize) -> String {
    format!(
        "{}!{}{}:{}{}",
        quote_title(title),
        column_letter(start_col),
        start_row,
        column_letter(end_col),
        end_row
    )
}

/// 解析后的范围；行号为 1 起始，end_row 为 None 表示不限行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRange {
    pub title: String,
    pub start_col: usize,
    pub start_row: usize,
    pub end_col: Option<usize>,
    pub end_row: Option<usize>,
}

/// 解析 `'Tab'!A2:H`、`Tab!B3:C9`、`'Tab'` 形式的范围
pub fn parse_range(range: &str) -> Option<ParsedRange> {
    let (title_part, cells) = match split_title(range) {
        Some((title, cells)) => (title, cells),
        None => (range, None),
    };
    let title = unquote_title(title_part);
    if title.is_empty() {
        return None;
    }

    let Some(cells) = cells else {
        return Some(ParsedRange {
            title,
            start_col: 0,
            start_row: 1,
            end_col: None,
            end_row: None,
        });
    };

    let mut parts = cells.splitn(2, ':');
    let (start_col, start_row) = parse_cell(parts.next()?)?;
    let (end_col, end_row) = match parts.next() {
        Some(end) => {
            let (col, row) = parse_cell(end)?;
            (col, row)
        }
        None => (start_col, start_row),
    };

    Some(ParsedRange {
        title,
        start_col: start_col.unwrap_or(0),
        start_row: start_row.unwrap_or(1),
        end_col,
        end_row,
    })
}

/// 拆分表名与单元格部分，表名中的 '!' 需在引号内
fn split_title(range: &str) -> Option<(&str, Option<&str>)> {
    if range.starts_with('\'') {
        let mut chars = range.char_indices().skip(1).peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    continue;
                }
                let title = &range[..=i];
                let rest = &range[i + 1..];
                return Some((title, rest.strip_prefix('!')));
            }
        }
        None
    } else {
        match range.rsplit_once('!') {
            Some((title, cells)) => Some((title, Some(cells))),
            None => Some((range, None)),
        }
    }
}

fn parse_cell(cell: &str) -> Option<(Option<usize>, Option<usize>)> {
    let cell = cell.trim();
    let split = cell.find(|c: char| c.is_ascii_digit()).unwrap_or(cell.len());
    let (letters, digits) = cell.split_at(split);
    let col = if letters.is_empty() { None } else { Some(column_index(letters)?) };
    let row = if digits.is_empty() { None } else { Some(digits.parse().ok()?) };
    if col.is_none() && row.is_none() {
        return None;
    }
    Some((col, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(7), "H");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_index("AA"), Some(26));
        assert_eq!(column_index("h"), Some(7));
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn test_ranges() {
        assert_eq!(rows_from("Trustpilot", 2, 8), "'Trustpilot'!A2:H");
        assert_eq!(row_range("Course Report", 1, 8), "'Course Report'!A1:H1");
        assert_eq!(block_range("Dashboard", 9, 1, 10, 5), "'Dashboard'!J1:K5");
        assert_eq!(tab_range("Ann's"), "'Ann''s'");
    }

    #[test]
    fn test_parse_range() {
        let parsed = parse_range("'Ann''s tab'!A2:H").unwrap();
        assert_eq!(parsed.title, "Ann's tab");
        assert_eq!(parsed.start_row, 2);
        assert_eq!(parsed.end_col, Some(7));
        assert_eq!(parsed.end_row, None);

        let parsed = parse_range("Sheet1!B3:C9").unwrap();
        assert_eq!(parsed.title, "Sheet1");
        assert_eq!((parsed.start_col, parsed.start_row), (1, 3));
        assert_eq!((parsed.end_col, parsed.end_row), (Some(2), Some(9)));

        let parsed = parse_range("'Dashboard'").unwrap();
        assert_eq!(parsed.title, "Dashboard");
        assert_eq!(parsed.end_col, None);
    }
}
