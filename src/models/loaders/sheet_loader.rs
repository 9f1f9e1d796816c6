//! 表格加载与条目枚举
//!
//! 读取 `.xlsx` 中的一张表到内存网格（行号从 1 开始，与 Excel 一致），
//! 再按行范围枚举出工作条目。

use std::path::Path;

use calamine::{open_workbook, Reader, Xlsx};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::row_range::RowRange;
use crate::models::work_item::{dedup_by_id, WorkItem};

/// 条目来源
pub trait WorkSource {
    /// 最大行号（1-based），用于解析开放范围
    fn max_extent(&self) -> u32;

    /// 读取单元格，越界或为空时返回 `None`
    fn cell(&self, row: u32, col: usize) -> Option<&str>;

    /// 单元格是否为空
    fn is_blank(&self, row: u32, col: usize) -> bool {
        self.cell(row, col).map_or(true, |v| v.trim().is_empty())
    }
}

/// 内存中的表格
#[derive(Debug, Clone, Default)]
pub struct SheetGrid {
    name: String,
    /// rows[0] 对应第 1 行
    rows: Vec<Vec<String>>,
}

impl SheetGrid {
    /// 从现成的行数据构造（第一项为第 1 行）
    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// 从 `.xlsx` 文件加载一张表
    ///
    /// # 参数
    /// - `path`: 表格路径
    /// - `sheet`: 表名，`None` 时取第一张表
    pub fn open(path: &Path, sheet: Option<&str>) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::InputNotFound(path.to_path_buf()));
        }

        let sheet_error = |message: String| AppError::Sheet {
            path: path.display().to_string(),
            message,
        };

        let mut workbook: Xlsx<_> =
            open_workbook(path).map_err(|e| sheet_error(format!("无法打开: {}", e)))?;

        let sheet_name = match sheet {
            Some(name) => name.to_string(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| sheet_error("工作簿中没有任何表".to_string()))?,
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| sheet_error(format!("无法读取表 '{}': {}", sheet_name, e)))?;

        let mut rows: Vec<Vec<String>> = Vec::new();
        if let Some((start_row, start_col)) = range.start() {
            // 表格可能不是从 A1 开始，补齐前面的空行空列
            rows.resize(start_row as usize, Vec::new());
            for row in range.rows() {
                let mut cells = vec![String::new(); start_col as usize];
                cells.extend(row.iter().map(|c| c.to_string().trim().to_string()));
                rows.push(cells);
            }
        }

        info!(
            "✓ 已加载表 '{}'，共 {} 行 ({})",
            sheet_name,
            rows.len(),
            path.display()
        );

        Ok(Self {
            name: sheet_name,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl WorkSource for SheetGrid {
    fn max_extent(&self) -> u32 {
        self.rows.len() as u32
    }

    fn cell(&self, row: u32, col: usize) -> Option<&str> {
        if row == 0 {
            return None;
        }
        self.rows
            .get(row as usize - 1)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// 将 Excel 列字母（如 `A`、`AA`）转换为 0-based 列索引
pub fn column_index(letters: &str) -> AppResult<usize> {
    let letters = letters.trim();
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::config(format!("非法列字母: '{}'", letters)));
    }

    let index = letters
        .to_ascii_uppercase()
        .bytes()
        .try_fold(0usize, |acc, b| {
            acc.checked_mul(26)?.checked_add((b - b'A' + 1) as usize)
        })
        .ok_or_else(|| AppError::config(format!("列字母过长: '{}'", letters)))?;
    Ok(index - 1)
}

/// 解析逗号分隔的列字母，如 `"D,F"`
pub fn parse_columns(spec: &str) -> AppResult<Vec<usize>> {
    let columns = spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(column_index)
        .collect::<AppResult<Vec<_>>>()?;

    if columns.is_empty() {
        return Err(AppError::config(format!("列参数为空: '{}'", spec)));
    }
    Ok(columns)
}

/// 搜索关键字列，`exact` 表示需要加双引号做精确匹配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchColumn {
    pub index: usize,
    pub exact: bool,
}

/// 解析搜索列参数，如 `"C*,D,AA*"`
pub fn parse_search_columns(spec: &str) -> AppResult<Vec<SearchColumn>> {
    let columns = spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|token| {
            let (letters, exact) = match token.strip_suffix('*') {
                Some(letters) => (letters, true),
                None => (token, false),
            };
            Ok(SearchColumn {
                index: column_index(letters)?,
                exact,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    if columns.is_empty() {
        return Err(AppError::config(format!("搜索列参数为空: '{}'", spec)));
    }
    Ok(columns)
}

/// 用一行中的若干列拼出搜索关键字
pub fn build_keywords(source: &impl WorkSource, row: u32, columns: &[SearchColumn]) -> String {
    columns
        .iter()
        .filter_map(|col| {
            let value = source.cell(row, col.index)?.replace('\n', " ");
            let value = value.trim();
            if value.is_empty() {
                None
            } else if col.exact {
                Some(format!("\"{}\"", value))
            } else {
                Some(value.to_string())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 按行范围列出有效行号
///
/// 开放范围遇到哨兵列为空的行即停止；闭区间跳过哨兵列为空的行。
pub fn rows_in_range(
    source: &impl WorkSource,
    range: RowRange,
    sentinel: usize,
) -> AppResult<Vec<u32>> {
    let resolved = range.resolve(source.max_extent())?;
    let mut rows = Vec::new();

    for row in resolved.rows() {
        if source.is_blank(row, sentinel) {
            if resolved.stop_at_blank {
                debug!("第 {} 行哨兵列为空，停止读取", row);
                break;
            }
            continue;
        }
        rows.push(row);
    }

    if resolved.stop_at_blank {
        let last = rows.last().copied().unwrap_or(resolved.start.saturating_sub(1));
        info!("实际读取行范围: {}-{}", resolved.start, last);
    }
    Ok(rows)
}

/// 按行范围枚举工作条目
///
/// # 参数
/// - `source`: 条目来源
/// - `range`: 行范围
/// - `sentinel`: 哨兵列，见 [`rows_in_range`]
/// - `build`: 把一行转换成若干条目（一行多个 URL 时返回多个）
///
/// # 返回
/// 按行顺序排列、按身份去重后的条目
pub fn enumerate<S, P, F, I>(
    source: &S,
    range: RowRange,
    sentinel: usize,
    mut build: F,
) -> AppResult<Vec<WorkItem<P>>>
where
    S: WorkSource,
    F: FnMut(&S, u32) -> I,
    I: IntoIterator<Item = WorkItem<P>>,
{
    let items = rows_in_range(source, range, sentinel)?
        .into_iter()
        .flat_map(|row| build(source, row))
        .collect();
    Ok(dedup_by_id(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::work_item::ItemId;

    fn grid(rows: &[&[&str]]) -> SheetGrid {
        SheetGrid::from_rows(
            "Sheet1",
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn ten_rows() -> SheetGrid {
        let rows: Vec<Vec<String>> = (1..=10)
            .map(|i| vec![format!("name{}", i), format!("https://{}.example", i)])
            .collect();
        SheetGrid::from_rows("Sheet1", rows)
    }

    fn row_ids(source: &SheetGrid, spec: &str) -> AppResult<Vec<u32>> {
        let items = enumerate(source, RowRange::parse(spec)?, 0, |s, row| {
            Some(WorkItem::new(ItemId::row(s.name(), row), row))
        })?;
        Ok(items.into_iter().map(|i| i.payload).collect())
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A").unwrap(), 0);
        assert_eq!(column_index("c").unwrap(), 2);
        assert_eq!(column_index("Z").unwrap(), 25);
        assert_eq!(column_index("AA").unwrap(), 26);
        assert!(column_index("A1").is_err());
        assert!(column_index("").is_err());
        assert!(matches!(column_index(&"A".repeat(30)), Err(AppError::Config(_))));
    }

    #[test]
    fn test_parse_search_columns() {
        let cols = parse_search_columns("C*, D ,AA*").unwrap();
        assert_eq!(
            cols,
            vec![
                SearchColumn { index: 2, exact: true },
                SearchColumn { index: 3, exact: false },
                SearchColumn { index: 26, exact: true },
            ]
        );
        assert!(parse_search_columns(" , ").is_err());
    }

    #[test]
    fn test_build_keywords() {
        let g = grid(&[&["", "", "Nature\nReviews", "host", ""]]);
        let cols = parse_search_columns("C*,D,E").unwrap();
        assert_eq!(build_keywords(&g, 1, &cols), "\"Nature Reviews\" host");
    }

    #[test]
    fn test_enumerate_ranges() {
        let g = ten_rows();
        assert_eq!(row_ids(&g, "4+").unwrap(), vec![4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(row_ids(&g, "4-6").unwrap(), vec![4, 5, 6]);
        assert!(matches!(
            row_ids(&g, "7-3"),
            Err(AppError::InvalidRangeSpec { .. })
        ));
        assert!(matches!(
            row_ids(&g, "11-15"),
            Err(AppError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_open_range_stops_at_blank_sentinel() {
        let g = grid(&[&["h"], &["a"], &["b"], &[""], &["c"]]);
        assert_eq!(row_ids(&g, "2+").unwrap(), vec![2, 3]);
        // 闭区间跳过空行继续
        assert_eq!(row_ids(&g, "2-5").unwrap(), vec![2, 3, 5]);
    }

    #[test]
    fn test_enumerate_dedups_identity() {
        let g = grid(&[&["a", "https://x"], &["b", "https://x"], &["c", "https://y"]]);
        let items = enumerate(&g, RowRange::parse("1+").unwrap(), 0, |s, row| {
            s.cell(row, 1).map(|url| WorkItem::new(url, row))
        })
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].payload, 1);
    }
}
