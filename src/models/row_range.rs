//! 行范围
//!
//! 支持两种写法：
//! - `"4+"`：从第 4 行开始，直到哨兵列为空（或到最大行）
//! - `"4-99"`：闭区间，结束行超过最大行时截断到最大行

use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// 行范围描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRange {
    /// `N+`
    Open { start: u32 },
    /// `A-B`
    Closed { start: u32, end: u32 },
}

/// 结合数据源最大行解析后的范围（闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u32,
    pub end: u32,
    /// 开放范围遇到空哨兵行即停止
    pub stop_at_blank: bool,
}

impl ResolvedRange {
    pub fn rows(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl RowRange {
    /// 解析行范围字符串
    ///
    /// # 参数
    /// - `spec`: 如 `"4+"` 或 `"4-99"`
    ///
    /// # 返回
    /// 无法解析为正整数、或起始行大于结束行时返回 `InvalidRangeSpec`
    pub fn parse(spec: &str) -> AppResult<Self> {
        let trimmed = spec.trim();

        if let Some(start) = trimmed.strip_suffix('+') {
            let start = parse_row(spec, start)?;
            return Ok(RowRange::Open { start });
        }

        let (start, end) = trimmed
            .split_once('-')
            .ok_or_else(|| AppError::invalid_range(spec, "请使用 '4+' 或 '4-99' 格式"))?;
        let start = parse_row(spec, start)?;
        let end = parse_row(spec, end)?;
        if start > end {
            return Err(AppError::invalid_range(spec, "起始行大于结束行"));
        }

        Ok(RowRange::Closed { start, end })
    }

    pub fn start(&self) -> u32 {
        match self {
            RowRange::Open { start } | RowRange::Closed { start, .. } => *start,
        }
    }

    /// 结合最大行得到实际的行区间
    ///
    /// 起始行大于 `max_extent` 时返回 `RangeOutOfBounds`；
    /// 闭区间的结束行超过 `max_extent` 时截断。
    pub fn resolve(&self, max_extent: u32) -> AppResult<ResolvedRange> {
        let start = self.start();
        if start > max_extent {
            return Err(AppError::RangeOutOfBounds { start, max_extent });
        }

        Ok(match *self {
            RowRange::Open { start } => ResolvedRange {
                start,
                end: max_extent,
                stop_at_blank: true,
            },
            RowRange::Closed { start, end } => ResolvedRange {
                start,
                end: end.min(max_extent),
                stop_at_blank: false,
            },
        })
    }
}

impl FromStr for RowRange {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RowRange::parse(s)
    }
}

fn parse_row(spec: &str, part: &str) -> AppResult<u32> {
    let part = part.trim();
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::invalid_range(spec, format!("'{}' 不是行号", part)));
    }
    let row: u32 = part
        .parse()
        .map_err(|_| AppError::invalid_range(spec, format!("'{}' 超出行号范围", part)))?;
    if row == 0 {
        return Err(AppError::invalid_range(spec, "行号从 1 开始"));
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_range_runs_to_max_extent() {
        let range = RowRange::parse("4+").unwrap();
        assert_eq!(range, RowRange::Open { start: 4 });

        let resolved = range.resolve(10).unwrap();
        assert_eq!(resolved.rows().collect::<Vec<_>>(), vec![4, 5, 6, 7, 8, 9, 10]);
        assert!(resolved.stop_at_blank);
    }

    #[test]
    fn test_closed_range() {
        let resolved = RowRange::parse("4-6").unwrap().resolve(10).unwrap();
        assert_eq!(resolved.rows().collect::<Vec<_>>(), vec![4, 5, 6]);
        assert!(!resolved.stop_at_blank);
    }

    #[test]
    fn test_reversed_range_is_invalid() {
        let err = RowRange::parse("7-3").unwrap_err();
        assert!(matches!(err, AppError::InvalidRangeSpec { .. }));
    }

    #[test]
    fn test_start_beyond_extent_is_out_of_bounds() {
        let err = RowRange::parse("11-15").unwrap().resolve(10).unwrap_err();
        assert!(matches!(
            err,
            AppError::RangeOutOfBounds {
                start: 11,
                max_extent: 10
            }
        ));

        let err = RowRange::parse("11+").unwrap().resolve(10).unwrap_err();
        assert!(matches!(err, AppError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn test_closed_end_is_clipped() {
        let resolved = RowRange::parse("8-15").unwrap().resolve(10).unwrap();
        assert_eq!((resolved.start, resolved.end), (8, 10));
    }

    #[test]
    fn test_garbage_is_invalid() {
        for spec in ["", "+", "abc", "4", "a-5", "4-b", "0+", "0-3", "-3", "4--5"] {
            assert!(
                matches!(
                    RowRange::parse(spec),
                    Err(AppError::InvalidRangeSpec { .. })
                ),
                "应当拒绝: {:?}",
                spec
            );
        }
    }

    #[test]
    fn test_whitespace_is_tolerated() {
        assert_eq!(
            " 3 - 9 ".parse::<RowRange>().unwrap(),
            RowRange::Closed { start: 3, end: 9 }
        );
    }
}
