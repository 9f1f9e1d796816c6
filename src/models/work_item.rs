//! 工作条目
//!
//! 一个条目 = 稳定的身份 + 任务需要的载荷。身份在多次运行之间必须可复现，
//! 续跑时靠它在日志里查找完成记录。

use std::collections::HashSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// 条目身份
///
/// 表格行使用 `"<sheet>!<row>"`，URL 类任务直接使用 URL。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 表格行身份
    pub fn row(sheet: &str, row: u32) -> Self {
        Self(format!("{}!{}", sheet, row))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 工作条目
///
/// 由枚举器拥有，按值交给 worker，不会在 worker 之间共享。
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    pub id: ItemId,
    pub payload: P,
}

impl<P> WorkItem<P> {
    pub fn new(id: impl Into<ItemId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// 按身份去重，保留第一次出现的顺序
pub fn dedup_by_id<P>(items: Vec<WorkItem<P>>) -> Vec<WorkItem<P>> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_identity_is_stable() {
        assert_eq!(ItemId::row("Sheet1", 4), ItemId::row("Sheet1", 4));
        assert_eq!(ItemId::row("Sheet1", 4).as_str(), "Sheet1!4");
        assert_ne!(ItemId::row("Sheet1", 4), ItemId::row("Sheet2", 4));
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let items = vec![
            WorkItem::new("https://a.example", 1),
            WorkItem::new("https://b.example", 2),
            WorkItem::new("https://a.example", 3),
        ];
        let deduped = dedup_by_id(items);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].payload, 1);
        assert_eq!(deduped[1].id.as_str(), "https://b.example");
    }
}
