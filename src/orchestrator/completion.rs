//! 完成集合
//!
//! 从日志记录推导出"哪些条目已经完成"，用于续跑时过滤。
//! 运行期间只读。

use std::collections::{HashMap, HashSet};

use crate::models::{ItemId, LogRecord, WorkItem};

/// 完成判定策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// 只要出现过一次成功记录就算完成
    #[default]
    AnySuccess,
    /// 只看每个身份的最后一条记录
    LatestSuccess,
}

/// 已完成条目的身份集合
#[derive(Debug, Clone, Default)]
pub struct CompletionSet {
    done: HashSet<ItemId>,
}

impl CompletionSet {
    /// 按策略从日志记录构建
    ///
    /// 输入无效的记录（degenerate）在两种策略下都算完成。
    /// "最后一条"以文件中的追加顺序为准。
    pub fn from_records(records: &[LogRecord], policy: CompletionPolicy) -> Self {
        let done = match policy {
            CompletionPolicy::AnySuccess => records
                .iter()
                .filter(|r| r.counts_as_done())
                .map(|r| r.id.clone())
                .collect(),
            CompletionPolicy::LatestSuccess => {
                let mut latest: HashMap<&ItemId, &LogRecord> = HashMap::new();
                for record in records {
                    latest.insert(&record.id, record);
                }
                latest
                    .into_iter()
                    .filter(|(_, r)| r.counts_as_done())
                    .map(|(id, _)| id.clone())
                    .collect()
            }
        };
        Self { done }
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.done.contains(id)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// 更严格的判定：父条目成功且所有子步骤都已完成
    ///
    /// # 参数
    /// - `records`: 日志记录
    /// - `children_of`: 从成功记录中取出子步骤的 key
    /// - `child_done`: 子步骤是否完成
    pub fn require_children<F, G>(
        self,
        records: &[LogRecord],
        children_of: F,
        child_done: G,
    ) -> Self
    where
        F: Fn(&LogRecord) -> Vec<String>,
        G: Fn(&str) -> bool,
    {
        let satisfied: HashSet<&ItemId> = records
            .iter()
            .filter(|r| {
                r.is_degenerate()
                    || (r.is_success() && children_of(r).iter().all(|c| child_done(c)))
            })
            .map(|r| &r.id)
            .collect();

        let done = self
            .done
            .into_iter()
            .filter(|id| satisfied.contains(id))
            .collect();
        Self { done }
    }

    /// 过滤掉已完成的条目，保持原顺序
    ///
    /// # 返回
    /// 剩余条目，以及被跳过的数量
    pub fn filter<P>(&self, items: Vec<WorkItem<P>>) -> (Vec<WorkItem<P>>, usize) {
        let before = items.len();
        let pending: Vec<_> = items
            .into_iter()
            .filter(|item| !self.done.contains(&item.id))
            .collect();
        let skipped = before - pending.len();
        (pending, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultFields, TaskError, TaskOutcome};
    use std::time::Duration;

    fn ok(id: &str) -> LogRecord {
        LogRecord::from_outcome(
            ItemId::new(id),
            &TaskOutcome::success(ResultFields::new(), 1, Duration::ZERO),
        )
    }

    fn failed(id: &str, error: TaskError) -> LogRecord {
        LogRecord::from_outcome(ItemId::new(id), &TaskOutcome::failure(error, 1, Duration::ZERO))
    }

    #[test]
    fn test_any_success_vs_latest_success() {
        let records = vec![
            ok("a"),
            failed("a", TaskError::timeout("t")),
            failed("b", TaskError::timeout("t")),
            ok("b"),
        ];

        let any = CompletionSet::from_records(&records, CompletionPolicy::AnySuccess);
        assert!(any.contains(&ItemId::new("a")));
        assert!(any.contains(&ItemId::new("b")));

        let latest = CompletionSet::from_records(&records, CompletionPolicy::LatestSuccess);
        assert!(!latest.contains(&ItemId::new("a")));
        assert!(latest.contains(&ItemId::new("b")));
    }

    #[test]
    fn test_invalid_input_counts_as_done() {
        let records = vec![failed("x", TaskError::invalid_input("空"))];
        for policy in [CompletionPolicy::AnySuccess, CompletionPolicy::LatestSuccess] {
            assert!(CompletionSet::from_records(&records, policy).contains(&ItemId::new("x")));
        }
    }

    #[test]
    fn test_filter_keeps_order() {
        let set = CompletionSet::from_records(&[ok("b")], CompletionPolicy::AnySuccess);
        let items = vec![
            WorkItem::new("a", 1),
            WorkItem::new("b", 2),
            WorkItem::new("c", 3),
        ];
        let (pending, skipped) = set.filter(items);
        assert_eq!(skipped, 1);
        assert_eq!(
            pending.iter().map(|i| i.payload).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn test_require_children() {
        let mut with_child = ok("row1");
        with_child
            .fields
            .insert("url1".to_string(), "https://done".to_string());
        let mut missing_child = ok("row2");
        missing_child
            .fields
            .insert("url1".to_string(), "https://missing".to_string());

        let records = vec![with_child, missing_child];
        let set = CompletionSet::from_records(&records, CompletionPolicy::AnySuccess)
            .require_children(
                &records,
                |r| vec![r.field("url1").to_string()],
                |url| url == "https://done",
            );

        assert!(set.contains(&ItemId::new("row1")));
        assert!(!set.contains(&ItemId::new("row2")));
    }
}
