//! 数据模型
//!
//! 条目、行范围、任务结果与日志记录，以及表格加载器。

pub mod loaders;
pub mod log_record;
pub mod outcome;
pub mod row_range;
pub mod work_item;

pub use loaders::{SheetGrid, WorkSource};
pub use log_record::{LogRecord, RecordStatus, BASE_COLUMNS};
pub use outcome::{ErrorKind, OutcomeStatus, ResultFields, TaskError, TaskOutcome};
pub use row_range::{ResolvedRange, RowRange};
pub use work_item::{dedup_by_id, ItemId, WorkItem};
