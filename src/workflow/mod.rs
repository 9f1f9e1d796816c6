pub mod extract_task;
pub mod scan_task;
pub mod search_task;
pub mod snapshot_task;
pub mod task;

pub use extract_task::{ExtractMethod, ExtractTask};
pub use scan_task::{ScanPayload, ScanTask};
pub use search_task::SearchTask;
pub use snapshot_task::{SnapshotPayload, SnapshotTask};
pub use task::Task;
