pub mod extract_service;
pub mod llm_service;
pub mod search_service;
pub mod snapshot_service;

pub use extract_service::{ExtractionFile, Institution, InstitutionKind, RuleExtractor};
pub use llm_service::{LlmReply, LlmService, TokenUsage};
pub use search_service::{OrganicResult, SearchService};
pub use snapshot_service::{SnapshotInfo, SnapshotService};
