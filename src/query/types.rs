use crate::dispatcher::types::{QueryId, QueryStatus};
use crate::planner::error::{PlanningError, TranslationError};
use crate::planner::result_address::StorageClass;

use thiserror::Error;

/// Everything `makejob`, `checkjob`, `getresult` and `cancel` can report back.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("Job {0} not found")]
    NotFound(QueryId),

    #[error("Job {0} is {1:?}, result is not available")]
    NotFinished(QueryId, QueryStatus),

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

/// Where the root result of a submitted query will be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    pub job_id: QueryId,
    pub storage: StorageClass,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    pub status: QueryStatus,
    pub status_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub data_url: String,
    pub schema_url: String,
}

/// Values used when a request leaves an option out.
#[derive(Debug, Clone)]
pub struct QueryDefaults {
    pub cache_ttl: u64,
    pub timeout: u64,
    pub shared_post_processing: bool,
}
