//! HTTP Protocol Definitions
//!
//! Request and response bodies of the query front end.

use crate::dispatcher::types::{QueryId, QueryStatus};
use crate::planner::result_address::StorageClass;

use serde::{Deserialize, Serialize};

pub const ENDPOINT_MAKE_JOB: &str = "/makejob";
pub const ENDPOINT_CHECK_JOB: &str = "/checkjob";
pub const ENDPOINT_GET_RESULT: &str = "/getresult";
pub const ENDPOINT_CANCEL_JOB: &str = "/canceljob";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeJobRequest {
    pub otl_query: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub tws: i64,
    #[serde(default)]
    pub twf: i64,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub shared_post_processing: Option<bool>,
    #[serde(default)]
    pub subsearch_is_node_job: Option<bool>,
}

impl MakeJobRequest {
    pub fn new(otl_query: impl Into<String>) -> Self {
        Self {
            otl_query: otl_query.into(),
            user: String::new(),
            tws: 0,
            twf: 0,
            cache_ttl: None,
            timeout: None,
            shared_post_processing: None,
            subsearch_is_node_job: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdParams {
    pub job_id: QueryId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MakeJobResponse {
    pub status: String,
    pub job_id: QueryId,
    pub storage_type: StorageClass,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckJobResponse {
    pub status: String,
    pub job_status: QueryStatus,
    pub status_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResultResponse {
    pub status: String,
    pub data_url: String,
    pub schema_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}
