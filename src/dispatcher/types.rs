use crate::planner::command::Command;
use crate::planner::result_address::ResultAddress;
use crate::pool::types::{EngineType, WorkerId};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeJobId(pub String);

impl NodeJobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a submitted query (the top-level job).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct QueryId(pub String);

impl QueryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a node job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeJobStatus {
    Planned,
    ReadyToExecute,
    InQueue,
    TakenFromQueue,
    SentToComputingNode,
    DeclinedByComputingNode,
    Running,
    WaitingSameResult,
    Finished,
    Canceled,
    Failed,
}

impl NodeJobStatus {
    /// The allowed-transition table.
    pub fn can_transition_to(self, next: NodeJobStatus) -> bool {
        use NodeJobStatus::*;

        match self {
            Planned => matches!(next, ReadyToExecute | Canceled),
            ReadyToExecute => matches!(
                next,
                InQueue | SentToComputingNode | Finished | WaitingSameResult | Canceled
            ),
            InQueue => matches!(next, TakenFromQueue | Canceled),
            TakenFromQueue => matches!(next, ReadyToExecute),
            SentToComputingNode => matches!(
                next,
                Running | Finished | Failed | DeclinedByComputingNode | Canceled
            ),
            DeclinedByComputingNode => matches!(next, InQueue | SentToComputingNode | Canceled),
            Running => matches!(next, Finished | Failed | Canceled),
            WaitingSameResult => matches!(next, Finished | Failed | Canceled),
            Failed => matches!(next, Canceled),
            Finished | Canceled => false,
        }
    }

    /// Finished, canceled or failed: no further work will happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeJobStatus::Finished | NodeJobStatus::Canceled | NodeJobStatus::Failed
        )
    }

    pub const ALL: [NodeJobStatus; 11] = [
        NodeJobStatus::Planned,
        NodeJobStatus::ReadyToExecute,
        NodeJobStatus::InQueue,
        NodeJobStatus::TakenFromQueue,
        NodeJobStatus::SentToComputingNode,
        NodeJobStatus::DeclinedByComputingNode,
        NodeJobStatus::Running,
        NodeJobStatus::WaitingSameResult,
        NodeJobStatus::Finished,
        NodeJobStatus::Canceled,
        NodeJobStatus::Failed,
    ];
}

impl fmt::Display for NodeJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_value(self)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&text)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    New,
    Planned,
    Running,
    Finished,
    Failed,
    Canceled,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueryStatus::Finished | QueryStatus::Failed | QueryStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    NotExist,
    Calculating,
    Calculated,
}

/// A persisted node job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeJobRecord {
    pub uuid: NodeJobId,
    pub query_id: QueryId,
    pub engine_type: EngineType,
    pub commands: Vec<Command>,
    pub status: NodeJobStatus,
    pub status_text: String,
    pub next_job: Option<NodeJobId>,
    pub worker: Option<WorkerId>,
    pub address: ResultAddress,
    /// Seconds a computed result stays reusable.
    pub cache_ttl: u64,
    pub last_finished_command: Option<String>,
}

/// Shared by every node job with the same address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub address: ResultAddress,
    pub status: ResultStatus,
    pub ttl: u64,
    pub last_touched_ms: u64,
}

impl ResultRow {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.status == ResultStatus::Calculated
            && now_ms > self.last_touched_ms.saturating_add(self.ttl.saturating_mul(1000))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub uuid: QueryId,
    pub query: String,
    pub user: String,
    pub tws: i64,
    pub twf: i64,
    pub cache_ttl: u64,
    /// Seconds; `0` means no timeout.
    pub timeout: u64,
    pub created_ms: u64,
    pub status: QueryStatus,
    pub status_text: String,
}

impl QueryRecord {
    pub fn timed_out(&self, now_ms: u64) -> bool {
        self.timeout > 0
            && !self.status.is_terminal()
            && now_ms > self.created_ms.saturating_add(self.timeout.saturating_mul(1000))
    }
}

/// Durable record of a computing node and the commands it declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub uuid: WorkerId,
    pub engine_type: EngineType,
    pub host_id: String,
    pub resources: HashMap<String, i64>,
    pub command_syntax: BTreeMap<String, serde_json::Value>,
    pub active: bool,
}
