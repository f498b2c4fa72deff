//! Message Protocol Definitions
//!
//! Topic names and the JSON envelopes exchanged with computing nodes and the
//! query front end.

use super::types::*;
use crate::planner::command::Command;
use crate::planner::result_address::StorageClass;
use crate::pool::types::{EngineType, WorkerId};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Broadcast to every dispatcher instance.
pub const TOPIC_COMPUTING_NODE_CONTROL: &str = "computing_node_control";
pub const TOPIC_OTL_JOB: &str = "otl_job";
pub const TOPIC_NODE_JOB_STATUS: &str = "nodejob_status";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommandName {
    RegisterComputingNode,
    UnregisterComputingNode,
    ResourceStatus,
    ErrorOccured,
}

/// Envelope on `computing_node_control`; `command` is decoded according to `command_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub computing_node_uuid: WorkerId,
    pub command_name: ControlCommandName,
    #[serde(default)]
    pub command: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterCommand {
    pub computing_node_type: EngineType,
    pub host_id: String,
    #[serde(default)]
    pub otl_command_syntax: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub resources: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatusCommand {
    #[serde(default)]
    pub resources: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCommand {
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtlJobCommandName {
    NewOtlJob,
    CancelJob,
}

/// Envelope on `otl_job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlJobMessage {
    pub command_name: OtlJobCommandName,
    pub command: NodeJobList,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeJobList {
    pub node_jobs: Vec<NodeJobMessage>,
}

/// A node job as sent to computing nodes and listed in `otl_job` messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeJobMessage {
    pub uuid: NodeJobId,
    pub status: NodeJobStatus,
    pub computing_node_type: EngineType,
    pub commands: Vec<Command>,
    pub storage: StorageClass,
    pub path: String,
}

impl From<&NodeJobRecord> for NodeJobMessage {
    fn from(record: &NodeJobRecord) -> Self {
        Self {
            uuid: record.uuid.clone(),
            status: record.status,
            computing_node_type: record.engine_type.clone(),
            commands: record.commands.clone(),
            storage: record.address.storage,
            path: record.address.path.clone(),
        }
    }
}

/// Progress report from a computing node on `nodejob_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeJobStatusMessage {
    pub uuid: NodeJobId,
    pub status: NodeJobStatus,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub last_finished_command: Option<String>,
}

/// Sent on a node's job topic to request cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelNodeJobMessage {
    pub uuid: NodeJobId,
    pub status: NodeJobStatus,
}

/// HTTP bridge to the broker for computing nodes outside this process.
pub const ENDPOINT_TOPIC: &str = "/topic/:topic";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollParams {
    /// How long to wait for the first message, milliseconds.
    #[serde(default = "default_poll_timeout")]
    pub timeout_ms: u64,
}

fn default_poll_timeout() -> u64 {
    10_000
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub topic: String,
    pub messages: Vec<serde_json::Value>,
}
