use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Class of computing node that implements a set of commands
/// (e.g. `SPARK`, `EEP`, `POST_PROCESSING`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EngineType(pub String);

impl EngineType {
    pub const POST_PROCESSING: &'static str = "POST_PROCESSING";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn post_processing() -> Self {
        Self(Self::POST_PROCESSING.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_post_processing(&self) -> bool {
        self.0 == Self::POST_PROCESSING
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier a computing node chose for itself when registering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Topic the dispatcher publishes this node's work to.
    pub fn job_topic(&self) -> String {
        format!("{}_job", self.0)
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live computing node as seen by this dispatcher.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub engine_type: EngineType,
    pub host_id: String,
    /// Runs on the same host as this dispatcher.
    pub is_local: bool,
    pub capacity: HashMap<String, i64>,
    pub usage: HashMap<String, i64>,
    pub last_heartbeat: Instant,
}

impl WorkerRecord {
    /// A node can take work while every declared resource has headroom.
    pub fn is_available(&self) -> bool {
        self.capacity
            .iter()
            .all(|(key, total)| self.used(key) < *total)
    }

    pub fn used(&self, key: &str) -> i64 {
        self.usage.get(key).copied().unwrap_or(0)
    }
}
