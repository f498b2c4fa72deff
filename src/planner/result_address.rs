use crate::pool::types::EngineType;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a node job's output dataframe lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    /// Transfer storage between computing nodes.
    InterprocStorage,
    /// Post-processing storage visible only on the dispatcher's host.
    LocalPostProcessing,
    SharedPostProcessing,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::InterprocStorage => "INTERPROC_STORAGE",
            StorageClass::LocalPostProcessing => "LOCAL_POST_PROCESSING",
            StorageClass::SharedPostProcessing => "SHARED_POST_PROCESSING",
        }
    }

    /// Storage for a query's final result.
    pub fn for_root(engine_type: &EngineType, shared_post_processing: bool) -> Self {
        if !engine_type.is_post_processing() {
            StorageClass::InterprocStorage
        } else if shared_post_processing {
            StorageClass::SharedPostProcessing
        } else {
            StorageClass::LocalPostProcessing
        }
    }

    /// Only nodes on the dispatcher's host can write here.
    pub fn requires_local_worker(&self) -> bool {
        matches!(self, StorageClass::LocalPostProcessing)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(storage class, path)` of a result. Two node jobs with equal addresses share
/// one result row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResultAddress {
    pub storage: StorageClass,
    pub path: String,
}

impl ResultAddress {
    pub fn new(storage: StorageClass, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }

    pub fn data_url(&self) -> String {
        format!("{}/{}/jsonl/data.json", self.storage, self.path)
    }

    pub fn schema_url(&self) -> String {
        format!("{}/{}/jsonl/_SCHEMA", self.storage, self.path)
    }
}

impl fmt::Display for ResultAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.storage, self.path)
    }
}
