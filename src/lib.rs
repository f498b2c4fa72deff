//! Distributed Query Orchestrator Library
//!
//! Plans pipeline queries into node jobs and dispatches them to a fleet of
//! heterogeneous computing nodes. The binary (`main.rs`) wires these modules
//! into one dispatcher process with an HTTP front end.
//!
//! ## Architecture Modules
//! - **`planner`**: Translates query text and splits it into a tree of node jobs, one
//!   per maximal run of commands on the same engine type, with content-addressed
//!   result locations.
//! - **`dispatcher`**: The message-driven state machine that moves node jobs from
//!   planned to finished, deduplicates identical computations and reacts to node
//!   failures.
//! - **`pool`**: Live computing nodes, their resource usage and least-loaded selection.
//! - **`coordination`**: Priority queues and try-locks shared between dispatcher
//!   processes (in-process or Redis).
//! - **`query`**: `makejob` / `checkjob` / `getresult` / `cancel` and their HTTP handlers.
//! - **`config`**: Process configuration.

pub mod config;
pub mod coordination;
pub mod dispatcher;
pub mod planner;
pub mod pool;
pub mod query;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
