//! Worker Pool Module
//!
//! In-memory view of the computing nodes known to this dispatcher process.
//! Every dispatcher instance keeps its own copy, fed by the broadcast
//! `computing_node_control` topic.
//!
//! ## Core Mechanisms
//! - **Registration**: A node declares its engine type, host and total resources.
//! - **Heartbeats**: `RESOURCE_STATUS` messages refresh usage and the last-seen time.
//! - **Least-loaded selection**: Among available nodes of a type, the one with the
//!   smallest usage vector wins, compared key by key in a configured order.
//! - **Inactivity detection**: Nodes silent for longer than the timeout are reported
//!   so the dispatcher can evict them.

pub mod pool;
pub mod types;

#[cfg(test)]
mod tests;
