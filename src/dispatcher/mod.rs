//! Dispatcher
//!
//! The message-driven half of the orchestrator. Computing nodes register and
//! report on broker topics; the dispatcher tracks them in the `WorkerPool`,
//! drives every node job through its lifecycle and hands ready jobs to the
//! least-loaded node of the right engine type.
//!
//! - **`status_manager`**: the node job state machine.
//! - **`handlers`**: decoding of the three inbound topics.
//! - **`runtime`**: consume loops and periodic maintenance.
//! - **`store`** / **`broker`**: persistence and messaging seams with in-memory implementations.
//! - **`http`**: publish and long-poll endpoints for computing nodes in other processes.

pub mod broker;
pub mod handlers;
pub mod http;
pub mod protocol;
pub mod runtime;
pub mod status_manager;
pub mod store;
pub mod types;
