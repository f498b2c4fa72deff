//! Coordination Primitives
//!
//! Shared building blocks that let several dispatcher processes cooperate on the
//! same work without stepping on each other.
//!
//! ## Submodules
//! - **`priority_queue`**: Min-by-score queues (score = enqueue timestamp) with an
//!   in-process backend and the per-engine-type `NodeJobQueue` wrapper.
//! - **`lock`**: Non-blocking try-lock keyed by an operation name. The no-op variant is
//!   used when the dispatcher runs as a single process.
//! - **`redis_backend`**: Redis implementations of both primitives (`ZADD`/`ZPOPMIN` and
//!   `SET NX PX`), so replicated dispatchers observe one ordering.

pub mod lock;
pub mod priority_queue;
pub mod redis_backend;

#[cfg(test)]
mod tests;
