//! Priority Queues
//!
//! Every engine type gets its own queue of node job ids. The element with the
//! lowest score is popped first; equal scores are popped in lexicographic order of
//! the element, which is exactly what Redis `ZPOPMIN` does.

use crate::pool::types::EngineType;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A set of named min-priority queues.
///
/// Pushing an element that is already present only updates its score.
#[async_trait]
pub trait PriorityQueue: Send + Sync {
    async fn push(&self, queue: &str, element: &str, score: u64) -> Result<()>;

    /// Removes and returns the element with the lowest score.
    async fn pop_min(&self, queue: &str) -> Result<Option<(String, u64)>>;

    async fn remove(&self, queue: &str, element: &str) -> Result<bool>;

    async fn len(&self, queue: &str) -> Result<usize>;
}

#[derive(Default)]
struct QueueState {
    ordered: BTreeSet<(u64, String)>,
    scores: HashMap<String, u64>,
}

/// In-process backend, used in standalone mode and by tests.
#[derive(Default)]
pub struct MemoryPriorityQueue {
    queues: DashMap<String, QueueState>,
}

impl MemoryPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriorityQueue for MemoryPriorityQueue {
    async fn push(&self, queue: &str, element: &str, score: u64) -> Result<()> {
        let mut state = self.queues.entry(queue.to_string()).or_default();

        if let Some(old) = state.scores.insert(element.to_string(), score) {
            state.ordered.remove(&(old, element.to_string()));
        }
        state.ordered.insert((score, element.to_string()));

        Ok(())
    }

    async fn pop_min(&self, queue: &str) -> Result<Option<(String, u64)>> {
        let Some(mut state) = self.queues.get_mut(queue) else {
            return Ok(None);
        };

        match state.ordered.pop_first() {
            Some((score, element)) => {
                state.scores.remove(&element);
                Ok(Some((element, score)))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, queue: &str, element: &str) -> Result<bool> {
        let Some(mut state) = self.queues.get_mut(queue) else {
            return Ok(false);
        };

        match state.scores.remove(element) {
            Some(score) => {
                state.ordered.remove(&(score, element.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        Ok(self
            .queues
            .get(queue)
            .map(|state| state.ordered.len())
            .unwrap_or(0))
    }
}

/// Per-engine-type queues of node jobs waiting for a free computing node.
pub struct NodeJobQueue {
    backend: Arc<dyn PriorityQueue>,
}

impl NodeJobQueue {
    pub fn new(backend: Arc<dyn PriorityQueue>) -> Self {
        Self { backend }
    }

    fn queue_name(engine_type: &EngineType) -> String {
        format!("node_job_queue_{}", engine_type.as_str())
    }

    /// Adds a node job with the current time as its score.
    pub async fn enqueue(&self, engine_type: &EngineType, node_job: &str) -> Result<()> {
        self.enqueue_with_score(engine_type, node_job, crate::now_ms())
            .await
    }

    pub async fn enqueue_with_score(
        &self,
        engine_type: &EngineType,
        node_job: &str,
        score: u64,
    ) -> Result<()> {
        tracing::debug!("Enqueue node job {} for {}", node_job, engine_type);
        self.backend
            .push(&Self::queue_name(engine_type), node_job, score)
            .await
    }

    pub async fn pop(&self, engine_type: &EngineType) -> Result<Option<String>> {
        let popped = self.pop_with_score(engine_type).await?;
        Ok(popped.map(|(element, _)| element))
    }

    /// Pops the head together with its score, so it can be put back in place.
    pub async fn pop_with_score(&self, engine_type: &EngineType) -> Result<Option<(String, u64)>> {
        self.backend.pop_min(&Self::queue_name(engine_type)).await
    }

    pub async fn remove(&self, engine_type: &EngineType, node_job: &str) -> Result<bool> {
        self.backend
            .remove(&Self::queue_name(engine_type), node_job)
            .await
    }

    pub async fn len(&self, engine_type: &EngineType) -> Result<usize> {
        self.backend.len(&Self::queue_name(engine_type)).await
    }
}
