//! Persistence Contract
//!
//! Everything the dispatcher and the query front end need from durable storage.
//! Status changes go through compare-and-set so that replicated dispatchers and
//! re-delivered messages cannot apply the same transition twice.

use super::types::*;
use crate::planner::catalog::CommandCatalog;
use crate::planner::result_address::ResultAddress;
use crate::pool::types::WorkerId;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait JobStore: Send + Sync {
    // Queries

    async fn insert_query(&self, query: QueryRecord) -> Result<()>;

    async fn query(&self, id: &QueryId) -> Result<Option<QueryRecord>>;

    async fn set_query_status(&self, id: &QueryId, status: QueryStatus, text: &str) -> Result<()>;

    async fn queries_with_status(&self, status: QueryStatus) -> Result<Vec<QueryRecord>>;

    // Node jobs

    async fn insert_node_job(&self, job: NodeJobRecord) -> Result<()>;

    async fn node_job(&self, id: &NodeJobId) -> Result<Option<NodeJobRecord>>;

    /// Moves `id` from `expected` to `next`. Returns `false` if the stored status differs.
    async fn compare_and_set_status(
        &self,
        id: &NodeJobId,
        expected: NodeJobStatus,
        next: NodeJobStatus,
        text: &str,
    ) -> Result<bool>;

    async fn set_status_text(&self, id: &NodeJobId, text: &str) -> Result<()>;

    async fn set_last_finished_command(&self, id: &NodeJobId, command: &str) -> Result<()>;

    async fn assign_worker(&self, id: &NodeJobId, worker: Option<WorkerId>) -> Result<()>;

    /// Jobs whose `next_job` is `id`.
    async fn children(&self, id: &NodeJobId) -> Result<Vec<NodeJobRecord>>;

    async fn jobs_with_address(
        &self,
        address: &ResultAddress,
        status: NodeJobStatus,
    ) -> Result<Vec<NodeJobRecord>>;

    async fn query_jobs(&self, query: &QueryId) -> Result<Vec<NodeJobRecord>>;

    async fn jobs_on_worker(
        &self,
        worker: &WorkerId,
        statuses: &[NodeJobStatus],
    ) -> Result<Vec<NodeJobRecord>>;

    /// Jobs of `query` that have not reached a terminal status.
    async fn unfinished_jobs(&self, query: &QueryId) -> Result<Vec<NodeJobRecord>> {
        Ok(self
            .query_jobs(query)
            .await?
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .collect())
    }

    /// The downstream job of `finished`, once all of its inputs are finished.
    async fn next_ready_job(&self, finished: &NodeJobId) -> Result<Option<NodeJobRecord>> {
        let Some(job) = self.node_job(finished).await? else {
            return Ok(None);
        };
        let Some(parent) = job.next_job else {
            return Ok(None);
        };

        let children = self.children(&parent).await?;
        if children
            .iter()
            .all(|child| child.status == NodeJobStatus::Finished)
        {
            self.node_job(&parent).await
        } else {
            Ok(None)
        }
    }

    // Results

    async fn get_or_create_result(&self, address: &ResultAddress, ttl: u64) -> Result<ResultRow>;

    async fn result(&self, address: &ResultAddress) -> Result<Option<ResultRow>>;

    async fn compare_and_set_result(
        &self,
        address: &ResultAddress,
        expected: ResultStatus,
        next: ResultStatus,
    ) -> Result<bool>;

    async fn touch_result(&self, address: &ResultAddress) -> Result<()>;

    // Computing nodes

    async fn register_worker(&self, registration: WorkerRegistration) -> Result<()>;

    async fn deactivate_worker(&self, id: &WorkerId) -> Result<()>;

    /// Commands declared by the active computing nodes.
    async fn catalog(&self) -> Result<CommandCatalog>;
}

/// `DashMap`-backed store for standalone mode and tests.
#[derive(Default)]
pub struct MemoryJobStore {
    queries: DashMap<QueryId, QueryRecord>,
    jobs: DashMap<NodeJobId, NodeJobRecord>,
    results: DashMap<ResultAddress, ResultRow>,
    workers: DashMap<WorkerId, WorkerRegistration>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs_where(&self, predicate: impl Fn(&NodeJobRecord) -> bool) -> Vec<NodeJobRecord> {
        self.jobs
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn registered_worker(&self, id: &WorkerId) -> Option<WorkerRegistration> {
        self.workers.get(id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_query(&self, query: QueryRecord) -> Result<()> {
        self.queries.insert(query.uuid.clone(), query);
        Ok(())
    }

    async fn query(&self, id: &QueryId) -> Result<Option<QueryRecord>> {
        Ok(self.queries.get(id).map(|entry| entry.value().clone()))
    }

    async fn set_query_status(&self, id: &QueryId, status: QueryStatus, text: &str) -> Result<()> {
        let mut query = self
            .queries
            .get_mut(id)
            .ok_or_else(|| anyhow!("query {} not found", id))?;
        query.status = status;
        query.status_text = text.to_string();
        Ok(())
    }

    async fn queries_with_status(&self, status: QueryStatus) -> Result<Vec<QueryRecord>> {
        Ok(self
            .queries
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn insert_node_job(&self, job: NodeJobRecord) -> Result<()> {
        self.jobs.insert(job.uuid.clone(), job);
        Ok(())
    }

    async fn node_job(&self, id: &NodeJobId) -> Result<Option<NodeJobRecord>> {
        Ok(self.jobs.get(id).map(|entry| entry.value().clone()))
    }

    async fn compare_and_set_status(
        &self,
        id: &NodeJobId,
        expected: NodeJobStatus,
        next: NodeJobStatus,
        text: &str,
    ) -> Result<bool> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| anyhow!("node job {} not found", id))?;

        if job.status != expected {
            return Ok(false);
        }

        job.status = next;
        job.status_text = text.to_string();
        Ok(true)
    }

    async fn set_status_text(&self, id: &NodeJobId, text: &str) -> Result<()> {
        if let Some(mut job) = self.jobs.get_mut(id) {
            job.status_text = text.to_string();
        }
        Ok(())
    }

    async fn set_last_finished_command(&self, id: &NodeJobId, command: &str) -> Result<()> {
        if let Some(mut job) = self.jobs.get_mut(id) {
            job.last_finished_command = Some(command.to_string());
        }
        Ok(())
    }

    async fn assign_worker(&self, id: &NodeJobId, worker: Option<WorkerId>) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| anyhow!("node job {} not found", id))?;
        job.worker = worker;
        Ok(())
    }

    async fn children(&self, id: &NodeJobId) -> Result<Vec<NodeJobRecord>> {
        Ok(self.jobs_where(|job| job.next_job.as_ref() == Some(id)))
    }

    async fn jobs_with_address(
        &self,
        address: &ResultAddress,
        status: NodeJobStatus,
    ) -> Result<Vec<NodeJobRecord>> {
        Ok(self.jobs_where(|job| &job.address == address && job.status == status))
    }

    async fn query_jobs(&self, query: &QueryId) -> Result<Vec<NodeJobRecord>> {
        Ok(self.jobs_where(|job| &job.query_id == query))
    }

    async fn jobs_on_worker(
        &self,
        worker: &WorkerId,
        statuses: &[NodeJobStatus],
    ) -> Result<Vec<NodeJobRecord>> {
        Ok(self.jobs_where(|job| {
            job.worker.as_ref() == Some(worker) && statuses.contains(&job.status)
        }))
    }

    async fn get_or_create_result(&self, address: &ResultAddress, ttl: u64) -> Result<ResultRow> {
        let row = self
            .results
            .entry(address.clone())
            .or_insert_with(|| ResultRow {
                address: address.clone(),
                status: ResultStatus::NotExist,
                ttl,
                last_touched_ms: crate::now_ms(),
            });
        Ok(row.value().clone())
    }

    async fn result(&self, address: &ResultAddress) -> Result<Option<ResultRow>> {
        Ok(self.results.get(address).map(|entry| entry.value().clone()))
    }

    async fn compare_and_set_result(
        &self,
        address: &ResultAddress,
        expected: ResultStatus,
        next: ResultStatus,
    ) -> Result<bool> {
        let Some(mut row) = self.results.get_mut(address) else {
            return Ok(false);
        };

        if row.status != expected {
            return Ok(false);
        }

        row.status = next;
        row.last_touched_ms = crate::now_ms();
        Ok(true)
    }

    async fn touch_result(&self, address: &ResultAddress) -> Result<()> {
        if let Some(mut row) = self.results.get_mut(address) {
            row.last_touched_ms = crate::now_ms();
        }
        Ok(())
    }

    async fn register_worker(&self, registration: WorkerRegistration) -> Result<()> {
        self.workers.insert(registration.uuid.clone(), registration);
        Ok(())
    }

    async fn deactivate_worker(&self, id: &WorkerId) -> Result<()> {
        if let Some(mut worker) = self.workers.get_mut(id) {
            worker.active = false;
        }
        Ok(())
    }

    async fn catalog(&self) -> Result<CommandCatalog> {
        let mut catalog = CommandCatalog::new();
        for entry in self.workers.iter() {
            let worker = entry.value();
            if worker.active {
                catalog.register_rules(&worker.engine_type, &worker.command_syntax);
            }
        }
        Ok(catalog)
    }
}
