//! Node Job Status Manager
//!
//! Drives node jobs through their lifecycle. Every status change is checked
//! against `NodeJobStatus::can_transition_to`, applied with a compare-and-set, and
//! then runs the entry action of the new status. Entry actions never recurse:
//! follow-up transitions go onto a work list that is drained in order, so one
//! inbound message may walk a job (and its siblings) through several states.
//!
//! ## Entry actions
//! - **READY_TO_EXECUTE**: cache hit finishes, an identical computation in flight
//!   waits, otherwise the least-loaded node gets the job or it is queued.
//! - **WAITING_SAME_RESULT**: the result row is read again, since the holder may
//!   have settled it before the wait began.
//! - **IN_QUEUE**: pushed onto the engine type's queue.
//! - **TAKEN_FROM_QUEUE**: evaluated again as READY_TO_EXECUTE.
//! - **SENT_TO_COMPUTING_NODE**: published on the assigned node's job topic.
//! - **DECLINED_BY_COMPUTING_NODE**: assignment cleared and queued again.
//! - **RUNNING**: the query is running; the first running job claims the result row.
//! - **FINISHED**: waiters on the same result finish, the downstream job becomes ready
//!   once all its inputs are done, the root finishes the query.
//! - **FAILED**: the query fails, its other jobs are canceled, the result row is released.

use super::broker::MessageBroker;
use super::protocol::{CancelNodeJobMessage, NodeJobMessage};
use super::store::JobStore;
use super::types::*;
use crate::coordination::priority_queue::NodeJobQueue;
use crate::pool::pool::WorkerPool;
use crate::pool::types::{EngineType, WorkerId};

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;

use super::types::NodeJobStatus::*;

enum Work {
    Transition {
        job: NodeJobId,
        next: NodeJobStatus,
        text: String,
    },
    CheckQueue(EngineType),
}

fn to_status(job: &NodeJobId, next: NodeJobStatus, text: impl Into<String>) -> Work {
    Work::Transition {
        job: job.clone(),
        next,
        text: text.into(),
    }
}

pub struct NodeJobStatusManager {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn MessageBroker>,
    pool: Arc<WorkerPool>,
    queue: Arc<NodeJobQueue>,
}

impl NodeJobStatusManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn MessageBroker>,
        pool: Arc<WorkerPool>,
        queue: Arc<NodeJobQueue>,
    ) -> Self {
        Self {
            store,
            broker,
            pool,
            queue,
        }
    }

    /// Requests `next` for a job. Rejected transitions are logged and ignored.
    pub async fn change_status(&self, job: &NodeJobId, next: NodeJobStatus, text: &str) -> Result<()> {
        self.run(to_status(job, next, text)).await
    }

    /// Promotes the head of the engine type's queue if a computing node is free.
    pub async fn check_queue(&self, engine_type: &EngineType) -> Result<()> {
        self.run(Work::CheckQueue(engine_type.clone())).await
    }

    /// Fails every job sent to or running on `worker`.
    pub async fn fail_worker_jobs(&self, worker: &WorkerId, reason: &str) -> Result<()> {
        let jobs = self
            .store
            .jobs_on_worker(worker, &[Running, SentToComputingNode])
            .await?;

        for job in jobs {
            self.change_status(&job.uuid, Failed, reason).await?;
        }

        Ok(())
    }

    /// Marks the query canceled and cancels its unfinished jobs.
    pub async fn cancel_query(&self, query: &QueryId, text: &str) -> Result<()> {
        self.store
            .set_query_status(query, QueryStatus::Canceled, text)
            .await?;

        for job in self.store.unfinished_jobs(query).await? {
            self.change_status(&job.uuid, Canceled, text).await?;
        }

        Ok(())
    }

    async fn run(&self, first: Work) -> Result<()> {
        let mut work = VecDeque::from([first]);
        let mut first_error = None;

        while let Some(item) = work.pop_front() {
            let outcome = match item {
                Work::Transition { job, next, text } => {
                    self.transition(&job, next, &text, &mut work).await
                }
                Work::CheckQueue(engine_type) => {
                    self.promote_queue_head(&engine_type, &mut work).await
                }
            };

            if let Err(e) = outcome {
                tracing::error!("Status manager step failed: {:#}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn transition(
        &self,
        id: &NodeJobId,
        next: NodeJobStatus,
        text: &str,
        work: &mut VecDeque<Work>,
    ) -> Result<()> {
        let Some(job) = self.store.node_job(id).await? else {
            tracing::warn!("Status {} for unknown node job {}", next, id);
            return Ok(());
        };
        let current = job.status;

        if current == next {
            self.store.set_status_text(id, text).await?;
            return Ok(());
        }

        if !current.can_transition_to(next) {
            tracing::warn!("Rejected transition of node job {}: {} -> {}", id, current, next);
            if current == Canceled && matches!(next, Finished | Failed) {
                self.settle_canceled_result(&job, next, work).await?;
            }
            return Ok(());
        }

        if !self
            .store
            .compare_and_set_status(id, current, next, text)
            .await?
        {
            tracing::debug!(
                "Node job {} changed concurrently, dropping {} -> {}",
                id,
                current,
                next
            );
            return Ok(());
        }

        tracing::info!("Node job {}: {} -> {} ({})", id, current, next, text);

        match (current, next) {
            (Running, Canceled) => self.on_running_canceled(&job, work).await?,
            (SentToComputingNode, Canceled) => self.send_cancel(&job).await?,
            (WaitingSameResult, Canceled) => self.on_waiter_canceled(&job).await?,
            (InQueue, Canceled) => {
                self.queue.remove(&job.engine_type, &job.uuid.0).await?;
            }
            _ => {}
        }

        match next {
            ReadyToExecute => self.on_ready(&job, work).await,
            InQueue => self.queue.enqueue(&job.engine_type, &job.uuid.0).await,
            TakenFromQueue => {
                work.push_back(to_status(id, ReadyToExecute, "Taken from queue"));
                Ok(())
            }
            SentToComputingNode => self.on_sent(id).await,
            DeclinedByComputingNode => {
                self.store.assign_worker(id, None).await?;
                work.push_back(to_status(id, InQueue, "Declined by computing node, requeued"));
                Ok(())
            }
            Running => self.on_running(&job).await,
            Finished => self.on_finished(&job, current, work).await,
            Failed => self.on_failed(&job, current, text, work).await,
            WaitingSameResult => self.on_waiting(&job, work).await,
            Planned | Canceled => Ok(()),
        }
    }

    async fn on_ready(&self, job: &NodeJobRecord, work: &mut VecDeque<Work>) -> Result<()> {
        let row = self
            .store
            .get_or_create_result(&job.address, job.cache_ttl)
            .await?;

        let mut status = row.status;
        if row.is_expired(crate::now_ms()) {
            self.store
                .compare_and_set_result(&job.address, ResultStatus::Calculated, ResultStatus::NotExist)
                .await?;
            tracing::debug!("Cached result {} expired", job.address);
            status = ResultStatus::NotExist;
        }

        match status {
            ResultStatus::Calculated => {
                self.store.touch_result(&job.address).await?;
                work.push_back(to_status(&job.uuid, Finished, "Result already calculated"));
            }
            ResultStatus::Calculating => {
                work.push_back(to_status(
                    &job.uuid,
                    WaitingSameResult,
                    "Waiting for the same result calculation",
                ));
            }
            ResultStatus::NotExist => {
                let local_only = job.address.storage.requires_local_worker();
                match self.pool.least_loaded(&job.engine_type, local_only) {
                    Some(worker) => {
                        self.store.assign_worker(&job.uuid, Some(worker.clone())).await?;
                        work.push_back(to_status(
                            &job.uuid,
                            SentToComputingNode,
                            format!("Sent to computing node {}", worker),
                        ));
                    }
                    None => {
                        work.push_back(to_status(
                            &job.uuid,
                            InQueue,
                            format!("No free {} computing node", job.engine_type),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Fan-out only reaches jobs already waiting, so a row settled between the
    /// READY read and this transition has to be picked up here.
    async fn on_waiting(&self, job: &NodeJobRecord, work: &mut VecDeque<Work>) -> Result<()> {
        let Some(row) = self.store.result(&job.address).await? else {
            return Ok(());
        };

        match row.status {
            ResultStatus::Calculated => {
                self.store.touch_result(&job.address).await?;
                work.push_back(to_status(&job.uuid, Finished, "Same result already calculated"));
            }
            ResultStatus::NotExist => {
                let running = self
                    .store
                    .jobs_with_address(&job.address, Running)
                    .await?;
                if running.is_empty() {
                    work.push_back(to_status(&job.uuid, Failed, "Same result calculation failed"));
                }
            }
            ResultStatus::Calculating => {}
        }

        Ok(())
    }

    async fn on_sent(&self, id: &NodeJobId) -> Result<()> {
        let Some(job) = self.store.node_job(id).await? else {
            return Ok(());
        };
        let Some(worker) = &job.worker else {
            return Err(anyhow::anyhow!("node job {} sent without a computing node", id));
        };

        let message = serde_json::to_value(NodeJobMessage::from(&job))?;
        self.broker.publish(&worker.job_topic(), message).await
    }

    async fn on_running(&self, job: &NodeJobRecord) -> Result<()> {
        if let Some(query) = self.store.query(&job.query_id).await?
            && !query.status.is_terminal()
            && query.status != QueryStatus::Running
        {
            self.store
                .set_query_status(&job.query_id, QueryStatus::Running, "Running")
                .await?;
        }

        if self
            .store
            .compare_and_set_result(&job.address, ResultStatus::NotExist, ResultStatus::Calculating)
            .await?
        {
            tracing::debug!("Node job {} claimed result {}", job.uuid, job.address);
        }

        Ok(())
    }

    async fn on_finished(
        &self,
        job: &NodeJobRecord,
        previous: NodeJobStatus,
        work: &mut VecDeque<Work>,
    ) -> Result<()> {
        let mut settled = self
            .store
            .compare_and_set_result(&job.address, ResultStatus::Calculating, ResultStatus::Calculated)
            .await?;

        // the node skipped RUNNING, so the row was never claimed
        if !settled && previous == SentToComputingNode {
            settled = self
                .store
                .compare_and_set_result(&job.address, ResultStatus::NotExist, ResultStatus::Calculated)
                .await?;
        }

        if settled {
            self.fan_out(job, Finished, work).await?;
        }

        if job.next_job.is_some() {
            if let Some(parent) = self.store.next_ready_job(&job.uuid).await? {
                work.push_back(to_status(&parent.uuid, ReadyToExecute, "Dependencies finished"));
            }
        } else {
            self.finish_query(&job.query_id, QueryStatus::Finished, "Finished")
                .await?;
        }

        work.push_back(Work::CheckQueue(job.engine_type.clone()));
        Ok(())
    }

    async fn on_failed(
        &self,
        job: &NodeJobRecord,
        previous: NodeJobStatus,
        text: &str,
        work: &mut VecDeque<Work>,
    ) -> Result<()> {
        self.finish_query(
            &job.query_id,
            QueryStatus::Failed,
            &format!("{}: {}", job.uuid, text),
        )
        .await?;

        for other in self.store.unfinished_jobs(&job.query_id).await? {
            if other.uuid != job.uuid {
                work.push_back(to_status(
                    &other.uuid,
                    Canceled,
                    format!("Canceled because node job {} failed", job.uuid),
                ));
            }
        }

        if previous == Running
            && self
                .store
                .compare_and_set_result(&job.address, ResultStatus::Calculating, ResultStatus::NotExist)
                .await?
        {
            self.fan_out(job, Failed, work).await?;
        }

        work.push_back(Work::CheckQueue(job.engine_type.clone()));
        Ok(())
    }

    /// RUNNING -> CANCELED: stop the remote computation unless others wait for it.
    async fn on_running_canceled(&self, job: &NodeJobRecord, work: &mut VecDeque<Work>) -> Result<()> {
        let waiting = self.waiters(job).await?;

        if waiting.is_empty() {
            self.send_cancel(job).await?;
            self.store
                .compare_and_set_result(&job.address, ResultStatus::Calculating, ResultStatus::NotExist)
                .await?;
        } else {
            tracing::info!(
                "Node job {} keeps running for {} waiting node jobs",
                job.uuid,
                waiting.len()
            );
        }

        work.push_back(Work::CheckQueue(job.engine_type.clone()));
        Ok(())
    }

    /// The last waiter left: stop a computation that only kept running for it.
    async fn on_waiter_canceled(&self, job: &NodeJobRecord) -> Result<()> {
        if !self.waiters(job).await?.is_empty() {
            return Ok(());
        }

        let running = self
            .store
            .jobs_with_address(&job.address, Running)
            .await?;
        if !running.is_empty() {
            return Ok(());
        }

        let Some(row) = self.store.result(&job.address).await? else {
            return Ok(());
        };
        if row.status != ResultStatus::Calculating {
            return Ok(());
        }

        for holder in self.store.jobs_with_address(&job.address, Canceled).await? {
            if holder.worker.is_some() {
                tracing::info!(
                    "Last waiter of {} canceled, stopping node job {}",
                    job.address,
                    holder.uuid
                );
                self.send_cancel(&holder).await?;
            }
        }

        self.store
            .compare_and_set_result(&job.address, ResultStatus::Calculating, ResultStatus::NotExist)
            .await?;
        Ok(())
    }

    /// A canceled job that was left running reported its outcome.
    async fn settle_canceled_result(
        &self,
        job: &NodeJobRecord,
        reported: NodeJobStatus,
        work: &mut VecDeque<Work>,
    ) -> Result<()> {
        if job.worker.is_none() {
            return Ok(());
        }

        let settled = match reported {
            Finished => ResultStatus::Calculated,
            _ => ResultStatus::NotExist,
        };

        if self
            .store
            .compare_and_set_result(&job.address, ResultStatus::Calculating, settled)
            .await?
        {
            tracing::info!("Canceled node job {} settled result {}", job.uuid, job.address);
            self.fan_out(job, reported, work).await?;
            work.push_back(Work::CheckQueue(job.engine_type.clone()));
        }

        Ok(())
    }

    async fn waiters(&self, job: &NodeJobRecord) -> Result<Vec<NodeJobRecord>> {
        Ok(self
            .store
            .jobs_with_address(&job.address, WaitingSameResult)
            .await?
            .into_iter()
            .filter(|other| other.uuid != job.uuid)
            .collect())
    }

    async fn fan_out(&self, job: &NodeJobRecord, status: NodeJobStatus, work: &mut VecDeque<Work>) -> Result<()> {
        let text = match status {
            Finished => format!("Same result calculated by node job {}", job.uuid),
            _ => format!("Same result calculation by node job {} failed", job.uuid),
        };

        for waiter in self.waiters(job).await? {
            work.push_back(to_status(&waiter.uuid, status, text.clone()));
        }

        Ok(())
    }

    async fn finish_query(&self, query: &QueryId, status: QueryStatus, text: &str) -> Result<()> {
        match self.store.query(query).await? {
            Some(record) if !record.status.is_terminal() => {
                tracing::info!("Query {} {:?}: {}", query, status, text);
                self.store.set_query_status(query, status, text).await
            }
            _ => Ok(()),
        }
    }

    async fn send_cancel(&self, job: &NodeJobRecord) -> Result<()> {
        let Some(worker) = &job.worker else {
            return Ok(());
        };

        let message = serde_json::to_value(CancelNodeJobMessage {
            uuid: job.uuid.clone(),
            status: Canceled,
        })?;
        tracing::debug!("Requesting cancel of node job {} on {}", job.uuid, worker);
        self.broker.publish(&worker.job_topic(), message).await
    }

    async fn promote_queue_head(&self, engine_type: &EngineType, work: &mut VecDeque<Work>) -> Result<()> {
        if self.pool.least_loaded(engine_type, false).is_none() {
            return Ok(());
        }

        // jobs bound to a local node keep their score while only remote nodes are free
        let mut skipped = Vec::new();
        let mut promoted = None;

        while let Some((id, score)) = self.queue.pop_with_score(engine_type).await? {
            let id = NodeJobId(id);
            match self.store.node_job(&id).await? {
                Some(job) if job.status == InQueue => {
                    if job.address.storage.requires_local_worker()
                        && self.pool.least_loaded(engine_type, true).is_none()
                    {
                        skipped.push((id, score));
                        continue;
                    }
                    promoted = Some(id);
                    break;
                }
                _ => tracing::debug!("Dropping stale queue entry {}", id),
            }
        }

        for (id, score) in skipped {
            self.queue
                .enqueue_with_score(engine_type, &id.0, score)
                .await?;
        }

        if let Some(id) = promoted {
            work.push_back(to_status(&id, TakenFromQueue, "Taken from queue"));
        }

        Ok(())
    }
}
