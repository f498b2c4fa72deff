//! Query Manager
//!
//! `makejob` translates and plans a query, persists the query with its node
//! jobs and result rows, and publishes the leaf jobs as `NEW_OTL_JOB`. The
//! other operations read the persisted state back or publish `CANCEL_JOB`.

use super::protocol::MakeJobRequest;
use super::types::*;
use crate::dispatcher::broker::MessageBroker;
use crate::dispatcher::protocol::*;
use crate::dispatcher::store::JobStore;
use crate::dispatcher::types::*;
use crate::planner::translator::translate;
use crate::planner::{JobPlanner, PlanOptions};

use std::sync::Arc;

pub struct QueryManager {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn MessageBroker>,
    planner: JobPlanner,
    defaults: QueryDefaults,
}

impl QueryManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn MessageBroker>,
        planner: JobPlanner,
        defaults: QueryDefaults,
    ) -> Self {
        Self {
            store,
            broker,
            planner,
            defaults,
        }
    }

    pub async fn make_job(&self, request: MakeJobRequest) -> Result<JobSubmission, QueryError> {
        let cache_ttl = request.cache_ttl.unwrap_or(self.defaults.cache_ttl);
        let timeout = request.timeout.unwrap_or(self.defaults.timeout);

        let commands = translate(&request.otl_query).inspect_err(|e| {
            tracing::info!("Query <{}> of {} rejected: {}", request.otl_query, request.user, e)
        })?;

        let catalog = self.store.catalog().await?;
        let options = PlanOptions {
            tws: request.tws,
            twf: request.twf,
            shared_post_processing: request
                .shared_post_processing
                .unwrap_or(self.defaults.shared_post_processing),
            subsearch_is_node_job: request.subsearch_is_node_job,
        };
        let tree = self
            .planner
            .plan(commands, &catalog, &options)
            .inspect_err(|e| tracing::info!("Query <{}> not planned: {}", request.otl_query, e))?;

        let query_id = QueryId::new();
        self.store
            .insert_query(QueryRecord {
                uuid: query_id.clone(),
                query: request.otl_query.clone(),
                user: request.user.clone(),
                tws: request.tws,
                twf: request.twf,
                cache_ttl,
                timeout,
                created_ms: crate::now_ms(),
                status: QueryStatus::Planned,
                status_text: "Planned".to_string(),
            })
            .await?;

        let ids: Vec<NodeJobId> = tree
            .jobs
            .iter()
            .map(|job| NodeJobId(job.uuid.clone()))
            .collect();

        for (index, job) in tree.jobs.iter().enumerate() {
            let job_ttl = job.cache_ttl.unwrap_or(cache_ttl);
            self.store
                .get_or_create_result(&job.address, job_ttl)
                .await?;
            self.store
                .insert_node_job(NodeJobRecord {
                    uuid: ids[index].clone(),
                    query_id: query_id.clone(),
                    engine_type: job.engine_type.clone(),
                    commands: job.commands.clone(),
                    status: NodeJobStatus::Planned,
                    status_text: "Planned".to_string(),
                    next_job: job.next_job.map(|parent| ids[parent].clone()),
                    worker: None,
                    address: job.address.clone(),
                    cache_ttl: job_ttl,
                    last_finished_command: None,
                })
                .await?;
        }

        let mut leaves = Vec::new();
        for index in tree.leaves() {
            if let Some(record) = self.store.node_job(&ids[index]).await? {
                leaves.push(NodeJobMessage::from(&record));
            }
        }
        self.publish(OtlJobCommandName::NewOtlJob, leaves).await?;

        let root = tree.job(tree.root);
        tracing::info!(
            "Job {} of {} planned into {} node jobs, result at {}",
            query_id,
            request.user,
            tree.len(),
            root.address
        );

        Ok(JobSubmission {
            job_id: query_id,
            storage: root.address.storage,
            path: root.address.path.clone(),
        })
    }

    pub async fn check_job(&self, job_id: &QueryId) -> Result<JobState, QueryError> {
        let query = self.find(job_id).await?;

        if query.status != QueryStatus::Running {
            return Ok(JobState {
                status: query.status,
                status_text: query.status_text,
            });
        }

        let jobs = self.store.query_jobs(job_id).await?;
        let running = jobs
            .iter()
            .filter(|job| job.status == NodeJobStatus::Running)
            .count();
        let finished = jobs
            .iter()
            .filter(|job| job.status == NodeJobStatus::Finished)
            .count();

        Ok(JobState {
            status: query.status,
            status_text: format!(
                "Running {} of {} node_jobs. Finished {}",
                running,
                jobs.len(),
                finished
            ),
        })
    }

    pub async fn get_result(&self, job_id: &QueryId) -> Result<JobResult, QueryError> {
        let query = self.find(job_id).await?;
        if query.status != QueryStatus::Finished {
            return Err(QueryError::NotFinished(job_id.clone(), query.status));
        }

        let root = self
            .store
            .query_jobs(job_id)
            .await?
            .into_iter()
            .find(|job| job.next_job.is_none())
            .ok_or_else(|| anyhow::anyhow!("job {} has no root node job", job_id))?;

        self.store.touch_result(&root.address).await?;

        Ok(JobResult {
            data_url: root.address.data_url(),
            schema_url: root.address.schema_url(),
        })
    }

    /// Cancels the job's unfinished node jobs. A job that already ended is left as is.
    pub async fn cancel(&self, job_id: &QueryId) -> Result<JobState, QueryError> {
        let query = self.find(job_id).await?;
        if query.status.is_terminal() {
            return Ok(JobState {
                status: query.status,
                status_text: query.status_text,
            });
        }

        let text = "Canceled by user";
        self.store
            .set_query_status(job_id, QueryStatus::Canceled, text)
            .await?;

        let unfinished: Vec<NodeJobMessage> = self
            .store
            .unfinished_jobs(job_id)
            .await?
            .iter()
            .map(NodeJobMessage::from)
            .collect();
        tracing::info!("Canceling job {} ({} node jobs)", job_id, unfinished.len());
        self.publish(OtlJobCommandName::CancelJob, unfinished).await?;

        Ok(JobState {
            status: QueryStatus::Canceled,
            status_text: text.to_string(),
        })
    }

    async fn find(&self, job_id: &QueryId) -> Result<QueryRecord, QueryError> {
        self.store
            .query(job_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(job_id.clone()))
    }

    async fn publish(
        &self,
        command_name: OtlJobCommandName,
        node_jobs: Vec<NodeJobMessage>,
    ) -> Result<(), QueryError> {
        let message = OtlJobMessage {
            command_name,
            command: NodeJobList { node_jobs },
        };
        self.broker
            .publish(TOPIC_OTL_JOB, serde_json::to_value(message).map_err(anyhow::Error::from)?)
            .await?;
        Ok(())
    }
}
