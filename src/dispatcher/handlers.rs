//! Topic Handlers
//!
//! One handler per inbound topic. Handlers decode the JSON envelope and turn it
//! into pool updates and status changes; all lifecycle logic lives in the
//! `NodeJobStatusManager`.

use super::protocol::*;
use super::status_manager::NodeJobStatusManager;
use super::store::JobStore;
use super::types::*;
use crate::coordination::lock::DistributedLock;
use crate::pool::pool::WorkerPool;
use crate::pool::types::WorkerId;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const REGISTRATION_LOCK_TTL: Duration = Duration::from_secs(10);

/// Takes the lock guarding the durable deactivation of a computing node. It is
/// never released; it expires after `REGISTRATION_LOCK_TTL`.
pub(crate) async fn acquire_unregister_lock(lock: &dyn DistributedLock, id: &WorkerId) -> Result<bool> {
    let name = format!("unregister_computing_node_{}", id);
    Ok(lock.try_acquire(&name, REGISTRATION_LOCK_TTL).await?.is_some())
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn topic(&self) -> &str;

    async fn handle(&self, message: serde_json::Value) -> Result<()>;
}

/// Registration, heartbeats and errors of computing nodes.
pub struct ComputingNodeControlHandler {
    pool: Arc<WorkerPool>,
    store: Arc<dyn JobStore>,
    lock: Arc<dyn DistributedLock>,
    manager: Arc<NodeJobStatusManager>,
}

impl ComputingNodeControlHandler {
    pub fn new(
        pool: Arc<WorkerPool>,
        store: Arc<dyn JobStore>,
        lock: Arc<dyn DistributedLock>,
        manager: Arc<NodeJobStatusManager>,
    ) -> Self {
        Self {
            pool,
            store,
            lock,
            manager,
        }
    }

    async fn register(&self, id: WorkerId, command: RegisterCommand) -> Result<()> {
        let record = self.pool.register(
            id.clone(),
            command.computing_node_type.clone(),
            &command.host_id,
            command.resources.clone(),
        );

        // every dispatcher keeps its own pool, only one of them persists the node;
        // the lock is left to expire so late receivers of the broadcast skip the write
        let lock_name = format!("register_computing_node_{}", id);
        if self
            .lock
            .try_acquire(&lock_name, REGISTRATION_LOCK_TTL)
            .await?
            .is_some()
        {
            self.store
                .register_worker(WorkerRegistration {
                    uuid: id.clone(),
                    engine_type: command.computing_node_type,
                    host_id: command.host_id,
                    resources: command.resources,
                    command_syntax: command.otl_command_syntax,
                    active: true,
                })
                .await?;
        } else {
            tracing::debug!("Registration of {} persisted by another dispatcher", id);
        }

        self.manager.check_queue(&record.engine_type).await
    }

    async fn unregister(&self, id: WorkerId) -> Result<()> {
        let removed = self.pool.deregister(&id);

        if acquire_unregister_lock(self.lock.as_ref(), &id).await? {
            self.store.deactivate_worker(&id).await?;
        }

        self.manager
            .fail_worker_jobs(&id, &format!("Computing node {} unregistered", id))
            .await?;

        if let Some(record) = removed {
            self.manager.check_queue(&record.engine_type).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ComputingNodeControlHandler {
    fn topic(&self) -> &str {
        TOPIC_COMPUTING_NODE_CONTROL
    }

    async fn handle(&self, message: serde_json::Value) -> Result<()> {
        let message: ControlMessage = serde_json::from_value(message)?;
        let id = message.computing_node_uuid;

        match message.command_name {
            ControlCommandName::RegisterComputingNode => {
                let command: RegisterCommand = serde_json::from_value(message.command)?;
                self.register(id, command).await
            }
            ControlCommandName::UnregisterComputingNode => self.unregister(id).await,
            ControlCommandName::ResourceStatus => {
                let command: ResourceStatusCommand = serde_json::from_value(message.command)?;
                match self.pool.update_usage(&id, command.resources) {
                    Some(engine_type) => self.manager.check_queue(&engine_type).await,
                    None => {
                        tracing::warn!("Resource status from unregistered computing node {}", id);
                        Ok(())
                    }
                }
            }
            ControlCommandName::ErrorOccured => {
                let command: ErrorCommand =
                    serde_json::from_value(message.command).unwrap_or(ErrorCommand {
                        error: String::new(),
                    });
                tracing::error!("Computing node {} reported an error: {}", id, command.error);
                Ok(())
            }
        }
    }
}

/// Submission and cancellation of planned node jobs.
pub struct OtlJobHandler {
    manager: Arc<NodeJobStatusManager>,
}

impl OtlJobHandler {
    pub fn new(manager: Arc<NodeJobStatusManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl MessageHandler for OtlJobHandler {
    fn topic(&self) -> &str {
        TOPIC_OTL_JOB
    }

    async fn handle(&self, message: serde_json::Value) -> Result<()> {
        let message: OtlJobMessage = serde_json::from_value(message)?;

        let (status, text) = match message.command_name {
            OtlJobCommandName::NewOtlJob => (NodeJobStatus::ReadyToExecute, "Ready to execute"),
            OtlJobCommandName::CancelJob => (NodeJobStatus::Canceled, "Canceled by user"),
        };

        tracing::debug!(
            "{:?} with {} node jobs",
            message.command_name,
            message.command.node_jobs.len()
        );

        for job in message.command.node_jobs {
            self.manager.change_status(&job.uuid, status, text).await?;
        }

        Ok(())
    }
}

/// Progress reports of node jobs from computing nodes.
pub struct NodeJobStatusHandler {
    store: Arc<dyn JobStore>,
    manager: Arc<NodeJobStatusManager>,
}

impl NodeJobStatusHandler {
    pub fn new(store: Arc<dyn JobStore>, manager: Arc<NodeJobStatusManager>) -> Self {
        Self { store, manager }
    }
}

#[async_trait]
impl MessageHandler for NodeJobStatusHandler {
    fn topic(&self) -> &str {
        TOPIC_NODE_JOB_STATUS
    }

    async fn handle(&self, message: serde_json::Value) -> Result<()> {
        let message: NodeJobStatusMessage = serde_json::from_value(message)?;

        if let Some(command) = &message.last_finished_command {
            self.store
                .set_last_finished_command(&message.uuid, command)
                .await?;
        }

        self.manager
            .change_status(&message.uuid, message.status, &message.status_text)
            .await
    }
}
